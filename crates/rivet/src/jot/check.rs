//! Name resolution, type checking and lowering of wrapped compilation units.
//!
//! A batch is checked in three passes: class names are declared first so
//! units can see each other, then member signatures are resolved, then
//! bodies are checked and lowered to [`ClassImage`]s.

use super::ast::{self, BinaryOp, Expression, Member, Spanned, Statement, TypeExpr, UnaryOp};
use super::image::{CONSTRUCTOR, ClassImage, Expr, FieldImage, MethodImage, Place, Stmt};
use super::parser::parse_unit;
use super::types::{ClassPath, ClassSig, FieldSig, MethodSig, OBJECT, THROWABLE, Type, descriptor};
use crate::collab::SourceUnit;
use crate::diag::Diag;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Everything learned about one unit of a batch.
#[derive(Debug, Default)]
pub struct UnitReport {
    pub name: String,
    pub diagnostics: Vec<Diag>,
    /// Simple names resolved to classes of the unit's own package.
    pub resolved: BTreeSet<String>,
    pub images: Vec<ClassImage>,
    pub classes: Vec<ClassSig>,
}

/// Checks `units` against each other and the class path.
pub fn check(path: &ClassPath, units: &[SourceUnit]) -> Vec<UnitReport> {
    check_with_probe(path, units, None).0
}

/// Type of the expression at `range` of `unit`, as it would be written in source.
pub fn type_at(path: &ClassPath, unit: &SourceUnit, range: Range<usize>) -> Option<String> {
    let (_, probed, table) = check_with_probe(path, std::slice::from_ref(unit), Some(range));
    probed.and_then(|ty| table.written(&ty))
}

fn check_with_probe<'a>(
    path: &'a ClassPath,
    units: &[SourceUnit],
    probe: Option<Range<usize>>,
) -> (Vec<UnitReport>, Option<Type>, Table<'a>) {
    let parsed: Vec<_> = units.iter().map(|unit| parse_unit(&unit.text)).collect();
    let mut table = Table {
        path,
        batch: HashMap::new(),
    };
    let mut contexts: Vec<UnitCx> = units
        .iter()
        .map(|unit| UnitCx {
            name: unit.name.clone(),
            probe: probe.clone(),
            ..UnitCx::default()
        })
        .collect();

    for (cx, unit) in contexts.iter_mut().zip(&parsed) {
        match unit {
            Ok(unit) => {
                cx.env.package = unit.package.as_ref().map(|parts| parts.join(".")).unwrap_or_default();
                for class in &unit.classes {
                    table.declare(&cx.env.package, None, &class.node, &mut cx.declared);
                }
            }
            Err(diags) => cx.diagnostics.extend(diags.iter().cloned()),
        }
    }

    // Type imports shape signatures, static imports need them resolved.
    let mut checker = Checker { table };
    for (cx, unit) in contexts.iter_mut().zip(&parsed) {
        if let Ok(unit) = unit {
            checker.imports(cx, &unit.imports, false);
            for class in &unit.classes {
                let name = qualify(&cx.env.package, class.node.name.node);
                let signatures = checker.signatures(cx, &name, &[], &class.node);
                for signature in signatures {
                    checker.table.batch.insert(signature.name.clone(), signature);
                }
            }
        }
    }

    let mut probed = None;
    for (cx, unit) in contexts.iter_mut().zip(&parsed) {
        if let Ok(unit) = unit {
            checker.imports(cx, &unit.imports, true);
            for class in &unit.classes {
                let name = qualify(&cx.env.package, class.node.name.node);
                checker.class(cx, &name, &[], &class.node);
            }
        }
        if cx.probed.is_some() {
            probed = cx.probed.take();
        }
    }

    let reports = contexts
        .into_iter()
        .map(|cx| UnitReport {
            classes: cx
                .declared
                .iter()
                .filter_map(|name| checker.table.batch.get(name).cloned())
                .collect(),
            name: cx.name,
            diagnostics: cx.diagnostics,
            resolved: cx.resolved,
            images: cx.images,
        })
        .collect();
    (reports, probed, checker.table)
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(character) = chars.next() {
        if character != '\\' {
            out.push(character);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn completes_normally(statements: &[Stmt]) -> bool {
    statements.iter().all(|statement| match statement {
        Stmt::Return(_) | Stmt::Throw(_) => false,
        Stmt::Block(body) => completes_normally(body),
        Stmt::If { then, otherwise, .. } => completes_normally(then) || completes_normally(otherwise),
        Stmt::While { condition, .. } => *condition != Expr::Bool(true),
        Stmt::Local { .. } | Stmt::Expr(_) => true,
    })
}

struct Table<'a> {
    path: &'a ClassPath,
    batch: HashMap<String, ClassSig>,
}

impl Table<'_> {
    fn get(&self, name: &str) -> Option<&ClassSig> {
        self.batch.get(name).or_else(|| self.path.get(name))
    }

    fn has_package(&self, package: &str) -> bool {
        let prefix = format!("{package}.");
        self.batch.keys().map(String::as_str).chain(self.path.names()).any(|name| name.starts_with(&prefix))
    }

    /// Registers a class and its member classes by name, members unresolved.
    /// Members of a top-level class are displayed without it.
    fn declare(&mut self, prefix: &str, display: Option<&str>, class: &ast::Class<'_>, declared: &mut Vec<String>) {
        let name = qualify(prefix, class.name.node);
        let mut signature = ClassSig::new(name.clone(), display.unwrap_or(class.name.node));
        let nested: Vec<&ast::Class<'_>> = class
            .members
            .iter()
            .filter_map(|member| match &member.node {
                Member::Class(nested) => Some(nested),
                _ => None,
            })
            .collect();
        signature.nested = nested.iter().map(|nested| nested.name.node.to_string()).collect();
        self.batch.insert(name.clone(), signature);
        declared.push(name.clone());
        for member in nested {
            let member_display = match display {
                Some(display) => format!("{display}.{}", member.name.node),
                None => member.name.node.to_string(),
            };
            self.declare(&name, Some(&member_display), member, declared);
        }
    }

    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        let mut current = Some(sub.to_string());
        for _ in 0..32 {
            let Some(name) = current else {
                return false;
            };
            if name == sup {
                return true;
            }
            current = self.get(&name).and_then(|class| class.superclass.clone());
        }
        false
    }

    fn find_field(&self, class: &str, name: &str) -> Option<(String, FieldSig)> {
        let mut current = Some(class.to_string());
        for _ in 0..32 {
            let signature = self.get(current.as_deref()?)?;
            if let Some(field) = signature.fields.iter().find(|field| field.name == name) {
                return Some((signature.name.clone(), field.clone()));
            }
            current = signature.superclass.clone();
        }
        None
    }

    fn methods_named(&self, class: &str, name: &str) -> Vec<(String, MethodSig)> {
        let mut found: Vec<(String, MethodSig)> = Vec::new();
        let mut current = Some(class.to_string());
        for _ in 0..32 {
            let Some(signature) = current.as_deref().and_then(|class| self.get(class)) else {
                break;
            };
            for method in signature.methods.iter().filter(|method| method.name == name) {
                if !found.iter().any(|(_, known)| known.descriptor() == method.descriptor()) {
                    found.push((signature.name.clone(), method.clone()));
                }
            }
            current = signature.superclass.clone();
        }
        found
    }

    fn has_static_member(&self, class: &str, name: &str) -> bool {
        self.find_field(class, name).is_some_and(|(_, field)| field.is_static)
            || self.methods_named(class, name).iter().any(|(_, method)| method.is_static)
            || self.get(class).is_some_and(|signature| signature.nested.iter().any(|nested| nested == name))
    }

    fn assignable(&self, from: &Type, to: &Type) -> bool {
        match (from, to) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Void, _) | (_, Type::Void) => false,
            (from, to) if from == to => true,
            (_, Type::Class(object)) if object == OBJECT => true,
            (_, Type::Param(_)) => true,
            (Type::Null, Type::Class(_)) => true,
            (Type::Class(sub), Type::Class(sup)) => self.is_subclass(sub, sup),
            _ => false,
        }
    }

    /// How a type is shown in messages.
    fn show(&self, ty: &Type) -> String {
        match ty {
            Type::Int => "int".to_string(),
            Type::Boolean => "boolean".to_string(),
            Type::Void => "void".to_string(),
            Type::Null => "<null>".to_string(),
            Type::Class(name) => self.get(name).map_or_else(|| name.clone(), |class| class.display.clone()),
            Type::Param(name) => name.clone(),
            Type::Unknown => "?".to_string(),
        }
    }

    /// How a type is written in a declaration, if it can be.
    fn written(&self, ty: &Type) -> Option<String> {
        match ty {
            Type::Null | Type::Param(_) => Some("Object".to_string()),
            Type::Unknown => None,
            ty => Some(self.show(ty)),
        }
    }
}

#[derive(Debug, Default)]
struct Env {
    package: String,
    single_types: HashMap<String, String>,
    on_demand: Vec<String>,
    static_single: Vec<(String, String)>,
    static_on_demand: Vec<String>,
}

#[derive(Default)]
struct UnitCx {
    name: String,
    env: Env,
    declared: Vec<String>,
    diagnostics: Vec<Diag>,
    resolved: BTreeSet<String>,
    images: Vec<ClassImage>,
    probe: Option<Range<usize>>,
    probed: Option<Type>,
}

impl UnitCx {
    fn error(&mut self, code: &str, message: impl Into<String>, span: Range<usize>) {
        self.diagnostics.push(Diag::semantic(code, message, span));
    }

    fn unresolved(&mut self, name: &str, what: &str, span: Range<usize>) {
        self.diagnostics.push(Diag::unresolved(name, what, span));
    }

    /// Records `name` as resolved when it leads into this unit's package.
    fn note(&mut self, name: &str, class: &str) {
        if !self.env.package.is_empty() && class.starts_with(&format!("{}.", self.env.package)) {
            self.resolved.insert(name.to_string());
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    /// Enclosing classes, innermost last.
    classes: Vec<String>,
    type_parameters: Vec<String>,
    is_static: bool,
    return_type: Option<Type>,
    locals: Vec<Vec<(String, Type)>>,
}

impl Scope {
    fn new(classes: &[String]) -> Self {
        Self {
            classes: classes.to_vec(),
            locals: vec![Vec::new()],
            ..Self::default()
        }
    }

    fn innermost(&self) -> &str {
        self.classes.last().map_or("", String::as_str)
    }

    fn local(&self, name: &str) -> Option<&Type> {
        self.locals
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(local, _)| local == name)
            .map(|(_, ty)| ty)
    }

    fn declare(&mut self, name: &str, ty: Type) {
        if let Some(scope) = self.locals.last_mut() {
            scope.push((name.to_string(), ty));
        }
    }

    fn push(&mut self) {
        self.locals.push(Vec::new());
    }

    fn pop(&mut self) {
        self.locals.pop();
    }
}

/// A name in qualifier position: a value or a class.
enum Target {
    Value(Type, Expr),
    Class(String),
}

enum Receiver {
    Implicit,
    Class,
    Value(Expr),
}

struct Checker<'a> {
    table: Table<'a>,
}

impl Checker<'_> {
    fn imports(&self, cx: &mut UnitCx, imports: &[Spanned<ast::Import<'_>>], statics: bool) {
        for import in imports.iter().filter(|import| import.node.is_static == statics) {
            let name = import.node.name();
            let span = import.range();
            match (import.node.is_static, import.node.on_demand) {
                (false, false) => match self.table.get(&name) {
                    Some(class) => {
                        cx.env.single_types.insert(class.simple_name().to_string(), name);
                    }
                    None => cx.error("doesnt.exist", format!("cannot find class {name}"), span),
                },
                (false, true) => {
                    if self.table.get(&name).is_some() || self.table.has_package(&name) {
                        cx.env.on_demand.push(name);
                    } else {
                        cx.error("doesnt.exist", format!("package {name} does not exist"), span);
                    }
                }
                (true, false) => {
                    let (class, member) = name.rsplit_once('.').unwrap_or(("", name.as_str()));
                    if self.table.get(class).is_none() {
                        cx.error("doesnt.exist", format!("cannot find class {class}"), span);
                    } else if !self.table.has_static_member(class, member) {
                        cx.error("cant.resolve", format!("cannot find static member {member} in {class}"), span);
                    } else {
                        cx.env.static_single.push((class.to_string(), member.to_string()));
                    }
                }
                (true, true) => match self.table.get(&name) {
                    Some(_) => cx.env.static_on_demand.push(name),
                    None => cx.error("doesnt.exist", format!("cannot find class {name}"), span),
                },
            }
        }
    }

    fn simple_type(&self, cx: &mut UnitCx, scope: &Scope, name: &str) -> Option<Type> {
        if scope.type_parameters.iter().any(|parameter| parameter == name) {
            return Some(Type::Param(name.to_string()));
        }
        for class in scope.classes.iter().rev() {
            let Some(signature) = self.table.get(class) else {
                continue;
            };
            if signature.simple_name() == name {
                return Some(Type::Class(class.clone()));
            }
            if signature.nested.iter().any(|nested| nested == name) {
                return Some(Type::Class(format!("{class}.{name}")));
            }
        }
        if let Some(full) = cx.env.single_types.get(name).cloned() {
            cx.note(name, &full);
            return Some(Type::Class(full));
        }
        let same_package = qualify(&cx.env.package, name);
        if self.table.get(&same_package).is_some() {
            return Some(Type::Class(same_package));
        }
        let lang = format!("java.lang.{name}");
        if self.table.get(&lang).is_some() {
            return Some(Type::Class(lang));
        }
        let on_demand = cx
            .env
            .on_demand
            .iter()
            .map(|prefix| format!("{prefix}.{name}"))
            .find(|candidate| self.table.get(candidate).is_some());
        if let Some(full) = on_demand {
            cx.note(name, &full);
            return Some(Type::Class(full));
        }
        None
    }

    fn resolve_type(&self, cx: &mut UnitCx, scope: &Scope, ty: &Spanned<TypeExpr<'_>>, report: bool) -> Type {
        let parts = match &ty.node {
            TypeExpr::Int => return Type::Int,
            TypeExpr::Boolean => return Type::Boolean,
            TypeExpr::Void => return Type::Void,
            TypeExpr::Named(parts) => parts,
        };
        let resolved = match parts.split_first() {
            Some((first, [])) => self.simple_type(cx, scope, first),
            Some((first, rest)) => {
                let nested = self.simple_type(cx, scope, first).and_then(|head| {
                    let Type::Class(mut current) = head else {
                        return None;
                    };
                    for part in rest {
                        let has_member = self
                            .table
                            .get(&current)
                            .is_some_and(|class| class.nested.iter().any(|nested| nested == part));
                        if !has_member {
                            return None;
                        }
                        current = format!("{current}.{part}");
                    }
                    Some(Type::Class(current))
                });
                let full = parts.join(".");
                nested.or_else(|| self.table.get(&full).map(|_| Type::Class(full)))
            }
            None => None,
        };
        match resolved {
            Some(ty) => ty,
            None => {
                if report {
                    cx.unresolved(&parts.join("."), "class", ty.range());
                }
                Type::Unknown
            }
        }
    }

    /// Resolves member signatures of `class` and its member classes.
    fn signatures(&self, cx: &mut UnitCx, name: &str, outer: &[String], class: &ast::Class<'_>) -> Vec<ClassSig> {
        let Some(mut signature) = self.table.get(name).cloned() else {
            return Vec::new();
        };
        let mut classes = outer.to_vec();
        classes.push(name.to_string());
        let scope = Scope::new(&classes);
        let mut nested = Vec::new();
        for member in &class.members {
            match &member.node {
                Member::Field(field) => {
                    let ty = self.resolve_type(cx, &scope, &field.ty, true);
                    if signature.fields.iter().any(|known| known.name == field.name.node) {
                        cx.error(
                            "already.defined",
                            format!("variable {} is already defined in class {}", field.name.node, signature.display),
                            field.name.range(),
                        );
                    }
                    signature.fields.push(FieldSig {
                        name: field.name.node.to_string(),
                        ty,
                        is_static: field.is_static(),
                    });
                }
                Member::Method(method) => {
                    let scope = Scope {
                        type_parameters: method.type_parameters.iter().map(|parameter| parameter.node.to_string()).collect(),
                        ..scope.clone()
                    };
                    let parameters: Vec<Type> = method
                        .parameters
                        .iter()
                        .map(|parameter| self.resolve_type(cx, &scope, &parameter.ty, true))
                        .collect();
                    for thrown in &method.throws {
                        self.resolve_type(cx, &scope, thrown, true);
                    }
                    match &method.return_type {
                        Some(return_type) => {
                            let ret = self.resolve_type(cx, &scope, return_type, true);
                            let duplicate = signature.methods.iter().any(|known| {
                                known.name == method.name.node && known.descriptor() == descriptor(&parameters)
                            });
                            if duplicate {
                                cx.error(
                                    "already.defined",
                                    format!("method {} is already defined in class {}", method.name.node, signature.display),
                                    method.name.range(),
                                );
                            }
                            signature.methods.push(MethodSig {
                                name: method.name.node.to_string(),
                                parameters,
                                ret,
                                is_static: method.is_static(),
                            });
                        }
                        None => signature.constructors.push(parameters),
                    }
                }
                Member::Class(member_class) => {
                    let member_name = format!("{name}.{}", member_class.name.node);
                    nested.extend(self.signatures(cx, &member_name, &classes, member_class));
                }
            }
        }
        let mut all = vec![signature];
        all.extend(nested);
        all
    }

    fn class(&self, cx: &mut UnitCx, name: &str, outer: &[String], class: &ast::Class<'_>) {
        let mut classes = outer.to_vec();
        classes.push(name.to_string());
        let display = self.table.get(name).map_or_else(|| name.to_string(), |class| class.display.clone());
        let simple = class.name.node;
        let mut image = ClassImage {
            name: name.to_string(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        for member in &class.members {
            match &member.node {
                Member::Field(field) => {
                    let mut scope = Scope::new(&classes);
                    scope.is_static = field.is_static();
                    let ty = self.resolve_type(cx, &scope, &field.ty, false);
                    if ty == Type::Void {
                        cx.error("void.var", "'void' type not allowed here", field.ty.range());
                    }
                    let init = field.init.as_ref().map(|init| self.value(cx, &scope, init, &ty));
                    image.fields.push(FieldImage {
                        name: field.name.node.to_string(),
                        ty,
                        is_static: field.is_static(),
                        init,
                    });
                }
                Member::Method(method) => {
                    if method.return_type.is_none() && method.name.node != simple {
                        cx.error(
                            "missing.ret.type",
                            "invalid method declaration; return type required",
                            method.name.range(),
                        );
                    }
                    image.methods.extend(self.method(cx, &classes, &display, method));
                }
                Member::Class(member_class) => {
                    let member_name = format!("{name}.{}", member_class.name.node);
                    self.class(cx, &member_name, &classes, member_class);
                }
            }
        }
        cx.images.push(image);
    }

    fn method(&self, cx: &mut UnitCx, classes: &[String], display: &str, method: &ast::Method<'_>) -> Option<MethodImage> {
        let mut scope = Scope::new(classes);
        scope.type_parameters = method.type_parameters.iter().map(|parameter| parameter.node.to_string()).collect();
        let is_constructor = method.return_type.is_none();
        scope.is_static = method.is_static() && !is_constructor;
        let ret = match &method.return_type {
            Some(return_type) => self.resolve_type(cx, &scope, return_type, false),
            None => Type::Void,
        };
        scope.return_type = Some(ret.clone());
        let mut parameter_types = Vec::new();
        let mut parameter_names = Vec::new();
        for parameter in &method.parameters {
            let ty = self.resolve_type(cx, &scope, &parameter.ty, false);
            if scope.local(parameter.name.node).is_some() {
                cx.error(
                    "already.defined",
                    format!("variable {} is already defined in method {}", parameter.name.node, method.name.node),
                    parameter.name.range(),
                );
            }
            scope.declare(parameter.name.node, ty.clone());
            parameter_types.push(ty);
            parameter_names.push(parameter.name.node.to_string());
        }
        let Some(body) = &method.body else {
            cx.error("missing.body", format!("missing method body in {display}"), method.name.range());
            return None;
        };
        let statements = self.block(cx, &mut scope, &body.node);
        if ret != Type::Void && ret != Type::Unknown && completes_normally(&statements) {
            let end = body.span.end;
            cx.error("missing.ret", "missing return statement", end.saturating_sub(1)..end);
        }
        Some(MethodImage {
            name: if is_constructor {
                CONSTRUCTOR.to_string()
            } else {
                method.name.node.to_string()
            },
            descriptor: descriptor(&parameter_types),
            parameters: parameter_names,
            ret,
            is_static: scope.is_static,
            body: statements,
        })
    }

    fn block(&self, cx: &mut UnitCx, scope: &mut Scope, statements: &[Spanned<Statement<'_>>]) -> Vec<Stmt> {
        scope.push();
        let lowered = statements
            .iter()
            .map(|statement| self.statement(cx, scope, statement))
            .collect();
        scope.pop();
        lowered
    }

    fn nested(&self, cx: &mut UnitCx, scope: &mut Scope, statement: &Spanned<Statement<'_>>) -> Vec<Stmt> {
        match &statement.node {
            Statement::Block(statements) => self.block(cx, scope, statements),
            _ => self.block(cx, scope, std::slice::from_ref(statement)),
        }
    }

    fn statement(&self, cx: &mut UnitCx, scope: &mut Scope, statement: &Spanned<Statement<'_>>) -> Stmt {
        match &statement.node {
            Statement::Local { ty, name, init } => {
                let ty = self.resolve_type(cx, scope, ty, true);
                if ty == Type::Void {
                    cx.error("void.var", "'void' type not allowed here", name.range());
                }
                if scope.local(name.node).is_some() {
                    cx.error(
                        "already.defined",
                        format!("variable {} is already defined", name.node),
                        name.range(),
                    );
                }
                let init = init.as_ref().map(|init| self.value(cx, scope, init, &ty));
                scope.declare(name.node, ty.clone());
                Stmt::Local {
                    name: name.node.to_string(),
                    ty,
                    init,
                }
            }
            Statement::Expression(expression) => {
                if !matches!(
                    expression.node,
                    Expression::Assign { .. } | Expression::Call { .. } | Expression::New { .. }
                ) {
                    cx.error("not.stmt", "not a statement", expression.range());
                }
                Stmt::Expr(self.expr(cx, scope, expression).map_or(Expr::Null, |(_, expr)| expr))
            }
            Statement::Return(value) => {
                let expected = scope.return_type.clone().unwrap_or(Type::Void);
                match value {
                    Some(value) if expected == Type::Void => {
                        cx.error("unexpected.ret", "incompatible types: unexpected return value", value.range());
                        Stmt::Return(None)
                    }
                    Some(value) => Stmt::Return(Some(self.value(cx, scope, value, &expected))),
                    None if expected != Type::Void && expected != Type::Unknown => {
                        cx.error("missing.ret.val", "missing return value", statement.range());
                        Stmt::Return(None)
                    }
                    None => Stmt::Return(None),
                }
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => Stmt::If {
                condition: self.value(cx, scope, condition, &Type::Boolean),
                then: self.nested(cx, scope, then),
                otherwise: otherwise
                    .as_ref()
                    .map(|otherwise| self.nested(cx, scope, otherwise))
                    .unwrap_or_default(),
            },
            Statement::While { condition, body } => Stmt::While {
                condition: self.value(cx, scope, condition, &Type::Boolean),
                body: self.nested(cx, scope, body),
            },
            Statement::Block(statements) => Stmt::Block(self.block(cx, scope, statements)),
            Statement::Throw(value) => {
                let thrown = self.expr(cx, scope, value);
                if let Some((ty, _)) = &thrown {
                    if !self.table.assignable(ty, &Type::Class(THROWABLE.to_string())) {
                        cx.error(
                            "incompatible",
                            format!("incompatible types: {} cannot be converted to Throwable", self.table.show(ty)),
                            value.range(),
                        );
                    }
                }
                Stmt::Throw(thrown.map_or(Expr::Null, |(_, expr)| expr))
            }
            Statement::Empty => Stmt::Block(Vec::new()),
        }
    }

    /// An expression that must be assignable to `expected`.
    fn value(&self, cx: &mut UnitCx, scope: &Scope, expression: &Spanned<Expression<'_>>, expected: &Type) -> Expr {
        let Some((ty, expr)) = self.expr(cx, scope, expression) else {
            return Expr::Null;
        };
        if !self.table.assignable(&ty, expected) {
            cx.error(
                "incompatible",
                format!(
                    "incompatible types: {} cannot be converted to {}",
                    self.table.show(&ty),
                    self.table.show(expected)
                ),
                expression.range(),
            );
        }
        expr
    }

    fn expr(&self, cx: &mut UnitCx, scope: &Scope, expression: &Spanned<Expression<'_>>) -> Option<(Type, Expr)> {
        let checked = self.expr_inner(cx, scope, expression);
        if let Some((ty, _)) = &checked {
            if cx.probe.as_ref() == Some(&expression.range()) {
                cx.probed = Some(ty.clone());
            }
        }
        checked
    }

    fn expr_inner(&self, cx: &mut UnitCx, scope: &Scope, expression: &Spanned<Expression<'_>>) -> Option<(Type, Expr)> {
        let span = expression.range();
        match &expression.node {
            Expression::Int(value) => Some((Type::Int, Expr::Int(*value))),
            Expression::Str(text) => Some((Type::string(), Expr::Str(unescape(text)))),
            Expression::Bool(value) => Some((Type::Boolean, Expr::Bool(*value))),
            Expression::Null => Some((Type::Null, Expr::Null)),
            Expression::This => {
                if scope.is_static {
                    cx.error(
                        "non-static.cant.be.ref",
                        "non-static variable this cannot be referenced from a static context",
                        span,
                    );
                    return None;
                }
                Some((Type::Class(scope.innermost().to_string()), Expr::This))
            }
            Expression::Name(name) => match self.name(cx, scope, name, span, false)? {
                Target::Value(ty, expr) => Some((ty, expr)),
                Target::Class(_) => None,
            },
            Expression::Field { target, name } => {
                let target = self.target(cx, scope, target)?;
                self.field(cx, target, name)
            }
            Expression::Call {
                target,
                name,
                arguments,
            } => self.call(cx, scope, target.as_deref(), name, arguments),
            Expression::New { class, arguments } => self.new_instance(cx, scope, class, arguments),
            Expression::Unary { op, operand } => {
                let (ty, operand) = self.expr(cx, scope, operand)?;
                let (expected, symbol) = match op {
                    UnaryOp::Negate => (Type::Int, "-"),
                    UnaryOp::Not => (Type::Boolean, "!"),
                };
                if ty != expected && ty != Type::Unknown {
                    cx.error(
                        "bad.operand",
                        format!("bad operand type {} for unary operator '{symbol}'", self.table.show(&ty)),
                        span,
                    );
                    return None;
                }
                Some((
                    expected,
                    Expr::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                ))
            }
            Expression::Binary { op, lhs, rhs } => {
                let lhs = self.expr(cx, scope, lhs);
                let rhs = self.expr(cx, scope, rhs);
                let ((left, lhs), (right, rhs)) = (lhs?, rhs?);
                self.binary(cx, *op, (left, lhs), (right, rhs), span)
            }
            Expression::Assign { target, value } => {
                let (ty, target_expr) = self.expr_inner(cx, scope, target)?;
                let place = match target_expr {
                    Expr::Local(name) => Place::Local(name),
                    Expr::StaticField { class, name } => Place::StaticField { class, name },
                    Expr::Field { target, name } => Place::Field { target, name },
                    _ => {
                        cx.error("not.assignable", "unexpected type: required variable, found value", target.range());
                        return None;
                    }
                };
                let value = self.value(cx, scope, value, &ty);
                Some((
                    ty,
                    Expr::Assign {
                        target: place,
                        value: Box::new(value),
                    },
                ))
            }
        }
    }

    fn binary(&self, cx: &mut UnitCx, op: BinaryOp, lhs: (Type, Expr), rhs: (Type, Expr), span: Range<usize>) -> Option<(Type, Expr)> {
        let (left, lhs) = lhs;
        let (right, rhs) = rhs;
        let unknown = left == Type::Unknown || right == Type::Unknown;
        let string = Type::string();
        let binary = |ty: Type| {
            Some((
                ty,
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs.clone()),
                    rhs: Box::new(rhs.clone()),
                },
            ))
        };
        let ints = (left == Type::Int && right == Type::Int) || unknown;
        match op {
            BinaryOp::Add if left == string || right == string => Some((
                string,
                Expr::Concat {
                    lhs: Box::new(lhs.clone()),
                    rhs: Box::new(rhs.clone()),
                },
            )),
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder if ints => {
                binary(Type::Int)
            }
            BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual if ints => {
                binary(Type::Boolean)
            }
            BinaryOp::Equal | BinaryOp::NotEqual
                if unknown || left == right || (left.is_reference() && right.is_reference()) =>
            {
                binary(Type::Boolean)
            }
            BinaryOp::And | BinaryOp::Or if unknown || (left == Type::Boolean && right == Type::Boolean) => {
                binary(Type::Boolean)
            }
            _ => {
                cx.error(
                    "bad.operand",
                    format!(
                        "bad operand types for binary operator '{op}': {} and {}",
                        self.table.show(&left),
                        self.table.show(&right)
                    ),
                    span,
                );
                None
            }
        }
    }

    /// Resolves a simple name as a local, a field or, in qualifier position, a class.
    fn name(&self, cx: &mut UnitCx, scope: &Scope, name: &str, span: Range<usize>, qualifier: bool) -> Option<Target> {
        if let Some(ty) = scope.local(name) {
            return Some(Target::Value(ty.clone(), Expr::Local(name.to_string())));
        }
        for class in scope.classes.iter().rev() {
            let Some((owner, field)) = self.table.find_field(class, name) else {
                continue;
            };
            if field.is_static {
                return Some(Target::Value(field.ty, Expr::StaticField { class: owner, name: name.to_string() }));
            }
            if class == scope.innermost() && !scope.is_static {
                return Some(Target::Value(
                    field.ty,
                    Expr::Field {
                        target: Box::new(Expr::This),
                        name: name.to_string(),
                    },
                ));
            }
            cx.error(
                "non-static.cant.be.ref",
                format!("non-static variable {name} cannot be referenced from a static context"),
                span,
            );
            return None;
        }
        let imported = cx
            .env
            .static_single
            .iter()
            .filter(|(_, member)| member == name)
            .map(|(class, _)| class.clone())
            .chain(cx.env.static_on_demand.iter().cloned())
            .find_map(|class| self.table.find_field(&class, name).filter(|(_, field)| field.is_static));
        if let Some((owner, field)) = imported {
            cx.note(name, &owner);
            return Some(Target::Value(field.ty, Expr::StaticField { class: owner, name: name.to_string() }));
        }
        if qualifier {
            if let Some(Type::Class(class)) = self.simple_type(cx, scope, name) {
                return Some(Target::Class(class));
            }
        }
        cx.unresolved(name, "variable", span);
        None
    }

    fn target(&self, cx: &mut UnitCx, scope: &Scope, target: &Spanned<Expression<'_>>) -> Option<Target> {
        match &target.node {
            Expression::Name(name) => self.name(cx, scope, name, target.range(), true),
            Expression::Field { target: inner, name } => {
                let inner = self.target(cx, scope, inner)?;
                if let Target::Class(class) = &inner {
                    let is_member_class = self
                        .table
                        .get(class)
                        .is_some_and(|signature| signature.nested.iter().any(|nested| nested == name.node));
                    if is_member_class {
                        return Some(Target::Class(format!("{class}.{}", name.node)));
                    }
                }
                let (ty, expr) = self.field(cx, inner, name)?;
                Some(Target::Value(ty, expr))
            }
            _ => {
                let (ty, expr) = self.expr(cx, scope, target)?;
                Some(Target::Value(ty, expr))
            }
        }
    }

    fn field(&self, cx: &mut UnitCx, target: Target, name: &Spanned<&str>) -> Option<(Type, Expr)> {
        let (class, receiver) = match target {
            Target::Class(class) => (class, None),
            Target::Value(Type::Class(class), expr) => (class, Some(expr)),
            Target::Value(Type::Param(_), expr) => (OBJECT.to_string(), Some(expr)),
            Target::Value(Type::Unknown, _) => return Some((Type::Unknown, Expr::Null)),
            Target::Value(ty, _) => {
                cx.error("cant.deref", format!("{} cannot be dereferenced", self.table.show(&ty)), name.range());
                return None;
            }
        };
        let Some((owner, field)) = self.table.find_field(&class, name.node) else {
            cx.unresolved(name.node, "variable", name.range());
            return None;
        };
        if field.is_static {
            return Some((field.ty, Expr::StaticField { class: owner, name: field.name }));
        }
        match receiver {
            Some(receiver) => Some((
                field.ty,
                Expr::Field {
                    target: Box::new(receiver),
                    name: field.name,
                },
            )),
            None => {
                cx.error(
                    "non-static.cant.be.ref",
                    format!("non-static variable {} cannot be referenced from a static context", name.node),
                    name.range(),
                );
                None
            }
        }
    }

    fn unqualified_methods(&self, cx: &mut UnitCx, scope: &Scope, name: &str) -> Vec<(String, MethodSig)> {
        for class in scope.classes.iter().rev() {
            let methods = self.table.methods_named(class, name);
            if !methods.is_empty() {
                return methods;
            }
        }
        let mut imported: Vec<(String, MethodSig)> = Vec::new();
        let single = cx.env.static_single.iter().filter(|(_, member)| member == name).map(|(class, _)| class);
        for class in single.chain(cx.env.static_on_demand.iter()) {
            for (owner, method) in self.table.methods_named(class, name) {
                let duplicate = imported
                    .iter()
                    .any(|(known_owner, known)| *known_owner == owner && known.descriptor() == method.descriptor());
                if method.is_static && !duplicate {
                    imported.push((owner, method));
                }
            }
        }
        if let Some((owner, _)) = imported.first() {
            let owner = owner.clone();
            cx.note(name, &owner);
        }
        imported
    }

    /// Picks the applicable overload with the most exactly matching parameters,
    /// the first declared on a tie.
    fn select(&self, candidates: &[Vec<Type>], arguments: &[Type]) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (index, parameters) in candidates.iter().enumerate() {
            let applicable = parameters.len() == arguments.len()
                && parameters
                    .iter()
                    .zip(arguments)
                    .all(|(parameter, argument)| self.table.assignable(argument, parameter));
            if !applicable {
                continue;
            }
            let exact = parameters.iter().zip(arguments).filter(|(parameter, argument)| parameter == argument).count();
            if best.map_or(true, |(_, most)| exact > most) {
                best = Some((index, exact));
            }
        }
        best.map(|(index, _)| index)
    }

    fn arguments(&self, cx: &mut UnitCx, scope: &Scope, arguments: &[Spanned<Expression<'_>>]) -> Option<(Vec<Type>, Vec<Expr>)> {
        let checked: Vec<_> = arguments.iter().map(|argument| self.expr(cx, scope, argument)).collect();
        let checked: Option<Vec<_>> = checked.into_iter().collect();
        Some(checked?.into_iter().unzip())
    }

    fn call(
        &self,
        cx: &mut UnitCx,
        scope: &Scope,
        target: Option<&Spanned<Expression<'_>>>,
        name: &Spanned<&str>,
        arguments: &[Spanned<Expression<'_>>],
    ) -> Option<(Type, Expr)> {
        let (methods, receiver) = match target {
            None => (self.unqualified_methods(cx, scope, name.node), Receiver::Implicit),
            Some(target) => match self.target(cx, scope, target)? {
                Target::Class(class) => (self.table.methods_named(&class, name.node), Receiver::Class),
                Target::Value(Type::Class(class), expr) => (self.table.methods_named(&class, name.node), Receiver::Value(expr)),
                Target::Value(Type::Param(_), expr) => (self.table.methods_named(OBJECT, name.node), Receiver::Value(expr)),
                Target::Value(Type::Unknown, _) => {
                    let _ = self.arguments(cx, scope, arguments);
                    return Some((Type::Unknown, Expr::Null));
                }
                Target::Value(ty, _) => {
                    cx.error("cant.deref", format!("{} cannot be dereferenced", self.table.show(&ty)), name.range());
                    return None;
                }
            },
        };
        let checked = self.arguments(cx, scope, arguments);
        if methods.is_empty() {
            cx.unresolved(name.node, "method", name.range());
            return None;
        }
        let (types, arguments) = checked?;
        let candidates: Vec<Vec<Type>> = methods.iter().map(|(_, method)| method.parameters.clone()).collect();
        let Some(index) = self.select(&candidates, &types) else {
            let shown: Vec<String> = types.iter().map(|ty| self.table.show(ty)).collect();
            cx.error(
                "cant.apply",
                format!("method {} cannot be applied to given types ({})", name.node, shown.join(", ")),
                name.range(),
            );
            return None;
        };
        let (owner, method) = &methods[index];
        let ret = match &method.ret {
            Type::Param(_) => Type::object(),
            ret => ret.clone(),
        };
        if method.is_static {
            return Some((
                ret,
                Expr::StaticCall {
                    class: owner.clone(),
                    method: method.name.clone(),
                    descriptor: method.descriptor(),
                    arguments,
                },
            ));
        }
        let target = match receiver {
            Receiver::Value(expr) => expr,
            Receiver::Implicit if !scope.is_static => Expr::This,
            Receiver::Implicit | Receiver::Class => {
                let shown: Vec<String> = method.parameters.iter().map(|ty| self.table.show(ty)).collect();
                cx.error(
                    "non-static.cant.be.ref",
                    format!(
                        "non-static method {}({}) cannot be referenced from a static context",
                        name.node,
                        shown.join(",")
                    ),
                    name.range(),
                );
                return None;
            }
        };
        Some((
            ret,
            Expr::VirtualCall {
                target: Box::new(target),
                method: method.name.clone(),
                descriptor: method.descriptor(),
                arguments,
            },
        ))
    }

    fn new_instance(
        &self,
        cx: &mut UnitCx,
        scope: &Scope,
        class: &Spanned<TypeExpr<'_>>,
        arguments: &[Spanned<Expression<'_>>],
    ) -> Option<(Type, Expr)> {
        let ty = self.resolve_type(cx, scope, class, true);
        let checked = self.arguments(cx, scope, arguments);
        let name = match ty {
            Type::Class(name) => name,
            Type::Unknown => return None,
            other => {
                cx.error(
                    "cant.instantiate",
                    format!("{} cannot be instantiated", self.table.show(&other)),
                    class.range(),
                );
                return None;
            }
        };
        let (types, arguments) = checked?;
        let signature = self.table.get(&name)?;
        let constructors = if signature.constructors.is_empty() && !signature.builtin {
            vec![Vec::new()]
        } else {
            signature.constructors.clone()
        };
        if constructors.is_empty() {
            cx.error(
                "cant.instantiate",
                format!("{} cannot be instantiated", signature.display),
                class.range(),
            );
            return None;
        }
        let Some(index) = self.select(&constructors, &types) else {
            let shown: Vec<String> = types.iter().map(|ty| self.table.show(ty)).collect();
            cx.error(
                "cant.apply",
                format!("constructor {} cannot be applied to given types ({})", signature.display, shown.join(", ")),
                class.range(),
            );
            return None;
        };
        Some((
            Type::Class(name.clone()),
            Expr::New {
                class: name,
                descriptor: descriptor(&constructors[index]),
                arguments,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, text: &str) -> SourceUnit {
        SourceUnit {
            name: name.into(),
            text: text.into(),
        }
    }

    fn errors(report: &UnitReport) -> Vec<String> {
        report.diagnostics.iter().map(|diag| diag.message.clone()).collect()
    }

    #[test]
    fn units_in_a_batch_see_each_other() {
        let path = ClassPath::new();
        let units = [
            unit(
                "REPL.$Rivet$1",
                "package REPL;\nimport static REPL.$Rivet$2.g;\nclass $Rivet$1 {\npublic static int f(int a) { return g(a) + 1; }\n}\n",
            ),
            unit(
                "REPL.$Rivet$2",
                "package REPL;\nimport static REPL.$Rivet$1.f;\nclass $Rivet$2 {\npublic static int g(int a) { return a * 2; }\n}\n",
            ),
        ];
        let reports = check(&path, &units);
        assert!(reports.iter().all(|report| report.diagnostics.is_empty()), "{:?}", reports[0].diagnostics);
        assert!(reports[0].resolved.contains("g"));
        assert_eq!(reports[0].images.len(), 1);
    }

    #[test]
    fn unknown_names_are_resolution_errors() {
        let path = ClassPath::new();
        let units = [unit(
            "REPL.$Rivet$1",
            "package REPL;\nclass $Rivet$1 {\npublic static int f() { return g(x); }\n}\n",
        )];
        let reports = check(&path, &units);
        let names: Vec<_> = reports[0].diagnostics.iter().filter_map(Diag::unresolved_name).collect();
        assert_eq!(names, vec!["x", "g"]);
    }

    #[test]
    fn type_errors_are_semantic() {
        let path = ClassPath::new();
        let units = [unit(
            "REPL.$Rivet$1",
            "package REPL;\nclass $Rivet$1 {\npublic static int f() { boolean b = 1; }\n}\n",
        )];
        let reports = check(&path, &units);
        assert_eq!(
            errors(&reports[0]),
            vec!["incompatible types: int cannot be converted to boolean", "missing return statement"]
        );
        assert!(reports[0].diagnostics.iter().all(|diag| diag.unresolved_name().is_none()));
    }

    #[test]
    fn member_classes_instance_state_and_builtins() {
        let path = ClassPath::new();
        let text = "package REPL;\nclass $Rivet$1 {\npublic static class Counter {\nint n;\nCounter(int start) { n = start; }\nint next() { n = n + 1; return n; }\npublic String toString() { return \"Counter \" + n; }\n}\n}\n";
        let reports = check(&path, &[unit("REPL.$Rivet$1", text)]);
        assert!(reports[0].diagnostics.is_empty(), "{:?}", reports[0].diagnostics);
        let counter = reports[0].classes.iter().find(|class| class.name == "REPL.$Rivet$1.Counter").unwrap();
        assert_eq!(counter.display, "Counter");
        assert_eq!(counter.constructors, vec![vec![Type::Int]]);

        let mut path = path;
        path.publish(reports.into_iter().flat_map(|report| report.classes));
        let probe = "package REPL;\nimport REPL.$Rivet$1.Counter;\nclass $Rivet$probe2 {\npublic static Object do_it$() throws Throwable {\nreturn new Counter(1);\n}\n}\n";
        let start = probe.find("new Counter").unwrap();
        let range = start..start + "new Counter(1)".len();
        assert_eq!(type_at(&path, &unit("REPL.$Rivet$probe2", probe), range).as_deref(), Some("Counter"));
    }

    #[test]
    fn static_context_rules() {
        let path = ClassPath::new();
        let text = "package REPL;\nclass $Rivet$1 {\npublic static class Box {\nint v;\nstatic int peek() { return v; }\n}\n}\n";
        let reports = check(&path, &[unit("REPL.$Rivet$1", text)]);
        assert_eq!(
            errors(&reports[0]),
            vec!["non-static variable v cannot be referenced from a static context"]
        );
    }
}
