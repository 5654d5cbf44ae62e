//! Converts parsed fragments into the source-range shapes the engine
//! classifies, collecting the names each one mentions.

use super::ast::{self, Expression, Member, Spanned, Statement, TypeExpr};
use crate::collab::{
    ExpressionForm, ExpressionShape, Fragment, ImportShape, MemberShape, MethodShape, Modifier, StatementShape,
    TypeShape, VarShape,
};
use crate::snippet::References;
use std::collections::BTreeSet;

pub fn shape(fragment: &ast::Fragment<'_>) -> Fragment {
    match fragment {
        ast::Fragment::Import(import) => Fragment::Import(ImportShape {
            name: import.node.name(),
            is_static: import.node.is_static,
            on_demand: import.node.on_demand,
            span: import.range(),
        }),
        ast::Fragment::Class(class) => Fragment::Type(type_shape(&class.node, class.range())),
        ast::Fragment::Method(method) => Fragment::Method(method_shape(&method.node, method.range())),
        ast::Fragment::Var(field) => Fragment::Var(var_shape(&field.node, field.range())),
        ast::Fragment::Expression(expression) => {
            let form = match &expression.node {
                Expression::Name(name) => ExpressionForm::Name(name.to_string()),
                Expression::Assign { target, .. } => match &target.node {
                    Expression::Name(name) => ExpressionForm::Assignment {
                        target: name.to_string(),
                    },
                    _ => ExpressionForm::Other,
                },
                _ => ExpressionForm::Other,
            };
            let mut names = Names::default();
            names.expression(&expression.node);
            Fragment::Expression(ExpressionShape {
                span: expression.range(),
                form,
                references: names.finish(),
            })
        }
        ast::Fragment::Statement(statement) => {
            let mut names = Names::default();
            names.statement(&statement.node);
            Fragment::Statement(StatementShape {
                span: statement.range(),
                references: names.finish(),
            })
        }
    }
}

fn modifiers(modifiers: &[Spanned<&str>]) -> Vec<Modifier> {
    modifiers
        .iter()
        .map(|modifier| Modifier {
            word: modifier.node.to_string(),
            span: modifier.range(),
        })
        .collect()
}

fn type_shape(class: &ast::Class<'_>, span: std::ops::Range<usize>) -> TypeShape {
    let members: Vec<MemberShape> = class
        .members
        .iter()
        .map(|member| match &member.node {
            Member::Field(field) => MemberShape::Field(var_shape(field, member.range())),
            Member::Method(method) => MemberShape::Method(method_shape(method, member.range())),
            Member::Class(nested) => MemberShape::Type(type_shape(nested, member.range())),
        })
        .collect();
    let mut declared = BTreeSet::new();
    let mut body = BTreeSet::new();
    for member in &members {
        let references = match member {
            MemberShape::Field(field) => &field.references,
            MemberShape::Method(method) => &method.references,
            MemberShape::Type(nested) => &nested.references,
        };
        declared.extend(references.declared.iter().cloned());
        body.extend(references.body.iter().cloned());
    }
    // Members are found through the class itself.
    let own: BTreeSet<String> = members
        .iter()
        .map(|member| match member {
            MemberShape::Field(field) => field.name.clone(),
            MemberShape::Method(method) => method.name.clone(),
            MemberShape::Type(nested) => nested.name.clone(),
        })
        .chain([class.name.node.to_string()])
        .collect();
    declared.retain(|name| !own.contains(name));
    body.retain(|name| !own.contains(name));
    TypeShape {
        name: class.name.node.to_string(),
        modifiers: modifiers(&class.modifiers),
        span,
        header: class.header.into_range(),
        members,
        close: class.close.into_range(),
        references: References::new(declared, body),
    }
}

fn method_shape(method: &ast::Method<'_>, span: std::ops::Range<usize>) -> MethodShape {
    let type_parameters: BTreeSet<&str> = method.type_parameters.iter().map(|parameter| parameter.node).collect();
    let mut declared = Names::default();
    declared.bound.extend(type_parameters.iter().map(|parameter| parameter.to_string()));
    if let Some(return_type) = &method.return_type {
        declared.ty(&return_type.node);
    }
    for parameter in &method.parameters {
        declared.ty(&parameter.ty.node);
    }
    for thrown in &method.throws {
        declared.ty(&thrown.node);
    }

    let mut body = Names::default();
    body.bound.extend(type_parameters.iter().map(|parameter| parameter.to_string()));
    body.bound.extend(method.parameters.iter().map(|parameter| parameter.name.node.to_string()));
    if let Some(statements) = &method.body {
        for statement in &statements.node {
            body.statement(&statement.node);
        }
    }

    let erase = |ty: &TypeExpr<'_>| match ty {
        TypeExpr::Named(parts) if parts.len() == 1 && type_parameters.contains(parts[0]) => "Object".to_string(),
        ty => ty.to_string(),
    };
    MethodShape {
        name: method.name.node.to_string(),
        modifiers: modifiers(&method.modifiers),
        span,
        signature: method.signature.into_range(),
        body: method.body.as_ref().map(Spanned::range),
        parameter_types: method.parameters.iter().map(|parameter| parameter.ty.node.to_string()).collect(),
        erased_parameter_types: method.parameters.iter().map(|parameter| erase(&parameter.ty.node)).collect(),
        return_type: method
            .return_type
            .as_ref()
            .map(|return_type| return_type.node.to_string())
            .unwrap_or_default(),
        references: References::new(declared.finish(), body.finish()),
    }
}

fn var_shape(field: &ast::Field<'_>, span: std::ops::Range<usize>) -> VarShape {
    let mut declared = Names::default();
    declared.ty(&field.ty.node);
    let mut body = Names::default();
    if let Some(init) = &field.init {
        body.expression(&init.node);
    }
    VarShape {
        name: field.name.node.to_string(),
        modifiers: modifiers(&field.modifiers),
        span,
        type_span: field.ty.range(),
        name_span: field.name.range(),
        type_name: field.ty.node.to_string(),
        initializer: field.init.as_ref().map(Spanned::range),
        references: References::new(declared.finish(), body.finish()),
    }
}

/// Leading names of every variable, method and type reference.
#[derive(Default)]
struct Names {
    found: BTreeSet<String>,
    /// Parameters, locals and type parameters.
    bound: BTreeSet<String>,
}

impl Names {
    fn finish(self) -> BTreeSet<String> {
        let Self { found, bound } = self;
        found.into_iter().filter(|name| !bound.contains(name)).collect()
    }

    fn ty(&mut self, ty: &TypeExpr<'_>) {
        if let TypeExpr::Named(parts) = ty {
            if let Some(first) = parts.first() {
                self.found.insert(first.to_string());
            }
        }
    }

    fn expression(&mut self, expression: &Expression<'_>) {
        match expression {
            Expression::Int(_) | Expression::Str(_) | Expression::Bool(_) | Expression::Null | Expression::This => {}
            Expression::Name(name) => {
                self.found.insert(name.to_string());
            }
            Expression::Field { target, .. } => self.expression(&target.node),
            Expression::Call {
                target,
                name,
                arguments,
            } => {
                match target {
                    Some(target) => self.expression(&target.node),
                    None => {
                        self.found.insert(name.node.to_string());
                    }
                }
                for argument in arguments {
                    self.expression(&argument.node);
                }
            }
            Expression::New { class, arguments } => {
                self.ty(&class.node);
                for argument in arguments {
                    self.expression(&argument.node);
                }
            }
            Expression::Unary { operand, .. } => self.expression(&operand.node),
            Expression::Binary { lhs, rhs, .. } => {
                self.expression(&lhs.node);
                self.expression(&rhs.node);
            }
            Expression::Assign { target, value } => {
                self.expression(&target.node);
                self.expression(&value.node);
            }
        }
    }

    fn statement(&mut self, statement: &Statement<'_>) {
        match statement {
            Statement::Local { ty, name, init } => {
                self.ty(&ty.node);
                self.bound.insert(name.node.to_string());
                if let Some(init) = init {
                    self.expression(&init.node);
                }
            }
            Statement::Expression(expression) | Statement::Throw(expression) => self.expression(&expression.node),
            Statement::Return(value) => {
                if let Some(value) = value {
                    self.expression(&value.node);
                }
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                self.expression(&condition.node);
                self.statement(&then.node);
                if let Some(otherwise) = otherwise {
                    self.statement(&otherwise.node);
                }
            }
            Statement::While { condition, body } => {
                self.expression(&condition.node);
                self.statement(&body.node);
            }
            Statement::Block(statements) => {
                for statement in statements {
                    self.statement(&statement.node);
                }
            }
            Statement::Empty => {}
        }
    }
}
