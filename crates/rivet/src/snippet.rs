//! Snippets, their keys and their lifecycle status.

use crate::diag::Diag;
use crate::wrap::Wrap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Unique, monotonically increasing snippet identifier. The first snippet is `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SnippetId(pub u32);

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of "the same declaration" across redeclarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Key(pub u32);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What makes two snippets share a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyIdentity {
    TypeDecl { name: String },
    /// Methods overload, so the declared parameter types are part of the identity.
    Method { name: String, parameter_types: String },
    Var { name: String },
    Import { text: String },
    /// Expressions, statements and erroneous input never share keys.
    Unique(SnippetId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Import,
    TypeDecl,
    Method,
    Var,
    Expression,
    Statement,
    Erroneous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubKind {
    SingleTypeImport,
    TypeImportOnDemand,
    SingleStaticImport,
    StaticImportOnDemand,
    Class,
    Method,
    VarDeclaration,
    VarDeclarationWithInitializer,
    /// An expression whose value is held in a generated `$<id>` variable.
    TempVarExpression,
    /// A bare name; evaluates to the current value of that variable.
    VarValue,
    Assignment,
    /// An expression without a storable value (void, or untyped because it fails).
    ExpressionStatement,
    Statement,
    Unknown,
}

impl SubKind {
    pub fn kind(self) -> Kind {
        match self {
            Self::SingleTypeImport | Self::TypeImportOnDemand | Self::SingleStaticImport | Self::StaticImportOnDemand => {
                Kind::Import
            }
            Self::Class => Kind::TypeDecl,
            Self::Method => Kind::Method,
            Self::VarDeclaration | Self::VarDeclarationWithInitializer | Self::TempVarExpression => Kind::Var,
            Self::VarValue | Self::Assignment => Kind::Expression,
            Self::ExpressionStatement | Self::Statement => Kind::Statement,
            Self::Unknown => Kind::Erroneous,
        }
    }
}

/// Lifecycle status of a snippet. See the transition rules in `engine::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Nonexistent,
    Valid,
    RecoverableDefined,
    RecoverableNotDefined,
    Rejected,
    Dropped,
    Overwritten,
}

impl Status {
    /// Contributes declarations visible to other snippets.
    pub fn is_defined(self) -> bool {
        matches!(self, Self::Valid | Self::RecoverableDefined)
    }

    /// Part of the live program state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Valid | Self::RecoverableDefined | Self::RecoverableNotDefined)
    }

    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::RecoverableDefined | Self::RecoverableNotDefined)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Nonexistent => "NONEXISTENT",
            Self::Valid => "VALID",
            Self::RecoverableDefined => "RECOVERABLE_DEFINED",
            Self::RecoverableNotDefined => "RECOVERABLE_NOT_DEFINED",
            Self::Rejected => "REJECTED",
            Self::Dropped => "DROPPED",
            Self::Overwritten => "OVERWRITTEN",
        };
        f.write_str(text)
    }
}

/// Names a snippet mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct References {
    /// Names appearing in the declaration itself (signature, field type).
    pub declared: BTreeSet<String>,
    /// Every name appearing anywhere, `declared` included.
    pub body: BTreeSet<String>,
}

impl References {
    pub fn new(declared: BTreeSet<String>, mut body: BTreeSet<String>) -> Self {
        body.extend(declared.iter().cloned());
        Self { declared, body }
    }
}

/// Kind-specific snippet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindData {
    Import {
        /// Dotted name as written, without `.*`.
        name: String,
        is_static: bool,
        on_demand: bool,
    },
    TypeDecl {
        name: String,
        references: References,
    },
    Method {
        name: String,
        signature: String,
        parameter_types: Vec<String>,
        erased_parameter_types: Vec<String>,
        references: References,
    },
    Var {
        name: String,
        type_name: String,
        references: References,
    },
    Expression {
        /// Bare name or assignment target.
        name: Option<String>,
        references: References,
    },
    Statement {
        references: References,
    },
    Erroneous,
}

/// An immutable unit of user input. Mutable lifecycle state lives in
/// [`crate::store::SnippetState`].
#[derive(Debug, Clone)]
pub struct Snippet {
    pub id: SnippetId,
    pub key: Key,
    pub sub_kind: SubKind,
    pub source: String,
    pub data: KindData,
    /// The snippet as wrapped class body text. Absent for erroneous snippets.
    pub guts: Option<Wrap>,
    /// Signature-only variant of `guts`, for declarations that can be corralled.
    pub corral: Option<Wrap>,
    /// Classifier warnings, e.g. ignored modifiers.
    pub generated: Vec<Diag>,
}

impl Snippet {
    pub fn kind(&self) -> Kind {
        self.sub_kind.kind()
    }

    /// Name(s) this snippet introduces into the program state.
    pub fn declared_name(&self) -> Option<&str> {
        match &self.data {
            KindData::TypeDecl { name, .. } | KindData::Method { name, .. } | KindData::Var { name, .. } => Some(name),
            KindData::Import { name, on_demand: false, .. } => name.rsplit('.').next(),
            _ => None,
        }
    }

    pub fn references(&self) -> Option<&References> {
        match &self.data {
            KindData::TypeDecl { references, .. }
            | KindData::Method { references, .. }
            | KindData::Var { references, .. }
            | KindData::Expression { references, .. }
            | KindData::Statement { references } => Some(references),
            KindData::Import { .. } | KindData::Erroneous => None,
        }
    }

    /// Declarations may become recoverable, everything else is valid or rejected.
    pub fn is_declaration(&self) -> bool {
        matches!(self.kind(), Kind::TypeDecl | Kind::Method | Kind::Var)
    }

    /// Has a main entry to run once it is valid.
    pub fn is_executable(&self) -> bool {
        matches!(self.kind(), Kind::Var | Kind::Expression | Kind::Statement)
    }

    pub fn is_var_with_initializer(&self) -> bool {
        self.sub_kind == SubKind::VarDeclarationWithInitializer
    }

    pub fn is_temp_var(&self) -> bool {
        self.sub_kind == SubKind::TempVarExpression
    }

    pub fn signature(&self) -> Option<&str> {
        match &self.data {
            KindData::Method { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn erased_parameter_types(&self) -> Option<&[String]> {
        match &self.data {
            KindData::Method { erased_parameter_types, .. } => Some(erased_parameter_types),
            _ => None,
        }
    }

    /// The line `import` statement that makes this snippet's declaration
    /// visible inside another wrapper class, if any.
    pub fn import_for(&self, class_path: &str) -> Option<String> {
        match &self.data {
            KindData::Import { name, is_static, on_demand } => {
                let prefix = if *is_static { "import static " } else { "import " };
                let suffix = if *on_demand { ".*" } else { "" };
                Some(format!("{prefix}{name}{suffix};"))
            }
            KindData::TypeDecl { name, .. } => Some(format!("import {class_path}.{name};")),
            KindData::Method { name, .. } | KindData::Var { name, .. } => {
                Some(format!("import static {class_path}.{name};"))
            }
            KindData::Expression { .. } | KindData::Statement { .. } | KindData::Erroneous => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(Status::Valid.is_defined());
        assert!(Status::RecoverableDefined.is_defined());
        assert!(!Status::RecoverableNotDefined.is_defined());
        assert!(Status::RecoverableNotDefined.is_active());
        for status in [Status::Nonexistent, Status::Rejected, Status::Dropped, Status::Overwritten] {
            assert!(!status.is_active(), "{status}");
            assert!(!status.is_defined(), "{status}");
        }
    }

    #[test]
    fn temp_vars_are_vars() {
        assert_eq!(SubKind::TempVarExpression.kind(), Kind::Var);
        assert_eq!(SubKind::VarValue.kind(), Kind::Expression);
        assert_eq!(SubKind::ExpressionStatement.kind(), Kind::Statement);
    }

    #[test]
    fn references_include_declared_in_body() {
        let references = References::new(
            BTreeSet::from(["Foo".to_string()]),
            BTreeSet::from(["bar".to_string()]),
        );
        assert!(references.body.contains("Foo"));
        assert!(references.body.contains("bar"));
    }
}
