//! Class images: the checked, lowered form of a class that the emitter
//! serializes and the executor runs.

use super::ast::{BinaryOp, UnaryOp};
use super::types::Type;
use serde::{Deserialize, Serialize};

/// Name of constructor methods in an image.
pub const CONSTRUCTOR: &str = "<init>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Int(i32),
    Str(String),
    Bool(bool),
    Null,
    This,
    Local(String),
    StaticField {
        class: String,
        name: String,
    },
    Field {
        target: Box<Expr>,
        name: String,
    },
    StaticCall {
        class: String,
        method: String,
        descriptor: String,
        arguments: Vec<Expr>,
    },
    VirtualCall {
        target: Box<Expr>,
        method: String,
        descriptor: String,
        arguments: Vec<Expr>,
    },
    New {
        class: String,
        descriptor: String,
        arguments: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Concat {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Place,
        value: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Place {
    Local(String),
    StaticField { class: String, name: String },
    Field { target: Box<Expr>, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Local {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        condition: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Throw(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldImage {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodImage {
    pub name: String,
    pub descriptor: String,
    pub parameters: Vec<String>,
    pub ret: Type,
    pub is_static: bool,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassImage {
    pub name: String,
    pub fields: Vec<FieldImage>,
    /// Constructors are named [`CONSTRUCTOR`].
    pub methods: Vec<MethodImage>,
}

/// What must stay the same for a class to be redefined in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassShape {
    fields: Vec<(String, Type, bool)>,
    methods: Vec<(String, String, Type, bool)>,
}

impl ClassImage {
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodImage> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn shape(&self) -> ClassShape {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.ty.clone(), field.is_static))
            .collect();
        fields.sort_by(|a, b| (&a.0, a.2).cmp(&(&b.0, b.2)));
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|method| (method.name.clone(), method.descriptor.clone(), method.ret.clone(), method.is_static))
            .collect();
        methods.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        ClassShape { fields, methods }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(field_type: Type, body: Vec<Stmt>) -> ClassImage {
        ClassImage {
            name: "REPL.$Rivet$1".into(),
            fields: vec![FieldImage {
                name: "x".into(),
                ty: field_type,
                is_static: true,
                init: None,
            }],
            methods: vec![MethodImage {
                name: "do_it$".into(),
                descriptor: "()".into(),
                parameters: Vec::new(),
                ret: Type::object(),
                is_static: true,
                body,
            }],
        }
    }

    #[test]
    fn shape_ignores_bodies_but_not_field_types() {
        let five = image(Type::Int, vec![Stmt::Return(Some(Expr::Int(5)))]);
        let six = image(Type::Int, vec![Stmt::Return(Some(Expr::Int(6)))]);
        let text = image(Type::string(), vec![Stmt::Return(Some(Expr::Int(5)))]);
        assert_eq!(five.shape(), six.shape());
        assert_ne!(five.shape(), text.shape());
        assert_ne!(five.to_bytes().unwrap(), six.to_bytes().unwrap());
    }
}
