//! Syntax tree of jot source. Nodes borrow from the source text.

use chumsky::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn range(&self) -> Range<usize> {
        self.span.into_range()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr<'code> {
    Int,
    Boolean,
    Void,
    /// A possibly qualified class name or a type parameter.
    Named(Vec<&'code str>),
}

impl fmt::Display for TypeExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Boolean => f.write_str("boolean"),
            Self::Void => f.write_str("void"),
            Self::Named(parts) => f.write_str(&parts.join(".")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Remainder,
    Add,
    Subtract,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::And => "&&",
            Self::Or => "||",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression<'code> {
    Int(i32),
    /// String literal content, escapes not yet processed.
    Str(&'code str),
    Bool(bool),
    Null,
    This,
    Name(&'code str),
    Field {
        target: Box<Spanned<Expression<'code>>>,
        name: Spanned<&'code str>,
    },
    Call {
        target: Option<Box<Spanned<Expression<'code>>>>,
        name: Spanned<&'code str>,
        arguments: Vec<Spanned<Expression<'code>>>,
    },
    New {
        class: Spanned<TypeExpr<'code>>,
        arguments: Vec<Spanned<Expression<'code>>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expression<'code>>>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Spanned<Expression<'code>>>,
        rhs: Box<Spanned<Expression<'code>>>,
    },
    Assign {
        target: Box<Spanned<Expression<'code>>>,
        value: Box<Spanned<Expression<'code>>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement<'code> {
    Local {
        ty: Spanned<TypeExpr<'code>>,
        name: Spanned<&'code str>,
        init: Option<Spanned<Expression<'code>>>,
    },
    Expression(Spanned<Expression<'code>>),
    Return(Option<Spanned<Expression<'code>>>),
    If {
        condition: Spanned<Expression<'code>>,
        then: Box<Spanned<Statement<'code>>>,
        otherwise: Option<Box<Spanned<Statement<'code>>>>,
    },
    While {
        condition: Spanned<Expression<'code>>,
        body: Box<Spanned<Statement<'code>>>,
    },
    Block(Vec<Spanned<Statement<'code>>>),
    Throw(Spanned<Expression<'code>>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<'code> {
    pub ty: Spanned<TypeExpr<'code>>,
    pub name: Spanned<&'code str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method<'code> {
    pub modifiers: Vec<Spanned<&'code str>>,
    pub type_parameters: Vec<Spanned<&'code str>>,
    /// `None` for constructors.
    pub return_type: Option<Spanned<TypeExpr<'code>>>,
    pub name: Spanned<&'code str>,
    pub parameters: Vec<Parameter<'code>>,
    pub throws: Vec<Spanned<TypeExpr<'code>>>,
    /// From the type parameters or return type through the throws clause.
    pub signature: Span,
    pub body: Option<Spanned<Vec<Spanned<Statement<'code>>>>>,
}

impl Method<'_> {
    pub fn is_static(&self) -> bool {
        self.modifiers.iter().any(|modifier| modifier.node == "static")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field<'code> {
    pub modifiers: Vec<Spanned<&'code str>>,
    pub ty: Spanned<TypeExpr<'code>>,
    pub name: Spanned<&'code str>,
    pub init: Option<Spanned<Expression<'code>>>,
}

impl Field<'_> {
    pub fn is_static(&self) -> bool {
        self.modifiers.iter().any(|modifier| modifier.node == "static")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member<'code> {
    Field(Field<'code>),
    Method(Method<'code>),
    Class(Class<'code>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class<'code> {
    pub modifiers: Vec<Spanned<&'code str>>,
    pub name: Spanned<&'code str>,
    /// From the first modifier through the opening brace.
    pub header: Span,
    pub members: Vec<Spanned<Member<'code>>>,
    pub close: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import<'code> {
    pub is_static: bool,
    pub path: Vec<&'code str>,
    pub on_demand: bool,
}

impl Import<'_> {
    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilationUnit<'code> {
    pub package: Option<Vec<&'code str>>,
    pub imports: Vec<Spanned<Import<'code>>>,
    pub classes: Vec<Spanned<Class<'code>>>,
}

/// One top-level snippet of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment<'code> {
    Import(Spanned<Import<'code>>),
    Class(Spanned<Class<'code>>),
    Method(Spanned<Method<'code>>),
    Var(Spanned<Field<'code>>),
    Expression(Spanned<Expression<'code>>),
    Statement(Spanned<Statement<'code>>),
}
