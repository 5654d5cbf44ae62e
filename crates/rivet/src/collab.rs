//! Collaborators the engine drives: the front end (parsing and analysis),
//! the emitter (compiled artifacts) and the executor (loading and running).

use crate::diag::Diag;
use crate::error::ExecutorError;
use crate::snippet::References;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub word: String,
    pub span: Range<usize>,
}

/// Top-level syntactic form of one parsed fragment, with the source ranges
/// the classifier needs to build wrapped and corralled forms.
#[derive(Debug, Clone)]
pub enum Fragment {
    Import(ImportShape),
    Type(TypeShape),
    Method(MethodShape),
    Var(VarShape),
    Expression(ExpressionShape),
    Statement(StatementShape),
}

#[derive(Debug, Clone)]
pub struct ImportShape {
    /// Dotted name, without a trailing `.*`.
    pub name: String,
    pub is_static: bool,
    pub on_demand: bool,
    pub span: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct TypeShape {
    pub name: String,
    pub modifiers: Vec<Modifier>,
    pub span: Range<usize>,
    /// From the `class` keyword through the opening brace.
    pub header: Range<usize>,
    pub members: Vec<MemberShape>,
    /// The closing brace.
    pub close: Range<usize>,
    pub references: References,
}

#[derive(Debug, Clone)]
pub enum MemberShape {
    Method(MethodShape),
    Field(VarShape),
    Type(TypeShape),
}

#[derive(Debug, Clone)]
pub struct MethodShape {
    pub name: String,
    pub modifiers: Vec<Modifier>,
    pub span: Range<usize>,
    /// Type parameters through the end of the `throws` clause.
    pub signature: Range<usize>,
    pub body: Option<Range<usize>>,
    pub parameter_types: Vec<String>,
    pub erased_parameter_types: Vec<String>,
    pub return_type: String,
    pub references: References,
}

#[derive(Debug, Clone)]
pub struct VarShape {
    pub name: String,
    pub modifiers: Vec<Modifier>,
    pub span: Range<usize>,
    pub type_span: Range<usize>,
    pub name_span: Range<usize>,
    pub type_name: String,
    pub initializer: Option<Range<usize>>,
    pub references: References,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionForm {
    Name(String),
    Assignment { target: String },
    Other,
}

#[derive(Debug, Clone)]
pub struct ExpressionShape {
    /// The expression without a trailing semicolon.
    pub span: Range<usize>,
    pub form: ExpressionForm,
    pub references: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct StatementShape {
    pub span: Range<usize>,
    pub references: BTreeSet<String>,
}

/// One wrapped compilation unit, named by the full name of its wrapper class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub diagnostics: HashMap<String, Vec<Diag>>,
    pub resolved: HashMap<String, BTreeSet<String>>,
}

impl Analysis {
    pub fn diagnostics_for(&self, unit: &str) -> &[Diag] {
        self.diagnostics.get(unit).map_or(&[], Vec::as_slice)
    }

    pub fn resolved_for(&self, unit: &str) -> BTreeSet<String> {
        self.resolved.get(unit).cloned().unwrap_or_default()
    }
}

pub trait FrontEnd: Send {
    fn parse_one(&self, source: &str) -> Result<Fragment, Vec<Diag>>;

    /// Analyzes units together, against each other and the already emitted program.
    fn analyze_batch(&self, units: &[SourceUnit]) -> Analysis;

    /// Type of the expression at `expression` (wrapped coordinates), if it has one.
    fn type_of(&self, unit: &SourceUnit, expression: Range<usize>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassArtifact {
    /// Full name of the wrapper unit the class was emitted from.
    pub unit: String,
    pub class_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EmitFailure {
    /// Unit the failure is attributed to, when known.
    pub unit: Option<String>,
    pub diag: Diag,
}

#[derive(Debug, Clone, Default)]
pub struct EmitOutcome {
    pub artifacts: Vec<ClassArtifact>,
    pub failures: Vec<EmitFailure>,
}

impl EmitOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub trait Emitter: Send {
    fn emit(&self, units: &[SourceUnit]) -> EmitOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedefineOutcome {
    Redefined,
    /// The executor cannot hot-swap this class; its identity must be replaced.
    Unsupported { class_name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub class_name: String,
    pub method: String,
}

/// Result of running an entry method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Display form of the returned value, `None` for statements.
    Returned(Option<String>),
    Threw {
        class_name: String,
        message: Option<String>,
        frames: Vec<StackFrame>,
    },
    /// A corralled body was reached.
    Unresolved { snippet: u32 },
    Stopped,
}

pub trait Executor: Send + Sync {
    fn load(&self, classes: &[ClassArtifact]) -> Result<(), ExecutorError>;

    /// Hot-swaps all classes or none of them.
    fn redefine(&self, classes: &[ClassArtifact]) -> Result<RedefineOutcome, ExecutorError>;

    fn invoke(&self, class_name: &str) -> Result<Invocation, ExecutorError>;

    /// Best-effort interruption of the in-flight invocation.
    fn cancel(&self) -> Result<(), ExecutorError>;
}
