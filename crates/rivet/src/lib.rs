//! Incremental evaluation of program snippets.
//!
//! Each snippet is wrapped into its own compilation unit, checked together
//! with the snippets it depends on, and loaded into a running program.
//! Declarations with unresolved references are kept as signature-only
//! stubs until the missing names are defined.

pub mod collab;
pub mod config;
pub mod corral;
pub mod dependency;
pub mod diag;
pub mod engine;
pub mod error;
pub mod event;
pub mod jot;
pub mod snippet;
pub mod store;
pub mod wrap;

pub use config::{Config, EngineConfig, LocalExecutorConfig, RedefinePolicy};
pub use engine::{CancelHandle, Engine};
pub use error::{EngineError, EngineResult, ExecutorError};
pub use event::{EvalFailure, SnippetEvent, Subscription};
pub use snippet::{Key, Kind, SnippetId, Status, SubKind};
