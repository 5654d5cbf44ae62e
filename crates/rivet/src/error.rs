//! Error types.

use crate::snippet::{Key, SnippetId};
use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to an executor. Never retried by the engine.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor transport failed: {0}")]
    Transport(String),

    #[error("executor protocol error: {0}")]
    Protocol(String),

    #[error("class {0} is not loaded")]
    NotLoaded(String),

    #[error("cancellation failed: {0}")]
    Cancel(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The emitter failed without naming a culprit unit.
    #[error("batch emission failed and could not be attributed to a snippet: {0}")]
    UnattributedEmission(String),

    /// A unit needed replacing twice at the same generation.
    #[error("snippet #{snippet} required class replacement twice at generation {seq}")]
    ReplacementStalled { snippet: SnippetId, seq: u32 },

    #[error("evaluation did not converge after {0} iterations")]
    FixpointLimit(u32),

    #[error("no snippet with key {0}")]
    UnknownKey(Key),

    #[error("snippet with key {0} is not active")]
    Inactive(Key),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("wrapper name pattern does not compile: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let error = EngineError::ReplacementStalled { snippet: SnippetId(3), seq: 1 };
        assert_eq!(error.to_string(), "snippet #3 required class replacement twice at generation 1");

        let error = EngineError::from(ExecutorError::NotLoaded("REPL.$Rivet$1".into()));
        assert_eq!(error.to_string(), "class REPL.$Rivet$1 is not loaded");
    }
}
