//! Engine and executor configuration, loadable from TOML:
//!
//! ```toml
//! [engine]
//! package = "REPL"
//! max_fixpoint_iterations = 64
//!
//! [executor]
//! redefine = "never"
//! ```

use crate::error::ConfigError;
use crate::snippet::Key;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Package of every generated wrapper unit.
    pub package: String,
    pub wrapper_prefix: String,
    /// Safety cap on analyze/expand iterations of one round.
    pub max_fixpoint_iterations: u32,
    /// Run executable snippets once they are valid.
    pub execute: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            package: "REPL".to_string(),
            wrapper_prefix: "$Rivet$".to_string(),
            max_fixpoint_iterations: 64,
            execute: true,
        }
    }
}

impl EngineConfig {
    /// Wrapper class name of one generation of a key.
    pub fn class_name(&self, key: Key, seq: u32) -> String {
        match seq {
            0 => format!("{}{key}", self.wrapper_prefix),
            seq => format!("{}{key}${seq}", self.wrapper_prefix),
        }
    }

    pub fn full_class_name(&self, key: Key, seq: u32) -> String {
        format!("{}.{}", self.package, self.class_name(key, seq))
    }

    /// Matches generated wrapper class names, optionally package-qualified
    /// and followed by a member. Captures the key and the member.
    pub fn wrapper_pattern(&self) -> Result<Regex, ConfigError> {
        if self.wrapper_prefix.is_empty() {
            return Err(ConfigError::Invalid("engine.wrapper_prefix must not be empty".to_string()));
        }
        let pattern = format!(
            r"(?:{}\.)?{}(\d+)(?:\$\d+)?(?:\.([A-Za-z_$][A-Za-z0-9_$]*))?",
            regex::escape(&self.package),
            regex::escape(&self.wrapper_prefix),
        );
        Ok(Regex::new(&pattern)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedefinePolicy {
    /// Hot-swap when fields and method signatures are unchanged.
    #[default]
    ShapePreserving,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalExecutorConfig {
    pub redefine: RedefinePolicy,
    /// Interpreter step budget per invocation.
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub executor: LocalExecutorConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.engine.wrapper_pattern()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("[engine]\nmax_fixpoint_iterations = 8\n[executor]\nredefine = \"never\"\n")
            .expect("valid config");
        assert_eq!(config.engine.max_fixpoint_iterations, 8);
        assert_eq!(config.engine.package, "REPL");
        assert_eq!(config.executor.redefine, RedefinePolicy::Never);
        assert_eq!(config.executor.max_steps, None);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Config::from_toml_str("").expect("valid config"), Config::default());
    }

    #[test]
    fn class_names_carry_generation() {
        let config = EngineConfig::default();
        assert_eq!(config.class_name(Key(3), 0), "$Rivet$3");
        assert_eq!(config.full_class_name(Key(3), 2), "REPL.$Rivet$3$2");
    }

    #[test]
    fn empty_wrapper_prefix_is_rejected() {
        let error = Config::from_toml_str("[engine]\nwrapper_prefix = \"\"\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn wrapper_pattern_escapes_the_prefix() {
        let pattern = EngineConfig::default().wrapper_pattern().unwrap();
        let captures = pattern.captures("REPL.$Rivet$12$3.Counter").unwrap();
        assert_eq!(&captures[1], "12");
        assert_eq!(&captures[2], "Counter");
        assert!(!pattern.is_match("Rivet12"));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Config::from_toml_str("[executor]\nredefine = \"sometimes\"\n").is_err());
    }
}
