//! jot, a small Java-like language: parser, checker and interpreter.
//!
//! [`JotCompiler`] is the engine's front end and emitter, [`LocalExecutor`]
//! runs what it emits. Both sides agree on class images serialized as JSON.

mod ast;
mod check;
mod executor;
mod image;
mod lexer;
mod parser;
mod shape;
mod types;

use ast::{ParseError, Spanned};

pub use executor::LocalExecutor;
pub use types::ClassPath;

use crate::collab::{Analysis, ClassArtifact, EmitFailure, EmitOutcome, Emitter, Fragment, FrontEnd, SourceUnit};
use crate::config::Config;
use crate::diag::Diag;
use crate::engine::Engine;
use crate::error::EngineResult;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Checks and emits wrapped units against the signatures of everything
/// emitted so far. Clones share that state.
#[derive(Clone, Default)]
pub struct JotCompiler {
    path: Arc<Mutex<ClassPath>>,
}

impl JotCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn class_path(&self) -> MutexGuard<'_, ClassPath> {
        self.path.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrontEnd for JotCompiler {
    fn parse_one(&self, source: &str) -> Result<Fragment, Vec<Diag>> {
        parser::parse_fragment(source).map(|fragment| shape::shape(&fragment))
    }

    fn analyze_batch(&self, units: &[SourceUnit]) -> Analysis {
        let reports = check::check(&self.class_path(), units);
        let mut analysis = Analysis::default();
        for report in reports {
            analysis.resolved.insert(report.name.clone(), report.resolved);
            analysis.diagnostics.insert(report.name, report.diagnostics);
        }
        analysis
    }

    fn type_of(&self, unit: &SourceUnit, expression: Range<usize>) -> Option<String> {
        check::type_at(&self.class_path(), unit, expression)
    }
}

impl Emitter for JotCompiler {
    fn emit(&self, units: &[SourceUnit]) -> EmitOutcome {
        let mut path = self.class_path();
        let mut outcome = EmitOutcome::default();
        let mut classes = Vec::new();
        for report in check::check(&path, units) {
            let errors: Vec<&Diag> = report.diagnostics.iter().filter(|diag| diag.is_error()).collect();
            if !errors.is_empty() {
                outcome.failures.extend(errors.into_iter().map(|diag| EmitFailure {
                    unit: Some(report.name.clone()),
                    diag: diag.clone(),
                }));
                continue;
            }
            for image in &report.images {
                match image.to_bytes() {
                    Ok(bytes) => outcome.artifacts.push(ClassArtifact {
                        unit: report.name.clone(),
                        class_name: image.name.clone(),
                        bytes,
                    }),
                    Err(error) => outcome.failures.push(EmitFailure {
                        unit: Some(report.name.clone()),
                        diag: Diag::semantic("emit", format!("cannot write class {}: {error}", image.name), 0..0),
                    }),
                }
            }
            classes.extend(report.classes);
        }
        if outcome.is_success() {
            log::debug!("emitted {} classes", outcome.artifacts.len());
            path.publish(classes);
        }
        outcome
    }
}

/// An engine running jot in process, with a handle on its executor for output.
pub fn engine(config: &Config) -> EngineResult<(Engine, Arc<LocalExecutor>)> {
    let compiler = JotCompiler::new();
    let executor = Arc::new(LocalExecutor::new(config.executor.clone()));
    let engine = Engine::new(
        config.engine.clone(),
        Box::new(compiler.clone()),
        Box::new(compiler),
        executor.clone(),
    )?;
    Ok((engine, executor))
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

    #[test]
    fn emission_publishes_signatures_only_on_success() {
        let compiler = JotCompiler::new();
        let broken = unit(
            "REPL.$Rivet$1",
            "package REPL;\nclass $Rivet$1 {\npublic static int f() { return missing; }\n}\n",
        );
        let outcome = compiler.emit(std::slice::from_ref(&broken));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit.as_deref(), Some("REPL.$Rivet$1"));
        assert!(compiler.class_path().get("REPL.$Rivet$1").is_none());

        let fixed = unit(
            "REPL.$Rivet$1",
            "package REPL;\nclass $Rivet$1 {\npublic static int f() { return 4; }\n}\n",
        );
        let outcome = compiler.emit(&[fixed]);
        assert!(outcome.is_success());
        assert_eq!(outcome.artifacts.len(), 1);
        assert!(compiler.class_path().get("REPL.$Rivet$1").is_some());

        let caller = unit(
            "REPL.$Rivet$2",
            "package REPL;\nimport static REPL.$Rivet$1.f;\nclass $Rivet$2 {\npublic static Object do_it$() throws Throwable {\nreturn f();\n}\n}\n",
        );
        let analysis = compiler.analyze_batch(std::slice::from_ref(&caller));
        assert!(analysis.diagnostics_for("REPL.$Rivet$2").is_empty());
        assert!(analysis.resolved_for("REPL.$Rivet$2").contains("f"));
    }
}
