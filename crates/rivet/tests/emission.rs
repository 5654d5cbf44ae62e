//! Batch emission failures, injected around the jot compiler.

use rivet::collab::{EmitFailure, EmitOutcome, Emitter, Executor, SourceUnit};
use rivet::diag::Diag;
use rivet::jot::{JotCompiler, LocalExecutor};
use rivet::{Config, Engine, EngineError, Status};
use std::sync::Arc;

/// Fails every batch containing a unit whose text mentions `poison`.
struct Poisoned {
    inner: JotCompiler,
    attribute: bool,
}

impl Emitter for Poisoned {
    fn emit(&self, units: &[SourceUnit]) -> EmitOutcome {
        let poisoned: Vec<&SourceUnit> = units.iter().filter(|unit| unit.text.contains("poison")).collect();
        if poisoned.is_empty() {
            return self.inner.emit(units);
        }
        EmitOutcome {
            artifacts: Vec::new(),
            failures: poisoned
                .into_iter()
                .map(|unit| EmitFailure {
                    unit: self.attribute.then(|| unit.name.clone()),
                    diag: Diag::semantic("emit", "class writer crashed", 0..0),
                })
                .collect(),
        }
    }
}

fn engine(attribute: bool) -> Engine {
    let config = Config::default();
    let compiler = JotCompiler::new();
    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new(config.executor.clone()));
    Engine::new(
        config.engine,
        Box::new(compiler.clone()),
        Box::new(Poisoned {
            inner: compiler,
            attribute,
        }),
        executor,
    )
    .expect("default config is valid")
}

#[test]
fn attributed_failure_rejects_the_culprit() {
    let mut engine = engine(true);
    let events = engine.evaluate("int poison() { return 1; }").expect("attributed failures are not errors");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, Status::Rejected);
    assert_eq!(events[0].previous_status, Status::Nonexistent);
    assert!(
        engine
            .diagnostics(events[0].snippet)
            .iter()
            .any(|diag| diag.message == "class writer crashed")
    );

    let events = engine.evaluate("int healthy() { return 2; }").expect("evaluation succeeds");
    assert_eq!(events[0].status, Status::Valid);
}

#[test]
fn attributed_failure_of_a_dependent_leaves_it_recoverable() {
    let mut engine = engine(true);
    // The corralled stub drops the body, so only the full method mentions the marker.
    let user = engine
        .evaluate("int user() { int poisoned = 1; return helper() + poisoned; }")
        .expect("evaluation succeeds");
    assert_eq!(user[0].status, Status::RecoverableDefined);

    let events = engine.evaluate("int helper() { return 1; }").expect("attributed failures are not errors");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, Status::Valid);
    assert_eq!(events[1].snippet, user[0].snippet);
    assert_eq!(events[1].previous_status, Status::RecoverableDefined);
    assert_eq!(events[1].status, Status::RecoverableNotDefined);
    assert_eq!(events[1].caused_by, Some(events[0].snippet));
}

#[test]
fn unattributed_failure_is_an_engine_error() {
    let mut engine = engine(false);
    let error = engine.evaluate("int poison() { return 1; }").expect_err("unattributed failure");
    assert!(matches!(error, EngineError::UnattributedEmission(message) if message.contains("class writer crashed")));
}
