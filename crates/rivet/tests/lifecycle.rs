//! Snippet lifecycle through the jot front end and the in-process executor.

use rivet::jot;
use rivet::{Config, Engine, EngineError, EvalFailure, Kind, RedefinePolicy, SnippetEvent, SnippetId, Status};
use std::sync::{Arc, Mutex};

fn engine() -> Engine {
    jot::engine(&Config::default()).expect("default config is valid").0
}

fn eval(engine: &mut Engine, source: &str) -> Vec<SnippetEvent> {
    engine
        .evaluate(source)
        .unwrap_or_else(|error| panic!("evaluating {source:?} failed: {error}"))
}

/// Event of the evaluated snippet itself.
fn direct(events: &[SnippetEvent]) -> SnippetEvent {
    events
        .iter()
        .find(|event| event.caused_by.is_none())
        .cloned()
        .expect("an event for the evaluated snippet")
}

fn value(engine: &mut Engine, source: &str) -> Option<String> {
    direct(&eval(engine, source)).value
}

#[test]
fn values_of_vars_and_expressions() {
    let mut engine = engine();

    let x = direct(&eval(&mut engine, "int x = 5;"));
    assert_eq!(x.kind, Kind::Var);
    assert_eq!(x.previous_status, Status::Nonexistent);
    assert_eq!(x.status, Status::Valid);
    assert_eq!(x.value.as_deref(), Some("5"));

    let sum = direct(&eval(&mut engine, "x + 1"));
    assert_eq!(sum.kind, Kind::Var);
    assert_eq!(sum.value.as_deref(), Some("6"));
    assert!(engine.snippet(sum.snippet).is_some_and(|snippet| snippet.is_temp_var()));

    let held = format!("${} * 2", sum.snippet);
    assert_eq!(value(&mut engine, &held).as_deref(), Some("12"));

    assert_eq!(value(&mut engine, "x").as_deref(), Some("5"));
    assert_eq!(value(&mut engine, "x = 7").as_deref(), Some("7"));
    assert_eq!(value(&mut engine, "x").as_deref(), Some("7"));
    assert_eq!(value(&mut engine, "\"a\" + x").as_deref(), Some("\"a7\""));
}

#[test]
fn statements_print_and_return_nothing() {
    let (mut engine, executor) = jot::engine(&Config::default()).expect("default config is valid");
    let printed = direct(&eval(&mut engine, "System.out.println(\"hi\");"));
    assert_eq!(printed.kind, Kind::Statement);
    assert_eq!(printed.status, Status::Valid);
    assert_eq!(printed.value, None);
    assert_eq!(executor.take_output(), "hi\n");

    eval(&mut engine, "int n = 0;");
    let looped = direct(&eval(&mut engine, "while (n < 3) { n = n + 1; }"));
    assert_eq!(looped.kind, Kind::Statement);
    assert_eq!(value(&mut engine, "n").as_deref(), Some("3"));
}

#[test]
fn forward_references_are_corralled_until_defined() {
    let mut engine = engine();

    let twice = direct(&eval(&mut engine, "int twice(int n) { return helper(n) * 2; }"));
    assert_eq!(twice.status, Status::RecoverableDefined);
    assert_eq!(engine.unresolved(twice.snippet).to_vec(), vec!["helper".to_string()]);

    let early = direct(&eval(&mut engine, "twice(4)"));
    assert_eq!(early.value, None);
    assert_eq!(
        early.exception,
        Some(EvalFailure::Unresolved {
            snippet: twice.snippet,
            names: vec!["helper".to_string()],
        })
    );

    let events = eval(&mut engine, "int helper(int n) { return n + 1; }");
    let helper = direct(&events);
    assert_eq!(helper.status, Status::Valid);
    assert_eq!(events.first().map(|event| event.snippet), Some(helper.snippet));
    let revived = events
        .iter()
        .find(|event| event.snippet == twice.snippet)
        .expect("dependent event");
    assert_eq!(revived.previous_status, Status::RecoverableDefined);
    assert_eq!(revived.status, Status::Valid);
    assert_eq!(revived.caused_by, Some(helper.snippet));
    assert!(engine.unresolved(twice.snippet).is_empty());

    assert_eq!(value(&mut engine, "twice(4)").as_deref(), Some("10"));
    assert!(engine.dependents_of(helper.snippet).contains(&twice.snippet));
    assert!(engine.dependencies_of(twice.snippet).contains(&helper.snippet));
}

#[test]
fn redeclaring_a_method_redefines_it_in_place() {
    let mut engine = engine();
    let first = direct(&eval(&mut engine, "int f() { return 1; }"));
    assert_eq!(value(&mut engine, "f()").as_deref(), Some("1"));

    let events = eval(&mut engine, "int f() { return 2; }");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].snippet, first.snippet);
    assert_eq!(events[0].status, Status::Overwritten);
    let second = direct(&events);
    assert_eq!(second.previous_status, Status::Valid);
    assert_eq!(second.status, Status::Valid);
    assert!(!second.signature_changed);
    assert_eq!(engine.generation(second.snippet), Some(0));
    assert_eq!(value(&mut engine, "f()").as_deref(), Some("2"));
}

#[test]
fn refused_redefinition_replaces_the_class() {
    let mut config = Config::default();
    config.executor.redefine = RedefinePolicy::Never;
    let (mut engine, _) = jot::engine(&config).expect("config is valid");

    eval(&mut engine, "int f() { return 1; }");
    let second = direct(&eval(&mut engine, "int f() { return 2; }"));
    assert_eq!(second.status, Status::Valid);
    assert!(second.signature_changed);
    assert_eq!(engine.generation(second.snippet), Some(1));
    assert!(engine.class_name(second.snippet).is_some_and(|name| name.ends_with("$1")));
    assert_eq!(value(&mut engine, "f()").as_deref(), Some("2"));
}

#[test]
fn changing_a_var_type_replaces_it_and_revisits_dependents() {
    let mut engine = engine();
    let old = direct(&eval(&mut engine, "int x = 5;"));
    let show = direct(&eval(&mut engine, "int show() { return x; }"));
    assert_eq!(show.status, Status::Valid);

    let events = eval(&mut engine, "String x = \"a\";");
    let new = direct(&events);
    assert_eq!(new.status, Status::Valid);
    assert_eq!(new.value.as_deref(), Some("\"a\""));
    assert!(new.signature_changed);
    assert_eq!(engine.generation(new.snippet), Some(1));

    let retired = events.iter().find(|event| event.snippet == old.snippet).expect("overwrite event");
    assert_eq!(retired.status, Status::Overwritten);
    assert_eq!(retired.caused_by, Some(new.snippet));
    let broken = events.iter().find(|event| event.snippet == show.snippet).expect("dependent event");
    assert_eq!(broken.status, Status::RecoverableDefined);
    assert_eq!(broken.caused_by, Some(new.snippet));

    assert_eq!(value(&mut engine, "x").as_deref(), Some("\"a\""));
    assert_eq!(engine.snippet_status(old.snippet), Status::Overwritten);
}

#[test]
fn rejected_redeclaration_keeps_the_previous_snippet() {
    let mut engine = engine();
    let first = direct(&eval(&mut engine, "int f() { return 1; }"));

    let events = eval(&mut engine, "int f() { return \"one\"; }");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_status, Status::Nonexistent);
    assert_eq!(events[0].status, Status::Rejected);
    assert!(!engine.diagnostics(events[0].snippet).is_empty());

    assert_eq!(engine.snippet_status(first.snippet), Status::Valid);
    assert_eq!(value(&mut engine, "f()").as_deref(), Some("1"));
}

#[test]
fn identical_declarations_are_redundant() {
    let mut engine = engine();
    eval(&mut engine, "int f() { return 1; }");
    assert!(eval(&mut engine, "int f() { return 1; }").is_empty());
    assert!(eval(&mut engine, "import java.io.*;").len() == 1);
    assert!(eval(&mut engine, "import java.io.*;").is_empty());
    assert_eq!(engine.methods().count(), 1);
    assert_eq!(engine.imports().count(), 1);
}

#[test]
fn redundant_declarations_keep_their_generation() {
    let mut engine = engine();
    eval(&mut engine, "class Point { }");
    let point = direct(&eval(&mut engine, "class Point { int x; }"));
    let generation = engine.generation(point.snippet);
    assert!(generation.is_some());

    assert!(eval(&mut engine, "class Point { int x; }").is_empty());
    assert_eq!(engine.generation(point.snippet), generation);
    assert_eq!(engine.current(point.key), Some(point.snippet));
    assert_eq!(engine.types().count(), 1);
}

#[test]
fn redeclaring_a_class_overwrites_it_first() {
    let mut engine = engine();
    let old = direct(&eval(&mut engine, "class X { }"));
    assert_eq!(old.status, Status::Valid);

    let events = eval(&mut engine, "class X { int y; }");
    assert_eq!(events.len(), 2);
    let new = direct(&events);
    assert_eq!(new.kind, Kind::TypeDecl);
    assert_eq!(new.status, Status::Valid);
    assert_eq!(events[0].snippet, old.snippet);
    assert_eq!(events[0].status, Status::Overwritten);
    assert_eq!(events[0].caused_by, Some(new.snippet));
    assert_eq!(events[1].snippet, new.snippet);
    assert_eq!(engine.status(new.key), Some(Status::Valid));
}

#[test]
fn erased_signature_collision_overwrites() {
    let mut engine = engine();
    let generic = direct(&eval(&mut engine, "<T> int size(T item) { return 1; }"));
    assert_eq!(generic.status, Status::Valid);

    let events = eval(&mut engine, "int size(Object item) { return 2; }");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].snippet, generic.snippet);
    assert_eq!(events[0].status, Status::Overwritten);
    let plain = direct(&events);
    assert_eq!(events[1].snippet, plain.snippet);
    assert_eq!(events[0].caused_by, Some(plain.snippet));

    assert_eq!(value(&mut engine, "size(\"x\")").as_deref(), Some("2"));
}

#[test]
fn dropping_corrals_dependents() {
    let mut engine = engine();
    let base = direct(&eval(&mut engine, "int base() { return 3; }"));
    let top = direct(&eval(&mut engine, "int top() { return base() + 1; }"));
    assert_eq!(value(&mut engine, "top()").as_deref(), Some("4"));

    let events = engine.drop(base.key).expect("base is active");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].snippet, base.snippet);
    assert_eq!(events[0].status, Status::Dropped);
    assert_eq!(events[1].snippet, top.snippet);
    assert_eq!(events[1].status, Status::RecoverableDefined);
    assert_eq!(events[1].caused_by, Some(base.snippet));

    let call = direct(&eval(&mut engine, "top()"));
    assert_eq!(
        call.exception,
        Some(EvalFailure::Unresolved {
            snippet: top.snippet,
            names: vec!["base".to_string()],
        })
    );
    assert!(engine.drop(base.key).is_err());
}

#[test]
fn dropping_a_var_corrals_expressions_over_it() {
    let mut engine = engine();
    let x = direct(&eval(&mut engine, "int x = 5;"));
    let sum = direct(&eval(&mut engine, "x + 1"));
    assert_eq!(sum.status, Status::Valid);
    assert_eq!(sum.value.as_deref(), Some("6"));

    let events = engine.drop(x.key).expect("x is active");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].snippet, x.snippet);
    assert_eq!(events[0].status, Status::Dropped);
    assert_eq!(events[0].caused_by, None);
    assert_eq!(events[1].snippet, sum.snippet);
    assert_eq!(events[1].previous_status, Status::Valid);
    assert_eq!(events[1].status, Status::RecoverableNotDefined);
    assert_eq!(events[1].caused_by, Some(x.snippet));
    assert_eq!(engine.snippet_status(x.snippet), Status::Dropped);
}

#[test]
fn unusable_wrapper_names_fail_engine_construction() {
    let mut config = Config::default();
    config.engine.wrapper_prefix.clear();
    assert!(matches!(jot::engine(&config), Err(EngineError::Config(_))));
}

#[test]
fn unknown_keys_cannot_be_dropped() {
    let mut engine = engine();
    assert!(matches!(engine.drop(rivet::Key(99)), Err(EngineError::UnknownKey(_))));
}

#[test]
fn syntax_errors_are_rejected() {
    let mut engine = engine();
    let events = eval(&mut engine, "int = ;");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, Kind::Erroneous);
    assert_eq!(events[0].status, Status::Rejected);
    assert!(!engine.diagnostics(events[0].snippet).is_empty());
    assert_eq!(engine.active().count(), 0);
}

#[test]
fn unresolved_expression_reports_only_the_missing_name() {
    let mut engine = engine();
    let event = direct(&eval(&mut engine, "foo + 1"));
    assert_eq!(event.status, Status::Rejected);
    let diagnostics = engine.diagnostics(event.snippet);
    assert!(diagnostics.iter().any(|diag| diag.code == "cant.resolve"));
    assert!(diagnostics.iter().all(|diag| diag.code != "not.stmt"), "{diagnostics:?}");
}

#[test]
fn unresolved_initializer_rejects_the_var() {
    let mut engine = engine();
    let var = direct(&eval(&mut engine, "int y = missing();"));
    assert_eq!(var.status, Status::Rejected);
    let var = direct(&eval(&mut engine, "int z;"));
    assert_eq!(var.status, Status::Valid);
}

#[test]
fn exceptions_are_reported() {
    let mut engine = engine();
    let failed = direct(&eval(&mut engine, "1 / 0"));
    match failed.exception {
        Some(EvalFailure::Exception { class_name, message, .. }) => {
            assert!(class_name.ends_with("ArithmeticException"), "{class_name}");
            assert_eq!(message.as_deref(), Some("/ by zero"));
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

#[test]
fn classes_keep_instance_state() {
    let mut engine = engine();
    let class = direct(&eval(
        &mut engine,
        "class Counter { int n; Counter(int start) { n = start; } int next() { n = n + 1; return n; } }",
    ));
    assert_eq!(class.kind, Kind::TypeDecl);
    assert_eq!(class.status, Status::Valid);
    eval(&mut engine, "Counter c = new Counter(5);");
    assert_eq!(value(&mut engine, "c.next()").as_deref(), Some("6"));
    assert_eq!(value(&mut engine, "c.next()").as_deref(), Some("7"));

    eval(&mut engine, "class Label { public String toString() { return \"label\"; } }");
    assert_eq!(value(&mut engine, "new Label()").as_deref(), Some("label"));
    assert_eq!(engine.types().count(), 2);
}

#[test]
fn step_budget_stops_runaway_loops() {
    let mut config = Config::default();
    config.executor.max_steps = Some(10_000);
    let (mut engine, _) = jot::engine(&config).expect("config is valid");
    let stopped = direct(&eval(&mut engine, "while (true) { }"));
    assert_eq!(stopped.exception, Some(EvalFailure::Stopped));
}

#[test]
fn cancel_handle_interrupts_from_another_thread() {
    let mut engine = engine();
    let handle = engine.cancel_handle();
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let canceller = std::thread::spawn(move || {
        while !flag.load(std::sync::atomic::Ordering::SeqCst) {
            handle.cancel().expect("cancel");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    });
    let stopped = direct(&eval(&mut engine, "while (true) { }"));
    done.store(true, std::sync::atomic::Ordering::SeqCst);
    canceller.join().expect("canceller thread");
    assert_eq!(stopped.exception, Some(EvalFailure::Stopped));
}

#[test]
fn listeners_receive_events_until_unsubscribed() {
    let mut engine = engine();
    let seen: Arc<Mutex<Vec<SnippetId>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let subscription = engine.subscribe(move |event| sink.lock().expect("not poisoned").push(event.snippet));

    let events = eval(&mut engine, "int a = 1;");
    assert!(engine.unsubscribe(subscription));
    eval(&mut engine, "int b = 2;");

    let expected: Vec<SnippetId> = events.iter().map(|event| event.snippet).collect();
    assert_eq!(*seen.lock().expect("not poisoned"), expected);
}
