//! The evaluation engine: classifies snippets, runs rounds to a fixpoint and
//! keeps the snippet store, dependency index and loaded classes in step.

mod lifecycle;
mod round;
mod tracker;
mod unit;

pub use tracker::ClassTracker;

use crate::collab::{Emitter, Executor, ExpressionForm, Fragment, FrontEnd, Invocation, SourceUnit};
use crate::config::EngineConfig;
use crate::dependency::DependencyIndex;
use crate::diag::Diag;
use crate::error::{EngineError, EngineResult, ExecutorError};
use crate::event::{EvalFailure, Listener, Listeners, SnippetEvent, Subscription};
use crate::snippet::{Key, KeyIdentity, Kind, KindData, Snippet, SnippetId, Status, SubKind};
use crate::store::SnippetStore;
use crate::wrap::{self, OuterWrap, Placement, Wrap};
use lifecycle::Scrubber;
use regex::Regex;
use round::{Context, Round};
use std::collections::HashSet;
use std::sync::Arc;
use unit::Unit;

/// Cancels the invocation currently running in an engine, from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    executor: Arc<dyn Executor>,
}

impl CancelHandle {
    pub fn cancel(&self) -> Result<(), ExecutorError> {
        self.executor.cancel()
    }
}

pub struct Engine {
    config: EngineConfig,
    store: SnippetStore,
    dependencies: DependencyIndex,
    tracker: ClassTracker,
    front_end: Box<dyn FrontEnd>,
    emitter: Box<dyn Emitter>,
    executor: Arc<dyn Executor>,
    listeners: Listeners,
    wrapper_names: Regex,
}

impl Engine {
    /// Fails when the configured wrapper names cannot be matched.
    pub fn new(
        config: EngineConfig,
        front_end: Box<dyn FrontEnd>,
        emitter: Box<dyn Emitter>,
        executor: Arc<dyn Executor>,
    ) -> EngineResult<Self> {
        let wrapper_names = config.wrapper_pattern()?;
        Ok(Self {
            config,
            store: SnippetStore::new(),
            dependencies: DependencyIndex::new(),
            tracker: ClassTracker::default(),
            front_end,
            emitter,
            executor,
            listeners: Listeners::default(),
            wrapper_names,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates one snippet of source and returns the resulting events,
    /// the snippet's own event after those of the snippets it overwrites
    /// and before those of its dependents.
    pub fn evaluate(&mut self, source: &str) -> EngineResult<Vec<SnippetEvent>> {
        let fragment = match self.front_end.parse_one(source) {
            Ok(fragment) => fragment,
            Err(diags) => {
                let events = self.reject_erroneous(source, diags);
                self.listeners.notify(&events);
                return Ok(events);
            }
        };
        let id = self.store.next_id();
        let expression_type = self.probe_type(id, source, &fragment);
        let classified = wrap::classify(id, source, &fragment, expression_type.as_deref());
        let key = self.store.key_for(classified.identity.clone());
        if self.is_redundant(key, source, classified.sub_kind) {
            log::debug!("redundant redeclaration of key {key}, nothing to do");
            return Ok(Vec::new());
        }
        let fatal = classified.fatal;
        let generated = classified.generated.clone();
        self.store.insert(Snippet {
            id,
            key,
            sub_kind: classified.sub_kind,
            source: source.to_string(),
            data: classified.data,
            guts: Some(classified.guts),
            corral: classified.corral,
            generated: classified.generated,
        });
        if fatal {
            let events: Vec<SnippetEvent> = lifecycle::reject(&mut self.store, id, generated).into_iter().collect();
            self.listeners.notify(&events);
            return Ok(events);
        }

        let units = match self.store.get(id) {
            Some(snippet) => vec![Unit::direct(snippet, &self.store)],
            None => Vec::new(),
        };
        let units = self.run_round(units, HashSet::new())?;
        let mut events = lifecycle::finalize(&self.wrapper_names, &mut self.store, &mut self.dependencies, &units);
        self.execute(id, &mut events);
        self.listeners.notify(&events);
        Ok(events)
    }

    /// Drops the active snippet holding `key` and re-evaluates its dependents.
    pub fn drop(&mut self, key: Key) -> EngineResult<Vec<SnippetEvent>> {
        let id = self.store.current(key).ok_or(EngineError::UnknownKey(key))?;
        if !self.store.status(id).is_active() {
            return Err(EngineError::Inactive(key));
        }
        let units: Vec<Unit> = self
            .dependencies
            .dependents_of(&self.store, id)
            .into_iter()
            .filter_map(|dependent| self.store.get(dependent))
            .map(|dependent| Unit::dependency(dependent, &self.store, id))
            .collect();
        let units = if units.is_empty() {
            units
        } else {
            self.run_round(units, HashSet::from([key]))?
        };
        let mut events: Vec<SnippetEvent> = lifecycle::drop_snippet(&mut self.store, &mut self.dependencies, id)
            .into_iter()
            .collect();
        events.extend(lifecycle::finalize(&self.wrapper_names, &mut self.store, &mut self.dependencies, &units));
        self.listeners.notify(&events);
        Ok(events)
    }

    fn run_round(&mut self, units: Vec<Unit>, excluded: HashSet<Key>) -> EngineResult<Vec<Unit>> {
        let cx = Context {
            config: &self.config,
            store: &self.store,
            dependencies: &self.dependencies,
            front_end: self.front_end.as_ref(),
            emitter: self.emitter.as_ref(),
            executor: self.executor.as_ref(),
            tracker: &mut self.tracker,
        };
        Round::new(cx, units, excluded).run()
    }

    fn reject_erroneous(&mut self, source: &str, diags: Vec<Diag>) -> Vec<SnippetEvent> {
        let id = self.store.next_id();
        let key = self.store.key_for(KeyIdentity::Unique(id));
        self.store.insert(Snippet {
            id,
            key,
            sub_kind: SubKind::Unknown,
            source: source.to_string(),
            data: KindData::Erroneous,
            guts: None,
            corral: None,
            generated: Vec::new(),
        });
        lifecycle::reject(&mut self.store, id, diags).into_iter().collect()
    }

    /// Re-evaluating identical source of a valid declaration changes nothing.
    fn is_redundant(&self, key: Key, source: &str, sub_kind: SubKind) -> bool {
        if matches!(sub_kind.kind(), Kind::Var | Kind::Expression | Kind::Statement | Kind::Erroneous) {
            return false;
        }
        self.store
            .active_for_key(key)
            .filter(|id| self.store.status(*id) == Status::Valid)
            .and_then(|id| self.store.get(id))
            .is_some_and(|previous| previous.source == source)
    }

    /// Asks the front end for the type of an expression snippet, wrapped so
    /// that it sees every defined snippet.
    fn probe_type(&self, id: SnippetId, source: &str, fragment: &Fragment) -> Option<String> {
        let Fragment::Expression(shape) = fragment else {
            return None;
        };
        if shape.form != ExpressionForm::Other {
            return None;
        }
        let guts = Wrap::builder(source)
            .literal(&format!("public static Object {}() throws Throwable {{\nreturn ", wrap::ENTRY_METHOD))
            .source(shape.span.clone())
            .literal(";\n}")
            .build();
        let imports = round::visible_imports(&self.config, &self.store, |_| true);
        let class_name = format!("{}probe{id}", self.config.wrapper_prefix);
        let outer = OuterWrap::new(&self.config, class_name, &imports, &guts, Placement::Body);
        let expression = outer.wrap.wrapped_range(shape.span.clone())?;
        let unit = SourceUnit {
            name: outer.full_name.clone(),
            text: outer.wrap.text().to_string(),
        };
        let type_name = self.front_end.type_of(&unit, expression);
        log::debug!("expression #{id} has type {type_name:?}");
        type_name
    }

    /// Runs the main snippet of `events` if it is executable and valid.
    fn execute(&mut self, id: SnippetId, events: &mut [SnippetEvent]) {
        if !self.config.execute {
            return;
        }
        let Some(snippet) = self.store.get(id) else {
            return;
        };
        let Some(state) = self.store.state(id) else {
            return;
        };
        if !snippet.is_executable() || state.status != Status::Valid {
            return;
        }
        let Some(event) = events.iter_mut().find(|event| event.snippet == id) else {
            return;
        };
        let class_name = self.config.full_class_name(snippet.key, state.seq);
        let scrubber = Scrubber::new(&self.wrapper_names, &self.store, &[]);
        match self.executor.invoke(&class_name) {
            Ok(Invocation::Returned(value)) => {
                if snippet.kind() != Kind::Statement {
                    event.value = value;
                }
            }
            Ok(Invocation::Threw {
                class_name,
                message,
                frames,
            }) => {
                let stack = frames
                    .into_iter()
                    .filter(|frame| !scrubber.is_scaffolding(&frame.method))
                    .map(|mut frame| {
                        frame.class_name = scrubber.scrub(&frame.class_name);
                        frame
                    })
                    .collect();
                event.exception = Some(EvalFailure::Exception {
                    class_name: scrubber.scrub(&class_name),
                    message: message.map(|message| scrubber.scrub(&message)),
                    stack,
                });
            }
            Ok(Invocation::Unresolved { snippet }) => {
                let snippet = SnippetId(snippet);
                let names = self.store.state(snippet).map(|state| state.unresolved.clone()).unwrap_or_default();
                event.exception = Some(EvalFailure::Unresolved { snippet, names });
            }
            Ok(Invocation::Stopped) => event.exception = Some(EvalFailure::Stopped),
            Err(error) => {
                log::warn!("invoking #{id} failed: {error}");
                event.exception = Some(EvalFailure::Executor {
                    message: error.to_string(),
                });
            }
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&SnippetEvent) + Send + 'static) -> Subscription {
        let listener: Listener = Box::new(listener);
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.listeners.unsubscribe(subscription)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            executor: Arc::clone(&self.executor),
        }
    }

    /// Current status of the snippet last installed under `key`.
    pub fn status(&self, key: Key) -> Option<Status> {
        self.store.current(key).map(|id| self.store.status(id))
    }

    /// Snippet last installed under `key`, whatever its status.
    pub fn current(&self, key: Key) -> Option<SnippetId> {
        self.store.current(key)
    }

    pub fn snippet(&self, id: SnippetId) -> Option<&Snippet> {
        self.store.get(id)
    }

    pub fn snippet_status(&self, id: SnippetId) -> Status {
        self.store.status(id)
    }

    pub fn snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.store.iter().map(|(snippet, _)| snippet)
    }

    pub fn active(&self) -> impl Iterator<Item = &Snippet> {
        self.store.active()
    }

    pub fn diagnostics(&self, id: SnippetId) -> &[Diag] {
        self.store.state(id).map_or(&[], |state| state.diagnostics.as_slice())
    }

    pub fn unresolved(&self, id: SnippetId) -> &[String] {
        self.store.state(id).map_or(&[], |state| state.unresolved.as_slice())
    }

    /// Generation of the wrapper class the snippet was last emitted as.
    pub fn generation(&self, id: SnippetId) -> Option<u32> {
        self.store.state(id).map(|state| state.seq)
    }

    /// Full wrapper class name of a snippet's current generation.
    pub fn class_name(&self, id: SnippetId) -> Option<String> {
        let snippet = self.store.get(id)?;
        let state = self.store.state(id)?;
        Some(self.config.full_class_name(snippet.key, state.seq))
    }

    pub fn dependents_of(&self, id: SnippetId) -> Vec<SnippetId> {
        self.dependencies.dependents_of(&self.store, id).into_iter().collect()
    }

    pub fn dependencies_of(&self, id: SnippetId) -> Vec<SnippetId> {
        self.dependencies.dependencies_of(&self.store, id).into_iter().collect()
    }

    fn active_of_kind(&self, kind: Kind) -> impl Iterator<Item = &Snippet> {
        self.store.active().filter(move |snippet| snippet.kind() == kind)
    }

    pub fn imports(&self) -> impl Iterator<Item = &Snippet> {
        self.active_of_kind(Kind::Import)
    }

    pub fn types(&self) -> impl Iterator<Item = &Snippet> {
        self.active_of_kind(Kind::TypeDecl)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Snippet> {
        self.active_of_kind(Kind::Method)
    }

    pub fn vars(&self) -> impl Iterator<Item = &Snippet> {
        self.active_of_kind(Kind::Var)
    }

    pub fn tracker(&self) -> &ClassTracker {
        &self.tracker
    }
}
