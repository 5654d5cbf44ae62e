//! One evaluation round: the analyze / corral / emit / expand fixpoint.
//!
//! The round only reads the snippet store and the dependency index; every
//! outcome stays on its [`Unit`]s until `lifecycle::finalize` applies them.
//! The class tracker is the exception, it mirrors what the executor holds.

use super::lifecycle;
use super::tracker::{ClassState, ClassTracker};
use super::unit::{Form, Unit};
use crate::collab::{ClassArtifact, EmitFailure, Emitter, Executor, FrontEnd, RedefineOutcome, SourceUnit};
use crate::config::EngineConfig;
use crate::dependency::DependencyIndex;
use crate::diag::unresolved_names;
use crate::error::{EngineError, EngineResult};
use crate::snippet::{Key, Snippet, SnippetId, Status};
use crate::store::SnippetStore;
use crate::wrap::{OuterWrap, Placement};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub(crate) struct Context<'a> {
    pub config: &'a EngineConfig,
    pub store: &'a SnippetStore,
    pub dependencies: &'a DependencyIndex,
    pub front_end: &'a dyn FrontEnd,
    pub emitter: &'a dyn Emitter,
    pub executor: &'a dyn Executor,
    pub tracker: &'a mut ClassTracker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Analyze,
    Corral,
    Emit,
    Expand,
    Converged,
}

/// Imports exposing every defined snippet accepted by `visible`.
pub(crate) fn visible_imports(
    config: &EngineConfig,
    store: &SnippetStore,
    mut visible: impl FnMut(&Snippet) -> bool,
) -> Vec<String> {
    store
        .defined()
        .filter(|(snippet, _)| visible(snippet))
        .filter_map(|(snippet, state)| snippet.import_for(&config.full_class_name(snippet.key, state.seq)))
        .collect()
}

pub(crate) struct Round<'a> {
    cx: Context<'a>,
    units: Vec<Unit>,
    /// Keys hidden from every wrapper, i.e. a dropped declaration.
    excluded: HashSet<Key>,
    /// Overwritten by erasure this round, hidden like `excluded`.
    overwritten: HashSet<SnippetId>,
    iterations: u32,
    replaced: bool,
}

impl<'a> Round<'a> {
    pub fn new(cx: Context<'a>, units: Vec<Unit>, excluded: HashSet<Key>) -> Self {
        Self {
            cx,
            units,
            excluded,
            overwritten: HashSet::new(),
            iterations: 0,
            replaced: false,
        }
    }

    pub fn run(mut self) -> EngineResult<Vec<Unit>> {
        let mut phase = Phase::Analyze;
        loop {
            log::debug!("round phase {phase:?}: {} unit(s), iteration {}", self.units.len(), self.iterations);
            phase = match phase {
                Phase::Analyze => {
                    self.analyze()?;
                    Phase::Corral
                }
                Phase::Corral => {
                    self.corral();
                    self.assign_statuses();
                    Phase::Emit
                }
                Phase::Emit => {
                    self.replaced = false;
                    self.emit()?;
                    Phase::Expand
                }
                Phase::Expand => {
                    // Replaced class identities change what dependents import.
                    if self.expand() || self.replaced {
                        Phase::Analyze
                    } else {
                        Phase::Converged
                    }
                }
                Phase::Converged => return Ok(self.units),
            };
        }
    }

    fn snippet(&self, index: usize) -> Option<&'a Snippet> {
        self.cx.store.get(self.units[index].id)
    }

    fn working_keys(&self) -> HashSet<Key> {
        self.units.iter().map(|unit| unit.key).collect()
    }

    fn imports_for(&self, index: usize, plus: &[usize]) -> Vec<String> {
        let working = self.working_keys();
        let mut imports = visible_imports(self.cx.config, self.cx.store, |snippet| {
            !working.contains(&snippet.key)
                && !self.excluded.contains(&snippet.key)
                && !self.overwritten.contains(&snippet.id)
        });
        for &other in plus.iter().filter(|other| **other != index) {
            let unit = &self.units[other];
            if let Some(snippet) = self.snippet(other) {
                let class_path = self.cx.config.full_class_name(unit.key, unit.seq);
                imports.extend(snippet.import_for(&class_path));
            }
        }
        imports
    }

    /// Wraps `targets` in their active forms, each seeing the units in `plus`.
    fn wrap_units(&mut self, targets: &[usize], plus: &[usize]) -> Vec<SourceUnit> {
        let mut sources = Vec::with_capacity(targets.len());
        for &index in targets {
            let Some(snippet) = self.snippet(index) else {
                continue;
            };
            let unit = &self.units[index];
            let Some(guts) = unit.active_wrap(snippet) else {
                continue;
            };
            let imports = self.imports_for(index, plus);
            let class_name = self.cx.config.class_name(unit.key, unit.seq);
            let outer = OuterWrap::new(self.cx.config, class_name, &imports, guts, Placement::of(&snippet.data));
            log::trace!("wrapped #{}:\n{}", unit.id, outer.wrap.text());
            sources.push(SourceUnit {
                name: outer.full_name.clone(),
                text: outer.wrap.text().to_string(),
            });
            self.units[index].outer = Some(outer);
        }
        sources
    }

    fn unit_named(&self, candidates: &[usize], name: &str) -> Option<usize> {
        candidates
            .iter()
            .copied()
            .find(|index| self.units[*index].outer.as_ref().is_some_and(|outer| outer.full_name == name))
    }

    fn analyze(&mut self) -> EngineResult<()> {
        self.iterations += 1;
        if self.iterations > self.cx.config.max_fixpoint_iterations {
            return Err(EngineError::FixpointLimit(self.cx.config.max_fixpoint_iterations));
        }
        for unit in &mut self.units {
            unit.reset_for_analysis();
        }
        let all: Vec<usize> = (0..self.units.len()).collect();
        let sources = self.wrap_units(&all, &all);
        let analysis = self.cx.front_end.analyze_batch(&sources);
        for unit in &mut self.units {
            let Some(name) = unit.outer.as_ref().map(|outer| outer.full_name.clone()) else {
                continue;
            };
            unit.diagnostics = unit.translate(analysis.diagnostics_for(&name));
            unit.resolved = analysis.resolved_for(&name);
        }
        Ok(())
    }

    fn corral(&mut self) {
        let store = self.cx.store;
        let mut corralled = Vec::new();
        for (index, unit) in self.units.iter_mut().enumerate() {
            let Some(snippet) = store.get(unit.id) else {
                continue;
            };
            if snippet.corral.is_none() || !unit.is_recoverable(snippet) {
                continue;
            }
            // A signature naming something unresolved cannot compile as a stub either.
            let declared = snippet.references().map(|references| &references.declared);
            let blocked = unresolved_names(&unit.diagnostics)
                .iter()
                .any(|name| declared.is_some_and(|declared| declared.contains(name)));
            if !blocked {
                unit.form = Form::Corralled;
                unit.corral_attempted = true;
                corralled.push(index);
            }
        }
        if corralled.is_empty() {
            return;
        }
        log::debug!("corralling {} unit(s)", corralled.len());
        let all: Vec<usize> = (0..self.units.len()).collect();
        let sources = self.wrap_units(&all, &all);
        let analysis = self.cx.front_end.analyze_batch(&sources);
        for index in corralled {
            let unit = &self.units[index];
            let Some(outer) = &unit.outer else {
                continue;
            };
            let diagnostics = unit.translate(analysis.diagnostics_for(&outer.full_name));
            self.units[index].corral_diagnostics = diagnostics;
        }
    }

    fn assign_statuses(&mut self) {
        let store = self.cx.store;
        for unit in &mut self.units {
            let Some(snippet) = store.get(unit.id) else {
                continue;
            };
            unit.status = lifecycle::assign_status(unit, snippet);
            unit.unresolved = if unit.status.is_recoverable() {
                unresolved_names(&unit.diagnostics)
            } else {
                Vec::new()
            };
        }
        let working = self.working_keys();
        self.overwritten.clear();
        for unit in &mut self.units {
            let Some(snippet) = store.get(unit.id) else {
                continue;
            };
            unit.overwrites = lifecycle::erasure_overwrites(store, unit, snippet, &working);
            self.overwritten.extend(unit.overwrites.iter().copied());
        }
    }

    fn emit(&mut self) -> EngineResult<()> {
        loop {
            let legit: Vec<usize> = (0..self.units.len())
                .filter(|index| self.units[*index].status.is_defined())
                .collect();
            if legit.is_empty() {
                return Ok(());
            }
            let sources = self.wrap_units(&legit, &legit);
            log::debug!("emitting {} unit(s)", sources.len());
            let outcome = self.cx.emitter.emit(&sources);
            if !outcome.is_success() {
                self.demote(&legit, &outcome.failures)?;
                continue;
            }
            let replacements = self.install_artifacts(&legit, outcome.artifacts)?;
            if replacements.is_empty() {
                return Ok(());
            }
            for index in replacements {
                self.replace(index)?;
            }
            self.replaced = true;
        }
    }

    /// Takes the units an emission failure names out of the legit set.
    fn demote(&mut self, legit: &[usize], failures: &[EmitFailure]) -> EngineResult<()> {
        let mut culprits = BTreeSet::new();
        for failure in failures {
            let Some(index) = failure.unit.as_deref().and_then(|name| self.unit_named(legit, name)) else {
                continue;
            };
            let unit = &self.units[index];
            let diag = unit.translate(std::slice::from_ref(&failure.diag));
            self.units[index].emit_diagnostics.extend(diag);
            culprits.insert(index);
        }
        if culprits.is_empty() {
            let messages: Vec<&str> = failures.iter().map(|failure| failure.diag.message.as_str()).collect();
            return Err(EngineError::UnattributedEmission(messages.join("; ")));
        }
        let store = self.cx.store;
        for index in culprits {
            let unit = &mut self.units[index];
            let declaration = store.get(unit.id).is_some_and(Snippet::is_declaration);
            unit.status = if unit.is_dependency() && declaration {
                Status::RecoverableNotDefined
            } else {
                Status::Rejected
            };
            if !unit.status.is_recoverable() {
                unit.unresolved.clear();
            }
            log::warn!("batch emission failed for #{}, now {}", unit.id, unit.status);
        }
        Ok(())
    }

    /// Loads new classes and redefines changed ones. Returns the units whose
    /// class identity must be replaced.
    fn install_artifacts(&mut self, legit: &[usize], artifacts: Vec<ClassArtifact>) -> EngineResult<Vec<usize>> {
        let mut fresh = Vec::new();
        let mut changed: BTreeMap<usize, Vec<ClassArtifact>> = BTreeMap::new();
        for artifact in artifacts {
            let Some(index) = self.unit_named(legit, &artifact.unit) else {
                log::warn!("emitted class {} belongs to no unit", artifact.class_name);
                continue;
            };
            match self.cx.tracker.classify(&artifact) {
                ClassState::New => fresh.push(artifact),
                ClassState::Changed => changed.entry(index).or_default().push(artifact),
                ClassState::Unchanged => {}
            }
        }
        if !fresh.is_empty() {
            log::debug!("loading {} class(es)", fresh.len());
            self.cx.executor.load(&fresh)?;
            self.cx.tracker.record(&fresh);
        }
        let mut replacements = Vec::new();
        for (index, classes) in changed {
            match self.cx.executor.redefine(&classes)? {
                RedefineOutcome::Redefined => {
                    log::debug!("redefined {} class(es) of #{}", classes.len(), self.units[index].id);
                    self.cx.tracker.record(&classes);
                }
                RedefineOutcome::Unsupported { class_name, reason } => {
                    log::debug!("cannot redefine {class_name}: {reason}");
                    replacements.push(index);
                }
            }
        }
        Ok(replacements)
    }

    fn replace(&mut self, index: usize) -> EngineResult<()> {
        let floor = self.cx.store.generation(self.units[index].key);
        let unit = &mut self.units[index];
        if unit.replaced_at.contains(&unit.seq) {
            return Err(EngineError::ReplacementStalled {
                snippet: unit.id,
                seq: unit.seq,
            });
        }
        unit.replaced_at.push(unit.seq);
        unit.seq = unit.seq.max(floor) + 1;
        unit.signature_changed = true;
        log::debug!("#{} moves to class generation {}", unit.id, unit.seq);
        Ok(())
    }

    /// Adds active snippets that reference a name whose definedness or
    /// signature changed. Returns whether the working set grew.
    fn expand(&mut self) -> bool {
        let store = self.cx.store;
        let working = self.working_keys();
        let mut added: Vec<(SnippetId, SnippetId)> = Vec::new();
        for unit in self.units.iter().filter(|unit| unit.affects_dependents()) {
            let Some(name) = store.get(unit.id).and_then(Snippet::declared_name) else {
                continue;
            };
            for dependent in self.cx.dependencies.referencing(name) {
                if added.iter().any(|(id, _)| *id == dependent) || !store.status(dependent).is_active() {
                    continue;
                }
                let Some(other) = store.get(dependent) else {
                    continue;
                };
                if working.contains(&other.key) || self.excluded.contains(&other.key) || self.overwritten.contains(&dependent) {
                    continue;
                }
                added.push((dependent, unit.id));
            }
        }
        for (id, cause) in &added {
            if let Some(snippet) = store.get(*id) {
                log::debug!("#{id} depends on #{cause}, adding it to the round");
                self.units.push(Unit::dependency(snippet, store, *cause));
            }
        }
        !added.is_empty()
    }
}
