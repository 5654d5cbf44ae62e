//! Snippet lifecycle: the status rule, overwrite detection and installing a
//! finished round into the store.
//!
//! ```text
//! NONEXISTENT ──round──> VALID | RECOVERABLE_DEFINED | RECOVERABLE_NOT_DEFINED | REJECTED
//! active ──same key or erased signature──> OVERWRITTEN
//! active ──drop──> DROPPED
//! ```

use super::unit::Unit;
use crate::dependency::DependencyIndex;
use crate::diag::{Diag, has_errors};
use crate::event::SnippetEvent;
use crate::snippet::{Key, Kind, Snippet, SnippetId, Status};
use crate::store::{SnippetState, SnippetStore};
use crate::wrap::ENTRY_METHOD;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Status of a unit after its normal and (maybe) corralled analysis.
pub(crate) fn assign_status(unit: &Unit, snippet: &Snippet) -> Status {
    if !has_errors(&unit.diagnostics) {
        Status::Valid
    } else if unit.is_recoverable(snippet) {
        if unit.corral_attempted && !has_errors(&unit.corral_diagnostics) {
            Status::RecoverableDefined
        } else {
            Status::RecoverableNotDefined
        }
    } else {
        Status::Rejected
    }
}

/// Active methods of another key that a newly defined method makes
/// indistinguishable: same name and same erased parameter types.
pub(crate) fn erasure_overwrites(
    store: &SnippetStore,
    unit: &Unit,
    snippet: &Snippet,
    working: &HashSet<Key>,
) -> Vec<SnippetId> {
    if !unit.is_direct() || !unit.status.is_defined() || snippet.kind() != Kind::Method {
        return Vec::new();
    }
    let (Some(name), Some(erased)) = (snippet.declared_name(), snippet.erased_parameter_types()) else {
        return Vec::new();
    };
    store
        .active()
        .filter(|other| other.kind() == Kind::Method && other.key != snippet.key)
        .filter(|other| !working.contains(&other.key))
        .filter(|other| other.declared_name() == Some(name) && other.erased_parameter_types() == Some(erased))
        .map(|other| other.id)
        .collect()
}

/// Rewrites synthetic wrapper names in user-visible text to snippet ids.
pub(crate) struct Scrubber<'a> {
    pattern: &'a Regex,
    owners: HashMap<u32, SnippetId>,
}

impl<'a> Scrubber<'a> {
    /// `pattern` is [`crate::EngineConfig::wrapper_pattern`].
    pub fn new(pattern: &'a Regex, store: &SnippetStore, units: &[Unit]) -> Self {
        let mut owners: HashMap<u32, SnippetId> = store
            .iter()
            .filter_map(|(snippet, _)| store.current(snippet.key).map(|id| (snippet.key.0, id)))
            .collect();
        owners.extend(units.iter().filter(|unit| unit.status.is_active()).map(|unit| (unit.key.0, unit.id)));
        Self { pattern, owners }
    }

    pub fn scrub(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |captures: &Captures| {
                let member = captures.get(2).map(|member| member.as_str());
                match member {
                    Some(member) if member != ENTRY_METHOD => member.to_string(),
                    _ => {
                        let key = captures.get(1).and_then(|key| key.as_str().parse::<u32>().ok());
                        match key.and_then(|key| self.owners.get(&key)) {
                            Some(id) => format!("#{id}"),
                            None => "#?".to_string(),
                        }
                    }
                }
            })
            .into_owned()
    }

    pub fn scrub_diag(&self, diag: &Diag) -> Diag {
        diag.clone().with_message(self.scrub(&diag.message))
    }

    /// Stack frames of generated entry methods are not shown.
    pub fn is_scaffolding(&self, method: &str) -> bool {
        method == ENTRY_METHOD
    }
}

/// Diagnostics kept on the snippet once the round is over.
fn final_diagnostics(unit: &Unit, snippet: &Snippet, scrubber: &Scrubber<'_>) -> Vec<Diag> {
    let analysis: Vec<&Diag> = match unit.status {
        Status::Valid | Status::RecoverableDefined if unit.emit_diagnostics.is_empty() => {
            unit.diagnostics.iter().filter(|diag| !diag.is_error()).collect()
        }
        _ => unit.diagnostics.iter().chain(&unit.emit_diagnostics).collect(),
    };
    snippet
        .generated
        .iter()
        .chain(analysis)
        .map(|diag| scrubber.scrub_diag(diag))
        .collect()
}

fn event(snippet: &Snippet, previous_status: Status, status: Status) -> SnippetEvent {
    SnippetEvent {
        snippet: snippet.id,
        key: snippet.key,
        kind: snippet.kind(),
        previous_status,
        status,
        signature_changed: false,
        caused_by: None,
        value: None,
        exception: None,
    }
}

/// Events for a snippet taken out of the program by another one.
fn retire(
    store: &mut SnippetStore,
    dependencies: &mut DependencyIndex,
    id: SnippetId,
    status: Status,
    caused_by: Option<SnippetId>,
) -> Option<SnippetEvent> {
    let previous_status = store.status(id);
    if !previous_status.is_active() {
        return None;
    }
    store.set_status(id, status);
    dependencies.remove(id);
    let snippet = store.get(id)?;
    log::info!("#{id} {previous_status} -> {status}");
    Some(SnippetEvent {
        caused_by,
        ..event(snippet, previous_status, status)
    })
}

pub(crate) fn drop_snippet(
    store: &mut SnippetStore,
    dependencies: &mut DependencyIndex,
    id: SnippetId,
) -> Option<SnippetEvent> {
    retire(store, dependencies, id, Status::Dropped, None)
}

/// Applies a converged round to the store and dependency index and returns
/// the events in order: per unit, the snippets it overwrites come first.
pub(crate) fn finalize(
    wrapper_names: &Regex,
    store: &mut SnippetStore,
    dependencies: &mut DependencyIndex,
    units: &[Unit],
) -> Vec<SnippetEvent> {
    let scrubber = Scrubber::new(wrapper_names, store, units);
    let mut events = Vec::new();
    for unit in units {
        let Some(snippet) = store.get(unit.id).cloned() else {
            continue;
        };
        let active = unit.status.is_active();
        if unit.is_direct() && active {
            let overwritten = unit.previous.into_iter().chain(unit.overwrites.iter().copied());
            for id in overwritten.collect::<BTreeSet<_>>() {
                events.extend(retire(store, dependencies, id, Status::Overwritten, Some(unit.id)));
            }
        }

        store.set_state(
            unit.id,
            SnippetState {
                status: unit.status,
                seq: unit.seq,
                diagnostics: final_diagnostics(unit, &snippet, &scrubber),
                unresolved: if unit.status.is_recoverable() { unit.unresolved.clone() } else { Vec::new() },
            },
        );
        store.record_generation(unit.key, unit.seq);
        if active {
            store.install(unit.id);
            let mut names = snippet.references().map(|references| references.body.clone()).unwrap_or_default();
            names.extend(unit.resolved.iter().cloned());
            dependencies.install(unit.id, names);
        } else {
            dependencies.remove(unit.id);
        }

        if unit.is_direct() {
            // A rejected redeclaration leaves its predecessor in place.
            let previous_status = if active { unit.prev_status } else { Status::Nonexistent };
            log::info!("#{} {previous_status} -> {}", unit.id, unit.status);
            events.push(SnippetEvent {
                signature_changed: unit.signature_changed && active,
                ..event(&snippet, previous_status, unit.status)
            });
        } else if unit.status != unit.prev_status {
            log::info!("#{} {} -> {} (caused by #{:?})", unit.id, unit.prev_status, unit.status, unit.caused_by());
            events.push(SnippetEvent {
                signature_changed: unit.signature_changed,
                caused_by: unit.caused_by(),
                ..event(&snippet, unit.prev_status, unit.status)
            });
        }
    }
    events
}

/// Records a snippet that never enters a round.
pub(crate) fn reject(store: &mut SnippetStore, id: SnippetId, diagnostics: Vec<Diag>) -> Option<SnippetEvent> {
    let seq = store.state(id).map_or(0, |state| state.seq);
    store.set_state(
        id,
        SnippetState {
            status: Status::Rejected,
            seq,
            diagnostics,
            unresolved: Vec::new(),
        },
    );
    let snippet = store.get(id)?;
    log::info!("#{id} rejected before analysis");
    Some(event(snippet, Status::Nonexistent, Status::Rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::snippet::{KeyIdentity, KindData, References, SubKind};
    use crate::wrap::Wrap;

    fn method(store: &mut SnippetStore, name: &str, parameters: &[&str], erased: &[&str]) -> SnippetId {
        let key = store.key_for(KeyIdentity::Method {
            name: name.into(),
            parameter_types: parameters.join(","),
        });
        let id = store.next_id();
        store.insert(Snippet {
            id,
            key,
            sub_kind: SubKind::Method,
            source: String::new(),
            data: KindData::Method {
                name: name.into(),
                signature: String::new(),
                parameter_types: parameters.iter().map(|parameter| parameter.to_string()).collect(),
                erased_parameter_types: erased.iter().map(|parameter| parameter.to_string()).collect(),
                references: References::default(),
            },
            guts: Some(Wrap::builder("").literal("void m() {}").build()),
            corral: None,
            generated: Vec::new(),
        })
    }

    fn var(store: &mut SnippetStore, name: &str, with_initializer: bool) -> SnippetId {
        let key = store.key_for(KeyIdentity::Var { name: name.into() });
        let id = store.next_id();
        store.insert(Snippet {
            id,
            key,
            sub_kind: if with_initializer {
                SubKind::VarDeclarationWithInitializer
            } else {
                SubKind::VarDeclaration
            },
            source: String::new(),
            data: KindData::Var {
                name: name.into(),
                type_name: "int".into(),
                references: References::default(),
            },
            guts: None,
            corral: None,
            generated: Vec::new(),
        })
    }

    #[test]
    fn status_rule() {
        let mut store = SnippetStore::new();
        let plain = var(&mut store, "x", false);
        let initialized = var(&mut store, "y", true);
        let snippet = store.get(plain).cloned().expect("inserted");
        let mut unit = Unit::direct(&snippet, &store);
        assert_eq!(assign_status(&unit, &snippet), Status::Valid);

        unit.diagnostics = vec![Diag::unresolved("g", "method", 0..1)];
        assert_eq!(assign_status(&unit, &snippet), Status::RecoverableNotDefined);
        unit.corral_attempted = true;
        assert_eq!(assign_status(&unit, &snippet), Status::RecoverableDefined);
        unit.corral_diagnostics = vec![Diag::unresolved("T", "class", 0..1)];
        assert_eq!(assign_status(&unit, &snippet), Status::RecoverableNotDefined);

        unit.diagnostics.push(Diag::semantic("incompatible.types", "bad", 0..1));
        assert_eq!(assign_status(&unit, &snippet), Status::Rejected);
        let dependency = Unit {
            diagnostics: unit.diagnostics.clone(),
            ..Unit::dependency(&snippet, &store, SnippetId(9))
        };
        assert_eq!(assign_status(&dependency, &snippet), Status::RecoverableNotDefined);

        let snippet = store.get(initialized).cloned().expect("inserted");
        let mut unit = Unit::direct(&snippet, &store);
        unit.diagnostics = vec![Diag::unresolved("g", "method", 0..1)];
        assert_eq!(assign_status(&unit, &snippet), Status::Rejected);
    }

    #[test]
    fn erased_signature_collisions_overwrite() {
        let mut store = SnippetStore::new();
        let old = method(&mut store, "m", &["Object"], &["Object"]);
        store.set_status(old, Status::Valid);
        store.install(old);
        let other = method(&mut store, "m", &["int"], &["int"]);
        store.set_status(other, Status::Valid);
        store.install(other);

        let new = method(&mut store, "m", &["T"], &["Object"]);
        let snippet = store.get(new).cloned().expect("inserted");
        let mut unit = Unit::direct(&snippet, &store);
        unit.status = Status::Valid;
        let working = HashSet::from([snippet.key]);
        assert_eq!(erasure_overwrites(&store, &unit, &snippet, &working), vec![old]);

        unit.status = Status::Rejected;
        assert!(erasure_overwrites(&store, &unit, &snippet, &working).is_empty());
    }

    #[test]
    fn scrubber_hides_wrapper_names() {
        let mut store = SnippetStore::new();
        let id = var(&mut store, "x", false);
        store.set_status(id, Status::Valid);
        store.install(id);
        let pattern = EngineConfig::default().wrapper_pattern().expect("default names are valid");
        let scrubber = Scrubber::new(&pattern, &store, &[]);
        assert_eq!(scrubber.scrub("incompatible: REPL.$Rivet$1$2.X found"), "incompatible: X found");
        assert_eq!(scrubber.scrub("in $Rivet$1.do_it$"), "in #1");
        assert_eq!(scrubber.scrub("class REPL.$Rivet$1"), "class #1");
        assert_eq!(scrubber.scrub("nothing here"), "nothing here");
    }
}
