//! Name-based dependency index between snippets.
//!
//! Edges are kept as plain maps over ids and names in both directions, so
//! cycles between mutually recursive declarations need no special handling.

use crate::snippet::SnippetId;
use crate::store::SnippetStore;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct DependencyIndex {
    /// Name → snippets referencing it
    dependents: HashMap<String, BTreeSet<SnippetId>>,
    /// Snippet → names it references
    references: HashMap<SnippetId, BTreeSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the recorded references of `id`.
    pub fn install(&mut self, id: SnippetId, names: BTreeSet<String>) {
        self.remove(id);
        for name in &names {
            self.dependents.entry(name.clone()).or_default().insert(id);
        }
        self.references.insert(id, names);
    }

    pub fn remove(&mut self, id: SnippetId) {
        let Some(names) = self.references.remove(&id) else {
            return;
        };
        for name in names {
            if let Some(ids) = self.dependents.get_mut(&name) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.dependents.remove(&name);
                }
            }
        }
    }

    /// Every indexed snippet referencing `name`, active or not.
    pub fn referencing<'a>(&'a self, name: &str) -> impl Iterator<Item = SnippetId> + 'a {
        self.dependents.get(name).into_iter().flatten().copied()
    }

    pub fn references_of(&self, id: SnippetId) -> Option<&BTreeSet<String>> {
        self.references.get(&id)
    }

    /// Active snippets, other than `id` and its key's other versions, whose
    /// references include the name `id` declares.
    pub fn dependents_of(&self, store: &SnippetStore, id: SnippetId) -> BTreeSet<SnippetId> {
        let Some(snippet) = store.get(id) else {
            return BTreeSet::new();
        };
        let Some(name) = snippet.declared_name() else {
            return BTreeSet::new();
        };
        self.referencing(name)
            .filter(|dependent| *dependent != id)
            .filter(|dependent| store.status(*dependent).is_active())
            .filter(|dependent| store.get(*dependent).is_some_and(|other| other.key != snippet.key))
            .collect()
    }

    /// Defined snippets declaring a name `id` references.
    pub fn dependencies_of(&self, store: &SnippetStore, id: SnippetId) -> BTreeSet<SnippetId> {
        let (Some(snippet), Some(names)) = (store.get(id), self.references_of(id)) else {
            return BTreeSet::new();
        };
        store
            .defined()
            .map(|(other, _)| other)
            .filter(|other| other.key != snippet.key)
            .filter(|other| other.declared_name().is_some_and(|name| names.contains(name)))
            .map(|other| other.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn install_replaces_previous_references() {
        let mut index = DependencyIndex::new();
        index.install(SnippetId(1), names(&["g", "X"]));
        index.install(SnippetId(2), names(&["g"]));
        assert_eq!(index.referencing("g").collect::<Vec<_>>(), vec![SnippetId(1), SnippetId(2)]);

        index.install(SnippetId(1), names(&["h"]));
        assert_eq!(index.referencing("g").collect::<Vec<_>>(), vec![SnippetId(2)]);
        assert_eq!(index.referencing("X").count(), 0);
        assert_eq!(index.referencing("h").collect::<Vec<_>>(), vec![SnippetId(1)]);
    }

    #[test]
    fn remove_forgets_snippet() {
        let mut index = DependencyIndex::new();
        index.install(SnippetId(1), names(&["g"]));
        index.remove(SnippetId(1));
        index.remove(SnippetId(1));
        assert_eq!(index.referencing("g").count(), 0);
        assert!(index.references_of(SnippetId(1)).is_none());
    }
}
