//! The snippet store: an append-only arena of snippets indexed by id, with
//! keys interned from declaration identities.
//!
//! Snippets are immutable once inserted. Their lifecycle state is kept next
//! to them and only changed while a round is being finalized.

use crate::diag::Diag;
use crate::snippet::{Key, KeyIdentity, Snippet, SnippetId, Status};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetState {
    pub status: Status,
    /// Generation of the key's wrapper class this snippet was last emitted as.
    pub seq: u32,
    pub diagnostics: Vec<Diag>,
    /// Only non-empty while the status is recoverable.
    pub unresolved: Vec<String>,
}

#[derive(Debug)]
struct Entry {
    snippet: Snippet,
    state: SnippetState,
}

#[derive(Debug, Default)]
pub struct SnippetStore {
    entries: Vec<Entry>,
    /// Intern table: declaration identity → Key
    keys: HashMap<KeyIdentity, Key>,
    next_key: u32,
    /// Most recently installed snippet per key
    current: HashMap<Key, SnippetId>,
    /// Highest generation handed out per key
    generations: HashMap<Key, u32>,
}

impl SnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted snippet will get.
    pub fn next_id(&self) -> SnippetId {
        SnippetId(self.entries.len() as u32 + 1)
    }

    pub fn key_for(&mut self, identity: KeyIdentity) -> Key {
        if let Some(key) = self.keys.get(&identity) {
            return *key;
        }
        self.next_key += 1;
        let key = Key(self.next_key);
        self.keys.insert(identity, key);
        key
    }

    /// Adds a snippet as `NONEXISTENT`, starting at its key's current generation.
    pub fn insert(&mut self, snippet: Snippet) -> SnippetId {
        let id = self.next_id();
        debug_assert_eq!(snippet.id, id, "snippet ids are allocated in order");
        let seq = self.generation(snippet.key);
        self.entries.push(Entry {
            snippet,
            state: SnippetState {
                status: Status::Nonexistent,
                seq,
                diagnostics: Vec::new(),
                unresolved: Vec::new(),
            },
        });
        id
    }

    fn entry(&self, id: SnippetId) -> Option<&Entry> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.entries.get(index)
    }

    pub fn get(&self, id: SnippetId) -> Option<&Snippet> {
        self.entry(id).map(|entry| &entry.snippet)
    }

    pub fn state(&self, id: SnippetId) -> Option<&SnippetState> {
        self.entry(id).map(|entry| &entry.state)
    }

    pub fn status(&self, id: SnippetId) -> Status {
        self.state(id).map_or(Status::Nonexistent, |state| state.status)
    }

    pub(crate) fn set_state(&mut self, id: SnippetId, state: SnippetState) {
        let Some(index) = (id.0 as usize).checked_sub(1) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(index) {
            entry.state = state;
        }
    }

    pub(crate) fn set_status(&mut self, id: SnippetId, status: Status) {
        let Some(index) = (id.0 as usize).checked_sub(1) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(index) {
            entry.state.status = status;
            if !status.is_recoverable() {
                entry.state.unresolved.clear();
            }
        }
    }

    /// Latest snippet installed under `key`, whatever its status.
    pub fn current(&self, key: Key) -> Option<SnippetId> {
        self.current.get(&key).copied()
    }

    /// The key's current snippet if it is still active.
    pub fn active_for_key(&self, key: Key) -> Option<SnippetId> {
        self.current(key).filter(|id| self.status(*id).is_active())
    }

    pub(crate) fn install(&mut self, id: SnippetId) {
        if let Some(key) = self.get(id).map(|snippet| snippet.key) {
            self.current.insert(key, id);
        }
    }

    pub fn generation(&self, key: Key) -> u32 {
        self.generations.get(&key).copied().unwrap_or(0)
    }

    pub(crate) fn record_generation(&mut self, key: Key, seq: u32) {
        let generation = self.generations.entry(key).or_insert(0);
        *generation = (*generation).max(seq);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Snippet, &SnippetState)> {
        self.entries.iter().map(|entry| (&entry.snippet, &entry.state))
    }

    pub fn active(&self) -> impl Iterator<Item = &Snippet> {
        self.iter()
            .filter(|(_, state)| state.status.is_active())
            .map(|(snippet, _)| snippet)
    }

    pub fn defined(&self) -> impl Iterator<Item = (&Snippet, &SnippetState)> {
        self.iter().filter(|(_, state)| state.status.is_defined())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::{KindData, SubKind};

    fn snippet(store: &mut SnippetStore, name: &str) -> Snippet {
        let key = store.key_for(KeyIdentity::Var { name: name.into() });
        Snippet {
            id: store.next_id(),
            key,
            sub_kind: SubKind::VarDeclaration,
            source: format!("int {name};"),
            data: KindData::Erroneous,
            guts: None,
            corral: None,
            generated: Vec::new(),
        }
    }

    #[test]
    fn keys_are_interned() {
        let mut store = SnippetStore::new();
        let a = store.key_for(KeyIdentity::Var { name: "x".into() });
        let b = store.key_for(KeyIdentity::Var { name: "y".into() });
        let c = store.key_for(KeyIdentity::Var { name: "x".into() });
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn new_snippets_start_nonexistent_at_key_generation() {
        let mut store = SnippetStore::new();
        let first = snippet(&mut store, "x");
        let key = first.key;
        let first = store.insert(first);
        assert_eq!(first, SnippetId(1));
        assert_eq!(store.status(first), Status::Nonexistent);
        assert_eq!(store.active_for_key(key), None);

        store.set_status(first, Status::Valid);
        store.install(first);
        store.record_generation(key, 2);
        assert_eq!(store.active_for_key(key), Some(first));

        let second = snippet(&mut store, "x");
        let second = store.insert(second);
        assert_eq!(store.state(second).map(|state| state.seq), Some(2));
        assert_eq!(store.current(key), Some(first));
    }

    #[test]
    fn unknown_ids_are_nonexistent() {
        let store = SnippetStore::new();
        assert_eq!(store.status(SnippetId(0)), Status::Nonexistent);
        assert_eq!(store.status(SnippetId(7)), Status::Nonexistent);
        assert!(store.get(SnippetId(7)).is_none());
    }
}
