//! Remembers which class bytes the executor currently holds.

use crate::collab::ClassArtifact;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassState {
    /// Never loaded: needs `load`.
    New,
    /// Loaded with identical bytes: nothing to do.
    Unchanged,
    /// Loaded with different bytes: needs `redefine`.
    Changed,
}

#[derive(Debug, Default)]
pub struct ClassTracker {
    loaded: HashMap<String, Vec<u8>>,
}

impl ClassTracker {
    pub(crate) fn classify(&self, artifact: &ClassArtifact) -> ClassState {
        match self.loaded.get(&artifact.class_name) {
            None => ClassState::New,
            Some(bytes) if *bytes == artifact.bytes => ClassState::Unchanged,
            Some(_) => ClassState::Changed,
        }
    }

    pub(crate) fn record(&mut self, artifacts: &[ClassArtifact]) {
        for artifact in artifacts {
            self.loaded.insert(artifact.class_name.clone(), artifact.bytes.clone());
        }
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.loaded.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, bytes: &[u8]) -> ClassArtifact {
        ClassArtifact {
            unit: "REPL.$Rivet$1".into(),
            class_name: name.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn partitions_by_recorded_bytes() {
        let mut tracker = ClassTracker::default();
        assert_eq!(tracker.classify(&artifact("A", b"1")), ClassState::New);
        tracker.record(&[artifact("A", b"1")]);
        assert!(tracker.is_loaded("A"));
        assert_eq!(tracker.classify(&artifact("A", b"1")), ClassState::Unchanged);
        assert_eq!(tracker.classify(&artifact("A", b"2")), ClassState::Changed);
        tracker.record(&[artifact("A", b"2")]);
        assert_eq!(tracker.classify(&artifact("A", b"2")), ClassState::Unchanged);
        assert_eq!(tracker.len(), 1);
    }
}
