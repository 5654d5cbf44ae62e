//! Round-scoped compilation state of one snippet.

use crate::corral::stub_body;
use crate::diag::{Diag, has_errors, only_resolution_errors};
use crate::snippet::{Key, Snippet, SnippetId, Status};
use crate::store::SnippetStore;
use crate::wrap::{OuterWrap, Wrap};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
    /// The snippet the user just evaluated.
    Direct,
    /// Pulled in because the given snippet changed.
    Dependency(SnippetId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    Normal,
    Corralled,
}

#[derive(Debug)]
pub(crate) struct Unit {
    pub id: SnippetId,
    pub key: Key,
    pub cause: Cause,
    /// Active same-key snippet this unit replaces once installed.
    pub previous: Option<SnippetId>,
    pub prev_status: Status,
    /// Generation of the wrapper class, bumped when hot-swap is refused.
    pub seq: u32,
    pub form: Form,
    /// Last wrapped compilation unit handed to a collaborator.
    pub outer: Option<OuterWrap>,
    /// Normal-form analysis diagnostics, in snippet coordinates.
    pub diagnostics: Vec<Diag>,
    pub corral_diagnostics: Vec<Diag>,
    pub emit_diagnostics: Vec<Diag>,
    pub corral_attempted: bool,
    pub status: Status,
    pub unresolved: Vec<String>,
    pub signature_changed: bool,
    /// Generations at which hot-swap was refused this round.
    pub replaced_at: Vec<u32>,
    pub resolved: BTreeSet<String>,
    /// Methods overwritten through erased-signature equality.
    pub overwrites: Vec<SnippetId>,
}

impl Unit {
    fn new(snippet: &Snippet, store: &SnippetStore, cause: Cause) -> Self {
        Self {
            id: snippet.id,
            key: snippet.key,
            cause,
            previous: None,
            prev_status: store.status(snippet.id),
            seq: store.state(snippet.id).map_or(0, |state| state.seq),
            form: Form::Normal,
            outer: None,
            diagnostics: Vec::new(),
            corral_diagnostics: Vec::new(),
            emit_diagnostics: Vec::new(),
            corral_attempted: false,
            status: Status::Nonexistent,
            unresolved: Vec::new(),
            signature_changed: false,
            replaced_at: Vec::new(),
            resolved: BTreeSet::new(),
            overwrites: Vec::new(),
        }
    }

    pub fn direct(snippet: &Snippet, store: &SnippetStore) -> Self {
        let mut unit = Self::new(snippet, store, Cause::Direct);
        unit.previous = store.active_for_key(snippet.key).filter(|id| *id != snippet.id);
        let previous = unit.previous.and_then(|id| store.get(id));
        unit.prev_status = unit.previous.map_or(Status::Nonexistent, |id| store.status(id));
        unit.signature_changed = previous.is_none_or(|previous| signature(previous) != signature(snippet));
        unit
    }

    pub fn dependency(snippet: &Snippet, store: &SnippetStore, cause: SnippetId) -> Self {
        Self::new(snippet, store, Cause::Dependency(cause))
    }

    pub fn is_direct(&self) -> bool {
        self.cause == Cause::Direct
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self.cause, Cause::Dependency(_))
    }

    pub fn caused_by(&self) -> Option<SnippetId> {
        match self.cause {
            Cause::Direct => None,
            Cause::Dependency(id) => Some(id),
        }
    }

    pub fn active_wrap<'a>(&self, snippet: &'a Snippet) -> Option<&'a Wrap> {
        match self.form {
            Form::Normal => snippet.guts.as_ref(),
            Form::Corralled => snippet.corral.as_ref().or(snippet.guts.as_ref()),
        }
    }

    /// Clears what one analysis pass computes. Generation, cause and
    /// signature change survive across passes.
    pub fn reset_for_analysis(&mut self) {
        self.form = Form::Normal;
        self.diagnostics.clear();
        self.corral_diagnostics.clear();
        self.emit_diagnostics.clear();
        self.corral_attempted = false;
        self.unresolved.clear();
        self.resolved.clear();
        self.overwrites.clear();
    }

    /// Failed normal analysis, but may still become defined later.
    pub fn is_recoverable(&self, snippet: &Snippet) -> bool {
        has_errors(&self.diagnostics)
            && snippet.is_declaration()
            && (self.is_dependency()
                || (only_resolution_errors(&self.diagnostics) && !snippet.is_var_with_initializer()))
    }

    /// Whether snippets referencing this one must be reconsidered.
    pub fn affects_dependents(&self) -> bool {
        let changed = self.signature_changed || self.status != self.prev_status;
        match self.cause {
            Cause::Direct => self.status.is_active() && changed,
            Cause::Dependency(_) => changed,
        }
    }

    /// Translates diagnostics from the last wrapped unit back to the snippet.
    pub fn translate(&self, diags: &[Diag]) -> Vec<Diag> {
        diags
            .iter()
            .map(|diag| match &self.outer {
                Some(outer) => diag.clone().with_span(outer.wrap.translate_span(diag.span.clone())),
                None => diag.clone(),
            })
            .collect()
    }
}

/// Declaration shape compared to decide whether dependents must be reconsidered.
pub(crate) fn signature(snippet: &Snippet) -> String {
    match (&snippet.corral, &snippet.guts) {
        (Some(corral), _) => corral.text().replace(&stub_body(snippet.id), ""),
        (None, Some(guts)) => guts.text().to_string(),
        (None, None) => snippet.source.clone(),
    }
}
