//! Lifecycle events and their subscribers.

use crate::collab::StackFrame;
use crate::snippet::{Key, Kind, SnippetId, Status};
use serde::Serialize;

/// Why running an executable snippet did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum EvalFailure {
    /// User code threw.
    Exception {
        class_name: String,
        message: Option<String>,
        stack: Vec<StackFrame>,
    },
    /// Execution reached the body of a corralled declaration.
    Unresolved { snippet: SnippetId, names: Vec<String> },
    Stopped,
    /// The executor failed while invoking.
    Executor { message: String },
}

/// One status transition of one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnippetEvent {
    pub snippet: SnippetId,
    pub key: Key,
    pub kind: Kind,
    pub previous_status: Status,
    pub status: Status,
    pub signature_changed: bool,
    /// Snippet whose evaluation caused this event, if not the snippet itself.
    pub caused_by: Option<SnippetId>,
    pub value: Option<String>,
    pub exception: Option<EvalFailure>,
}

impl SnippetEvent {
    pub fn is_transition(&self) -> bool {
        self.previous_status != self.status
    }
}

pub type Listener = Box<dyn FnMut(&SnippetEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next: u64,
    entries: Vec<(Subscription, Listener)>,
}

impl Listeners {
    pub fn subscribe(&mut self, listener: Listener) -> Subscription {
        self.next += 1;
        let subscription = Subscription(self.next);
        self.entries.push((subscription, listener));
        subscription
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != subscription);
        before != self.entries.len()
    }

    pub fn notify(&mut self, events: &[SnippetEvent]) {
        for event in events {
            for (_, listener) in &mut self.entries {
                listener(event);
            }
        }
    }
}
