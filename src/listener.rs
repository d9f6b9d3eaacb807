//! Observers of a running session.

use std::sync::Arc;

use crate::model::{StateNode, Transition};

/// Callbacks fired by the executor in processing order.
pub trait Listener: Send + Sync {
    fn on_entry(&self, state: &StateNode);

    fn on_exit(&self, state: &StateNode);

    /// One call per target; `target` is `None` for targetless transitions.
    fn on_transition(
        &self,
        source: Option<&StateNode>,
        target: Option<&StateNode>,
        transition: &Transition,
        event: Option<&str>,
    );

    /// The session reached a top-level final state or was cancelled.
    fn on_close(&self, _session_id: &str) {}
}

#[derive(Clone, Default)]
pub struct NotificationRegistry {
    listeners: Vec<Arc<dyn Listener>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn entry(&self, state: &StateNode) {
        self.listeners.iter().for_each(|l| l.on_entry(state));
    }

    pub fn exit(&self, state: &StateNode) {
        self.listeners.iter().for_each(|l| l.on_exit(state));
    }

    pub fn transition(
        &self,
        source: Option<&StateNode>,
        target: Option<&StateNode>,
        transition: &Transition,
        event: Option<&str>,
    ) {
        self.listeners
            .iter()
            .for_each(|l| l.on_transition(source, target, transition, event));
    }

    pub fn close(&self, session_id: &str) {
        self.listeners.iter().for_each(|l| l.on_close(session_id));
    }
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
