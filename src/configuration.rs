//! The set of currently active states of one session.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::{StateChart, StateId, StateNode};

/// Raised when the transition algorithm enters or exits a state twice.
/// The executor treats both as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("State {state} is already active")]
    AlreadyActive { state: String },
    #[error("State {state} is not active")]
    NotActive { state: String },
}

pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Active states, composite and atomic, plus the atomic subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateConfiguration {
    active: BTreeSet<StateId>,
    atomic: BTreeSet<StateId>,
}

impl StateConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_state(&mut self, state: &StateNode) -> ConfigurationResult<()> {
        if !self.active.insert(state.index()) {
            return Err(ConfigurationError::AlreadyActive {
                state: state.id().to_string(),
            });
        }
        if state.is_atomic() {
            self.atomic.insert(state.index());
        }
        Ok(())
    }

    pub fn exit_state(&mut self, state: &StateNode) -> ConfigurationResult<()> {
        if !self.active.remove(&state.index()) {
            return Err(ConfigurationError::NotActive {
                state: state.id().to_string(),
            });
        }
        self.atomic.remove(&state.index());
        Ok(())
    }

    /// All active states in document order.
    pub fn active_states(&self) -> &BTreeSet<StateId> {
        &self.active
    }

    /// Active atomic states in document order.
    pub fn states(&self) -> &BTreeSet<StateId> {
        &self.atomic
    }

    pub fn is_active(&self, state: StateId) -> bool {
        self.active.contains(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.atomic.clear();
    }

    pub fn active_ids(&self, chart: &StateChart) -> BTreeSet<String> {
        ids(chart, &self.active)
    }

    pub fn atomic_ids(&self, chart: &StateChart) -> BTreeSet<String> {
        ids(chart, &self.atomic)
    }
}

fn ids(chart: &StateChart, states: &BTreeSet<StateId>) -> BTreeSet<String> {
    states
        .iter()
        .map(|s| chart.node(*s).id().to_string())
        .collect()
}
