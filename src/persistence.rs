//! # Persistence
//!
//! A [`Snapshot`] captures everything needed to resume a session later,
//! possibly in another process: the active configuration, the datamodel,
//! recorded history, both event queues, the send-id sequence and the state
//! of every running invocation.
//!
//! States are stored by document id, so a snapshot can be restored against
//! any [`StateChart`] built from the same document. Ids that no longer exist
//! fail the restore with [`RestoreError::ElementNotFound`].
//!
//! Transient system variables (`_event`, `_ioprocessors`, `_x`) are not
//! stored; the restored executor rebuilds them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::configuration::{ConfigurationError, StateConfiguration};
use crate::context::{self, DataModel, Scope, ScopeId};
use crate::event::TriggerEvent;
use crate::executor::ExecutorStatus;
use crate::invoke::{Invocation, InvokeError};
use crate::model::{StateChart, StateId};
use crate::semantics::HistoryValues;

pub const FORMAT_VERSION: u32 = 1;

const SYSTEM_SCOPE_KEY: &str = "#system";
const GLOBAL_SCOPE_KEY: &str = "#global";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    #[error("Snapshot refers to unknown element {id}")]
    ElementNotFound { id: String },
    #[error("Unsupported snapshot format version: {0}")]
    UnsupportedVersion(u32),
    #[error("Malformed snapshot: {0}")]
    Format(String),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Invoke error: {0}")]
    Invoke(#[from] InvokeError),
}

pub type RestoreResult<T> = Result<T, RestoreError>;

/// Conversion of runtime state to and from its stored form.
pub trait Checkpoint: Sized {
    type Saved: Serialize + DeserializeOwned;

    fn save(&self, chart: &StateChart) -> Self::Saved;

    fn restore(chart: &StateChart, saved: Self::Saved) -> RestoreResult<Self>;
}

pub(crate) fn resolve(chart: &StateChart, id: &str) -> RestoreResult<StateId> {
    chart
        .find(id)
        .ok_or_else(|| RestoreError::ElementNotFound { id: id.to_string() })
}

fn ids(chart: &StateChart, states: &BTreeSet<StateId>) -> Vec<String> {
    states
        .iter()
        .map(|s| chart.node(*s).id().to_string())
        .collect()
}

pub(crate) fn resolve_all<'a, I>(chart: &StateChart, ids: I) -> RestoreResult<BTreeSet<StateId>>
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter().map(|id| resolve(chart, id)).collect()
}

impl Checkpoint for StateConfiguration {
    type Saved = Vec<String>;

    fn save(&self, chart: &StateChart) -> Self::Saved {
        ids(chart, self.active_states())
    }

    fn restore(chart: &StateChart, saved: Self::Saved) -> RestoreResult<Self> {
        let mut configuration = StateConfiguration::new();
        for state in resolve_all(chart, &saved)? {
            configuration.enter_state(chart.node(state))?;
        }
        Ok(configuration)
    }
}

impl Checkpoint for DataModel {
    type Saved = BTreeMap<String, Map<String, Value>>;

    fn save(&self, chart: &StateChart) -> Self::Saved {
        let mut saved = BTreeMap::new();
        for (id, scope) in self.scopes() {
            let (key, vars) = match id {
                ScopeId::System => (
                    SYSTEM_SCOPE_KEY.to_string(),
                    scope
                        .vars()
                        .iter()
                        .filter(|(name, _)| !context::TRANSIENT_NAMES.contains(&name.as_str()))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                ),
                ScopeId::Global => (GLOBAL_SCOPE_KEY.to_string(), scope.vars().clone()),
                ScopeId::State(state) => (chart.node(*state).id().to_string(), scope.vars().clone()),
            };
            saved.insert(key, vars);
        }
        saved
    }

    fn restore(chart: &StateChart, mut saved: Self::Saved) -> RestoreResult<Self> {
        let mut data = DataModel::new();
        for (name, value) in saved.remove(SYSTEM_SCOPE_KEY).unwrap_or_default() {
            data.set_system(&name, value);
        }
        if let Some(global) = data.scope_mut(ScopeId::Global) {
            global
                .vars_mut()
                .extend(saved.remove(GLOBAL_SCOPE_KEY).unwrap_or_default());
        }

        // ancestors first, so every scope finds its parent
        let mut states = BTreeMap::new();
        for (id, vars) in saved {
            states.insert(resolve(chart, &id)?, vars);
        }
        for (state, vars) in states {
            let parent = data.parent_scope_for(chart, state);
            let mut scope = Scope::new(Some(parent));
            scope.vars_mut().extend(vars);
            data.insert_scope(ScopeId::State(state), scope);
        }
        Ok(data)
    }
}

impl Checkpoint for HistoryValues {
    type Saved = BTreeMap<String, Vec<String>>;

    fn save(&self, chart: &StateChart) -> Self::Saved {
        self.iter()
            .map(|(history, states)| (chart.node(*history).id().to_string(), ids(chart, states)))
            .collect()
    }

    fn restore(chart: &StateChart, saved: Self::Saved) -> RestoreResult<Self> {
        let mut history = HistoryValues::default();
        for (id, states) in saved {
            history.insert(resolve(chart, &id)?, resolve_all(chart, &states)?);
        }
        Ok(history)
    }
}

/// A running invocation as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Id of the invoking state.
    pub state: String,
    pub index: usize,
    pub invocation: Invocation,
    pub autoforward: bool,
    /// Invoker checkpoint; `None` means the invoker is started again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    #[serde(default)]
    pub chart: Option<String>,
    pub session_id: String,
    pub status: ExecutorStatus,
    pub configuration: Vec<String>,
    pub datamodel: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub internal_queue: Vec<TriggerEvent>,
    #[serde(default)]
    pub external_queue: Vec<TriggerEvent>,
    #[serde(default)]
    pub invocations: Vec<InvocationRecord>,
    #[serde(default)]
    pub states_to_invoke: Vec<String>,
    #[serde(default)]
    pub send_sequence: u64,
    #[serde(default)]
    pub done_data: Option<Value>,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn to_json(&self) -> RestoreResult<String> {
        serde_json::to_string(self).map_err(|e| RestoreError::Format(e.to_string()))
    }

    pub fn from_json(json: &str) -> RestoreResult<Self> {
        serde_json::from_str(json).map_err(|e| RestoreError::Format(e.to_string()))
    }
}
