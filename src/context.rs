//! Hierarchical variable scopes.
//!
//! A session's [`DataModel`] holds one [`Scope`] per owner: the read-only
//! system scope, the global (document) scope, and one scope per state that
//! declares data and has been entered at least once. State scopes chain to
//! the scope of their nearest ancestor that has one, ending at global and
//! then system.
//!
//! [`Context`] is the view handed to an [`Evaluator`](crate::evaluator::Evaluator):
//! a scope to start lookups from plus read access to the active configuration
//! for `In()` predicates.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::configuration::StateConfiguration;
use crate::model::{StateChart, StateId};

pub const EVENT: &str = "_event";
pub const SESSION_ID: &str = "_sessionid";
pub const NAME: &str = "_name";
pub const IO_PROCESSORS: &str = "_ioprocessors";
pub const X: &str = "_x";

/// Names user code may read but never bind.
pub const PROTECTED_NAMES: [&str; 5] = [EVENT, SESSION_ID, NAME, IO_PROCESSORS, X];

/// System variables that are rebuilt rather than persisted.
pub const TRANSIENT_NAMES: [&str; 3] = [EVENT, IO_PROCESSORS, X];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Variable {name} is read-only")]
    ReadOnly { name: String },
    #[error("Unknown scope: {0:?}")]
    UnknownScope(ScopeId),
}

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeId {
    System,
    Global,
    State(StateId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    parent: Option<ScopeId>,
    vars: Map<String, Value>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            vars: Map::new(),
        }
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub(crate) fn vars_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.vars
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataModel {
    scopes: HashMap<ScopeId, Scope>,
}

impl Default for DataModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DataModel {
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(ScopeId::System, Scope::new(None));
        scopes.insert(ScopeId::Global, Scope::new(Some(ScopeId::System)));
        Self { scopes }
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub fn scopes(&self) -> impl Iterator<Item = (&ScopeId, &Scope)> {
        self.scopes.iter()
    }

    pub fn has_scope(&self, id: ScopeId) -> bool {
        self.scopes.contains_key(&id)
    }

    pub(crate) fn insert_scope(&mut self, id: ScopeId, scope: Scope) {
        self.scopes.insert(id, scope);
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(&id)
    }

    /// Scope a new state scope should chain to.
    pub fn parent_scope_for(&self, chart: &StateChart, state: StateId) -> ScopeId {
        chart
            .proper_ancestors(state, None)
            .map(ScopeId::State)
            .find(|s| self.scopes.contains_key(s))
            .unwrap_or(ScopeId::Global)
    }

    /// Resolves a state's scope, falling back to its nearest ancestor's.
    pub fn scope_for(&self, chart: &StateChart, state: StateId) -> ScopeId {
        let own = ScopeId::State(state);
        if self.scopes.contains_key(&own) {
            own
        } else {
            self.parent_scope_for(chart, state)
        }
    }

    pub fn get(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let scope = self.scopes.get(&id)?;
            if let Some(value) = scope.vars.get(name) {
                return Some(value);
            }
            cursor = scope.parent;
        }
        None
    }

    pub fn has(&self, scope: ScopeId, name: &str) -> bool {
        self.get(scope, name).is_some()
    }

    /// Rebinds `name` where it is already bound, or creates it in `scope`.
    pub fn set(&mut self, scope: ScopeId, name: &str, value: Value) -> ContextResult<()> {
        check_writable(name)?;
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if id == ScopeId::System {
                break;
            }
            let Some(current) = self.scopes.get(&id) else {
                break;
            };
            if current.vars.contains_key(name) {
                return self.set_local(id, name, value);
            }
            cursor = current.parent;
        }
        self.set_local(scope, name, value)
    }

    /// Binds `name` in `scope`, shadowing outer bindings.
    pub fn set_local(&mut self, scope: ScopeId, name: &str, value: Value) -> ContextResult<()> {
        check_writable(name)?;
        if scope == ScopeId::System {
            return Err(ContextError::ReadOnly {
                name: name.to_string(),
            });
        }
        let target = self
            .scopes
            .get_mut(&scope)
            .ok_or(ContextError::UnknownScope(scope))?;
        target.vars.insert(name.to_string(), value);
        Ok(())
    }

    pub(crate) fn set_system(&mut self, name: &str, value: Value) {
        self.scopes
            .entry(ScopeId::System)
            .or_insert_with(|| Scope::new(None))
            .vars
            .insert(name.to_string(), value);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }
}

fn check_writable(name: &str) -> ContextResult<()> {
    if PROTECTED_NAMES.contains(&name) {
        return Err(ContextError::ReadOnly {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Evaluation view over a session's data.
pub struct Context<'a> {
    data: &'a mut DataModel,
    scope: ScopeId,
    chart: &'a StateChart,
    configuration: &'a StateConfiguration,
}

impl<'a> Context<'a> {
    pub fn new(
        data: &'a mut DataModel,
        scope: ScopeId,
        chart: &'a StateChart,
        configuration: &'a StateConfiguration,
    ) -> Self {
        Self {
            data,
            scope,
            chart,
            configuration,
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(self.scope, name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.data.has(self.scope, name)
    }

    pub fn set(&mut self, name: &str, value: Value) -> ContextResult<()> {
        self.data.set(self.scope, name, value)
    }

    pub fn set_local(&mut self, name: &str, value: Value) -> ContextResult<()> {
        self.data.set_local(self.scope, name, value)
    }

    /// `In(state)`: the state with this document id is active.
    pub fn is_in_state(&self, id: &str) -> bool {
        self.chart
            .find(id)
            .is_some_and(|s| self.configuration.is_active(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChartBuilder, StateDef};
    use serde_json::json;

    #[test]
    fn test_set_walks_up_and_set_local_shadows() {
        let chart = ChartBuilder::new()
            .state(StateDef::state("outer").child(StateDef::state("inner")))
            .build()
            .unwrap();
        let outer = chart.find("outer").unwrap();
        let inner = chart.find("inner").unwrap();

        let mut data = DataModel::new();
        data.insert_scope(ScopeId::State(outer), Scope::new(Some(ScopeId::Global)));
        let parent = data.parent_scope_for(&chart, inner);
        assert_eq!(parent, ScopeId::State(outer));
        data.insert_scope(ScopeId::State(inner), Scope::new(Some(parent)));

        data.set(ScopeId::Global, "x", json!(1)).unwrap();
        data.set(ScopeId::State(inner), "x", json!(2)).unwrap();
        assert_eq!(data.get(ScopeId::Global, "x"), Some(&json!(2)));

        data.set_local(ScopeId::State(inner), "x", json!(3)).unwrap();
        assert_eq!(data.get(ScopeId::State(inner), "x"), Some(&json!(3)));
        assert_eq!(data.get(ScopeId::State(outer), "x"), Some(&json!(2)));

        data.set(ScopeId::State(outer), "y", json!("local")).unwrap();
        assert!(!data.has(ScopeId::Global, "y"));
    }

    #[test]
    fn test_system_names_are_read_only() {
        let mut data = DataModel::new();
        data.set_system(SESSION_ID, json!("abc"));
        assert_eq!(data.get(ScopeId::Global, SESSION_ID), Some(&json!("abc")));
        assert_eq!(
            data.set(ScopeId::Global, SESSION_ID, json!("other")),
            Err(ContextError::ReadOnly {
                name: SESSION_ID.to_string()
            })
        );
        assert!(data.set_local(ScopeId::System, "free", json!(1)).is_err());
    }
}
