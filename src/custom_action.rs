//! Extension elements in executable content.
//!
//! A document may use elements from foreign namespaces as actions. Each one
//! must be backed by a [`CustomActionHandler`] registered under its
//! `(namespace, local name)` pair before an executor for the document is
//! created.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;
use crate::evaluator::{EvalResult, Evaluator};
use crate::event::TriggerEvent;
use crate::model::CustomActionCall;

/// What a handler may touch while it runs.
pub struct ActionScope<'a> {
    context: Context<'a>,
    evaluator: &'a dyn Evaluator,
    raised: Vec<TriggerEvent>,
}

impl<'a> ActionScope<'a> {
    pub fn new(context: Context<'a>, evaluator: &'a dyn Evaluator) -> Self {
        Self {
            context,
            evaluator,
            raised: Vec::new(),
        }
    }

    pub fn context(&self) -> &Context<'a> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context<'a> {
        &mut self.context
    }

    pub fn eval(&self, expr: &str) -> EvalResult<Value> {
        self.evaluator.eval(&self.context, expr)
    }

    pub fn assign(&mut self, location: &str, value: Value) -> EvalResult<()> {
        self.evaluator.eval_assign(&mut self.context, location, value)
    }

    /// Queues an internal event, delivered after the handler returns.
    pub fn raise(&mut self, event: TriggerEvent) {
        self.raised.push(event);
    }

    pub fn into_raised(self) -> Vec<TriggerEvent> {
        self.raised
    }
}

pub trait CustomActionHandler: Send + Sync {
    fn execute(&self, call: &CustomActionCall, scope: &mut ActionScope<'_>) -> EvalResult<()>;
}

impl<F> CustomActionHandler for F
where
    F: Fn(&CustomActionCall, &mut ActionScope<'_>) -> EvalResult<()> + Send + Sync,
{
    fn execute(&self, call: &CustomActionCall, scope: &mut ActionScope<'_>) -> EvalResult<()> {
        self(call, scope)
    }
}

#[derive(Clone)]
pub struct CustomAction {
    pub namespace: String,
    pub local_name: String,
    pub handler: Arc<dyn CustomActionHandler>,
}

impl CustomAction {
    pub fn new(
        namespace: impl Into<String>,
        local_name: impl Into<String>,
        handler: impl CustomActionHandler + 'static,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
            handler: Arc::new(handler),
        }
    }
}

#[derive(Clone, Default)]
pub struct CustomActionRegistry {
    actions: HashMap<(String, String), Arc<dyn CustomActionHandler>>,
}

impl CustomActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: CustomAction) {
        self.actions
            .insert((action.namespace, action.local_name), action.handler);
    }

    pub fn get(&self, namespace: &str, local_name: &str) -> Option<Arc<dyn CustomActionHandler>> {
        self.actions
            .get(&(namespace.to_string(), local_name.to_string()))
            .cloned()
    }

    pub fn contains(&self, namespace: &str, local_name: &str) -> bool {
        self.get(namespace, local_name).is_some()
    }
}

impl std::fmt::Debug for CustomActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.actions.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::StateConfiguration;
    use crate::context::{DataModel, ScopeId};
    use crate::evaluator::MinimalEvaluator;
    use crate::model::{ChartBuilder, StateDef};
    use serde_json::json;

    #[test]
    fn test_handler_reads_attributes_and_raises() {
        let chart = ChartBuilder::new().state(StateDef::state("s")).build().unwrap();
        let configuration = StateConfiguration::new();
        let mut data = DataModel::new();
        data.set(ScopeId::Global, "count", json!(2)).unwrap();
        let evaluator = MinimalEvaluator::new();

        let mut registry = CustomActionRegistry::new();
        registry.register(CustomAction::new(
            "urn:test",
            "bump",
            |call: &CustomActionCall, scope: &mut ActionScope<'_>| {
                let by = call.attributes.get("by").cloned().unwrap_or_default();
                let value = scope.eval(&format!("count + {}", by))?;
                scope.assign("count", value)?;
                scope.raise(TriggerEvent::signal("bumped"));
                Ok(())
            },
        ));
        assert!(registry.contains("urn:test", "bump"));
        assert!(!registry.contains("urn:test", "other"));

        let handler = registry.get("urn:test", "bump").unwrap();
        let call = CustomActionCall::new("urn:test", "bump").attribute("by", "3");
        let raised = {
            let context = Context::new(&mut data, ScopeId::Global, &chart, &configuration);
            let mut scope = ActionScope::new(context, &evaluator);
            handler.execute(&call, &mut scope).unwrap();
            scope.into_raised()
        };
        assert_eq!(raised.len(), 1);
        assert_eq!(data.get(ScopeId::Global, "count"), Some(&json!(5)));
    }
}
