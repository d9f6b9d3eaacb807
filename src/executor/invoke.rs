use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::content::ActionError;
use super::ScxmlExecutor;
use crate::context::ScopeId;
use crate::event::{
    ParentIoProcessor, TriggerEvent, CANCEL_INVOKE_FAILED_PREFIX, SCXML_PROCESSOR_ALIAS,
};
use crate::event::io_processor::TARGET_INVOKE_PREFIX;
use crate::invoke::{Invocation, InvokeError, Invoker, InvokerHandle};
use crate::model::{Content, InvokeDef, StateId};

/// A running `<invoke>` owned by the state that started it.
pub(crate) struct ActiveInvocation {
    pub(super) state: StateId,
    /// Position of the `<invoke>` within its state.
    pub(super) index: usize,
    pub(super) invocation: Invocation,
    pub(super) handle: InvokerHandle,
    pub(super) parent: Arc<ParentIoProcessor>,
    pub(super) autoforward: bool,
}

impl ScxmlExecutor {
    /// Starts the invocations of every state entered during the macrostep
    /// that is still active.
    pub(super) fn start_invokes(&mut self) {
        let pending: Vec<StateId> = std::mem::take(&mut self.states_to_invoke)
            .into_iter()
            .filter(|s| self.configuration.is_active(*s))
            .collect();
        let chart = self.chart.clone();
        for state in pending {
            for (index, def) in chart.node(state).invokes().iter().enumerate() {
                if let Err(e) = self.start_invoke(state, index, def) {
                    self.action_failed(e, Some(state));
                }
            }
        }
    }

    fn start_invoke(&mut self, state: StateId, index: usize, def: &InvokeDef) -> Result<(), ActionError> {
        let scope = self.scope_of(Some(state));
        let invoke_id = match &def.id {
            Some(id) => id.clone(),
            None => {
                let id = format!(
                    "{}.{}.{}",
                    self.chart.node(state).id(),
                    self.session_id,
                    index
                );
                if let Some(location) = &def.id_location {
                    self.assign(scope, location, Value::String(id.clone()))?;
                }
                id
            }
        };
        let invoke_type = self
            .invoke_literal_or_expr(scope, &def.type_, &def.type_expr)?
            .unwrap_or_else(|| SCXML_PROCESSOR_ALIAS.to_string());
        let src = self.invoke_literal_or_expr(scope, &def.src, &def.src_expr)?;
        let content = match &def.content {
            Some(Content::Expr(expr)) => Some(self.eval(scope, expr)?),
            Some(Content::Value(value)) => Some(value.clone()),
            None => None,
        };
        let params = match self.payload(scope, None, &def.namelist, &def.params)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let invocation = Invocation {
            invoke_id: invoke_id.clone(),
            invoke_type,
            src,
            content,
            params,
        };

        let mut handle = self.create_invoker(&invocation.invoke_type)?;
        let parent = Arc::new(ParentIoProcessor::new(
            invoke_id.clone(),
            self.external_queue.clone(),
        ));
        handle.as_invoker().invoke(&invocation, parent.clone())?;
        debug!(session = %self.session_id, %invoke_id, invoke_type = %invocation.invoke_type, "invoked");
        self.invocations.insert(
            invoke_id,
            ActiveInvocation {
                state,
                index,
                invocation,
                handle,
                parent,
                autoforward: def.autoforward,
            },
        );
        Ok(())
    }

    fn invoke_literal_or_expr(
        &mut self,
        scope: ScopeId,
        literal: &Option<String>,
        expr: &Option<String>,
    ) -> Result<Option<String>, ActionError> {
        match (literal, expr) {
            (Some(value), _) => Ok(Some(value.clone())),
            (None, Some(expr)) => Ok(Some(self.eval_string(scope, expr)?)),
            (None, None) => Ok(None),
        }
    }

    /// System registry first, then whatever the datamodel contributes.
    pub(super) fn create_invoker(&self, invoke_type: &str) -> Result<InvokerHandle, InvokeError> {
        match self.system.invokers().create(invoke_type, &self.system) {
            Ok(handle) => Ok(handle),
            Err(InvokeError::UnsupportedType(_)) => self.evaluator.new_invoker(invoke_type),
            Err(e) => Err(e),
        }
    }

    /// Cancels the invocations started by `state`.
    pub(super) fn cancel_invocations(&mut self, state: StateId) {
        let ids: Vec<String> = self
            .invocations
            .iter()
            .filter(|(_, active)| active.state == state)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.cancel_invocation(&id);
        }
    }

    fn cancel_invocation(&mut self, invoke_id: &str) {
        let Some(mut active) = self.invocations.remove(invoke_id) else {
            return;
        };
        active.parent.close();
        if let Err(e) = active.handle.as_invoker().cancel() {
            warn!(session = %self.session_id, %invoke_id, error = %e, "invocation did not cancel cleanly");
            self.external_queue.add_event(
                TriggerEvent::error(format!("{}{}", CANCEL_INVOKE_FAILED_PREFIX, invoke_id))
                    .with_data(serde_json::json!({ "message": e.to_string() })),
            );
        }
        let dropped = self
            .external_queue
            .remove_events(|event| event.invoke_id.as_deref() == Some(invoke_id));
        let target = format!("{}{}", TARGET_INVOKE_PREFIX, invoke_id);
        let unsent = self
            .system
            .dispatcher()
            .cancel_target(&self.session_id, &target);
        debug!(session = %self.session_id, %invoke_id, dropped, unsent, "invocation cancelled");
    }

    /// Runs `<finalize>` for events coming back from an invocation and
    /// forwards the event to every autoforwarding invocation.
    pub(super) fn finalize_and_forward(&mut self, event: &TriggerEvent) {
        let chart = self.chart.clone();
        if let Some(invoke_id) = &event.invoke_id {
            if let Some((state, index)) = self
                .invocations
                .get(invoke_id)
                .map(|active| (active.state, active.index))
            {
                let finalize = &chart.node(state).invokes()[index].finalize;
                let scope = self.scope_of(Some(state));
                if let Err(e) = self.execute_block(finalize, scope) {
                    self.action_failed(e, Some(state));
                }
            }
        }

        let mut failures = Vec::new();
        for (id, active) in self.invocations.iter_mut() {
            if !active.autoforward || event.invoke_id.as_deref() == Some(id.as_str()) {
                continue;
            }
            if let Err(source) = active.handle.as_invoker().parent_event(event.clone()) {
                failures.push((active.state, ActionError::Forward {
                    invoke_id: id.clone(),
                    source,
                }));
            }
        }
        for (state, error) in failures {
            self.action_failed(error, Some(state));
        }
    }

    /// Lets every invocation process queued work; `true` if any did.
    pub(super) fn pump_invokers(&mut self) -> bool {
        let mut progressed = false;
        let mut failures = Vec::new();
        for (id, active) in self.invocations.iter_mut() {
            match active.handle.as_invoker().pump() {
                Ok(pumped) => progressed |= pumped,
                Err(e) => failures.push((active.state, id.clone(), e)),
            }
        }
        for (state, invoke_id, error) in failures {
            self.action_failed(
                ActionError::Forward {
                    invoke_id,
                    source: error,
                },
                Some(state),
            );
        }
        progressed
    }
}
