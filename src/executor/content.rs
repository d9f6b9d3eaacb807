use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::ScxmlExecutor;
use crate::context::{Context, ScopeId};
use crate::custom_action::ActionScope;
use crate::evaluator::{EvalError, EvalResult};
use crate::event::io_processor::{
    TARGET_INTERNAL, TARGET_INVOKE_PREFIX, TARGET_PARENT, TARGET_SESSION_PREFIX,
};
use crate::event::{
    parse_delay, DispatchError, EventError, IoProcessor, SendRequest, TriggerEvent, TriggerKind,
    ERROR_COMMUNICATION, ERROR_EXECUTION, SCXML_PROCESSOR_ALIAS, SCXML_PROCESSOR_TYPE,
};
use crate::invoke::{InvokeError, Invoker};
use crate::model::{Action, Content, Param, SendDef, StateId};
use crate::reporter::ErrorCode;

/// Failure of one element of executable content. Stops the enclosing block.
#[derive(Error, Debug)]
pub(crate) enum ActionError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("Forwarding to invocation {invoke_id} failed: {source}")]
    Forward {
        invoke_id: String,
        source: InvokeError,
    },
    #[error("Unknown custom action {namespace}:{local_name}")]
    UnknownAction {
        namespace: String,
        local_name: String,
    },
}

impl ActionError {
    /// Platform event raised for this failure.
    pub(crate) fn event_name(&self) -> &'static str {
        match self {
            ActionError::Dispatch(DispatchError::UnknownTarget(_) | DispatchError::Delivery(_))
            | ActionError::Event(EventError::ChannelClosed { .. } | EventError::DeliveryFailed { .. })
            | ActionError::Forward { .. } => ERROR_COMMUNICATION,
            _ => ERROR_EXECUTION,
        }
    }

    pub(crate) fn code(&self) -> ErrorCode {
        match self {
            ActionError::Eval(_) => ErrorCode::ExpressionError,
            ActionError::UnknownAction { .. } => ErrorCode::UnknownAction,
            _ if self.event_name() == ERROR_COMMUNICATION => ErrorCode::CommunicationError,
            _ => ErrorCode::ExecutionError,
        }
    }
}

type ActionResult<T> = Result<T, ActionError>;

impl ScxmlExecutor {
    pub(super) fn execute_block(&mut self, actions: &[Action], scope: ScopeId) -> ActionResult<()> {
        for action in actions {
            self.execute_action(action, scope)?;
        }
        Ok(())
    }

    fn execute_action(&mut self, action: &Action, scope: ScopeId) -> ActionResult<()> {
        match action {
            Action::Assign {
                location,
                expr,
                content,
            } => {
                let value = match (expr, content) {
                    (Some(expr), _) => self.eval(scope, expr)?,
                    (None, Some(content)) => content.clone(),
                    (None, None) => Value::Null,
                };
                self.assign(scope, location, value)?;
            }
            Action::Raise { event } => {
                self.internal_queue.push_back(TriggerEvent::signal(event.clone()));
            }
            Action::Send(def) => self.send(def, scope)?,
            Action::Cancel {
                send_id,
                send_id_expr,
            } => {
                let send_id = match (send_id, send_id_expr) {
                    (Some(id), _) => id.clone(),
                    (None, Some(expr)) => self.eval_string(scope, expr)?,
                    (None, None) => return Ok(()),
                };
                let cancelled = self.system.dispatcher().cancel(&self.session_id, &send_id);
                debug!(session = %self.session_id, %send_id, cancelled, "cancel");
            }
            Action::Log { label, expr } => {
                let value = match expr {
                    Some(expr) => self.eval(scope, expr)?,
                    None => Value::Null,
                };
                info!(
                    session = %self.session_id,
                    label = label.as_deref().unwrap_or(""),
                    "{}",
                    value
                );
            }
            Action::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    if self.condition(scope, &branch.cond) {
                        return self.execute_block(&branch.actions, scope);
                    }
                }
                self.execute_block(otherwise, scope)?;
            }
            Action::Foreach {
                array,
                item,
                index,
                actions,
            } => {
                let Value::Array(items) = self.eval(scope, array)? else {
                    return Err(EvalError::Type(format!("`{}` is not an array", array)).into());
                };
                for (i, value) in items.into_iter().enumerate() {
                    self.assign(scope, item, value)?;
                    if let Some(index) = index {
                        self.assign(scope, index, Value::from(i))?;
                    }
                    self.execute_block(actions, scope)?;
                }
            }
            Action::Script { source } => {
                let mut ctx =
                    Context::new(&mut self.datamodel, scope, &self.chart, &self.configuration);
                self.evaluator.eval_script(&mut ctx, source)?;
            }
            Action::Custom(call) => {
                let handler = self
                    .system
                    .custom_actions()
                    .get(&call.namespace, &call.local_name)
                    .ok_or_else(|| ActionError::UnknownAction {
                        namespace: call.namespace.clone(),
                        local_name: call.local_name.clone(),
                    })?;
                let ctx = Context::new(&mut self.datamodel, scope, &self.chart, &self.configuration);
                let mut action_scope = ActionScope::new(ctx, &*self.evaluator);
                let result = handler.execute(call, &mut action_scope);
                self.internal_queue.extend(action_scope.into_raised());
                result?;
            }
        }
        Ok(())
    }

    /// Evaluates a condition inside content. A failing condition is reported
    /// and counts as false.
    fn condition(&mut self, scope: ScopeId, cond: &str) -> bool {
        let result = {
            let ctx = Context::new(&mut self.datamodel, scope, &self.chart, &self.configuration);
            self.evaluator.eval_cond(&ctx, cond)
        };
        match result {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                self.action_failed(e.into(), None);
                false
            }
        }
    }

    fn send(&mut self, def: &SendDef, scope: ScopeId) -> ActionResult<()> {
        let name = self.literal_or_expr(scope, &def.event, &def.event_expr)?;
        let target = self.literal_or_expr(scope, &def.target, &def.target_expr)?;
        let send_type = self
            .literal_or_expr(scope, &def.type_, &def.type_expr)?
            .unwrap_or_else(|| SCXML_PROCESSOR_TYPE.to_string());
        if send_type != SCXML_PROCESSOR_TYPE && send_type != SCXML_PROCESSOR_ALIAS {
            return Err(DispatchError::UnsupportedType(send_type).into());
        }
        let delay = match self.literal_or_expr(scope, &def.delay, &def.delay_expr)? {
            Some(delay) => parse_delay(&delay)?,
            None => Duration::ZERO,
        };

        let send_id = match &def.id {
            Some(id) => id.clone(),
            None => {
                let id = self.next_send_id();
                if let Some(location) = &def.id_location {
                    self.assign(scope, location, Value::String(id.clone()))?;
                }
                id
            }
        };
        let data = self.payload(scope, def.content.as_ref(), &def.namelist, &def.params)?;
        let event = TriggerEvent::builder(name.unwrap_or_default())
            .kind(TriggerKind::Signal)
            .send_id(send_id.clone())
            .origin(format!("{}{}", TARGET_SESSION_PREFIX, self.session_id))
            .origin_type(SCXML_PROCESSOR_TYPE)
            .data(data)
            .build()?;

        let destination: Arc<dyn IoProcessor> = match target.as_deref() {
            None => Arc::new(self.external_queue.clone()),
            Some(TARGET_INTERNAL) => {
                if !delay.is_zero() {
                    return Err(DispatchError::InvalidDelay(format!(
                        "{:?} on an internal send",
                        delay
                    ))
                    .into());
                }
                self.internal_queue.push_back(event);
                return Ok(());
            }
            Some(TARGET_PARENT) => self
                .parent
                .clone()
                .map(|parent| parent as Arc<dyn IoProcessor>)
                .ok_or_else(|| DispatchError::UnknownTarget(TARGET_PARENT.to_string()))?,
            Some(t) => self
                .route(t)
                .ok_or_else(|| DispatchError::UnknownTarget(t.to_string()))?,
        };

        debug!(session = %self.session_id, %send_id, event = %event.name, target = ?target, "send");
        self.system.dispatcher().send(SendRequest {
            session_id: self.session_id.clone(),
            send_id,
            target,
            destination,
            event,
            delay,
        })?;
        Ok(())
    }

    /// `#_scxml_<sessionid>` or `#_<invokeid>`.
    fn route(&self, target: &str) -> Option<Arc<dyn IoProcessor>> {
        if let Some(session_id) = target.strip_prefix(TARGET_SESSION_PREFIX) {
            return self
                .system
                .session_queue(session_id)
                .map(|queue| Arc::new(queue) as Arc<dyn IoProcessor>);
        }
        let invoke_id = target.strip_prefix(TARGET_INVOKE_PREFIX)?;
        self.invocations
            .get(invoke_id)
            .and_then(|active| active.handle.child_io_processor())
    }

    fn literal_or_expr(
        &mut self,
        scope: ScopeId,
        literal: &Option<String>,
        expr: &Option<String>,
    ) -> EvalResult<Option<String>> {
        match (literal, expr) {
            (Some(value), _) => Ok(Some(value.clone())),
            (None, Some(expr)) => self.eval_string(scope, expr).map(Some),
            (None, None) => Ok(None),
        }
    }

    pub(super) fn next_send_id(&mut self) -> String {
        self.send_sequence += 1;
        format!("{}.{}", self.session_id, self.send_sequence)
    }

    /// Event data from `<content>`, or else an object built from a namelist
    /// and `<param>`s; `null` when there is neither.
    pub(super) fn payload(
        &mut self,
        scope: ScopeId,
        content: Option<&Content>,
        namelist: &[String],
        params: &[Param],
    ) -> ActionResult<Value> {
        if let Some(content) = content {
            return Ok(match content {
                Content::Expr(expr) => self.eval(scope, expr)?,
                Content::Value(value) => value.clone(),
            });
        }
        if namelist.is_empty() && params.is_empty() {
            return Ok(Value::Null);
        }
        let mut data = Map::new();
        for name in namelist {
            data.insert(name.clone(), self.eval(scope, name)?);
        }
        for param in params {
            let value = match (&param.expr, &param.location) {
                (Some(expr), _) => self.eval(scope, expr)?,
                (None, Some(location)) => self.eval(scope, location)?,
                (None, None) => Value::Null,
            };
            data.insert(param.name.clone(), value);
        }
        Ok(Value::Object(data))
    }

    pub(super) fn evaluate_done_data(&mut self, state: StateId) -> Value {
        let chart = self.chart.clone();
        let Some(done_data) = chart.node(state).done_data() else {
            return Value::Null;
        };
        let scope = self.scope_of(Some(state));
        match self.payload(scope, done_data.content.as_ref(), &[], &done_data.params) {
            Ok(value) => value,
            Err(e) => {
                self.action_failed(e, Some(state));
                Value::Null
            }
        }
    }
}
