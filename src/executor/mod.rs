//! # Executor
//!
//! [`ScxmlExecutor`] runs one session of a [`StateChart`].
//!
//! ## Processing model
//!
//! * A **microstep** takes a conflict-free set of transitions: exit states,
//!   run transition content, enter states.
//! * A **macrostep** repeats microsteps, eventless transitions first, then
//!   one internal event at a time, until neither is left; it then starts the
//!   invocations of states entered during it.
//! * Each external event is processed by one microstep followed by a
//!   macrostep. Events are handled one at a time, to completion.
//!
//! ## Errors
//!
//! Recoverable problems (bad expressions, failed sends, invokers that will
//! not start) are reported to the [`ErrorReporter`](crate::reporter::ErrorReporter)
//! and raised as `error.execution` / `error.communication`; the block of
//! content that failed stops, processing continues. Broken models and
//! inconsistent configurations abort the call with an [`ExecutorError`].

mod checkpoint;
mod content;
mod invoke;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::configuration::{ConfigurationError, StateConfiguration};
use crate::context::{self, Context, DataModel, ScopeId};
use crate::evaluator::{EvalError, EvalResult, Evaluator};
use crate::event::{
    EventQueue, EventVariable, IoProcessor, ParentIoProcessor, TriggerEvent, TriggerKind,
    DONE_INVOKE_PREFIX, DONE_STATE_PREFIX, ENTRY_STATE_PREFIX, ERROR_EXECUTION, EXIT_STATE_PREFIX,
    SCXML_PROCESSOR_ALIAS, SCXML_PROCESSOR_TYPE,
};
use crate::event::io_processor::TARGET_SESSION_PREFIX;
use crate::invoke::InvokeError;
use crate::listener::{Listener, NotificationRegistry};
use crate::model::{DataDef, ExecutableBlock, ModelError, StateChart, StateId, TransitionId};
use crate::persistence::RestoreError;
use crate::reporter::{ErrorCode, ErrorReport};
use crate::semantics::{self, HistoryValues};
use crate::system::System;

use content::ActionError;
use invoke::ActiveInvocation;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutorStatus {
    Uninitialized,
    Running,
    /// Reached a top-level final state.
    Final,
    /// Cancelled or closed before reaching a final state.
    Closed,
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Datamodel error: {0}")]
    Datamodel(#[from] EvalError),
    #[error("Invoke error: {0}")]
    Invoke(#[from] InvokeError),
    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),
    #[error("Executor already started")]
    AlreadyStarted,
    #[error("Executor is not running: {0}")]
    NotRunning(ExecutorStatus),
}

impl ExecutorError {
    /// The session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutorError::Model(_) | ExecutorError::Configuration(_) | ExecutorError::Restore(_)
        )
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

pub struct ScxmlExecutor {
    system: Arc<System>,
    chart: Arc<StateChart>,
    evaluator: Arc<dyn Evaluator>,
    config: ExecutorConfig,
    session_id: String,
    status: ExecutorStatus,
    configuration: StateConfiguration,
    datamodel: DataModel,
    history: HistoryValues,
    internal_queue: VecDeque<TriggerEvent>,
    external_queue: EventQueue,
    parent: Option<Arc<ParentIoProcessor>>,
    invocations: BTreeMap<String, ActiveInvocation>,
    states_to_invoke: BTreeSet<StateId>,
    listeners: NotificationRegistry,
    send_sequence: u64,
    done_data: Option<Value>,
    initial_data: Map<String, Value>,
}

impl ScxmlExecutor {
    pub fn new(system: Arc<System>, chart: Arc<StateChart>, queue: EventQueue) -> ExecutorResult<Self> {
        Self::with_session(system, chart, queue, Uuid::new_v4().to_string())
    }

    pub(crate) fn with_session(
        system: Arc<System>,
        chart: Arc<StateChart>,
        queue: EventQueue,
        session_id: String,
    ) -> ExecutorResult<Self> {
        let config = system.config().executor.clone();
        let datamodel_name = chart
            .datamodel_name()
            .unwrap_or(config.default_datamodel.as_str())
            .to_string();
        let evaluator = system.evaluators().create(&datamodel_name)?;

        if let Some(missing) = chart
            .custom_actions()
            .into_iter()
            .find(|call| !system.custom_actions().contains(&call.namespace, &call.local_name))
        {
            system.reporter().on_error(
                &ErrorReport::new(ErrorCode::UnknownAction, "custom action is not registered")
                    .param(format!("{}:{}", missing.namespace, missing.local_name)),
            );
            return Err(ModelError::UnknownAction {
                namespace: missing.namespace.clone(),
                local_name: missing.local_name.clone(),
            }
            .into());
        }

        system.register_session(&session_id, queue.clone());
        debug!(session = %session_id, datamodel = %datamodel_name, "executor created");
        Ok(Self {
            system,
            chart,
            evaluator,
            config,
            session_id,
            status: ExecutorStatus::Uninitialized,
            configuration: StateConfiguration::new(),
            datamodel: DataModel::new(),
            history: HistoryValues::default(),
            internal_queue: VecDeque::new(),
            external_queue: queue,
            parent: None,
            invocations: BTreeMap::new(),
            states_to_invoke: BTreeSet::new(),
            listeners: NotificationRegistry::new(),
            send_sequence: 0,
            done_data: None,
            initial_data: Map::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> ExecutorStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutorStatus::Running
    }

    pub fn chart(&self) -> &Arc<StateChart> {
        &self.chart
    }

    pub fn configuration(&self) -> &StateConfiguration {
        &self.configuration
    }

    pub fn datamodel(&self) -> &DataModel {
        &self.datamodel
    }

    /// Document ids of all active states.
    pub fn active_ids(&self) -> BTreeSet<String> {
        self.configuration.active_ids(&self.chart)
    }

    /// Document ids of the active atomic states.
    pub fn atomic_ids(&self) -> BTreeSet<String> {
        self.configuration.atomic_ids(&self.chart)
    }

    /// A variable as seen from the document scope.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.datamodel.get(ScopeId::Global, name)
    }

    pub fn external_queue(&self) -> &EventQueue {
        &self.external_queue
    }

    pub fn done_data(&self) -> Option<&Value> {
        self.done_data.as_ref()
    }

    /// Invoke ids of the running invocations.
    pub fn invocation_ids(&self) -> Vec<String> {
        self.invocations.keys().cloned().collect()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.register(listener);
    }

    /// Values that replace the `expr` of top-level `<data>` with the same id.
    pub fn set_initial_data(&mut self, data: Map<String, Value>) {
        self.initial_data = data;
    }

    pub(crate) fn set_parent(&mut self, parent: Arc<ParentIoProcessor>) {
        self.parent = Some(parent);
    }

    /// Starts the session: binds the datamodel, runs the document script and
    /// takes the initial transition.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub fn go(&mut self) -> ExecutorResult<()> {
        if self.status != ExecutorStatus::Uninitialized {
            return Err(ExecutorError::AlreadyStarted);
        }
        self.configuration.clear();
        self.datamodel.clear();
        self.history.clear();
        self.internal_queue.clear();
        self.states_to_invoke.clear();
        self.init_system_variables();

        let chart = self.chart.clone();
        self.init_data(ScopeId::Global, chart.global_datamodel(), None);
        self.status = ExecutorStatus::Running;
        if let Err(e) = self.execute_block(chart.global_script(), ScopeId::Global) {
            self.action_failed(e, None);
        }

        let started = self
            .micro_step(&[chart.initial_transition().index()], None)
            .and_then(|()| self.macro_step());
        self.abort_on_fatal(started)?;
        debug!(states = ?self.active_ids(), "started");
        self.process_pending_events()?;
        Ok(())
    }

    pub fn trigger_event(&mut self, event: TriggerEvent) -> ExecutorResult<()> {
        self.trigger_events(vec![event])
    }

    /// Queues the events as external events and processes them in order.
    pub fn trigger_events(&mut self, events: Vec<TriggerEvent>) -> ExecutorResult<()> {
        if !self.is_running() {
            return Err(ExecutorError::NotRunning(self.status));
        }
        for event in events {
            self.external_queue.add_event(event);
        }
        self.process_pending_events().map(|_| ())
    }

    /// Drains the external queue and lets invoked sessions catch up, until
    /// neither has work left. Returns whether anything was processed.
    pub fn process_pending_events(&mut self) -> ExecutorResult<bool> {
        let result = self.drain_events();
        self.abort_on_fatal(result)
    }

    fn drain_events(&mut self) -> ExecutorResult<bool> {
        let mut processed = false;
        while self.is_running() {
            while self.is_running() {
                let Some(event) = self.external_queue.poll() else {
                    break;
                };
                processed = true;
                self.event_step(event)?;
            }
            if !self.is_running() {
                break;
            }
            let pumped = self.pump_invokers();
            if !self.internal_queue.is_empty() {
                self.macro_step()?;
            }
            if !pumped {
                break;
            }
            processed = true;
        }
        Ok(processed)
    }

    /// A fatal error can leave the configuration half-applied, so the session
    /// is closed on the spot without running any more content.
    fn abort_on_fatal<T>(&mut self, result: ExecutorResult<T>) -> ExecutorResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.status == ExecutorStatus::Running {
                warn!(session = %self.session_id, error = %e, "aborting session");
                self.status = ExecutorStatus::Closed;
                self.internal_queue.clear();
                self.external_queue.clear();
                self.states_to_invoke.clear();
                self.system.dispatcher().cancel_session(&self.session_id);
                for (_, mut active) in std::mem::take(&mut self.invocations) {
                    active.parent.close();
                    let _ = active.handle.as_invoker().cancel();
                }
                self.listeners.close(&self.session_id);
            }
        }
        result
    }

    /// Stops a running session without reaching a final state.
    pub fn close(&mut self) -> ExecutorResult<()> {
        match self.status {
            ExecutorStatus::Running => {
                self.status = ExecutorStatus::Closed;
                self.final_step()
            }
            ExecutorStatus::Uninitialized => {
                self.status = ExecutorStatus::Closed;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    #[instrument(skip(self, event), fields(session = %self.session_id, event = %event.name))]
    fn event_step(&mut self, event: TriggerEvent) -> ExecutorResult<()> {
        if event.is_cancel() {
            debug!("cancelled");
            self.status = ExecutorStatus::Closed;
            return self.final_step();
        }
        self.set_event(&event, false);
        self.finalize_and_forward(&event);
        let enabled = self.select_transitions(Some(event.name.as_str()));
        if !enabled.is_empty() {
            self.micro_step(&enabled, Some(event.name.as_str()))?;
        }
        self.macro_step()
    }

    fn macro_step(&mut self) -> ExecutorResult<()> {
        let mut microsteps = 0;
        loop {
            while self.is_running() {
                let mut event_name = None;
                let mut enabled = self.select_transitions(None);
                if enabled.is_empty() {
                    let Some(event) = self.internal_queue.pop_front() else {
                        break;
                    };
                    trace!(event = %event.name, "internal event");
                    self.set_event(&event, true);
                    enabled = self.select_transitions(Some(event.name.as_str()));
                    event_name = Some(event.name);
                }
                if enabled.is_empty() {
                    continue;
                }
                self.micro_step(&enabled, event_name.as_deref())?;

                microsteps += 1;
                if microsteps >= self.config.max_microsteps {
                    self.report(ErrorReport::new(
                        ErrorCode::ExecutionError,
                        format!(
                            "macrostep exceeded {} microsteps, dropping {} internal events",
                            self.config.max_microsteps,
                            self.internal_queue.len()
                        ),
                    ));
                    self.internal_queue.clear();
                    break;
                }
            }

            if !self.is_running() {
                return self.final_step();
            }
            self.start_invokes();
            if self.internal_queue.is_empty() {
                return Ok(());
            }
        }
    }

    fn micro_step(&mut self, enabled: &[TransitionId], event: Option<&str>) -> ExecutorResult<()> {
        let chart = self.chart.clone();
        self.exit_states(enabled)?;
        for tid in enabled {
            let transition = chart.transition(*tid);
            let source = transition.source().map(|s| chart.node(s));
            if transition.is_targetless() {
                self.listeners.transition(source, None, transition, event);
            }
            for target in transition.targets() {
                self.listeners
                    .transition(source, Some(chart.node(*target)), transition, event);
            }
            let scope = self.scope_of(transition.source());
            if let Err(e) = self.execute_block(transition.actions(), scope) {
                self.action_failed(e, transition.source());
            }
        }
        self.enter_states(enabled)?;

        if self.config.check_legal_configuration && !self.configuration.is_empty() {
            semantics::is_legal_configuration(
                &chart,
                self.configuration.active_states(),
                self.system.reporter().as_ref(),
            );
        }
        Ok(())
    }

    fn select_transitions(&mut self, event: Option<&str>) -> Vec<TransitionId> {
        let chart = self.chart.clone();
        let mut failures: Vec<(TransitionId, EvalError)> = Vec::new();
        let selected = {
            let evaluator = &self.evaluator;
            let datamodel = &mut self.datamodel;
            let configuration = &self.configuration;
            semantics::select_transitions(&chart, configuration, event, |transition| {
                let Some(cond) = transition.cond() else {
                    return true;
                };
                let scope = transition
                    .source()
                    .map(|s| datamodel.scope_for(&chart, s))
                    .unwrap_or(ScopeId::Global);
                let ctx = Context::new(datamodel, scope, &chart, configuration);
                match evaluator.eval_cond(&ctx, cond) {
                    Ok(result) => result.unwrap_or(false),
                    Err(e) => {
                        failures.push((transition.index(), e));
                        false
                    }
                }
            })
        };
        for (tid, error) in failures {
            let transition = chart.transition(tid);
            let mut report = ErrorReport::new(ErrorCode::ExpressionError, "guard evaluation failed")
                .param(transition.cond().unwrap_or_default())
                .cause(&error);
            if let Some(source) = transition.source() {
                report = report.source(chart.node(source).id());
            }
            self.report(report);
            self.raise_error(ERROR_EXECUTION, &error);
        }
        selected
    }

    fn exit_states(&mut self, enabled: &[TransitionId]) -> ExecutorResult<()> {
        let chart = self.chart.clone();
        let exit_set = semantics::compute_exit_set(&chart, &self.configuration, enabled);
        for state in &exit_set {
            self.states_to_invoke.remove(state);
        }
        semantics::record_history(&chart, &self.configuration, &exit_set, &mut self.history);
        for state in exit_set.iter().rev() {
            self.exit_state(*state)?;
        }
        Ok(())
    }

    fn exit_state(&mut self, state: StateId) -> ExecutorResult<()> {
        let chart = self.chart.clone();
        let node = chart.node(state);
        let scope = self.scope_of(Some(state));
        for block in node.on_exit() {
            self.run_block(block, scope, state, EXIT_STATE_PREFIX);
        }
        self.cancel_invocations(state);
        self.configuration.exit_state(node)?;
        self.listeners.exit(node);
        trace!(state = node.id(), "exited");
        Ok(())
    }

    fn enter_states(&mut self, enabled: &[TransitionId]) -> ExecutorResult<()> {
        let chart = self.chart.clone();
        let entry = semantics::compute_entry_set(&chart, &self.history, enabled);
        for state in &entry.states {
            let state = *state;
            let node = chart.node(state);
            self.configuration.enter_state(node)?;
            self.states_to_invoke.insert(state);
            let scope = self.ensure_scope(state);
            for block in node.on_entry() {
                self.run_block(block, scope, state, ENTRY_STATE_PREFIX);
            }
            self.listeners.entry(node);
            trace!(state = node.id(), "entered");

            if entry.default_entry.contains(&state) {
                if let Some(initial) = node.initial() {
                    if let Err(e) = self.execute_block(chart.transition(initial).actions(), scope) {
                        self.action_failed(e, Some(state));
                    }
                }
            }
            if let Some(default) = entry.history_content.get(&state) {
                if let Err(e) = self.execute_block(chart.transition(*default).actions(), scope) {
                    self.action_failed(e, Some(state));
                }
            }
            if node.is_final() {
                self.final_state_entered(state);
            }
        }
        Ok(())
    }

    fn final_state_entered(&mut self, state: StateId) {
        let chart = self.chart.clone();
        let Some(parent) = chart.node(state).parent() else {
            self.done_data = Some(self.evaluate_done_data(state));
            self.status = ExecutorStatus::Final;
            debug!(state = chart.node(state).id(), "reached top-level final state");
            return;
        };
        let data = self.evaluate_done_data(state);
        self.internal_queue.push_back(
            TriggerEvent::signal(format!("{}{}", DONE_STATE_PREFIX, chart.node(parent).id()))
                .with_data(data),
        );
        if let Some(grandparent) = chart.node(parent).parent() {
            let grandparent_node = chart.node(grandparent);
            if grandparent_node.is_parallel()
                && grandparent_node
                    .children()
                    .iter()
                    .all(|region| semantics::is_in_final_state(&chart, &self.configuration, *region))
            {
                self.internal_queue.push_back(TriggerEvent::signal(format!(
                    "{}{}",
                    DONE_STATE_PREFIX,
                    grandparent_node.id()
                )));
            }
        }
    }

    /// Leaves every active state, notifies the parent session when a final
    /// state was reached and cancels everything still scheduled.
    fn final_step(&mut self) -> ExecutorResult<()> {
        let active: Vec<StateId> = self
            .configuration
            .active_states()
            .iter()
            .rev()
            .copied()
            .collect();
        for state in active {
            self.exit_state(state)?;
        }
        self.states_to_invoke.clear();
        self.internal_queue.clear();

        if self.status == ExecutorStatus::Final {
            if let Some(parent) = &self.parent {
                let event = TriggerEvent::signal(format!("{}{}", DONE_INVOKE_PREFIX, parent.invoke_id()))
                    .with_data(self.done_data.clone().unwrap_or(Value::Null));
                if let Err(e) = parent.add_event(event) {
                    warn!(session = %self.session_id, error = %e, "parent did not accept done event");
                }
            }
        }
        let cancelled = self.system.dispatcher().cancel_session(&self.session_id);
        self.listeners.close(&self.session_id);
        debug!(session = %self.session_id, status = %self.status, cancelled, "session finished");
        Ok(())
    }

    fn run_block(&mut self, block: &ExecutableBlock, scope: ScopeId, state: StateId, prefix: &str) {
        if let Err(e) = self.execute_block(&block.actions, scope) {
            self.action_failed(e, Some(state));
        }
        if block.raise_event {
            let name = format!("{}{}", prefix, self.chart.node(state).id());
            self.internal_queue
                .push_back(TriggerEvent::new(name, TriggerKind::Change));
        }
    }

    fn init_system_variables(&mut self) {
        let location = format!("{}{}", TARGET_SESSION_PREFIX, self.session_id);
        let name = self.chart.name().unwrap_or_default().to_string();
        self.datamodel
            .set_system(context::SESSION_ID, Value::String(self.session_id.clone()));
        self.datamodel.set_system(context::NAME, Value::String(name));
        self.init_transient_variables(&location);
    }

    fn init_transient_variables(&mut self, location: &str) {
        self.datamodel.set_system(
            context::IO_PROCESSORS,
            json!({
                SCXML_PROCESSOR_ALIAS: { "location": location },
                SCXML_PROCESSOR_TYPE: { "location": location },
            }),
        );
        self.datamodel.set_system(context::X, json!({}));
    }

    fn init_data(&mut self, scope: ScopeId, defs: &[DataDef], source: Option<StateId>) {
        for def in defs {
            let overridden = if scope == ScopeId::Global {
                self.initial_data.get(&def.id).cloned()
            } else {
                None
            };
            let value = match (overridden, &def.value, &def.expr) {
                (Some(value), _, _) => value,
                (None, Some(value), _) => value.clone(),
                (None, None, Some(expr)) => match self.eval(scope, expr) {
                    Ok(value) => value,
                    Err(e) => {
                        self.action_failed(e.into(), source);
                        Value::Null
                    }
                },
                (None, None, None) => Value::Null,
            };
            if let Err(e) = self.datamodel.set_local(scope, &def.id, value) {
                self.action_failed(EvalError::from(e).into(), source);
            }
        }
    }

    /// Scope of a state that declares data, created and bound on first entry.
    fn ensure_scope(&mut self, state: StateId) -> ScopeId {
        let chart = self.chart.clone();
        let defs = chart.node(state).datamodel();
        let id = ScopeId::State(state);
        if defs.is_empty() {
            return self.scope_of(Some(state));
        }
        if !self.datamodel.has_scope(id) {
            let parent = self.datamodel.parent_scope_for(&chart, state);
            let scope = self.evaluator.new_context(Some(parent));
            self.datamodel.insert_scope(id, scope);
            self.init_data(id, defs, Some(state));
        }
        id
    }

    fn scope_of(&self, state: Option<StateId>) -> ScopeId {
        state
            .map(|s| self.datamodel.scope_for(&self.chart, s))
            .unwrap_or(ScopeId::Global)
    }

    fn set_event(&mut self, event: &TriggerEvent, internal: bool) {
        self.datamodel
            .set_system(context::EVENT, EventVariable::from_event(event, internal));
    }

    fn eval(&mut self, scope: ScopeId, expr: &str) -> EvalResult<Value> {
        let ctx = Context::new(&mut self.datamodel, scope, &self.chart, &self.configuration);
        self.evaluator.eval(&ctx, expr)
    }

    fn eval_string(&mut self, scope: ScopeId, expr: &str) -> EvalResult<String> {
        Ok(match self.eval(scope, expr)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    fn assign(&mut self, scope: ScopeId, location: &str, value: Value) -> EvalResult<()> {
        let mut ctx = Context::new(&mut self.datamodel, scope, &self.chart, &self.configuration);
        self.evaluator.eval_assign(&mut ctx, location, value)
    }

    fn report(&self, report: ErrorReport) {
        self.system.reporter().on_error(&report);
    }

    fn raise_error(&mut self, name: &str, error: &dyn std::fmt::Display) {
        self.internal_queue.push_back(
            TriggerEvent::error(name).with_data(json!({ "message": error.to_string() })),
        );
    }

    fn action_failed(&mut self, error: ActionError, source: Option<StateId>) {
        let mut report = ErrorReport::new(error.code(), error.to_string()).cause(&error);
        if let Some(state) = source {
            report = report.source(self.chart.node(state).id());
        }
        self.report(report);
        self.raise_error(error.event_name(), &error);
    }
}

impl Drop for ScxmlExecutor {
    fn drop(&mut self) {
        self.system
            .unregister_session(&self.session_id, &self.external_queue);
        self.system.dispatcher().cancel_session(&self.session_id);
        for (_, mut active) in std::mem::take(&mut self.invocations) {
            active.parent.close();
            let _ = active.handle.as_invoker().cancel();
        }
    }
}

impl std::fmt::Debug for ScxmlExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScxmlExecutor")
            .field("session_id", &self.session_id)
            .field("status", &self.status)
            .field("active", &self.active_ids())
            .finish()
    }
}
