//! Process-wide services shared by every session: registries, the
//! dispatcher, the error reporter and the table of live sessions.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::config::SystemConfig;
use crate::custom_action::{CustomAction, CustomActionRegistry};
use crate::evaluator::{Evaluator, EvaluatorRegistry};
use crate::event::{EventDispatcher, EventQueue, SimpleDispatcher};
use crate::executor::{ExecutorResult, ScxmlExecutor};
use crate::invoke::{InvokerHandle, InvokerRegistry};
use crate::model::StateChart;
use crate::persistence::Snapshot;
use crate::reporter::{ErrorReporter, TracingErrorReporter};

pub struct System {
    config: SystemConfig,
    evaluators: EvaluatorRegistry,
    invokers: InvokerRegistry,
    custom_actions: CustomActionRegistry,
    dispatcher: Arc<dyn EventDispatcher>,
    reporter: Arc<dyn ErrorReporter>,
    charts: DashMap<String, Arc<StateChart>>,
    sessions: DashMap<String, EventQueue>,
}

impl System {
    pub fn builder() -> SystemBuilder {
        SystemBuilder::default()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.evaluators
    }

    pub fn invokers(&self) -> &InvokerRegistry {
        &self.invokers
    }

    pub fn custom_actions(&self) -> &CustomActionRegistry {
        &self.custom_actions
    }

    pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Makes a chart available to `<invoke src="name">`.
    pub fn register_chart(&self, name: impl Into<String>, chart: Arc<StateChart>) {
        self.charts.insert(name.into(), chart);
    }

    pub fn chart(&self, name: &str) -> Option<Arc<StateChart>> {
        self.charts.get(name).map(|c| c.value().clone())
    }

    /// External queue of a live session, the target of `#_scxml_<id>`.
    pub fn session_queue(&self, session_id: &str) -> Option<EventQueue> {
        self.sessions.get(session_id).map(|q| q.value().clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn register_session(&self, session_id: &str, queue: EventQueue) {
        self.sessions.insert(session_id.to_string(), queue);
    }

    /// Removes the entry only while it still points at `queue`; a restored
    /// executor may have taken over the id.
    pub(crate) fn unregister_session(&self, session_id: &str, queue: &EventQueue) {
        if self
            .sessions
            .remove_if(session_id, |_, current| current.same_queue(queue))
            .is_some()
        {
            debug!(session = %session_id, "session unregistered");
        }
    }

    pub fn new_executor(self: &Arc<Self>, chart: Arc<StateChart>) -> ExecutorResult<ScxmlExecutor> {
        ScxmlExecutor::new(self.clone(), chart, EventQueue::new())
    }

    pub fn restore_executor(
        self: &Arc<Self>,
        chart: Arc<StateChart>,
        snapshot: Snapshot,
    ) -> ExecutorResult<ScxmlExecutor> {
        ScxmlExecutor::restore(self.clone(), chart, snapshot, EventQueue::new())
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("config", &self.config)
            .field("evaluators", &self.evaluators.names())
            .field("charts", &self.charts.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[derive(Default)]
pub struct SystemBuilder {
    config: SystemConfig,
    evaluators: EvaluatorRegistry,
    invokers: InvokerRegistry,
    custom_actions: CustomActionRegistry,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    charts: Vec<(String, Arc<StateChart>)>,
}

impl SystemBuilder {
    pub fn config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn evaluator<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Evaluator> + Send + Sync + 'static,
    {
        self.evaluators.register(name, factory);
        self
    }

    pub fn invoker<F>(mut self, invoke_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Arc<System>) -> InvokerHandle + Send + Sync + 'static,
    {
        self.invokers.register(invoke_type, factory);
        self
    }

    pub fn custom_action(mut self, action: CustomAction) -> Self {
        self.custom_actions.register(action);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn chart(mut self, name: impl Into<String>, chart: Arc<StateChart>) -> Self {
        self.charts.push((name.into(), chart));
        self
    }

    pub fn build(self) -> Arc<System> {
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            Arc::new(SimpleDispatcher::new(self.config.dispatcher.clone())) as Arc<dyn EventDispatcher>
        });
        let system = System {
            dispatcher,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TracingErrorReporter) as Arc<dyn ErrorReporter>),
            evaluators: self.evaluators,
            invokers: self.invokers,
            custom_actions: self.custom_actions,
            charts: self.charts.into_iter().collect(),
            sessions: DashMap::new(),
            config: self.config,
        };
        Arc::new(system)
    }
}
