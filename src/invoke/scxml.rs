//! Invocation of another statechart as a child session.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{Invocation, InvokeError, InvokeResult, Invoker, StatefulInvoker};
use crate::event::{IoProcessor, ParentIoProcessor};
use crate::executor::ScxmlExecutor;
use crate::model::StateChart;
use crate::persistence::Snapshot;
use crate::system::System;

/// Runs a chart registered with the [`System`] as a child session.
///
/// The chart is looked up by `src`, or by `content` when that is a string.
/// `<param>` values replace the child's top-level data of the same name. The
/// child runs on the parent's thread: it starts inside `invoke` and
/// processes queued events whenever the parent pumps it.
pub struct ScxmlInvoker {
    system: Arc<System>,
    invoke_id: Option<String>,
    child: Option<ScxmlExecutor>,
}

impl ScxmlInvoker {
    pub fn new(system: Arc<System>) -> Self {
        Self {
            system,
            invoke_id: None,
            child: None,
        }
    }

    pub fn child(&self) -> Option<&ScxmlExecutor> {
        self.child.as_ref()
    }

    fn chart_for(&self, invocation: &Invocation) -> InvokeResult<Arc<StateChart>> {
        let name = match (&invocation.src, &invocation.content) {
            (Some(src), _) => src.as_str(),
            (None, Some(Value::String(name))) => name.as_str(),
            _ => return Err(InvokeError::UnknownSource(String::new())),
        };
        self.system
            .chart(name)
            .ok_or_else(|| InvokeError::UnknownSource(name.to_string()))
    }

    fn failed(&self, message: impl ToString) -> InvokeError {
        InvokeError::Failed {
            invoke_id: self.invoke_id.clone().unwrap_or_default(),
            message: message.to_string(),
        }
    }
}

impl Invoker for ScxmlInvoker {
    fn invoke_id(&self) -> Option<&str> {
        self.invoke_id.as_deref()
    }

    fn invoke(&mut self, invocation: &Invocation, parent: Arc<ParentIoProcessor>) -> InvokeResult<()> {
        let chart = self.chart_for(invocation)?;
        self.invoke_id = Some(invocation.invoke_id.clone());
        let queue = parent.parent_queue().linked();
        let mut child = ScxmlExecutor::new(self.system.clone(), chart, queue)
            .map_err(|e| self.failed(e))?;
        child.set_parent(parent);
        child.set_initial_data(invocation.params.clone());
        child.go().map_err(|e| self.failed(e))?;
        debug!(invoke_id = %invocation.invoke_id, child = %child.session_id(), "child session started");
        self.child = Some(child);
        Ok(())
    }

    fn child_io_processor(&self) -> Option<Arc<dyn IoProcessor>> {
        self.child
            .as_ref()
            .filter(|child| child.is_running())
            .map(|child| Arc::new(child.external_queue().clone()) as Arc<dyn IoProcessor>)
    }

    fn pump(&mut self) -> InvokeResult<bool> {
        let result = match self.child.as_mut() {
            Some(child) if child.is_running() => child.process_pending_events(),
            _ => return Ok(false),
        };
        result.map_err(|e| self.failed(e))
    }

    fn cancel(&mut self) -> InvokeResult<()> {
        if let Some(mut child) = self.child.take() {
            child.close().map_err(|e| self.failed(e))?;
        }
        Ok(())
    }
}

impl StatefulInvoker for ScxmlInvoker {
    fn save_state(&self) -> InvokeResult<Value> {
        let child = self.child.as_ref().ok_or_else(|| {
            InvokeError::NotRunning(self.invoke_id.clone().unwrap_or_default())
        })?;
        let snapshot = child.snapshot().map_err(|e| self.failed(e))?;
        serde_json::to_value(snapshot).map_err(|e| self.failed(e))
    }

    fn restore_state(
        &mut self,
        invocation: &Invocation,
        parent: Arc<ParentIoProcessor>,
        state: Value,
    ) -> InvokeResult<()> {
        let chart = self.chart_for(invocation)?;
        self.invoke_id = Some(invocation.invoke_id.clone());
        let snapshot: Snapshot =
            serde_json::from_value(state).map_err(|e| InvokeError::Restore(e.to_string()))?;
        let queue = parent.parent_queue().linked();
        let mut child = ScxmlExecutor::restore(self.system.clone(), chart, snapshot, queue)
            .map_err(|e| InvokeError::Restore(e.to_string()))?;
        child.set_parent(parent);
        self.child = Some(child);
        Ok(())
    }
}
