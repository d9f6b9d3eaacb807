use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::invoke::ActiveInvocation;
use super::{ExecutorResult, ScxmlExecutor};
use crate::configuration::StateConfiguration;
use crate::context::DataModel;
use crate::event::io_processor::TARGET_SESSION_PREFIX;
use crate::event::{EventQueue, ParentIoProcessor};
use crate::model::StateChart;
use crate::persistence::{
    self, Checkpoint, InvocationRecord, RestoreError, Snapshot, FORMAT_VERSION,
};
use crate::semantics::HistoryValues;
use crate::system::System;

impl ScxmlExecutor {
    /// Captures the session between macrosteps.
    pub fn snapshot(&self) -> ExecutorResult<Snapshot> {
        let chart = &self.chart;
        let mut invocations = Vec::with_capacity(self.invocations.len());
        for active in self.invocations.values() {
            invocations.push(InvocationRecord {
                state: chart.node(active.state).id().to_string(),
                index: active.index,
                invocation: active.invocation.clone(),
                autoforward: active.autoforward,
                state_data: active.handle.save_state()?,
            });
        }
        Ok(Snapshot {
            format_version: FORMAT_VERSION,
            chart: chart.name().map(str::to_string),
            session_id: self.session_id.clone(),
            status: self.status,
            configuration: self.configuration.save(chart),
            datamodel: self.datamodel.save(chart),
            history: self.history.save(chart),
            internal_queue: self.internal_queue.iter().cloned().collect(),
            external_queue: self.external_queue.snapshot(),
            invocations,
            states_to_invoke: self
                .states_to_invoke
                .iter()
                .map(|s| chart.node(*s).id().to_string())
                .collect(),
            send_sequence: self.send_sequence,
            done_data: self.done_data.clone(),
            saved_at: Utc::now(),
        })
    }

    /// Rebuilds an executor from a snapshot without re-running any content.
    /// Queued events of the snapshot are appended to `queue`.
    pub fn restore(
        system: Arc<System>,
        chart: Arc<StateChart>,
        snapshot: Snapshot,
        queue: EventQueue,
    ) -> ExecutorResult<Self> {
        if snapshot.format_version != FORMAT_VERSION {
            return Err(RestoreError::UnsupportedVersion(snapshot.format_version).into());
        }
        let configuration = StateConfiguration::restore(&chart, snapshot.configuration)?;
        let datamodel = DataModel::restore(&chart, snapshot.datamodel)?;
        let history = HistoryValues::restore(&chart, snapshot.history)?;
        let states_to_invoke = persistence::resolve_all(&chart, &snapshot.states_to_invoke)?;

        let mut executor = Self::with_session(system, chart, queue, snapshot.session_id)?;
        executor.configuration = configuration;
        executor.datamodel = datamodel;
        executor.history = history;
        executor.states_to_invoke = states_to_invoke;
        executor.status = snapshot.status;
        executor.send_sequence = snapshot.send_sequence;
        executor.done_data = snapshot.done_data;
        executor.internal_queue = snapshot.internal_queue.into();
        for event in snapshot.external_queue {
            executor.external_queue.add_event(event);
        }
        let location = format!("{}{}", TARGET_SESSION_PREFIX, executor.session_id);
        executor.init_transient_variables(&location);

        for record in snapshot.invocations {
            executor.restore_invocation(record)?;
        }
        debug!(session = %executor.session_id, status = %executor.status, "restored");
        Ok(executor)
    }

    fn restore_invocation(&mut self, record: InvocationRecord) -> ExecutorResult<()> {
        let state = persistence::resolve(&self.chart, &record.state)?;
        if record.index >= self.chart.node(state).invokes().len() {
            return Err(RestoreError::ElementNotFound {
                id: format!("{}/invoke[{}]", record.state, record.index),
            }
            .into());
        }
        let invoke_id = record.invocation.invoke_id.clone();
        let mut handle = self
            .create_invoker(&record.invocation.invoke_type)
            .map_err(RestoreError::from)?;
        let parent = Arc::new(ParentIoProcessor::new(
            invoke_id.clone(),
            self.external_queue.clone(),
        ));
        handle
            .restore(&record.invocation, parent.clone(), record.state_data)
            .map_err(RestoreError::from)?;
        self.invocations.insert(
            invoke_id,
            ActiveInvocation {
                state,
                index: record.index,
                invocation: record.invocation,
                handle,
                parent,
                autoforward: record.autoforward,
            },
        );
        Ok(())
    }
}
