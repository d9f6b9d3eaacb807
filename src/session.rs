//! # Sessions
//!
//! A [`Session`] drives one [`ScxmlExecutor`] on a tokio task: it starts the
//! executor, then sleeps until its external queue is woken, processing
//! whatever arrived, until the executor stops or a shutdown signal comes in.
//!
//! The [`SessionManager`] owns the tasks. Shutdown is cooperative, bounded
//! by `session.shutdown_timeout`; a task that does not finish in time is
//! aborted.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{EventQueue, TriggerEvent};
use crate::executor::{ExecutorError, ExecutorStatus, ScxmlExecutor};
use crate::model::StateChart;
use crate::system::System;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session already running: {0}")]
    AlreadyRunning(String),
    #[error("Session did not stop within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("Session task failed: {0}")]
    Join(String),
    #[error("Sessions need a tokio runtime")]
    NoRuntime,
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[async_trait]
pub trait RuntimeSession: Send + Sync {
    fn session_id(&self) -> &str;
    async fn status(&self) -> ExecutorStatus;
    async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> SessionResult<()>;
    async fn shutdown(&self) -> SessionResult<()>;
}

pub struct Session {
    session_id: String,
    executor: Mutex<ScxmlExecutor>,
    queue: EventQueue,
    private_shutdown_tx: broadcast::Sender<()>,
    // subscribed up front so a shutdown sent before `run` is not lost
    private_shutdown_rx: StdMutex<Option<broadcast::Receiver<()>>>,
}

impl Session {
    pub fn new(executor: ScxmlExecutor) -> Self {
        let (private_shutdown_tx, private_shutdown_rx) = broadcast::channel(1);
        Self {
            session_id: executor.session_id().to_string(),
            queue: executor.external_queue().clone(),
            executor: Mutex::new(executor),
            private_shutdown_tx,
            private_shutdown_rx: StdMutex::new(Some(private_shutdown_rx)),
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Runs `f` with the executor locked, e.g. to take a snapshot.
    pub async fn with_executor<R>(&self, f: impl FnOnce(&mut ScxmlExecutor) -> R) -> R {
        let mut executor = self.executor.lock().await;
        f(&mut executor)
    }

    fn private_receiver(&self) -> broadcast::Receiver<()> {
        self.private_shutdown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.private_shutdown_tx.subscribe())
    }
}

#[async_trait]
impl RuntimeSession for Session {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn status(&self) -> ExecutorStatus {
        self.executor.lock().await.status()
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SessionResult<()> {
        let mut private_rx = self.private_receiver();
        {
            let mut executor = self.executor.lock().await;
            if executor.status() == ExecutorStatus::Uninitialized {
                executor.go()?;
            }
        }
        info!(session = %self.session_id, "session started");

        loop {
            {
                let mut executor = self.executor.lock().await;
                if !executor.is_running() {
                    break;
                }
                executor.process_pending_events()?;
                if !executor.is_running() {
                    break;
                }
            }
            tokio::select! {
                _ = self.queue.notified() => {}
                _ = shutdown_rx.recv() => {
                    debug!(session = %self.session_id, "system shutdown received");
                    break;
                }
                _ = private_rx.recv() => {
                    debug!(session = %self.session_id, "session shutdown received");
                    break;
                }
            }
        }

        let mut executor = self.executor.lock().await;
        executor.close()?;
        info!(session = %self.session_id, status = %executor.status(), "session stopped");
        Ok(())
    }

    async fn shutdown(&self) -> SessionResult<()> {
        let _ = self.private_shutdown_tx.send(());
        Ok(())
    }
}

pub struct SessionManager {
    system: Arc<System>,
    sessions: DashMap<String, Arc<Session>>,
    tasks: DashMap<String, JoinHandle<SessionResult<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionManager {
    pub fn new(system: Arc<System>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            system,
            sessions: DashMap::new(),
            tasks: DashMap::new(),
            shutdown_tx,
        }
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    /// Starts a new session of `chart` and returns its id.
    pub fn spawn(&self, chart: Arc<StateChart>) -> SessionResult<String> {
        let executor = self.system.new_executor(chart)?;
        self.spawn_executor(executor)
    }

    /// Runs an executor built elsewhere, typically a restored one.
    pub fn spawn_executor(&self, executor: ScxmlExecutor) -> SessionResult<String> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let session_id = executor.session_id().to_string();
        if self.tasks.contains_key(&session_id) {
            return Err(SessionError::AlreadyRunning(session_id));
        }

        let session = Arc::new(Session::new(executor));
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task_session = session.clone();
        let handle = runtime.spawn(async move {
            let result = task_session.run(shutdown_rx).await;
            if let Err(e) = &result {
                warn!(session = %task_session.session_id(), error = %e, "session failed");
            }
            result
        });
        self.sessions.insert(session_id.clone(), session);
        self.tasks.insert(session_id.clone(), handle);
        Ok(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    pub fn send_event(&self, session_id: &str, event: TriggerEvent) -> SessionResult<()> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.queue().add_event(event);
        Ok(())
    }

    /// Waits until the session stops by itself.
    pub async fn join(&self, session_id: &str) -> SessionResult<()> {
        let (_, handle) = self
            .tasks
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        handle.await.map_err(|e| SessionError::Join(e.to_string()))?
    }

    pub async fn shutdown_session(&self, session_id: &str) -> SessionResult<()> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.shutdown().await?;
        match self.tasks.remove(session_id) {
            Some((_, handle)) => self.await_task(session_id, handle).await,
            None => Ok(()),
        }
    }

    pub async fn shutdown_all(&self) -> SessionResult<()> {
        let _ = self.shutdown_tx.send(());
        let ids: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        let mut first_error = None;
        for id in ids {
            if let Some((_, handle)) = self.tasks.remove(&id) {
                if let Err(e) = self.await_task(&id, handle).await {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn await_task(
        &self,
        session_id: &str,
        handle: JoinHandle<SessionResult<()>>,
    ) -> SessionResult<()> {
        let timeout = self.system.config().session.shutdown_timeout;
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined.map_err(|e| SessionError::Join(e.to_string()))?,
            Err(_) => {
                warn!(session = %session_id, ?timeout, "session did not stop in time, aborting");
                abort.abort();
                Err(SessionError::ShutdownTimeout(timeout))
            }
        }
    }
}
