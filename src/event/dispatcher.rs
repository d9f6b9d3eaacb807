//! Delivery of `<send>` events, immediately or after a delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{EventError, IoProcessor, TriggerEvent};
use crate::config::DispatcherConfig;

lazy_static! {
    static ref DELAY: Regex = Regex::new(r"^\s*(\d*\.?\d+)\s*(ms|s|m)?\s*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Invalid delay: {0}")]
    InvalidDelay(String),
    #[error("Delay {delay:?} exceeds the maximum of {max:?}")]
    DelayTooLong { delay: Duration, max: Duration },
    #[error("Delayed delivery needs a tokio runtime")]
    NoRuntime,
    #[error("Unknown send target: {0}")]
    UnknownTarget(String),
    #[error("Unsupported event processor type: {0}")]
    UnsupportedType(String),
    #[error("Delivery failed: {0}")]
    Delivery(#[from] EventError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Parses `<n>ms`, `<n>s`, `<n>m` or a bare millisecond count; fractions allowed.
pub fn parse_delay(delay: &str) -> DispatchResult<Duration> {
    let captures = DELAY
        .captures(delay)
        .ok_or_else(|| DispatchError::InvalidDelay(delay.to_string()))?;
    let amount: f64 = captures[1]
        .parse()
        .map_err(|_| DispatchError::InvalidDelay(delay.to_string()))?;
    let millis = match captures.get(2).map(|m| m.as_str()) {
        Some("s") => amount * 1_000.0,
        Some("m") => amount * 60_000.0,
        _ => amount,
    };
    Ok(Duration::from_nanos((millis * 1_000_000.0).round() as u64))
}

/// A resolved `<send>`, ready for delivery.
pub struct SendRequest {
    /// Session that issued the send; cancellation is scoped to it.
    pub session_id: String,
    pub send_id: String,
    /// Target as written in the document, `None` for the sender itself.
    pub target: Option<String>,
    pub destination: Arc<dyn IoProcessor>,
    pub event: TriggerEvent,
    pub delay: Duration,
}

#[mockall::automock]
pub trait EventDispatcher: Send + Sync {
    fn send(&self, request: SendRequest) -> DispatchResult<()>;

    /// Cancels a pending delayed send; `false` when nothing was pending.
    fn cancel(&self, session_id: &str, send_id: &str) -> bool;

    /// Cancels every pending send from `session_id` addressed to `target`.
    fn cancel_target(&self, session_id: &str, target: &str) -> usize;

    /// Cancels everything still pending for a session.
    fn cancel_session(&self, session_id: &str) -> usize;
}

struct PendingSend {
    session_id: String,
    target: Option<String>,
    generation: u64,
    cancel: oneshot::Sender<()>,
}

/// Dispatcher backed by tokio timers.
pub struct SimpleDispatcher {
    pending: Arc<DashMap<String, PendingSend>>,
    generation: AtomicU64,
    config: DispatcherConfig,
}

impl Default for SimpleDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl SimpleDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            config,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn key(session_id: &str, send_id: &str) -> String {
        format!("{}/{}", session_id, send_id)
    }

    /// Takes the entry only if it still belongs to the timer of `generation`;
    /// a send id reused after the timer fired must keep its replacement.
    fn claim(pending: &DashMap<String, PendingSend>, key: &str, generation: u64) -> bool {
        pending
            .remove_if(key, |_, p| p.generation == generation)
            .is_some()
    }

    fn cancel_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PendingSend) -> bool,
    {
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                let _ = pending.cancel.send(());
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl EventDispatcher for SimpleDispatcher {
    fn send(&self, request: SendRequest) -> DispatchResult<()> {
        if request.delay.is_zero() {
            trace!(event = %request.event.name, "immediate send");
            return Ok(request.destination.add_event(request.event)?);
        }
        if request.delay > self.config.max_delay {
            return Err(DispatchError::DelayTooLong {
                delay: request.delay,
                max: self.config.max_delay,
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let key = Self::key(&request.session_id, &request.send_id);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // a reused send id replaces the pending send
        if let Some(previous) = self.pending.insert(
            key.clone(),
            PendingSend {
                session_id: request.session_id.clone(),
                target: request.target.clone(),
                generation,
                cancel: cancel_tx,
            },
        ) {
            let _ = previous.cancel.send(());
        }

        debug!(send_id = %request.send_id, delay = ?request.delay, event = %request.event.name, "scheduled send");
        let pending = self.pending.clone();
        let SendRequest {
            destination,
            event,
            delay,
            ..
        } = request;
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if Self::claim(&pending, &key, generation) {
                        if let Err(e) = destination.add_event(event) {
                            warn!(%key, error = %e, "delayed send could not be delivered");
                        }
                    }
                }
                _ = cancel_rx => {
                    trace!(%key, "delayed send cancelled");
                }
            }
        });
        Ok(())
    }

    fn cancel(&self, session_id: &str, send_id: &str) -> bool {
        match self.pending.remove(&Self::key(session_id, send_id)) {
            Some((_, pending)) => {
                let _ = pending.cancel.send(());
                true
            }
            None => false,
        }
    }

    fn cancel_target(&self, session_id: &str, target: &str) -> usize {
        self.cancel_where(|p| p.session_id == session_id && p.target.as_deref() == Some(target))
    }

    fn cancel_session(&self, session_id: &str) -> usize {
        self.cancel_where(|p| p.session_id == session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;

    fn request(queue: &EventQueue, send_id: &str, delay: Duration) -> SendRequest {
        SendRequest {
            session_id: "s".to_string(),
            send_id: send_id.to_string(),
            target: Some("#_other".to_string()),
            destination: Arc::new(queue.clone()),
            event: TriggerEvent::signal(send_id),
            delay,
        }
    }

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_delay("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_delay(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_delay("40").unwrap(), Duration::from_millis(40));
        assert_eq!(parse_delay(".5s").unwrap(), Duration::from_millis(500));
        assert!(matches!(parse_delay("soon"), Err(DispatchError::InvalidDelay(_))));
        assert!(parse_delay("5h").is_err());
    }

    #[test]
    fn test_immediate_send_without_runtime() {
        let queue = EventQueue::new();
        let dispatcher = SimpleDispatcher::default();
        dispatcher.send(request(&queue, "now", Duration::ZERO)).unwrap();
        assert_eq!(queue.poll().unwrap().name, "now");
        assert_eq!(
            dispatcher
                .send(request(&queue, "later", Duration::from_millis(5)))
                .unwrap_err(),
            DispatchError::NoRuntime
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_send_and_cancel() {
        let queue = EventQueue::new();
        let dispatcher = SimpleDispatcher::default();
        dispatcher
            .send(request(&queue, "first", Duration::from_millis(100)))
            .unwrap();
        dispatcher
            .send(request(&queue, "second", Duration::from_millis(100)))
            .unwrap();
        assert_eq!(dispatcher.pending_count(), 2);
        assert!(dispatcher.cancel("s", "second"));
        assert!(!dispatcher.cancel("s", "second"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.poll().unwrap().name, "first");
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_send_id_delivers_replacement() {
        let queue = EventQueue::new();
        let dispatcher = SimpleDispatcher::default();
        dispatcher
            .send(request(&queue, "tick", Duration::from_millis(100)))
            .unwrap();
        let mut replacement = request(&queue, "tick", Duration::from_millis(200));
        replacement.event = TriggerEvent::signal("tock");
        dispatcher.send(replacement).unwrap();
        assert_eq!(dispatcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(queue.is_empty());
        assert_eq!(dispatcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.poll().unwrap().name, "tock");
        assert!(queue.is_empty());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_stale_timer_keeps_replacement() {
        let pending = DashMap::new();
        let (stale_tx, _stale_rx) = oneshot::channel();
        let (fresh_tx, _fresh_rx) = oneshot::channel();
        let entry = |generation, cancel| PendingSend {
            session_id: "s".to_string(),
            target: None,
            generation,
            cancel,
        };
        pending.insert("s/tick".to_string(), entry(1, stale_tx));
        pending.insert("s/tick".to_string(), entry(2, fresh_tx));

        // the first timer fired while its replacement was being scheduled
        assert!(!SimpleDispatcher::claim(&pending, "s/tick", 1));
        assert_eq!(pending.len(), 1);
        assert!(SimpleDispatcher::claim(&pending, "s/tick", 2));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_target() {
        let queue = EventQueue::new();
        let dispatcher = SimpleDispatcher::default();
        dispatcher
            .send(request(&queue, "a", Duration::from_secs(1)))
            .unwrap();
        dispatcher
            .send(request(&queue, "b", Duration::from_secs(1)))
            .unwrap();
        assert_eq!(dispatcher.cancel_target("s", "#_other"), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_max_delay() {
        let queue = EventQueue::new();
        let dispatcher = SimpleDispatcher::new(DispatcherConfig {
            max_delay: Duration::from_secs(1),
        });
        assert!(matches!(
            dispatcher.send(request(&queue, "x", Duration::from_secs(5))),
            Err(DispatchError::DelayTooLong { .. })
        ));
    }
}
