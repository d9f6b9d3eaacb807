use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use super::io_processor::IoProcessor;
use super::{EventResult, TriggerEvent};

/// Unbounded FIFO of external events.
///
/// Cloning shares the queue. Producers on other threads may add or remove
/// events while the owning executor drains it.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Arc<Mutex<VecDeque<TriggerEvent>>>,
    notify: Arc<Notify>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, empty queue that wakes the same waiter as `self`.
    pub fn linked(&self) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            notify: self.notify.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TriggerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_event(&self, event: TriggerEvent) {
        self.lock().push_back(event);
        self.notify.notify_one();
    }

    pub fn poll(&self) -> Option<TriggerEvent> {
        self.lock().pop_front()
    }

    /// Drops every queued event matching `predicate`, returning how many went.
    pub fn remove_events<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&TriggerEvent) -> bool,
    {
        let mut events = self.lock();
        let before = events.len();
        events.retain(|e| !predicate(e));
        before - events.len()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TriggerEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Resolves once an event is added; a wake-up that happened with nobody
    /// waiting is kept for the next call.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Both handles share the same storage.
    pub fn same_queue(&self, other: &EventQueue) -> bool {
        Arc::ptr_eq(&self.events, &other.events)
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

impl IoProcessor for EventQueue {
    fn add_event(&self, event: TriggerEvent) -> EventResult<()> {
        EventQueue::add_event(self, event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fifo_and_removal() {
        let queue = EventQueue::new();
        queue.add_event(TriggerEvent::signal("a"));
        queue.add_event(TriggerEvent::signal("b").with_data(serde_json::json!(1)));
        queue.add_event(TriggerEvent::signal("c"));
        assert_eq!(queue.remove_events(|e| e.name == "b"), 1);
        assert_eq!(queue.poll().unwrap().name, "a");
        assert_eq!(queue.poll().unwrap().name, "c");
        assert!(!queue.has_pending_events());
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let queue = EventQueue::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    q.add_event(TriggerEvent::signal(format!("e{}.{}", i, j)));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(queue.len(), 400);
    }

    #[tokio::test]
    async fn test_notify_wakes_waiter() {
        let queue = EventQueue::new();
        let producer = queue.linked();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.add_event(TriggerEvent::signal("late"));
        });
        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("linked queue should wake the waiter");
        assert!(!queue.has_pending_events());
    }
}
