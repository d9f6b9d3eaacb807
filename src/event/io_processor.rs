use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use super::{EventError, EventQueue, EventResult, TriggerEvent};

pub const TARGET_INTERNAL: &str = "#_internal";
pub const TARGET_PARENT: &str = "#_parent";
pub const TARGET_SESSION_PREFIX: &str = "#_scxml_";
pub const TARGET_INVOKE_PREFIX: &str = "#_";

/// Delivery endpoint for events crossing a session boundary.
#[mockall::automock]
pub trait IoProcessor: Send + Sync {
    fn add_event(&self, event: TriggerEvent) -> EventResult<()>;
}

/// The `#_parent` channel of an invoked session.
///
/// Stamps the invoke id on everything it forwards so the parent can route
/// `finalize` and filter autoforwarding. Closed when the parent cancels the
/// invocation; later events are refused.
#[derive(Debug)]
pub struct ParentIoProcessor {
    invoke_id: String,
    parent_queue: EventQueue,
    closed: AtomicBool,
}

impl ParentIoProcessor {
    pub fn new(invoke_id: impl Into<String>, parent_queue: EventQueue) -> Self {
        Self {
            invoke_id: invoke_id.into(),
            parent_queue,
            closed: AtomicBool::new(false),
        }
    }

    pub fn invoke_id(&self) -> &str {
        &self.invoke_id
    }

    /// Queue of the parent session; invoked children link their own queue to it.
    pub fn parent_queue(&self) -> &EventQueue {
        &self.parent_queue
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl IoProcessor for ParentIoProcessor {
    fn add_event(&self, mut event: TriggerEvent) -> EventResult<()> {
        if self.is_closed() {
            return Err(EventError::ChannelClosed {
                target: TARGET_PARENT.to_string(),
            });
        }
        trace!(invoke_id = %self.invoke_id, event = %event.name, "to parent");
        event.invoke_id = Some(self.invoke_id.clone());
        self.parent_queue.add_event(event);
        Ok(())
    }
}
