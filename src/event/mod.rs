//! # Event Pipeline
//!
//! Events flow into an executor from three directions:
//!
//! * the driver (`trigger_event`), through the session's external [`EventQueue`];
//! * the executor itself (`<raise>`, platform errors, `done.*`), through its
//!   private internal queue;
//! * other sessions (`<send>`, invoked children), through an [`IoProcessor`]
//!   that lands in the receiver's external queue, optionally after a delay
//!   scheduled by an [`EventDispatcher`].
//!
//! ## Design Decisions
//!
//! * Only the external queue is shared, so it is the only queue behind a lock.
//! * Events are plain serde values so queued events survive checkpoints.

pub mod dispatcher;
pub mod io_processor;
pub mod queue;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub use dispatcher::{parse_delay, DispatchError, DispatchResult, EventDispatcher, SendRequest, SimpleDispatcher};
pub use io_processor::{IoProcessor, ParentIoProcessor};
pub use queue::EventQueue;

pub const ERROR_EXECUTION: &str = "error.execution";
pub const ERROR_COMMUNICATION: &str = "error.communication";
pub const DONE_STATE_PREFIX: &str = "done.state.";
pub const DONE_INVOKE_PREFIX: &str = "done.invoke.";
pub const ENTRY_STATE_PREFIX: &str = "entry.state.";
pub const EXIT_STATE_PREFIX: &str = "exit.state.";
pub const CANCEL_INVOKE_FAILED_PREFIX: &str = "failed.invoke.cancel.";

/// Event processor type URI of SCXML sessions.
pub const SCXML_PROCESSOR_TYPE: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";
pub const SCXML_PROCESSOR_ALIAS: &str = "scxml";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Event name is required")]
    MissingName,
    #[error("Channel closed: {target}")]
    ChannelClosed { target: String },
    #[error("Failed to deliver event {event}: {message}")]
    DeliveryFailed { event: String, message: String },
}

pub type EventResult<T> = Result<T, EventError>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Call,
    Change,
    Signal,
    Time,
    Error,
    /// Stops the receiving session.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub name: String,
    pub kind: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            send_id: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            data: Value::Null,
        }
    }

    pub fn signal(name: impl Into<String>) -> Self {
        Self::new(name, TriggerKind::Signal)
    }

    pub fn error(name: impl Into<String>) -> Self {
        Self::new(name, TriggerKind::Error)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn builder(name: impl Into<String>) -> EventBuilder {
        EventBuilder::new(name)
    }

    pub fn is_cancel(&self) -> bool {
        self.kind == TriggerKind::Cancel
    }
}

#[derive(Debug, Default)]
pub struct EventBuilder {
    name: Option<String>,
    kind: Option<TriggerKind>,
    send_id: Option<String>,
    origin: Option<String>,
    origin_type: Option<String>,
    invoke_id: Option<String>,
    data: Option<Value>,
}

impl EventBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: TriggerKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn send_id(mut self, send_id: impl Into<String>) -> Self {
        self.send_id = Some(send_id.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn origin_type(mut self, origin_type: impl Into<String>) -> Self {
        self.origin_type = Some(origin_type.into());
        self
    }

    pub fn invoke_id(mut self, invoke_id: impl Into<String>) -> Self {
        self.invoke_id = Some(invoke_id.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(self) -> EventResult<TriggerEvent> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(EventError::MissingName)?;
        Ok(TriggerEvent {
            name,
            kind: self.kind.unwrap_or(TriggerKind::Signal),
            send_id: self.send_id,
            origin: self.origin,
            origin_type: self.origin_type,
            invoke_id: self.invoke_id,
            data: self.data.unwrap_or(Value::Null),
        })
    }
}

/// How the event reached the executor, exposed as `_event.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventVariableType {
    Platform,
    Internal,
    External,
}

/// Builds the `_event` system variable.
pub struct EventVariable;

impl EventVariable {
    pub fn from_event(event: &TriggerEvent, internal: bool) -> Value {
        let event_type = match event.kind {
            TriggerKind::Error | TriggerKind::Change => EventVariableType::Platform,
            _ if internal => EventVariableType::Internal,
            _ => EventVariableType::External,
        };
        json!({
            "name": event.name,
            "type": event_type.to_string(),
            "sendid": event.send_id,
            "origin": event.origin,
            "origintype": event.origin_type,
            "invokeid": event.invoke_id,
            "data": event.data,
        })
    }
}
