//! # Invoke
//!
//! `<invoke>` starts an external service for as long as its state is active.
//! Services implement [`Invoker`]; the executor talks to them only through
//! that trait and the [`IoProcessor`]s they expose.
//!
//! ## Handles
//!
//! The [`InvokerRegistry`] hands out [`InvokerHandle`]s:
//!
//! * `Native` wraps a [`StatefulInvoker`], which can checkpoint itself.
//! * `Adapted` wraps a plain [`Invoker`] and remembers the [`Invocation`] it
//!   was started with, so a restored session can simply invoke it again.
//!
//! The executor holds handles and works through [`InvokerHandle::as_invoker`].

mod scxml;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::{IoProcessor, ParentIoProcessor, TriggerEvent, SCXML_PROCESSOR_ALIAS, SCXML_PROCESSOR_TYPE};
use crate::system::System;

pub use scxml::ScxmlInvoker;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    #[error("Unsupported invoke type: {0}")]
    UnsupportedType(String),
    #[error("Unknown source: {0}")]
    UnknownSource(String),
    #[error("Invocation {0} is not running")]
    NotRunning(String),
    #[error("Invocation {invoke_id} failed: {message}")]
    Failed { invoke_id: String, message: String },
    #[error("Invoker state cannot be restored: {0}")]
    Restore(String),
}

pub type InvokeResult<T> = Result<T, InvokeError>;

/// Everything an invoker is started with, after every expression was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub invoke_id: String,
    pub invoke_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub trait Invoker: Send {
    fn invoke_id(&self) -> Option<&str>;

    /// Starts the service. `parent` is its `#_parent` channel.
    fn invoke(&mut self, invocation: &Invocation, parent: Arc<ParentIoProcessor>) -> InvokeResult<()>;

    /// Where `#_<invokeid>` sends and autoforwarded events go.
    fn child_io_processor(&self) -> Option<Arc<dyn IoProcessor>>;

    /// Delivers an event from the parent session.
    fn parent_event(&mut self, event: TriggerEvent) -> InvokeResult<()> {
        match self.child_io_processor() {
            Some(io) => io.add_event(event).map_err(|e| InvokeError::Failed {
                invoke_id: self.invoke_id().unwrap_or_default().to_string(),
                message: e.to_string(),
            }),
            None => Err(InvokeError::NotRunning(
                self.invoke_id().unwrap_or_default().to_string(),
            )),
        }
    }

    /// Gives the service a chance to process queued work on the caller's
    /// thread; `true` when something was processed.
    fn pump(&mut self) -> InvokeResult<bool> {
        Ok(false)
    }

    /// Stops the service. Calling it again is a no-op.
    fn cancel(&mut self) -> InvokeResult<()>;
}

pub trait StatefulInvoker: Invoker {
    fn save_state(&self) -> InvokeResult<Value>;

    /// Resumes a service from `save_state` output instead of starting it.
    fn restore_state(
        &mut self,
        invocation: &Invocation,
        parent: Arc<ParentIoProcessor>,
        state: Value,
    ) -> InvokeResult<()>;
}

/// A plain invoker plus the invocation needed to restart it.
pub struct AdaptedInvoker {
    inner: Box<dyn Invoker>,
    invocation: Option<Invocation>,
}

impl AdaptedInvoker {
    pub fn new(inner: Box<dyn Invoker>) -> Self {
        Self {
            inner,
            invocation: None,
        }
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        self.invocation.as_ref()
    }
}

pub enum InvokerHandle {
    Native(Box<dyn StatefulInvoker>),
    Adapted(AdaptedInvoker),
}

impl InvokerHandle {
    pub fn native(invoker: impl StatefulInvoker + 'static) -> Self {
        InvokerHandle::Native(Box::new(invoker))
    }

    pub fn adapted(invoker: impl Invoker + 'static) -> Self {
        InvokerHandle::Adapted(AdaptedInvoker::new(Box::new(invoker)))
    }

    pub fn as_invoker(&mut self) -> &mut dyn Invoker {
        self
    }

    pub fn is_native(&self) -> bool {
        matches!(self, InvokerHandle::Native(_))
    }

    /// Checkpoint data; `None` for adapted invokers, which restart instead.
    pub fn save_state(&self) -> InvokeResult<Option<Value>> {
        match self {
            InvokerHandle::Native(invoker) => invoker.save_state().map(Some),
            InvokerHandle::Adapted(_) => Ok(None),
        }
    }

    pub fn restore(
        &mut self,
        invocation: &Invocation,
        parent: Arc<ParentIoProcessor>,
        state: Option<Value>,
    ) -> InvokeResult<()> {
        match (self, state) {
            (InvokerHandle::Native(invoker), Some(state)) => {
                invoker.restore_state(invocation, parent, state)
            }
            (handle, _) => Invoker::invoke(handle, invocation, parent),
        }
    }
}

impl Invoker for InvokerHandle {
    fn invoke_id(&self) -> Option<&str> {
        match self {
            InvokerHandle::Native(invoker) => invoker.invoke_id(),
            InvokerHandle::Adapted(adapted) => adapted.inner.invoke_id(),
        }
    }

    fn invoke(&mut self, invocation: &Invocation, parent: Arc<ParentIoProcessor>) -> InvokeResult<()> {
        match self {
            InvokerHandle::Native(invoker) => invoker.invoke(invocation, parent),
            InvokerHandle::Adapted(adapted) => {
                adapted.invocation = Some(invocation.clone());
                adapted.inner.invoke(invocation, parent)
            }
        }
    }

    fn child_io_processor(&self) -> Option<Arc<dyn IoProcessor>> {
        match self {
            InvokerHandle::Native(invoker) => invoker.child_io_processor(),
            InvokerHandle::Adapted(adapted) => adapted.inner.child_io_processor(),
        }
    }

    fn parent_event(&mut self, event: TriggerEvent) -> InvokeResult<()> {
        match self {
            InvokerHandle::Native(invoker) => invoker.parent_event(event),
            InvokerHandle::Adapted(adapted) => adapted.inner.parent_event(event),
        }
    }

    fn pump(&mut self) -> InvokeResult<bool> {
        match self {
            InvokerHandle::Native(invoker) => invoker.pump(),
            InvokerHandle::Adapted(adapted) => adapted.inner.pump(),
        }
    }

    fn cancel(&mut self) -> InvokeResult<()> {
        match self {
            InvokerHandle::Native(invoker) => invoker.cancel(),
            InvokerHandle::Adapted(adapted) => adapted.inner.cancel(),
        }
    }
}

pub type InvokerFactory = Arc<dyn Fn(&Arc<System>) -> InvokerHandle + Send + Sync>;

/// Invoker factories by type.
pub struct InvokerRegistry {
    factories: HashMap<String, InvokerFactory>,
}

impl Default for InvokerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let factory: InvokerFactory =
            Arc::new(|system: &Arc<System>| InvokerHandle::native(ScxmlInvoker::new(system.clone())));
        registry
            .factories
            .insert(SCXML_PROCESSOR_ALIAS.to_string(), factory.clone());
        registry
            .factories
            .insert(SCXML_PROCESSOR_TYPE.to_string(), factory);
        registry
    }
}

impl InvokerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, invoke_type: impl Into<String>, factory: F)
    where
        F: Fn(&Arc<System>) -> InvokerHandle + Send + Sync + 'static,
    {
        self.factories.insert(invoke_type.into(), Arc::new(factory));
    }

    pub fn create(&self, invoke_type: &str, system: &Arc<System>) -> InvokeResult<InvokerHandle> {
        self.factories
            .get(invoke_type)
            .map(|factory| factory(system))
            .ok_or_else(|| InvokeError::UnsupportedType(invoke_type.to_string()))
    }

    pub fn contains(&self, invoke_type: &str) -> bool {
        self.factories.contains_key(invoke_type)
    }
}
