use thiserror::Error;

use crate::configuration::ConfigurationError;
use crate::context::ContextError;
use crate::evaluator::EvalError;
use crate::event::{DispatchError, EventError};
use crate::executor::ExecutorError;
use crate::invoke::InvokeError;
use crate::model::ModelError;
use crate::persistence::RestoreError;
use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    // context
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    // eval error
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    // event error
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Invoke error: {0}")]
    Invoke(#[from] InvokeError),
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
