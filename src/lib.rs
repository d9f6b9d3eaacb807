//! An SCXML statechart interpreter.
//!
//! Build a [`StateChart`] with [`ChartBuilder`], assemble a [`System`] and
//! run sessions either directly through [`ScxmlExecutor`] or on tokio tasks
//! through [`SessionManager`].

pub mod config;
pub mod configuration;
pub mod context;
pub mod custom_action;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod executor;
pub mod invoke;
pub mod listener;
pub mod model;
pub mod persistence;
pub mod reporter;
pub mod semantics;
pub mod session;
pub mod system;

// Re-exports
pub use config::SystemConfig;
pub use configuration::StateConfiguration;
pub use custom_action::{ActionScope, CustomAction, CustomActionHandler};
pub use error::{Error, InternalResult};
pub use evaluator::{Evaluator, MinimalEvaluator};
pub use event::{EventQueue, TriggerEvent, TriggerKind};
pub use executor::{ExecutorError, ExecutorResult, ExecutorStatus, ScxmlExecutor};
pub use invoke::{Invocation, Invoker, InvokerHandle, StatefulInvoker};
pub use listener::Listener;
pub use model::{
    Action, ChartBuilder, Content, DataDef, DoneData, InvokeDef, Param, SendDef, StateChart,
    StateDef, TransitionDef,
};
pub use persistence::Snapshot;
pub use reporter::{ErrorCode, ErrorReport, ErrorReporter};
pub use session::{RuntimeSession, Session, SessionManager};
pub use system::{System, SystemBuilder};

#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}
