//! # Evaluator
//!
//! Expression evaluation is a pluggable capability. The executor never looks
//! inside an expression string; it hands it to the [`Evaluator`] selected by
//! the document's datamodel name.
//!
//! ## Registry
//!
//! [`EvaluatorRegistry`] maps datamodel names to factories. It is assembled
//! once when the [`System`](crate::system::System) is built and passed down to
//! every executor; there is no process-wide lookup.
//!
//! The crate ships one implementation, [`MinimalEvaluator`], registered as
//! `"minimal"`.

pub mod minimal;
pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::context::{Context, ContextError, Scope, ScopeId};
use crate::invoke::{InvokeError, InvokeResult, InvokerHandle};

pub use minimal::MinimalEvaluator;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Parse error in `{expr}`: {message}")]
    Parse { expr: String, message: String },
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Unsupported datamodel: {0}")]
    UnsupportedDatamodel(String),
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
}

pub type EvalResult<T> = Result<T, EvalError>;

pub trait Evaluator: Send + Sync {
    fn datamodel_name(&self) -> &str;

    fn eval(&self, ctx: &Context<'_>, expr: &str) -> EvalResult<Value>;

    /// `None` when the expression yields no value; callers treat it as false.
    fn eval_cond(&self, ctx: &Context<'_>, expr: &str) -> EvalResult<Option<bool>>;

    fn eval_assign(&self, ctx: &mut Context<'_>, location: &str, value: Value) -> EvalResult<()>;

    fn eval_script(&self, ctx: &mut Context<'_>, script: &str) -> EvalResult<()>;

    fn new_context(&self, parent: Option<ScopeId>) -> Scope {
        Scope::new(parent)
    }

    /// Invokers contributed by the datamodel itself.
    fn new_invoker(&self, invoke_type: &str) -> InvokeResult<InvokerHandle> {
        Err(InvokeError::UnsupportedType(invoke_type.to_string()))
    }
}

pub type EvaluatorFactory = Arc<dyn Fn() -> Arc<dyn Evaluator> + Send + Sync>;

pub struct EvaluatorRegistry {
    factories: HashMap<String, EvaluatorFactory>,
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(minimal::DATAMODEL_NAME, || {
            Arc::new(MinimalEvaluator::new()) as Arc<dyn Evaluator>
        });
        registry
    }
}

impl EvaluatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Evaluator> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> EvalResult<Arc<dyn Evaluator>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EvalError::UnsupportedDatamodel(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = EvaluatorRegistry::default();
        assert_eq!(registry.names(), vec!["minimal"]);
        assert_eq!(registry.create("minimal").unwrap().datamodel_name(), "minimal");
        assert!(matches!(
            registry.create("ecmascript"),
            Err(EvalError::UnsupportedDatamodel(name)) if name == "ecmascript"
        ));
    }
}
