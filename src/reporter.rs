//! Out-of-band error reporting.
//!
//! Errors the executor recovers from (bad expressions, failed sends, illegal
//! configurations) do not abort processing. They are turned into platform
//! events for the document and, separately, reported here for the host.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoInitial,
    IllegalConfig,
    IllegalInitial,
    UnknownAction,
    ExpressionError,
    ExecutionError,
    CommunicationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub detail: String,
    /// Document id of the element involved, if any.
    pub source: Option<String>,
    /// The offending expression or attribute value.
    pub param: Option<String>,
    pub cause: Option<String>,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            source: None,
            param: None,
            cause: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn cause(mut self, cause: impl ToString) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

#[mockall::automock]
pub trait ErrorReporter: Send + Sync {
    fn on_error(&self, report: &ErrorReport);
}

/// Default reporter; writes every report to the log.
#[derive(Debug, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn on_error(&self, report: &ErrorReport) {
        warn!(
            code = %report.code,
            source = report.source.as_deref().unwrap_or("-"),
            param = report.param.as_deref().unwrap_or("-"),
            cause = report.cause.as_deref().unwrap_or("-"),
            "{}",
            report.detail
        );
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingErrorReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.reports().iter().map(|r| r.code).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.clear();
        }
    }
}

impl ErrorReporter for CollectingErrorReporter {
    fn on_error(&self, report: &ErrorReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}
