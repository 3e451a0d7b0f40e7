//! The error type every stage operation returns.
//!
//! Sources are stored as their `Display` output rather than wrapped
//! directly: each collaborator (provider HTTP client, blob store, speech
//! recognizer, language model, CRM vendor) has its own error type, and
//! flattening them to strings here keeps this crate free of those
//! dependencies while still preserving the full error-chain text for logs
//! and the management API.

use std::fmt;

use crate::ErrorClass;

/// Result alias used throughout the pipeline crates.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A classified stage error.
///
/// `code` is a short, stable, machine-readable token (e.g. `"auth"`,
/// `"not_found"`, `"service_unavailable"`) surfaced verbatim in the
/// management API's `error.code` field; `class` drives the orchestrator's
/// transition decision; `message` is the human-readable detail retained
/// for audit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PipelineError {
    pub class: ErrorClass,
    pub code: &'static str,
    pub message: String,
}

impl PipelineError {
    pub fn new(class: ErrorClass, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            class,
            code,
            message: message.into(),
        }
    }

    pub fn fatal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, code, message)
    }

    pub fn discard(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Discard, code, message)
    }

    pub fn skip(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Skip, code, message)
    }

    pub fn transient(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, code, message)
    }

    pub fn deadline(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Deadline, "deadline_exceeded", message)
    }

    pub fn poisoned(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Poisoned, "max_attempts_exceeded", message)
    }

    /// Converts a caught panic payload into a fatal, auditable error.
    ///
    /// Panics never escape a worker uncaught; they are converted to
    /// `fatal` with the payload captured on the Request.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked with a non-string payload".to_string()
        };
        Self::fatal("panicked", message)
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

/// Wraps an error with `Display` output, stamping it with a class/code.
///
/// Used at adapter boundaries converting e.g. `reqwest::Error` or
/// `serde_json::Error` into the uniform taxonomy.
pub fn wrap(class: ErrorClass, code: &'static str, source: &dyn fmt::Display) -> PipelineError {
    PipelineError::new(class, code, source.to_string())
}
