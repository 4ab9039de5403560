//! Error taxonomy shared by every component in the engine.
//!
//! The engine exposes one error type, [`EngineError`], tagged with an
//! [`ErrorKind`]. No panics or raw library errors escape across component
//! boundaries; handler panics are caught by the worker pool and reported as
//! [`ErrorKind::InternalError`] (see [`crate::pool::WorkerPool`]).

use thiserror::Error;

/// Classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty input set; unparseable cron; empty job id; dependency cycle;
    /// out-of-range cron field.
    InvalidInput,
    /// Unknown job id on `get_job`; cancellation target unknown.
    NotFound,
    /// Duplicate registration.
    AlreadyExists,
    /// Handler exceeded its configured timeout.
    Timeout,
    /// Operation interrupted by a cancellation token.
    Cancelled,
    /// Bounded queue rejected an item under the drop strategy; rate
    /// limiter denied a request.
    Overflow,
    /// CircuitBreaker denied the call.
    CircuitOpen,
    /// Handler returned a failure; wraps the handler's own error.
    HandlerFailure,
    /// Panic/fault inside a worker. Never escapes as a real panic.
    InternalError,
}

/// The engine's single error type. Carries the failing job/item id (empty
/// string if not applicable) and a human-readable message; no stack traces
/// escape to the caller.
#[derive(Debug, Error, Clone)]
#[error("{kind:?} ({id}): {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub id: String,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, "", message)
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::NotFound, id.clone(), format!("not found: {id}"))
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorKind::AlreadyExists,
            id.clone(),
            format!("already exists: {id}"),
        )
    }

    pub fn timeout(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::Timeout, id.clone(), format!("timed out: {id}"))
    }

    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, id, "operation cancelled")
    }

    pub fn overflow(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overflow, id, message)
    }

    pub fn circuit_open(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorKind::CircuitOpen,
            id.clone(),
            format!("circuit open for {id}"),
        )
    }

    pub fn handler_failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerFailure, id, message)
    }

    pub fn internal(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, id, message)
    }

    /// Whether a failure of this kind should be retried by the scheduler.
    /// Timeouts and handler failures are treated identically: both are
    /// retryable. Only input/identity errors (which will not change on
    /// retry) and explicit cancellation are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            ErrorKind::InvalidInput
                | ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::Cancelled
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
