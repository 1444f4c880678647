//! Error taxonomy shared by drivers, the executor protocol and the engine.
//!
//! Drivers translate backend-native failures into [`StorageError`] at the
//! driver boundary. The lifecycle engine never changes an error's kind; it
//! only wraps it with the service name via [`StorageError::scoped`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used for every not-found failure. Callers match on this text.
pub const NOT_FOUND_MESSAGE: &str = "resource not found";

/// Classification of a [`StorageError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Target volume, snapshot, service or instance does not exist.
    NotFound,
    /// Attach or create collides with existing backend state.
    Conflict,
    /// Operation is not implemented for this driver or platform.
    Unsupported,
    /// Executor or backend exceeded its deadline.
    Timeout,
    /// Executor or backend could not be reached or returned garbage.
    Transport,
    /// Instance resolver found no usable address.
    Resolution,
    /// Request fields are malformed.
    Validation,
    /// Caller cancelled before the backend call committed.
    Cancelled,
    /// Process or service configuration is invalid.
    Config,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// HTTP-like status carried on the wire for this kind.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Unsupported => 501,
            Self::Timeout => 504,
            Self::Transport => 502,
            Self::Validation => 400,
            Self::Cancelled => 499,
            Self::Resolution | Self::Config | Self::Internal => 500,
        }
    }

    /// Process exit code used by the executor binary for this kind.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Validation => 2,
            Self::Unsupported => 3,
            Self::NotFound => 4,
            Self::Timeout => 5,
            Self::Resolution => 6,
            Self::Conflict => 7,
            Self::Transport => 8,
            Self::Cancelled => 9,
            Self::Config => 10,
        }
    }

    /// Maps an executor exit code back to its kind. `0` and codes no kind
    /// uses yield `None`.
    #[must_use]
    pub const fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Internal),
            2 => Some(Self::Validation),
            3 => Some(Self::Unsupported),
            4 => Some(Self::NotFound),
            5 => Some(Self::Timeout),
            6 => Some(Self::Resolution),
            7 => Some(Self::Conflict),
            8 => Some(Self::Transport),
            9 => Some(Self::Cancelled),
            10 => Some(Self::Config),
            _ => None,
        }
    }

    /// Maps a wire status back to its kind. Unknown statuses are internal.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            409 => Self::Conflict,
            501 => Self::Unsupported,
            504 => Self::Timeout,
            502 => Self::Transport,
            400 => Self::Validation,
            499 => Self::Cancelled,
            _ => Self::Internal,
        }
    }

    /// Whether a caller may retry the failed operation with backoff.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Transport)
    }
}

/// Errors surfaced by every storage operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Raised when the addressed resource does not exist.
    #[error("resource not found")]
    NotFound {
        /// Resource family, for example `volume` or `service`.
        resource: String,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// Raised when backend state forbids the operation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Raised when the driver or executor lacks the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Raised when an executor or backend call exceeds its deadline.
    #[error("timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Operation that was abandoned.
        operation: String,
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u128,
    },
    /// Raised when an executor or backend call fails to complete.
    #[error("transport error: {0}")]
    Transport(String),
    /// Raised when no instance address can be determined.
    #[error("instance resolution failed: {0}")]
    Resolution(String),
    /// Raised when a request is rejected before any backend call.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Raised when the caller cancels before the backend commits.
    #[error("operation cancelled")]
    Cancelled,
    /// Raised when configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised for unclassified failures.
    #[error("internal error: {0}")]
    Internal(String),
    /// Failure decoded from another process. The message is kept verbatim.
    #[error("{message}")]
    Remote {
        /// Kind reported by the sender.
        kind: ErrorKind,
        /// Message as the sender rendered it.
        message: String,
    },
    /// Adds the owning service name without altering kind or message.
    #[error("{inner}")]
    Scoped {
        /// Service that produced the error.
        service: String,
        /// Error returned by the service's driver.
        inner: Box<StorageError>,
    },
}

impl StorageError {
    /// Builds a [`StorageError::NotFound`] for the given resource family.
    pub fn not_found(resource: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.to_owned(),
            id: id.into(),
        }
    }

    /// Wraps this error with the owning service name. Already scoped errors
    /// are returned unchanged.
    #[must_use]
    pub fn scoped(self, service: &str) -> Self {
        match self {
            Self::Scoped { .. } => self,
            other => Self::Scoped {
                service: service.to_owned(),
                inner: Box::new(other),
            },
        }
    }

    /// Returns the service name attached by [`StorageError::scoped`].
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::Scoped { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Remote { kind, .. } => *kind,
            Self::Scoped { inner, .. } => inner.kind(),
        }
    }

    /// HTTP-like status for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.kind().status()
    }

    /// Whether a caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Converts the error into its structured wire form.
    #[must_use]
    pub fn to_json(&self) -> JsonError {
        JsonError {
            message: self.to_string(),
            status: self.status(),
        }
    }
}

/// Structured error written by executors and embedded in aggregate replies.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
#[error("{message}")]
pub struct JsonError {
    /// Human-readable message. For not-found errors this is always
    /// [`NOT_FOUND_MESSAGE`].
    pub message: String,
    /// HTTP-like status code.
    pub status: u16,
}

impl JsonError {
    /// Classifies the error by its status code. Kinds sharing a status,
    /// such as resolution and internal failures, read as internal.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::from_status(self.status)
    }

    /// Rebuilds the sender's error with a kind known from elsewhere, for
    /// example the executor's exit code.
    #[must_use]
    pub fn into_error(self, kind: ErrorKind) -> StorageError {
        StorageError::Remote {
            kind,
            message: self.message,
        }
    }
}

impl From<&StorageError> for JsonError {
    fn from(value: &StorageError) -> Self {
        value.to_json()
    }
}

impl From<JsonError> for StorageError {
    fn from(value: JsonError) -> Self {
        let kind = value.kind();
        value.into_error(kind)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Transport(format!("malformed JSON: {value}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
