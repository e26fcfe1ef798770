//! Error types shared by the client contract and every transfer orchestrator

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for cirrus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to an object store or orchestrating a transfer.
///
/// The enum is `Clone` so that a worker pool can hand the first recorded failure to every waiter; foreign error
/// values are therefore stored as strings or behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The named entity (object, bucket, upload) does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// A write-time precondition (`IfMatch`/`OnlyIfAbsent`) was not satisfied
    #[error("precondition failed")]
    PreconditionFailed,

    /// A byte range whose end precedes its start
    #[error("invalid byte range: start {start} is greater than end {end}")]
    InvalidByteRange { start: u64, end: u64 },

    /// Both include and exclude filters were supplied to an iteration
    #[error("include/exclude are mutually exclusive")]
    MutuallyExclusiveFilters,

    /// A multipart upload already holds the maximum number of parts
    #[error("exceeded maximum number of upload parts ({max})")]
    ExceededMaxPartCount { max: usize },

    /// The uploader was already stopped, committed or aborted
    #[error("multipart uploader already stopped")]
    AlreadyStopped,

    /// Delete of an object/version protected by an unexpired retention lock
    #[error("object '{key}' is locked")]
    LockedObject { key: String },

    /// Missing or invalid credentials
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but not permitted
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The provider does not implement the requested operation
    #[error("operation '{operation}' is not supported by {provider}")]
    Unsupported { provider: String, operation: String },

    /// Caller supplied options that cannot be acted upon
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bulk copy with identical source and destination bucket/prefix
    #[error("copying into the same bucket and prefix would overwrite the source objects")]
    CopyToSamePrefix,

    /// A cloud URL that is missing its bucket or uses an unknown scheme
    #[error("invalid cloud path: {0}")]
    InvalidCloudPath(String),

    /// The operation was cancelled through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Returned from an iteration callback to stop listing early
    #[error("iteration halted")]
    Halt,

    /// I/O error
    #[error("I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// Zip archive error
    #[error("archive error: {0}")]
    Archive(String),

    /// Error raised by a caller supplied callback
    #[error(transparent)]
    Callback(Arc<dyn std::error::Error + Send + Sync>),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext { context: String, source: Box<Error> },
}

impl Error {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a `NotFound` error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Wrap an arbitrary error returned from a caller callback
    pub fn callback<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Callback(Arc::new(err))
    }

    /// The innermost error, with every context layer removed
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self.root(), Error::PreconditionFailed)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.root(), Error::LockedObject { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    pub fn is_already_stopped(&self) -> bool {
        matches!(self.root(), Error::AlreadyStopped)
    }

    pub fn is_halt(&self) -> bool {
        matches!(self.root(), Error::Halt)
    }

    /// Check whether the failure is an authentication/authorization problem
    pub fn is_auth(&self) -> bool {
        matches!(
            self.root(),
            Error::Unauthenticated(_) | Error::Unauthorized(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(err) => err.into(),
            other => Error::Archive(other.to_string()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err.root() {
            Error::Io { kind, .. } => io::Error::new(*kind, err.to_string()),
            Error::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            Error::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err.to_string()),
            _ => io::Error::other(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("object", "a/b.txt");
        assert_eq!(err.to_string(), "object 'a/b.txt' not found");
    }

    #[test]
    fn test_context_is_transparent_to_predicates() {
        let err = Error::PreconditionFailed
            .context("failed to put object")
            .context("failed to upload");

        assert!(err.is_precondition_failed());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "failed to upload: failed to put object: precondition failed"
        );
    }

    #[test]
    fn test_io_roundtrip_keeps_kind() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_callback_error_is_transparent() {
        let err = Error::callback(io::Error::other("user said stop"));
        assert_eq!(err.to_string(), "user said stop");
    }
}
