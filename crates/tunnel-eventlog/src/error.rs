//! Error types for tunnel-eventlog
//!
//! One enum covers the codec, the file storage and the event manager so
//! that callers can match on the failure class without unwrapping layers.

use std::fmt;

use thiserror::Error;

/// Why a record at a given offset could not be framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// Fewer than a full header was available
    HeaderTooShort { got: usize },
    /// The two leading bytes are not the record magic
    InvalidMagic,
    /// The body ended before the length announced by the header
    BodyTooShort { got: usize, expected: usize },
}

impl RecordErrorKind {
    /// True for the two short-read variants
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            RecordErrorKind::HeaderTooShort { .. } | RecordErrorKind::BodyTooShort { .. }
        )
    }
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordErrorKind::HeaderTooShort { got } => write!(
                f,
                "header: too short read (got {}, expect {})",
                got,
                crate::record::HEADER_SIZE
            ),
            RecordErrorKind::InvalidMagic => write!(f, "header: invalid magic number"),
            RecordErrorKind::BodyTooShort { got, expected } => {
                write!(f, "body: too short read (got {}, expect {})", got, expected)
            }
        }
    }
}

/// Errors that can occur in event log operations
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The manager has been shut down
    #[error("event log is not running")]
    NotRunning,

    /// Bad input to push or subscribe
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The log directory does not follow the naming/sequence rules
    #[error("Invalid log directory layout: {0}")]
    InvalidLayout(String),

    /// Another process holds the writer lock on the log directory
    #[error("Event log directory is locked by another writer: {0}")]
    DirectoryLocked(String),

    /// The requested log id is not known to the storage
    #[error("Unknown log: {0}")]
    UnknownLog(String),

    /// The reader fell behind retention; its log id is gone
    #[error("Log is too old: {0}")]
    TooOld(String),

    /// Corrupt bytes at a specific position
    #[error("Malformed record in log {log_id} at offset {offset}: {kind}")]
    MalformedRecord {
        log_id: String,
        offset: i64,
        kind: RecordErrorKind,
    },

    /// The event could not be turned into a record body
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A read handle was requested past the end of the file
    #[error("Failed to seek log {log_id} to offset {offset}: file is {len} bytes")]
    SeekFailed { log_id: String, offset: i64, len: u64 },

    /// I/O error from the underlying filesystem
    #[error("I/O error: {0}")]
    Io(String),

    /// The subscription (or the whole manager) was cancelled
    #[error("subscription cancelled")]
    Cancelled,

    /// A live subscription with this id already exists
    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    /// The writer failed to persist events since the last push
    #[error("Failed to persist {dropped} event(s): {reason}")]
    WriteFailed { dropped: u64, reason: String },

    /// A managed service failed to register, replace or stop
    #[error("Service {name}: {reason}")]
    Service { name: String, reason: String },
}

impl From<std::io::Error> for EventLogError {
    fn from(err: std::io::Error) -> Self {
        EventLogError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(err: serde_json::Error) -> Self {
        EventLogError::Encoding(err.to_string())
    }
}

impl EventLogError {
    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new InvalidLayout error
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::InvalidLayout(message.into())
    }

    /// Create a new Encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Create a new Service error
    pub fn service(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Service {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Whether this error ends a subscription when raised by its tailing task
    ///
    /// Everything a tailer can hit is terminal for that tailer; the caller
    /// decides whether to resubscribe.
    pub fn is_terminal_for_subscription(&self) -> bool {
        !matches!(self, EventLogError::WriteFailed { .. })
    }

    /// Whether a caller may reasonably retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventLogError::Io(_) | EventLogError::WriteFailed { .. }
        )
    }
}

/// Result type alias for event log operations
pub type EventLogResult<T> = Result<T, EventLogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EventLogError = io_err.into();
        assert!(matches!(err, EventLogError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_malformed_record_message() {
        let err = EventLogError::MalformedRecord {
            log_id: "abc".into(),
            offset: 42,
            kind: RecordErrorKind::InvalidMagic,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("42"));
        assert!(msg.contains("invalid magic"));
    }

    #[test]
    fn test_short_read_messages() {
        let kind = RecordErrorKind::HeaderTooShort { got: 3 };
        assert!(kind.is_truncation());
        assert!(kind.to_string().contains("header: too short read"));

        let kind = RecordErrorKind::BodyTooShort { got: 1, expected: 9 };
        assert!(kind.is_truncation());
        assert!(kind.to_string().contains("body: too short read"));

        assert!(!RecordErrorKind::InvalidMagic.is_truncation());
    }

    #[test]
    fn test_directory_locked_message() {
        let err = EventLogError::DirectoryLocked("/var/lib/tunnel/events".into());
        assert!(err.to_string().contains("locked by another writer"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_write_failed_is_not_terminal() {
        let err = EventLogError::WriteFailed {
            dropped: 2,
            reason: "disk full".into(),
        };
        assert!(!err.is_terminal_for_subscription());
        assert!(EventLogError::Cancelled.is_terminal_for_subscription());
        assert!(!EventLogError::NotRunning.is_retryable());
    }
}
