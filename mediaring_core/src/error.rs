//! Unified error handling for mediaring
//!
//! Every fallible operation in the crate returns [`MediaRingResult`]. Torn
//! reads and reader backlog are *not* errors: they surface as
//! [`Readiness::Wait`](crate::channel::Readiness) and as a warning plus a
//! skipped-item counter respectively.

use thiserror::Error;

/// Main error type for mediaring operations
#[derive(Debug, Error)]
pub enum MediaRingError {
    /// I/O related errors from the OS shared-memory calls
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad names, zero item counts, sizes below the minimum
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input/argument errors (payload preconditions, oversize writes)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A same-named segment that is not (or no longer) a consistent instance
    /// of this format. Callers must not retry blindly.
    #[error("Segment '{name}' is corrupt or foreign: {reason}")]
    Corrupt { name: String, reason: String },

    /// The named segment does not exist
    #[error("Segment not found: {0}")]
    NotFound(String),

    /// The segment was unlinked out of band; destroy and recreate the handle
    #[error("Segment '{0}' was removed from the system")]
    Removed(String),

    /// Writer-only call on a reader handle or the reverse
    #[error("Wrong role: {0}")]
    Role(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Compression or channel-layout codec failures
    #[error("Codec error: {0}")]
    Codec(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors with source location for debugging.
    /// Use the `mediaring_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use mediaring_core::mediaring_internal;
/// return Err(mediaring_internal!("Unexpected state: {:?}", state));
/// ```
#[macro_export]
macro_rules! mediaring_internal {
    ($($arg:tt)*) => {
        $crate::error::MediaRingError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using MediaRingError
pub type MediaRingResult<T> = std::result::Result<T, MediaRingError>;

/// Short alias
pub type Result<T> = MediaRingResult<T>;

impl From<serde_yaml::Error> for MediaRingError {
    fn from(err: serde_yaml::Error) -> Self {
        MediaRingError::Serialization(format!("YAML error: {}", err))
    }
}

impl From<std::num::TryFromIntError> for MediaRingError {
    fn from(err: std::num::TryFromIntError) -> Self {
        MediaRingError::InvalidInput(format!("Integer out of range: {}", err))
    }
}

impl From<std::ffi::NulError> for MediaRingError {
    fn from(err: std::ffi::NulError) -> Self {
        MediaRingError::Config(format!("Name contains a NUL byte: {}", err))
    }
}

// Helper methods
impl MediaRingError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MediaRingError::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        MediaRingError::InvalidInput(msg.into())
    }

    /// Create a corrupt/foreign segment error
    pub fn corrupt<S: Into<String>, T: Into<String>>(name: S, reason: T) -> Self {
        MediaRingError::Corrupt {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a role error
    pub fn role<S: Into<String>>(msg: S) -> Self {
        MediaRingError::Role(msg.into())
    }

    /// Create a codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        MediaRingError::Codec(msg.into())
    }

    /// Whether the error means the segment content cannot be trusted.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, MediaRingError::Corrupt { .. })
    }

    /// Whether the handle must be destroyed and recreated/reopened.
    pub fn requires_reopen(&self) -> bool {
        matches!(
            self,
            MediaRingError::Removed(_) | MediaRingError::Corrupt { .. }
        )
    }
}
