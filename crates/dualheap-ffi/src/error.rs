//! FFI Error Types
//!
//! ## Error Categories
//!
//! - `PendingError`: a managed call failed and left an exception pending
//!   in the managed runtime
//! - `FfiError`: problems with the boundary itself (table version,
//!   missing entries, null handles, encoding)

use thiserror::Error;

use crate::handle::Handle;

/// Result type for boundary operations
pub type FfiResult<T> = Result<T, FfiError>;

/// Failure status of a managed API call.
///
/// Carries no payload: the exception itself stays pending inside the
/// managed runtime until it is consumed by [`crate::ManagedApi::fetch_error`].
/// Dropping this value without fetching leaves a stale exception behind
/// that the next unrelated call would observe.
#[must_use = "a pending managed error must be fetched or cleared"]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("managed call failed; exception pending in the managed runtime")]
pub struct PendingError;

/// FFI error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FfiError {
    /// The C table was built for another API revision
    #[error("C API version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this crate speaks
        expected: u32,
        /// Version reported by the table
        actual: u32,
    },

    /// A required table entry is null
    #[error("C API table is missing required entry '{entry}'")]
    MissingEntry {
        /// Name of the entry
        entry: &'static str,
    },

    /// Null handle where a live one was expected
    #[error("null handle: {context}")]
    NullHandle {
        /// Where the null handle showed up
        context: String,
    },

    /// Handle was released twice or released while borrowed
    #[error("invalid release of {handle}: {reason}")]
    InvalidRelease {
        /// Offending handle
        handle: Handle,
        /// Why the release is invalid
        reason: String,
    },

    /// Array shape does not cover its buffer
    #[error("array shape mismatch: shape holds {expected} elements, buffer has {actual}")]
    ShapeMismatch {
        /// Element count implied by the shape
        expected: usize,
        /// Element count of the buffer
        actual: usize,
    },

    /// Bytes returned by the managed side are not UTF-8
    #[error("managed string is not valid UTF-8: {message}")]
    InvalidUtf8 {
        /// Decoder message
        message: String,
    },
}

impl FfiError {
    /// Create a null handle error with context
    pub fn null_handle(context: impl Into<String>) -> Self {
        FfiError::NullHandle {
            context: context.into(),
        }
    }

    /// Create an invalid release error
    pub fn invalid_release(handle: Handle, reason: impl Into<String>) -> Self {
        FfiError::InvalidRelease {
            handle,
            reason: reason.into(),
        }
    }
}

impl From<std::string::FromUtf8Error> for FfiError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        FfiError::InvalidUtf8 {
            message: err.to_string(),
        }
    }
}
