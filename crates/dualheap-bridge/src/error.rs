//! Error Types for the Bridge
//!
//! ## Error Domains
//!
//! - Host: argument errors detected before anything touches the managed
//!   runtime (wrong receiver type, bad key)
//! - Managed: an exception raised inside the managed runtime, already
//!   fetched and therefore cleared there
//! - Conversion: a value that cannot cross the boundary
//!
//! Whatever the domain, a failed operation reaches host code as exactly one
//! exception, built by [`BridgeError::to_host_exception`].

use dualheap_ffi::{FfiError, ManagedException};
use thiserror::Error;

use crate::host::{HostErrorKind, HostException, Interp};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A value that could not be converted across the boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// No unboxing rule exists for the exact host type
    #[error("unsupported type: cannot convert host '{type_name}' to a managed value")]
    UnsupportedType {
        /// Host type name
        type_name: String,
    },

    /// Integer does not fit the platform word
    #[error("numeric overflow: {value} cannot be represented as {target}")]
    Overflow {
        /// Rendered host value
        value: String,
        /// Target managed type
        target: &'static str,
    },

    /// A host extraction routine reported an error
    #[error("cannot extract {target} from host '{type_name}': {message}")]
    Extraction {
        /// Host type name
        type_name: String,
        /// What was being read
        target: &'static str,
        /// Host error message
        message: String,
    },

    /// Null handle where a live one was expected
    #[error("null handle: {context}")]
    NullHandle {
        /// Where the null handle showed up
        context: String,
    },

    /// Host string could not be encoded
    #[error("string encoding error: {message}")]
    Encoding {
        /// Error message
        message: String,
    },

    /// Host array could not be brought into the managed runtime
    #[error("cannot import array of dtype {dtype}: {message}")]
    ArrayImport {
        /// Array dtype
        dtype: String,
        /// Last managed error, or the failing stage
        message: String,
    },
}

/// Bridge error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Invalid host-side arguments
    #[error("{kind}: {message}")]
    Host {
        /// Host exception class
        kind: HostErrorKind,
        /// Error message
        message: String,
    },

    /// Exception raised by the managed runtime
    #[error("{exception}: {message}")]
    Managed {
        /// Managed exception type name
        exception: String,
        /// Rendered message
        message: String,
    },

    /// Value conversion failure
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// A name the registry needs is not bound in the managed runtime
    #[error("cannot resolve managed symbol '{name}'")]
    MissingSymbol {
        /// Global name that failed to resolve
        name: String,
    },

    /// Boundary-level failure
    #[error(transparent)]
    Ffi(#[from] FfiError),

    /// Invalid configuration
    #[error("invalid bridge configuration: {message}")]
    Config {
        /// Parser or I/O message
        message: String,
    },

    /// No context has been initialized
    #[error("bridge context not initialized")]
    NotInitialized,
}

impl BridgeError {
    /// Create a host-domain error
    pub fn host(kind: HostErrorKind, message: impl Into<String>) -> Self {
        BridgeError::Host {
            kind,
            message: message.into(),
        }
    }

    /// Create a host `TypeError`
    pub fn host_type_error(message: impl Into<String>) -> Self {
        Self::host(HostErrorKind::TypeError, message)
    }

    /// Create a managed-domain error
    pub fn managed(exception: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Managed {
            exception: exception.into(),
            message: message.into(),
        }
    }

    /// Create a missing symbol error
    pub fn missing_symbol(name: impl Into<String>) -> Self {
        BridgeError::MissingSymbol { name: name.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create an unsupported type error
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        ConversionError::UnsupportedType {
            type_name: type_name.into(),
        }
        .into()
    }

    /// Create a null handle error
    pub fn null_handle(context: impl Into<String>) -> Self {
        ConversionError::NullHandle {
            context: context.into(),
        }
        .into()
    }

    /// Check if this error was raised before touching the managed runtime
    pub fn is_host_error(&self) -> bool {
        matches!(self, BridgeError::Host { .. })
    }

    /// Check if this is a managed exception
    pub fn is_managed_error(&self) -> bool {
        matches!(self, BridgeError::Managed { .. })
    }

    /// Check if this is a conversion error
    pub fn is_conversion_error(&self) -> bool {
        matches!(self, BridgeError::Conversion(_))
    }

    /// The exception host code observes for this error.
    ///
    /// Host-domain errors keep their own class; everything else is raised
    /// as the bridge's exception type.
    pub fn to_host_exception(&self) -> HostException {
        match self {
            BridgeError::Host { kind, message } => HostException::new(*kind, message.clone()),
            other => HostException::new(HostErrorKind::BridgeError, other.to_string()),
        }
    }

    /// Set this error as the pending exception of `interp`
    pub fn raise(&self, interp: &Interp) {
        let exc = self.to_host_exception();
        interp.err_set(exc.kind, exc.message);
    }
}

impl From<ManagedException> for BridgeError {
    fn from(exc: ManagedException) -> Self {
        BridgeError::Managed {
            exception: exc.exception,
            message: exc.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_domains_are_distinct() {
        let host = BridgeError::host_type_error("expect object of opaque type");
        assert!(host.is_host_error());
        assert!(!host.is_managed_error());

        let managed: BridgeError = ManagedException::new("KeyError", "key 3 not found").into();
        assert!(managed.is_managed_error());
        assert_eq!(managed.to_string(), "KeyError: key 3 not found");

        let conv = BridgeError::unsupported_type("set");
        assert!(conv.is_conversion_error());
        assert!(conv.to_string().contains("'set'"));
    }

    #[test]
    fn test_host_exception_mapping() {
        let exc = BridgeError::host_type_error("bad receiver").to_host_exception();
        assert_eq!(exc.kind, HostErrorKind::TypeError);
        assert_eq!(exc.message, "bad receiver");

        let exc = BridgeError::managed("DivideError", "integer division error").to_host_exception();
        assert_eq!(exc.kind, HostErrorKind::BridgeError);
        assert_eq!(exc.message, "DivideError: integer division error");

        let exc = BridgeError::missing_symbol("reshape").to_host_exception();
        assert_eq!(exc.kind, HostErrorKind::BridgeError);
        assert!(exc.message.contains("reshape"));
    }

    #[test]
    fn test_raise_sets_error_indicator() {
        let interp = Interp::new();
        BridgeError::NotInitialized.raise(&interp);
        assert!(interp.err_occurred());
        let exc = interp.err_fetch().unwrap();
        assert_eq!(exc.kind, HostErrorKind::BridgeError);
        assert_eq!(exc.message, "bridge context not initialized");
        assert!(!interp.err_occurred());
    }

    #[test]
    fn test_ffi_errors_pass_through() {
        let err: BridgeError = FfiError::MissingEntry { entry: "call" }.into();
        assert_eq!(
            err.to_string(),
            "C API table is missing required entry 'call'"
        );
    }
}
