//! Opaque identifiers handed out by the managed runtime.
//!
//! Each identifier is a newtype over `u64` so handles, type slots and
//! symbols cannot be mixed up at call sites. The all-zero value is the
//! null sentinel for every kind.

use std::fmt;

/// Macro to define an identifier type.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u64);

        impl $name {
            /// The null (invalid) identifier.
            pub const NULL: Self = Self(0);

            /// Wrap a raw identifier.
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw identifier.
            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Check if this is the null identifier.
            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Reference to a value on the managed heap.
    ///
    /// A handle is exclusively owned by whichever side holds it. It is
    /// never introspected directly; see [`crate::ManagedApi`].
    Handle,
    "handle"
);

define_id!(
    /// Identifier of a managed type, used for category membership tests.
    TypeSlot,
    "slot"
);

define_id!(
    /// Interned managed symbol (property and keyword names).
    Symbol,
    "sym"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        assert!(Handle::NULL.is_null());
        assert!(Handle::default().is_null());
        assert!(!Handle::from_raw(7).is_null());
        assert_eq!(Handle::from_raw(7).raw(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(Handle::from_raw(3).to_string(), "handle#3");
        assert_eq!(TypeSlot::from_raw(4).to_string(), "slot#4");
        assert_eq!(Symbol::from_raw(5).to_string(), "sym#5");
    }
}
