//! Handle Ownership
//!
//! Managed values are not on the host's reference-counted heap, so every
//! handle the bridge touches carries an explicit ownership tag:
//!
//! - `Owned`: freshly allocated for this conversion; the holder must
//!   release it exactly once
//! - `Borrowed`: an alias into something else that owns it (an opaque box
//!   or a rooted singleton); releasing it is a double release
//!
//! `Converted` is a plain tag. Scope guards built on top of it (the
//! bridge's `Unboxed` and `CompositeBuffer`) are what actually release.

use std::fmt;

use crate::api::ManagedApi;
use crate::handle::Handle;

/// A handle together with who is responsible for releasing it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Converted {
    /// Fresh handle; the holder releases it
    Owned(Handle),
    /// Alias; never released through this value
    Borrowed(Handle),
}

impl Converted {
    /// The underlying handle, regardless of ownership
    pub fn handle(&self) -> Handle {
        match *self {
            Converted::Owned(h) | Converted::Borrowed(h) => h,
        }
    }

    /// Check if the holder must release this handle
    pub fn is_owned(&self) -> bool {
        matches!(self, Converted::Owned(_))
    }

    /// Release the handle if owned. Borrowed handles are left untouched.
    ///
    /// Returns whether a release call was made.
    pub fn release(self, api: &dyn ManagedApi) -> bool {
        match self {
            Converted::Owned(h) => {
                api.release(h);
                true
            }
            Converted::Borrowed(_) => false,
        }
    }
}

impl fmt::Debug for Converted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converted::Owned(h) => write!(f, "Owned({})", h),
            Converted::Borrowed(h) => write!(f, "Borrowed({})", h),
        }
    }
}

/// Release every owned entry, skipping borrowed ones.
///
/// Returns the number of release calls made.
pub fn release_all(api: &dyn ManagedApi, items: &[Converted]) -> usize {
    let mut released = 0;
    for item in items {
        if item.release(api) {
            released += 1;
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_and_ownership() {
        let owned = Converted::Owned(Handle::from_raw(1));
        let borrowed = Converted::Borrowed(Handle::from_raw(2));

        assert!(owned.is_owned());
        assert!(!borrowed.is_owned());
        assert_eq!(owned.handle().raw(), 1);
        assert_eq!(borrowed.handle().raw(), 2);
    }

    #[test]
    fn test_debug_shows_ownership() {
        let owned = Converted::Owned(Handle::from_raw(9));
        assert_eq!(format!("{:?}", owned), "Owned(handle#9)");
        let borrowed = Converted::Borrowed(Handle::from_raw(9));
        assert_eq!(format!("{:?}", borrowed), "Borrowed(handle#9)");
    }
}
