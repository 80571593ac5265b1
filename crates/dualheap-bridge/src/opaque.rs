//! Opaque Handle Wrapper
//!
//! A managed value with no lossless host representation crosses over as
//! an instance of the opaque box class. The box's capsule slot owns the
//! handle: when the host drops the last reference, the slot releases the
//! handle exactly once.
//!
//! The slot is only readable through [`OpaqueBox::from_host`], which
//! checks the exact class first.

use std::fmt;
use std::rc::Rc;

use dualheap_ffi::{Handle, ManagedApi};
use tracing::trace;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostRef, Payload};

/// Host class name of opaque boxes
pub const OPAQUE_TYPE_NAME: &str = "ManagedValue";

/// Capsule slot owning one managed handle
pub struct OpaqueSlot {
    handle: Handle,
    api: Rc<dyn ManagedApi>,
}

impl OpaqueSlot {
    pub(crate) fn new(handle: Handle, api: Rc<dyn ManagedApi>) -> Self {
        Self { handle, api }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for OpaqueSlot {
    fn drop(&mut self) {
        trace!(handle = %self.handle, "releasing opaque box");
        self.api.release(self.handle);
    }
}

impl fmt::Debug for OpaqueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueSlot({})", self.handle)
    }
}

/// A host object known to be an opaque box
#[derive(Clone)]
pub struct OpaqueBox {
    obj: HostRef,
    handle: Handle,
}

impl OpaqueBox {
    /// Check that `obj` is exactly an opaque box of `ctx` and read its slot
    pub fn from_host(ctx: &BridgeContext, obj: &HostRef) -> Option<OpaqueBox> {
        if obj.type_id() != ctx.registry.host.opaque {
            return None;
        }
        match obj.payload() {
            Payload::Opaque(slot) => Some(OpaqueBox {
                handle: slot.handle(),
                obj: obj.clone(),
            }),
            _ => None,
        }
    }

    /// The wrapped handle. Borrowed: the box keeps ownership.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn as_host(&self) -> &HostRef {
        &self.obj
    }

    pub fn into_host(self) -> HostRef {
        self.obj
    }
}

impl fmt::Debug for OpaqueBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueBox({})", self.handle)
    }
}

impl BridgeContext {
    /// Move an owned handle into a new opaque box
    pub fn wrap(&self, handle: Handle) -> BridgeResult<OpaqueBox> {
        if handle.is_null() {
            return Err(BridgeError::null_handle("cannot wrap the null handle"));
        }
        let slot = OpaqueSlot::new(handle, Rc::clone(&self.api));
        let obj = self.interp.instance(&self.opaque_type, Payload::Opaque(slot));
        trace!(%handle, "wrapped opaque box");
        Ok(OpaqueBox { obj, handle })
    }

    /// Check that `obj` is an opaque box, raising a host `TypeError` if not
    pub fn expect_opaque(&self, obj: &HostRef) -> BridgeResult<OpaqueBox> {
        OpaqueBox::from_host(self, obj).ok_or_else(|| {
            BridgeError::host_type_error(format!(
                "expect object of opaque type, got '{}'",
                obj.type_name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::{HostErrorKind, Interp};
    use dualheap_sim::{SimRuntime, Value};
    use pretty_assertions::assert_eq;

    fn setup() -> (Rc<SimRuntime>, BridgeContext) {
        let rt = Rc::new(SimRuntime::new());
        let ctx = BridgeContext::initialize(rt.clone(), Rc::new(Interp::new()), BridgeConfig::default())
            .unwrap();
        (rt, ctx)
    }

    #[test]
    fn test_last_reference_releases_once() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::dict(vec![]));
        let boxed = ctx.wrap(h).unwrap();
        assert_eq!(boxed.handle(), h);

        let alias = boxed.as_host().clone();
        drop(boxed);
        assert_eq!(rt.release_count(h), 0);
        drop(alias);
        assert_eq!(rt.release_count(h), 1);
        assert!(rt.double_releases().is_empty());
    }

    #[test]
    fn test_wrap_rejects_null() {
        let (_rt, ctx) = setup();
        let err = ctx.wrap(Handle::NULL).unwrap_err();
        assert!(err.is_conversion_error());
    }

    #[test]
    fn test_from_host_checks_exact_class() {
        let (rt, ctx) = setup();
        let boxed = ctx.wrap(rt.alloc(Value::Int(1))).unwrap();
        assert!(OpaqueBox::from_host(&ctx, boxed.as_host()).is_some());

        let sub = ctx.interp().define_class("Sub", Some(ctx.opaque_type()));
        let impostor = ctx.interp().instance(&sub, Payload::None);
        assert!(OpaqueBox::from_host(&ctx, &impostor).is_none());
        assert!(OpaqueBox::from_host(&ctx, &ctx.interp().int(3)).is_none());

        let err = ctx.expect_opaque(&ctx.interp().int(3)).unwrap_err();
        assert_eq!(err.to_host_exception().kind, HostErrorKind::TypeError);
        assert!(err.to_string().contains("expect object of opaque type"));
    }

    #[test]
    fn test_repr_shows_handle() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::Int(1));
        let boxed = ctx.wrap(h).unwrap();
        assert_eq!(boxed.as_host().to_string(), format!("<ManagedValue {}>", h));
    }
}
