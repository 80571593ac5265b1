//! Composite Conversion
//!
//! Tuples and argument lists are converted element by element into a
//! [`CompositeBuffer`]. The buffer owns every owned element handle and
//! releases them when it goes out of scope, whether the composite was
//! built or a later element failed. Borrowed elements (`nothing`, opaque
//! boxes) are never released.

use std::fmt;

use dualheap_ffi::{release_all, Converted, Handle, ManagedApi};
use tracing::trace;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostRef;
use crate::unboxing::Unboxed;

/// Transient storage for converted elements
pub struct CompositeBuffer<'a> {
    api: &'a dyn ManagedApi,
    slots: Vec<Converted>,
}

impl<'a> CompositeBuffer<'a> {
    pub fn with_capacity(api: &'a dyn ManagedApi, capacity: usize) -> Self {
        Self {
            api,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Take over an element's release obligation
    pub fn push(&mut self, item: Unboxed<'_>) {
        self.slots.push(item.into_converted());
    }

    /// Element handles in order, for passing as call arguments
    pub fn handles(&self) -> Vec<Handle> {
        self.slots.iter().map(Converted::handle).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of elements the buffer will release
    pub fn owned_count(&self) -> usize {
        self.slots.iter().filter(|c| c.is_owned()).count()
    }
}

impl Drop for CompositeBuffer<'_> {
    fn drop(&mut self) {
        let released = release_all(self.api, &self.slots);
        trace!(len = self.slots.len(), released, "composite buffer released");
    }
}

impl fmt::Debug for CompositeBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.slots).finish()
    }
}

impl BridgeContext {
    /// Unbox every value in order; the first failure releases the earlier
    /// owned elements and is returned
    pub fn unbox_all(&self, values: &[HostRef]) -> BridgeResult<CompositeBuffer<'_>> {
        let mut buffer = CompositeBuffer::with_capacity(self.api(), values.len());
        for value in values {
            buffer.push(self.unbox(value)?);
        }
        Ok(buffer)
    }

    /// Convert a host tuple into a new managed tuple (owned)
    pub fn unbox_tuple(&self, value: &HostRef) -> BridgeResult<Handle> {
        let items = value
            .as_tuple()
            .ok_or_else(|| BridgeError::unsupported_type(value.type_name()))?;
        let elements = self.unbox_all(items)?;
        let tuple = self.api.call(self.registry.functions.tuple, &elements.handles(), &[]);
        self.check(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::Interp;
    use dualheap_sim::{SimRuntime, Value};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn setup() -> (Rc<SimRuntime>, BridgeContext) {
        let rt = Rc::new(SimRuntime::new());
        let ctx =
            BridgeContext::initialize(rt.clone(), Rc::new(Interp::new()), BridgeConfig::default())
                .unwrap();
        (rt, ctx)
    }

    #[test]
    fn test_buffer_skips_borrowed_entries() {
        let (rt, ctx) = setup();
        let i = ctx.interp();
        let buffer = ctx
            .unbox_all(&[i.int(1), i.none(), i.str("x")])
            .unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.owned_count(), 2);
        let handles = buffer.handles();
        drop(buffer);
        assert_eq!(rt.release_count(handles[0]), 1);
        assert_eq!(rt.release_count(handles[2]), 1);
        assert!(rt.illegal_releases().is_empty());
    }

    #[test]
    fn test_tuple_elements_released_after_build() {
        let (rt, ctx) = setup();
        let i = ctx.interp();
        let before = rt.live_count();
        let tuple = ctx
            .unbox_tuple(&i.tuple(vec![i.int(1), i.str("a"), i.none()]))
            .unwrap();
        assert_eq!(
            rt.value_of(tuple),
            Some(Value::Tuple(vec![Value::Int(1), Value::str("a"), Value::Nothing]))
        );
        // only the tuple itself is left
        assert_eq!(rt.live_count(), before + 1);
    }

    #[test]
    fn test_failing_tuple_constructor_releases_elements() {
        let (rt, ctx) = setup();
        let i = ctx.interp();
        rt.fail_function("tuple");
        let before = rt.live_count();
        let err = ctx.unbox_tuple(&i.tuple(vec![i.int(1), i.int(2)])).unwrap_err();
        assert!(err.is_managed_error());
        assert_eq!(rt.live_count(), before);
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_empty_tuple() {
        let (rt, ctx) = setup();
        let tuple = ctx.unbox_tuple(&ctx.interp().tuple(vec![])).unwrap();
        assert_eq!(rt.value_of(tuple), Some(Value::Tuple(vec![])));
    }
}
