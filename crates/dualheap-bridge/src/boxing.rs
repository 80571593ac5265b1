//! Boxing Engine
//!
//! Converts a managed handle into a host object. The engine takes
//! ownership of the handle it is given: after a native conversion the
//! handle is released, on an opaque wrap it moves into the box, and on
//! error it is released before the error is returned.
//!
//! Categories are tested in a fixed order and the first match wins (see
//! [`TypeRegistry::box_rules`](crate::registry::TypeRegistry::box_rules)).
//! A scalar whose native read fails degrades to an opaque box rather than
//! failing the whole conversion.

use dualheap_ffi::{ApiResult, Handle};
use tracing::{trace, warn};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostRef;
use crate::registry::{BoxRule, ScalarKind};
use crate::unboxing::Unboxed;

impl BridgeContext {
    /// Convert an owned managed handle into a host object
    pub fn box_value(&self, handle: Handle) -> BridgeResult<HostRef> {
        if handle.is_null() {
            return Err(BridgeError::null_handle("cannot box the null handle"));
        }
        let owned = Unboxed::owned(self.api(), handle);
        let rule = self.registry.box_rule(handle);
        trace!(%handle, ?rule, "box");

        match rule {
            Some(BoxRule::Nothing) => Ok(self.interp.none()),
            Some(BoxRule::Scalar(kind)) => match self.native_scalar(kind, handle) {
                Ok(obj) => Ok(obj),
                Err(_) => self.fallback(owned, kind),
            },
            Some(BoxRule::Array) => self.box_array(owned),
            Some(BoxRule::Tuple) => self.box_tuple(owned),
            Some(BoxRule::AbstractString) => self.box_abstract_string(owned),
            None => self.wrap_owned(owned),
        }
    }

    /// Move an owned handle into a new opaque box
    fn wrap_owned(&self, owned: Unboxed<'_>) -> BridgeResult<HostRef> {
        let handle = owned.into_converted().handle();
        Ok(self.wrap(handle)?.into_host())
    }

    /// Give up on a native conversion and box the handle opaquely
    fn fallback(&self, owned: Unboxed<'_>, kind: ScalarKind) -> BridgeResult<HostRef> {
        let spent = self.clear_pending_error();
        if self.config.warn_on_fallback {
            let error = spent.map(|e| e.to_string());
            warn!(
                handle = %owned.handle(),
                category = ?kind,
                error = error.as_deref(),
                "native conversion failed, boxing as opaque"
            );
        }
        self.wrap_owned(owned)
    }

    fn native_scalar(&self, kind: ScalarKind, handle: Handle) -> ApiResult<HostRef> {
        let api = self.api();
        let interp = &self.interp;
        match kind {
            ScalarKind::Integer => {
                if api.is_instance(handle, self.registry.managed.bool) {
                    return api.get_bool(handle).map(|b| interp.bool(b));
                }
                match api.get_i64(handle) {
                    Ok(i) => Ok(interp.int(i)),
                    Err(_) => {
                        // too large for Int64, may still fit UInt64
                        self.clear_pending_error();
                        api.get_u64(handle).map(|u| interp.int(u))
                    }
                }
            }
            ScalarKind::AbstractFloat => api.get_f64(handle).map(|x| interp.float(x)),
            ScalarKind::Bool => api.get_bool(handle).map(|b| interp.bool(b)),
            ScalarKind::Complex => api.get_complex(handle).map(|c| interp.complex(c.re, c.im)),
            ScalarKind::String => api.get_utf8(handle).map(|s| interp.str(&s)),
            ScalarKind::Number => match api.get_f64(handle) {
                Ok(x) => Ok(interp.float(x)),
                Err(_) => {
                    self.clear_pending_error();
                    api.get_complex(handle).map(|c| interp.complex(c.re, c.im))
                }
            },
        }
    }

    fn box_array(&self, owned: Unboxed<'_>) -> BridgeResult<HostRef> {
        let handle = owned.handle();
        if self.api.is_instance(handle, self.registry.managed.bit_array) {
            return self.wrap_owned(owned);
        }
        match self.api.array_export(handle) {
            Ok(data) => Ok(self.interp.ndarray(data)),
            Err(_) => {
                self.clear_pending_error();
                self.wrap_owned(owned)
            }
        }
    }

    fn box_tuple(&self, owned: Unboxed<'_>) -> BridgeResult<HostRef> {
        let api = self.api();
        let handle = owned.handle();
        let len = {
            let len = Unboxed::owned(
                api,
                self.check(api.call(self.registry.functions.length, &[handle], &[]))?,
            );
            self.check(api.get_i64(len.handle()))?
        };
        let mut items = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        for index in 1..=len {
            let element = self.check(api.get_index_i(handle, index))?;
            items.push(self.box_value(element)?);
        }
        Ok(self.interp.tuple(items))
    }

    fn box_abstract_string(&self, owned: Unboxed<'_>) -> BridgeResult<HostRef> {
        let api = self.api();
        let converted = api.call(self.registry.functions.string, &[owned.handle()], &[]);
        let converted = Unboxed::owned(api, self.check(converted)?);
        match api.get_utf8(converted.handle()) {
            Ok(text) => Ok(self.interp.str(&text)),
            Err(_) => self.fallback(owned, ScalarKind::String),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::Interp;
    use dualheap_ffi::{ArrayBuffer, ArrayData, ComplexF64, ManagedApi};
    use dualheap_sim::{SimRuntime, Value};
    use pretty_assertions::assert_eq;
    use std::io;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    fn setup() -> (Rc<SimRuntime>, BridgeContext) {
        setup_with(BridgeConfig::default())
    }

    fn setup_with(config: BridgeConfig) -> (Rc<SimRuntime>, BridgeContext) {
        let rt = Rc::new(SimRuntime::new());
        let ctx = BridgeContext::initialize(rt.clone(), Rc::new(Interp::new()), config).unwrap();
        (rt, ctx)
    }

    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` and return everything logged at `WARN` or above
    fn captured_warnings(f: impl FnOnce()) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .without_time()
            .with_writer(move || LogSink(Arc::clone(&sink)))
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_native_scalars_release_input() {
        let (rt, ctx) = setup();
        let i = ctx.interp();
        let cases = vec![
            (Value::Int(42), i.int(42)),
            (Value::UInt(u64::MAX), i.int(u64::MAX)),
            (Value::Bool(true), i.bool(true)),
            (Value::Float(2.5), i.float(2.5)),
            (Value::Float32(0.5), i.float(0.5)),
            (Value::Complex(ComplexF64::new(0.0, 1.0)), i.complex(0.0, 1.0)),
            (Value::str("hi"), i.str("hi")),
            (Value::SubString("sub".into()), i.str("sub")),
            (Value::Nothing, i.none()),
        ];
        for (value, expected) in cases {
            let h = rt.alloc(value);
            assert_eq!(ctx.box_value(h).unwrap(), expected);
            assert_eq!(rt.release_count(h), 1);
        }
        assert_eq!(rt.live_count(), 1);
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_bool_boxes_to_singleton() {
        let (rt, ctx) = setup();
        let obj = ctx.box_value(rt.alloc(Value::Bool(false))).unwrap();
        assert!(obj.is(&ctx.interp().bool(false)));
    }

    #[test]
    fn test_irrational_boxes_as_float() {
        let (rt, ctx) = setup();
        let pi = rt.eval("pi").unwrap();
        let obj = ctx.box_value(pi).unwrap();
        assert_eq!(obj.as_float(), Some(std::f64::consts::PI));
    }

    #[test]
    fn test_integer_too_wide_degrades_to_opaque() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::BigInt(i128::MAX));
        let obj = ctx.box_value(h).unwrap();
        assert_eq!(obj.type_name(), "ManagedValue");
        assert!(rt.is_live(h));
        assert!(!rt.has_pending_error());
        drop(obj);
        assert_eq!(rt.release_count(h), 1);
    }

    #[test]
    fn test_fallback_warns_when_enabled() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::BigInt(i128::MIN));
        let logs = captured_warnings(|| {
            let obj = ctx.box_value(h).unwrap();
            assert_eq!(obj.type_name(), "ManagedValue");
        });
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("native conversion failed, boxing as opaque"), "{}", logs);
        assert!(logs.contains("Integer"), "{}", logs);
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_fallback_is_silent_when_disabled() {
        let (rt, ctx) = setup_with(BridgeConfig {
            warn_on_fallback: false,
            ..BridgeConfig::default()
        });
        let h = rt.alloc(Value::BigInt(i128::MIN));
        let logs = captured_warnings(|| {
            let obj = ctx.box_value(h).unwrap();
            assert_eq!(obj.type_name(), "ManagedValue");
            drop(obj);
        });
        assert_eq!(logs, "");
        assert_eq!(rt.release_count(h), 1);
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_arrays() {
        let (rt, ctx) = setup();
        let ints = rt.alloc(Value::int_vector(vec![1, 2, 3]));
        let obj = ctx.box_value(ints).unwrap();
        assert_eq!(
            obj.as_array(),
            Some(&ArrayData::vector(ArrayBuffer::Int64(vec![1, 2, 3])))
        );
        assert!(!rt.is_live(ints));

        let bits = rt.alloc(Value::bit_vector(vec![true, false]));
        assert_eq!(ctx.box_value(bits).unwrap().type_name(), "ManagedValue");

        let strings = rt.alloc(Value::string_vector(&["a", "b"]));
        assert_eq!(ctx.box_value(strings).unwrap().type_name(), "ManagedValue");
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_tuple_boxes_elementwise() {
        let (rt, ctx) = setup();
        let h = rt.eval("(1, \"a\", nothing, [1, 2])").unwrap();
        let before = rt.live_count();
        let obj = ctx.box_value(h).unwrap();
        let items = obj.as_tuple().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], ctx.interp().int(1));
        assert_eq!(items[1], ctx.interp().str("a"));
        assert!(items[2].is_none());
        assert_eq!(items[3].type_name(), "ndarray");
        // the tuple and every element handle are gone
        assert_eq!(rt.live_count(), before - 1);
    }

    #[test]
    fn test_tuple_element_failure_aborts() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::Tuple(vec![
            Value::Int(1),
            Value::SubString("s".into()),
            Value::Int(3),
        ]));
        let before = rt.live_count();
        rt.fail_function("string");
        let err = ctx.box_value(h).unwrap_err();
        assert!(err.is_managed_error());
        assert!(err.to_string().contains("injected failure in `string`"));
        assert_eq!(rt.live_count(), before - 1);
        assert!(rt.double_releases().is_empty());
        assert!(!rt.has_pending_error());
    }

    #[test]
    fn test_unmatched_category_is_opaque() {
        let (rt, ctx) = setup();
        let h = rt.alloc(Value::dict(vec![(Value::Int(1), Value::Int(2))]));
        let obj = ctx.box_value(h).unwrap();
        assert_eq!(obj.type_name(), "ManagedValue");
        assert_eq!(rt.release_count(h), 0);
    }

    #[test]
    fn test_null_handle_rejected() {
        let (_rt, ctx) = setup();
        assert!(ctx.box_value(Handle::NULL).unwrap_err().is_conversion_error());
    }
}
