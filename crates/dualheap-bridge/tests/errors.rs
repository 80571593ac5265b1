//! Error domains and pending-error hygiene.

mod common;

use common::{setup, setup_with};
use dualheap_bridge::{BridgeConfig, BridgeContext, BridgeError, ContextSlot, ConversionError, HostErrorKind, Interp};
use dualheap_ffi::{ArrayBuffer, ArrayData, ManagedApi};
use dualheap_sim::{SimRuntime, Value};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn string_matrix() -> ArrayData {
    ArrayData::new(
        vec![2, 2],
        ArrayBuffer::Str {
            width: 2,
            items: ["ab", "c", "de", "f"].map(String::from).to_vec(),
        },
    )
    .unwrap()
}

#[test]
fn test_failed_fallback_leaves_no_stale_error() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    rt.fail_function("reshape");
    let before = rt.live_count();

    let err = ctx.unbox(&i.ndarray(string_matrix())).unwrap_err();
    match err {
        BridgeError::Conversion(ConversionError::ArrayImport { dtype, message }) => {
            assert_eq!(dtype, "<U2");
            assert!(message.starts_with("reshaping string vector"), "{}", message);
        }
        other => panic!("expected an array import error, got {:?}", other),
    }
    assert!(!rt.has_pending_error());
    assert_eq!(rt.live_count(), before);

    // the next conversion starts clean
    let next = ctx.unbox(&i.int(7)).unwrap();
    assert_eq!(rt.value_of(next.handle()), Some(Value::Int(7)));
    assert!(!rt.has_pending_error());
}

#[test]
fn test_numeric_import_failure() {
    let (rt, ctx) = setup();
    rt.set_fail_array_import(true);
    let data = ArrayData::vector(ArrayBuffer::Int32(vec![1, 2]));
    let err = ctx.unbox(&ctx.interp().ndarray(data)).unwrap_err();
    assert!(err.is_conversion_error());
    assert!(err.to_string().contains("injected array import failure"));
    assert!(!rt.has_pending_error());
}

#[test]
fn test_string_fallback_can_be_disabled() {
    let config = BridgeConfig {
        string_array_fallback: false,
        ..BridgeConfig::default()
    };
    let (rt, ctx) = setup_with(config);
    let err = ctx.unbox(&ctx.interp().ndarray(string_matrix())).unwrap_err();
    assert!(err.is_conversion_error());
    assert_eq!(rt.call_count("reshape"), 0);
    assert!(!rt.has_pending_error());
}

#[test]
fn test_host_errors_do_not_touch_managed() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let err = ctx.getattr(&i.str("not a box"), "x").unwrap_err();
    assert!(err.is_host_error());
    assert_eq!(err.to_host_exception().kind, HostErrorKind::TypeError);
    assert_eq!(rt.call_count("getproperty"), 0);
}

#[test]
fn test_conversion_errors_surface_as_bridge_errors() {
    let (_rt, ctx) = setup();
    let i = ctx.interp();
    let err = ctx.unbox(&i.int(1i128 << 64)).unwrap_err();
    let exc = err.to_host_exception();
    assert_eq!(exc.kind, HostErrorKind::BridgeError);
    assert!(exc.message.contains("Int64"));
    assert!(!i.err_occurred());
}

#[test]
fn test_backtrace_setting_is_forwarded() {
    let (rt, _ctx) = setup_with(BridgeConfig {
        backtrace_messages: true,
        ..BridgeConfig::default()
    });
    assert!(rt.backtrace_enabled());
}

#[test]
fn test_missing_symbol_is_fatal() {
    let rt = Rc::new(SimRuntime::new());
    rt.define_global("AbstractSet", Value::Int(0));
    let err = BridgeContext::initialize(rt, Rc::new(Interp::new()), BridgeConfig::default())
        .unwrap_err();
    assert_eq!(err, BridgeError::missing_symbol("AbstractSet"));
}

#[test]
fn test_context_slot_initializes_once() {
    let slot = ContextSlot::new();
    assert_eq!(slot.get().unwrap_err(), BridgeError::NotInitialized);

    let rt = Rc::new(SimRuntime::new());
    let first = slot
        .initialize(rt.clone(), Rc::new(Interp::new()), BridgeConfig::default())
        .unwrap();
    let second = slot
        .initialize(rt.clone(), Rc::new(Interp::new()), BridgeConfig::default())
        .unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert!(slot.is_initialized());
    // one registry, so one `0` constant
    assert_eq!(rt.live_count(), 1);
}
