//! Operator entry points on opaque boxes.

mod common;

use common::setup;
use dualheap_bridge::{BinaryOp, HostErrorKind, UnaryOp};
use dualheap_ffi::ManagedApi;
use dualheap_sim::Value;
use pretty_assertions::assert_eq;

#[test]
fn test_eval_keeps_result_opaque() {
    let (_rt, ctx) = setup();
    let pi = ctx.eval("pi").unwrap();
    assert_eq!(pi.as_host().type_name(), "ManagedValue");
    assert_eq!(ctx.repr(pi.as_host()).unwrap(), "π");

    let boxed = ctx.eval_boxed("pi").unwrap();
    assert_eq!(boxed.as_float(), Some(std::f64::consts::PI));
}

#[test]
fn test_arithmetic_on_pi() {
    let (_rt, ctx) = setup();
    let i = ctx.interp();
    let pi = ctx.eval("pi").unwrap();
    let pi = pi.as_host();

    let sum = ctx.binary(BinaryOp::Add, pi, &i.int(1)).unwrap();
    assert_eq!(sum.as_float(), Some(std::f64::consts::PI + 1.0));
    let half = ctx.binary(BinaryOp::TrueDiv, pi, &i.int(2)).unwrap();
    assert_eq!(half.as_float(), Some(std::f64::consts::FRAC_PI_2));
    let neg = ctx.unary(UnaryOp::Neg, pi).unwrap();
    assert_eq!(neg.as_float(), Some(-std::f64::consts::PI));
    assert_eq!(ctx.binary(BinaryOp::Gt, pi, &i.int(3)).unwrap(), i.bool(true));
    assert_eq!(ctx.binary(BinaryOp::Lt, pi, &i.float(3.0)).unwrap(), i.bool(false));
}

#[test]
fn test_operands_are_released() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let x = ctx.eval("7").unwrap();
    let before = rt.live_count();
    for op in [BinaryOp::Add, BinaryOp::Mul, BinaryOp::Mod, BinaryOp::BitXor, BinaryOp::Eq] {
        ctx.binary(op, x.as_host(), &i.int(3)).unwrap();
    }
    assert_eq!(rt.live_count(), before);
    assert!(rt.double_releases().is_empty());
    assert!(rt.illegal_releases().is_empty());
}

#[test]
fn test_square_unboxes_any_argument() {
    let (_rt, ctx) = setup();
    let i = ctx.interp();
    assert_eq!(ctx.square(&i.int(12)).unwrap(), i.int(144));
    assert_eq!(ctx.square(&i.complex(0.0, 1.0)).unwrap(), i.complex(-1.0, 0.0));
    let boxed = ctx.eval("3").unwrap();
    assert_eq!(ctx.square(boxed.as_host()).unwrap(), i.int(9));
}

#[test]
fn test_dict_with_tuple_keys() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let dict = ctx.wrap(rt.alloc(Value::dict(vec![]))).unwrap();
    let key = i.tuple(vec![i.int(1), i.int(2)]);
    ctx.setitem(dict.as_host(), &key, &i.int(3)).unwrap();

    assert_eq!(ctx.getitem(dict.as_host(), &key).unwrap(), i.int(3));
    let contains = ctx.binary(BinaryOp::Contains, dict.as_host(), &key).unwrap();
    assert_eq!(contains, i.bool(true));
    assert!(ctx.truthy(dict.as_host()).unwrap());

    let missing = ctx.getitem(dict.as_host(), &i.int(1)).unwrap_err();
    assert!(missing.is_managed_error());
    assert!(missing.to_string().starts_with("KeyError"));
}

#[test]
fn test_struct_attributes() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    rt.define_struct("Point", &["x", "y"], true);
    let point_type = ctx.eval("Point").unwrap();

    let p = ctx
        .call(point_type.as_host(), &[], &[("y", i.int(2)), ("x", i.float(0.5))])
        .unwrap();
    assert_eq!(p.type_name(), "ManagedValue");
    assert_eq!(ctx.getattr(&p, "x").unwrap(), i.float(0.5));
    assert!(ctx.hasattr(&p, "y").unwrap());
    assert!(!ctx.hasattr(&p, "z").unwrap());

    ctx.setattr(&p, "y", &i.str("two")).unwrap();
    assert_eq!(ctx.getattr(&p, "y").unwrap(), i.str("two"));
    assert_eq!(ctx.repr(&p).unwrap(), "Point(0.5, \"two\")");
}

#[test]
fn test_call_rejects_unknown_keyword() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let add = ctx.eval("+").unwrap();
    let before = rt.live_count();
    let err = ctx
        .call(add.as_host(), &[i.int(1)], &[("y", i.int(2))])
        .unwrap_err();
    assert!(err.is_managed_error());
    assert!(err.to_string().starts_with("MethodError"));
    assert_eq!(rt.live_count(), before);
    assert!(!rt.has_pending_error());

    assert_eq!(ctx.call(add.as_host(), &[i.int(1), i.int(2)], &[]).unwrap(), i.int(3));
}

#[test]
fn test_truthiness() {
    let (_rt, ctx) = setup();
    let falsy = ["0", "0.0", "false", "[]", "\"\""];
    let truthy = ["1", "-2.5", "true", "[0]", "\"x\"", "nothing", "()"];
    for code in falsy {
        assert!(!ctx.truthy(ctx.eval(code).unwrap().as_host()).unwrap(), "{}", code);
    }
    for code in truthy {
        assert!(ctx.truthy(ctx.eval(code).unwrap().as_host()).unwrap(), "{}", code);
    }
}

#[test]
fn test_hash_is_host_int() {
    let (_rt, ctx) = setup();
    let x = ctx.eval("42").unwrap();
    let hashed = ctx.dispatch("__hash__", &[x.as_host().clone()]).unwrap();
    assert_eq!(hashed.as_int(), Some(i128::from(ctx.hash(x.as_host()).unwrap())));
}

#[test]
fn test_dispatch_protocol_methods() {
    let (_rt, ctx) = setup();
    let i = ctx.interp();
    let v = ctx.eval("[10, 20, 30]").unwrap();
    let v = v.as_host().clone();

    assert_eq!(ctx.dispatch("__getitem__", &[v.clone(), i.int(2)]).unwrap(), i.int(20));
    assert!(ctx
        .dispatch("__setitem__", &[v.clone(), i.int(2), i.int(5)])
        .unwrap()
        .is_none());
    assert_eq!(ctx.dispatch("__contains__", &[v.clone(), i.int(5)]).unwrap(), i.bool(true));
    assert_eq!(ctx.dispatch("__bool__", &[v.clone()]).unwrap(), i.bool(true));
    assert_eq!(ctx.dispatch("__repr__", &[v.clone()]).unwrap(), i.str("[10, 5, 30]"));

    let err = ctx.dispatch("__getattr__", &[v, i.int(1)]).unwrap_err();
    assert_eq!(err.to_host_exception().kind, HostErrorKind::TypeError);
}

#[test]
fn test_raising_convention() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let x = ctx.eval("1").unwrap();
    let result = ctx.dispatch_raising("__floordiv__", &[x.as_host().clone(), i.int(0)]);
    assert!(result.is_none());
    assert!(!rt.has_pending_error());

    let exc = i.err_fetch().unwrap();
    assert_eq!(exc.kind, HostErrorKind::BridgeError);
    assert!(exc.message.contains("DivideError"));
    assert!(!i.err_occurred());
}
