//! End-to-end conversions through the simulated runtime.

mod common;

use common::setup;
use dualheap_bridge::{BridgeError, BuiltinType, ConversionError, Payload};
use dualheap_ffi::{ArrayBuffer, ArrayData, Converted, ManagedApi};
use dualheap_sim::{ElemType, Value};
use pretty_assertions::assert_eq;

#[test]
fn test_scalar_round_trip() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let before = rt.live_count();
    for value in [i.int(5), i.float(0.25), i.bool(true), i.str("ünï"), i.complex(1.5, -2.0)] {
        let converted = ctx.unbox(&value).unwrap().into_converted();
        assert!(converted.is_owned(), "{} should be owned", value);
        let back = ctx.box_value(converted.handle()).unwrap();
        assert_eq!(back, value);
    }
    assert_eq!(rt.live_count(), before);
    assert!(rt.double_releases().is_empty());
}

#[test]
fn test_tuple_end_to_end() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let before = rt.live_count();
    let host = i.tuple(vec![i.int(1), i.str("a"), i.none()]);

    let converted = ctx.unbox(&host).unwrap().into_converted();
    let Converted::Owned(tuple) = converted else {
        panic!("tuple should be owned, got {:?}", converted);
    };
    assert_eq!(
        rt.value_of(tuple),
        Some(Value::Tuple(vec![Value::Int(1), Value::str("a"), Value::Nothing]))
    );
    // the element handles are gone, only the tuple is left
    assert_eq!(rt.live_count(), before + 1);
    assert!(rt.illegal_releases().is_empty());

    assert_eq!(ctx.box_value(tuple).unwrap(), host);
    assert_eq!(rt.live_count(), before);
}

#[test]
fn test_unsupported_element_at_every_index() {
    const N: usize = 4;
    let (rt, ctx) = setup();
    let i = ctx.interp();
    for k in 0..N {
        let items = (0..N)
            .map(|j| if j == k { i.list(vec![]) } else { i.int(j as i64) })
            .collect();
        let before_live = rt.live_count();
        let before_released = rt.release_log().len();

        let err = ctx.unbox(&i.tuple(items)).unwrap_err();
        assert_eq!(err, BridgeError::unsupported_type("list"));
        // exactly the k elements converted before the failure were released
        assert_eq!(rt.release_log().len() - before_released, k);
        assert_eq!(rt.live_count(), before_live);
    }
    assert_eq!(rt.call_count("tuple"), 0);
    assert!(rt.double_releases().is_empty());
    assert!(rt.illegal_releases().is_empty());
}

#[test]
fn test_nested_tuple_failure_unwinds_inner_tuple() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let before = rt.live_count();
    let inner = i.tuple(vec![i.int(1), i.int(2)]);
    let outer = i.tuple(vec![inner, i.dict(vec![])]);
    assert!(ctx.unbox(&outer).unwrap_err().is_conversion_error());
    // the inner tuple was built and then released
    assert_eq!(rt.call_count("tuple"), 1);
    assert_eq!(rt.live_count(), before);
}

#[test]
fn test_exact_type_dispatch() {
    let (_rt, ctx) = setup();
    let interp = ctx.interp();
    let my_str = interp.define_class("MyStr", Some(interp.builtin(BuiltinType::Str)));
    let obj = interp.instance(&my_str, Payload::Str("x".into()));
    assert!(obj.is_instance(interp.builtin(BuiltinType::Str).id()));
    assert!(matches!(
        ctx.unbox(&obj),
        Err(BridgeError::Conversion(ConversionError::UnsupportedType { ref type_name })) if type_name == "MyStr"
    ));
}

#[test]
fn test_opaque_round_trip() {
    let (rt, ctx) = setup();
    let h = rt.alloc(Value::dict(vec![(Value::Int(1), Value::Int(2))]));
    let boxed = ctx.box_value(h).unwrap();
    assert_eq!(boxed.type_name(), "ManagedValue");

    let unboxed = ctx.unbox(&boxed).unwrap();
    assert_eq!(unboxed.converted(), Converted::Borrowed(h));
    drop(unboxed);
    assert_eq!(rt.release_count(h), 0);

    drop(boxed);
    assert_eq!(rt.release_count(h), 1);
    assert!(rt.double_releases().is_empty());
}

#[test]
fn test_string_array_keeps_indexing() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let data = ArrayData::new(
        vec![2, 3],
        ArrayBuffer::Str {
            width: 1,
            items: ["a", "b", "c", "d", "e", "f"].map(String::from).to_vec(),
        },
    )
    .unwrap();
    let before = rt.live_count();
    let handle = ctx.unbox(&i.ndarray(data)).unwrap().into_converted().handle();
    // vector and dimension handles are released, the reshaped array is not
    assert_eq!(rt.live_count(), before + 1);

    let matrix = ctx.wrap(handle).unwrap();
    assert_eq!(ctx.shape(matrix.as_host()).unwrap(), vec![2, 3]);
    let key = i.tuple(vec![i.int(1), i.int(2)]);
    assert_eq!(ctx.getitem(matrix.as_host(), &key).unwrap(), i.str("b"));
    let key = i.tuple(vec![i.int(2), i.int(1)]);
    assert_eq!(ctx.getitem(matrix.as_host(), &key).unwrap(), i.str("d"));
    assert!(!rt.has_pending_error());
}

#[test]
fn test_zero_dimensional_string_array() {
    let (rt, ctx) = setup();
    let data = ArrayData::new(
        vec![],
        ArrayBuffer::Str {
            width: 3,
            items: vec!["abc".to_string()],
        },
    )
    .unwrap();
    let before = rt.live_count();
    let handle = ctx
        .unbox(&ctx.interp().ndarray(data))
        .unwrap()
        .into_converted()
        .handle();
    assert_eq!(
        rt.value_of(handle),
        Some(Value::array(ElemType::String, vec![], vec![Value::str("abc")]))
    );
    // the empty dimension tuple is released with the flat vector
    assert_eq!(rt.live_count(), before + 1);
    assert!(!rt.has_pending_error());

    let scalar = ctx.wrap(handle).unwrap();
    assert_eq!(ctx.shape(scalar.as_host()).unwrap(), Vec::<usize>::new());
}

#[test]
fn test_numeric_array_round_trip() {
    let (rt, ctx) = setup();
    let i = ctx.interp();
    let data = ArrayData::new(vec![2, 2], ArrayBuffer::Float64(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
    let handle = ctx.unbox(&i.ndarray(data.clone())).unwrap().into_converted().handle();
    let back = ctx.box_value(handle).unwrap();
    assert_eq!(back.as_array(), Some(&data));
    assert!(!rt.is_live(handle));
}
