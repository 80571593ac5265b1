//! Builtin managed functions
//!
//! Every function the bridge resolves by name lives here, with the
//! numeric tower the managed runtime uses: `Bool < Int64 < UInt64 <
//! Int128 < Float32 < Float64 < ComplexF64`. Machine integers wrap on
//! overflow; `Int128` arithmetic is checked.

use std::cell::RefCell;
use std::hash::Hasher;
use std::rc::Rc;

use dualheap_ffi::{ComplexF64, DType, ManagedException};
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use smol_str::SmolStr;

use crate::category::Category;
use crate::value::{ArrayObj, ElemType, StructDef, StructObj, Value};

/// Outcome of a builtin call
pub type CallResult = Result<Value, ManagedException>;

macro_rules! builtins {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// A builtin function, bound globally under its managed name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant),*
        }

        impl Builtin {
            /// Every builtin
            pub const ALL: &'static [Builtin] = &[$(Builtin::$variant),*];

            /// Global binding name
            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name),*
                }
            }
        }
    };
}

builtins! {
    Square => "square",
    Repr => "repr",
    Tuple => "tuple",
    Reshape => "reshape",
    String => "string",
    Length => "length",
    GetIndex => "getindex",
    SetIndex => "setindex!",
    GetProperty => "getproperty",
    SetProperty => "setproperty!",
    HasProperty => "hasproperty",
    Eq => "==",
    Ne => "!=",
    Lt => "<",
    Le => "<=",
    Gt => ">",
    Ge => ">=",
    Add => "+",
    Sub => "-",
    Mul => "*",
    Div => "/",
    IntDiv => "div",
    Rem => "%",
    Pow => "^",
    Shl => "<<",
    Shr => ">>",
    BitOr => "|",
    BitAnd => "&",
    Xor => "xor",
    Not => "~",
    Abs => "abs",
    Hash => "hash",
    IsEmpty => "isempty",
    In => "in",
    Error => "error",
}

impl Builtin {
    /// Look a builtin up by its global name
    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Call the builtin
    pub fn apply(self, args: &[Value], kwargs: &[(SmolStr, Value)]) -> CallResult {
        if !kwargs.is_empty() {
            return Err(method_error_kw(self.name(), args, kwargs));
        }
        match (self, args) {
            (Builtin::Square, [x]) => binary(Builtin::Mul, x, x),
            (Builtin::Repr, [x]) => Ok(Value::str(x.repr())),
            (Builtin::Tuple, items) => Ok(Value::Tuple(items.to_vec())),
            (Builtin::Reshape, [array, dims @ ..]) if !dims.is_empty() => reshape(array, dims),
            (Builtin::String, [x]) => Ok(Value::str(x.display())),
            (Builtin::Length, [x]) => length(x),
            (Builtin::GetIndex, [coll, index @ ..]) => getindex(coll, index),
            (Builtin::SetIndex, [coll, value, index @ ..]) => setindex(coll, value, index),
            (Builtin::GetProperty, [x, Value::Symbol(name)]) => getproperty(x, name),
            (Builtin::SetProperty, [x, Value::Symbol(name), value]) => {
                setproperty(x, name, value)
            }
            (Builtin::HasProperty, [x, Value::Symbol(name)]) => {
                Ok(Value::Bool(hasproperty(x, name)))
            }
            (Builtin::Eq, [a, b]) => Ok(Value::Bool(a.equals(b))),
            (Builtin::Ne, [a, b]) => Ok(Value::Bool(!a.equals(b))),
            (Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge, [a, b]) => compare(self, a, b),
            (Builtin::Add, [x]) => unary_plus(x),
            (Builtin::Sub, [x]) => negate(x),
            (Builtin::Not, [x]) => bit_not(x),
            (Builtin::Abs, [x]) => abs(x),
            (
                Builtin::Add
                | Builtin::Sub
                | Builtin::Mul
                | Builtin::Div
                | Builtin::IntDiv
                | Builtin::Rem
                | Builtin::Pow
                | Builtin::Shl
                | Builtin::Shr
                | Builtin::BitOr
                | Builtin::BitAnd
                | Builtin::Xor,
                [a, b],
            ) => binary(self, a, b),
            (Builtin::Hash, [x]) => Ok(Value::UInt(hash_value(x))),
            (Builtin::IsEmpty, [x]) => isempty(x),
            (Builtin::In, [item, coll]) => contains(coll, item),
            (Builtin::Error, [message]) => Err(exception("ErrorException", message.display())),
            _ => Err(method_error(self.name(), args)),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

pub(crate) fn exception(kind: &str, message: impl Into<String>) -> ManagedException {
    ManagedException::new(kind, message)
}

fn signature(args: &[Value]) -> String {
    args.iter()
        .map(|a| format!("::{}", a.type_name()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn method_error(name: &str, args: &[Value]) -> ManagedException {
    exception(
        "MethodError",
        format!("no method matching {}({})", name, signature(args)),
    )
}

fn method_error_kw(name: &str, args: &[Value], kwargs: &[(SmolStr, Value)]) -> ManagedException {
    let kw: Vec<String> = kwargs
        .iter()
        .map(|(k, v)| format!("{}::{}", k, v.type_name()))
        .collect();
    exception(
        "MethodError",
        format!("no method matching {}({}; {})", name, signature(args), kw.join(", ")),
    )
}

fn bounds_error(coll: &Value, index: &[Value]) -> ManagedException {
    let index: Vec<String> = index.iter().map(Value::repr).collect();
    exception(
        "BoundsError",
        format!("attempt to access {} at index [{}]", coll.type_name(), index.join(", ")),
    )
}

fn no_field(value: &Value, name: &str) -> ManagedException {
    exception(
        "ErrorException",
        format!("type {} has no field {}", value.type_name(), name),
    )
}

// ============================================================================
// Numeric tower
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Bool,
    Int,
    UInt,
    BigInt,
    Float32,
    Float,
    Complex,
}

fn rank(value: &Value) -> Option<Rank> {
    match value {
        Value::Bool(_) => Some(Rank::Bool),
        Value::Int(_) => Some(Rank::Int),
        Value::UInt(_) => Some(Rank::UInt),
        Value::BigInt(_) => Some(Rank::BigInt),
        Value::Float32(_) => Some(Rank::Float32),
        Value::Float(_) | Value::Irrational(..) => Some(Rank::Float),
        Value::Complex(_) => Some(Rank::Complex),
        _ => None,
    }
}

pub(crate) fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::Bool(b) => Some(i128::from(*b)),
        Value::Int(i) => Some(i128::from(*i)),
        Value::UInt(u) => Some(i128::from(*u)),
        Value::BigInt(i) => Some(*i),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) | Value::Irrational(_, f) => Some(*f),
        Value::Float32(f) => Some(f64::from(*f)),
        other => as_i128(other).map(|i| i as f64),
    }
}

pub(crate) fn as_complex(value: &Value) -> Option<ComplexF64> {
    match value {
        Value::Complex(c) => Some(*c),
        other => as_f64(other).map(|re| ComplexF64::new(re, 0.0)),
    }
}

pub(crate) fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (rank(a), rank(b)) {
        (Some(ra), Some(rb)) if ra.max(rb) <= Rank::BigInt => as_i128(a) == as_i128(b),
        (Some(ra), Some(rb)) if ra.max(rb) < Rank::Complex => as_f64(a) == as_f64(b),
        (Some(_), Some(_)) => as_complex(a) == as_complex(b),
        _ => false,
    }
}

fn int_value(rank: Rank, value: i128) -> Value {
    match rank {
        Rank::Bool | Rank::Int => Value::Int(value as i64),
        Rank::UInt => Value::UInt(value as u64),
        _ => Value::BigInt(value),
    }
}

fn float_value(rank: Rank, value: f64) -> Value {
    if rank == Rank::Float32 {
        Value::Float32(value as f32)
    } else {
        Value::Float(value)
    }
}

fn overflow(op: Builtin) -> ManagedException {
    exception("OverflowError", format!("Int128 overflow in {}", op.name()))
}

fn int_pow(base: i128, mut exp: i128, checked: bool) -> Option<i128> {
    let mut result: i128 = 1;
    let mut base = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result = if checked {
                result.checked_mul(base)?
            } else {
                result.wrapping_mul(base)
            };
        }
        exp >>= 1;
        if exp > 0 {
            base = if checked {
                base.checked_mul(base)?
            } else {
                base.wrapping_mul(base)
            };
        }
    }
    Some(result)
}

fn shift(op: Builtin, rank: Rank, value: i128, by: i128) -> Value {
    let (op, by) = if by < 0 {
        let flipped = if op == Builtin::Shl {
            Builtin::Shr
        } else {
            Builtin::Shl
        };
        (flipped, by.unsigned_abs())
    } else {
        (op, by as u128)
    };
    match rank {
        Rank::Bool | Rank::Int => {
            let v = value as i64;
            let out = match (op, by >= 64) {
                (Builtin::Shl, true) => 0,
                (Builtin::Shl, false) => v << by,
                (_, true) => {
                    if v < 0 {
                        -1
                    } else {
                        0
                    }
                }
                (_, false) => v >> by,
            };
            Value::Int(out)
        }
        Rank::UInt => {
            let v = value as u64;
            let out = match (op, by >= 64) {
                (_, true) => 0,
                (Builtin::Shl, false) => v << by,
                (_, false) => v >> by,
            };
            Value::UInt(out)
        }
        _ => {
            let out = match (op, by >= 128) {
                (Builtin::Shl, true) => 0,
                (Builtin::Shl, false) => value << by,
                (_, true) => {
                    if value < 0 {
                        -1
                    } else {
                        0
                    }
                }
                (_, false) => value >> by,
            };
            Value::BigInt(out)
        }
    }
}

fn integer_op(op: Builtin, rank: Rank, a: i128, b: i128) -> CallResult {
    let checked = rank == Rank::BigInt;
    let wrap = |r: Option<i128>, w: i128| -> CallResult {
        if checked {
            r.map(|v| int_value(rank, v)).ok_or_else(|| overflow(op))
        } else {
            Ok(int_value(rank, w))
        }
    };
    match op {
        Builtin::Add => wrap(a.checked_add(b), a.wrapping_add(b)),
        Builtin::Sub => wrap(a.checked_sub(b), a.wrapping_sub(b)),
        Builtin::Mul => wrap(a.checked_mul(b), a.wrapping_mul(b)),
        Builtin::Div => Ok(Value::Float(a as f64 / b as f64)),
        Builtin::IntDiv | Builtin::Rem => {
            if b == 0 {
                return Err(exception("DivideError", "integer division error"));
            }
            let out = if op == Builtin::IntDiv {
                a.wrapping_div(b)
            } else {
                a.wrapping_rem(b)
            };
            Ok(int_value(rank, out))
        }
        Builtin::Pow => {
            if b < 0 {
                return Err(exception(
                    "DomainError",
                    format!("Cannot raise an integer x to a negative power {}.", b),
                ));
            }
            match int_pow(a, b, checked) {
                Some(v) => Ok(int_value(rank, v)),
                None => Err(overflow(op)),
            }
        }
        Builtin::Shl | Builtin::Shr => Ok(shift(op, rank, a, b)),
        Builtin::BitOr | Builtin::BitAnd | Builtin::Xor => {
            let out = match op {
                Builtin::BitOr => a | b,
                Builtin::BitAnd => a & b,
                _ => a ^ b,
            };
            if rank == Rank::Bool {
                Ok(Value::Bool(out != 0))
            } else {
                Ok(int_value(rank, out))
            }
        }
        _ => Err(method_error(op.name(), &[int_value(rank, a), int_value(rank, b)])),
    }
}

fn complex_mul(a: ComplexF64, b: ComplexF64) -> ComplexF64 {
    ComplexF64::new(a.re * b.re - a.im * b.im, a.re * b.im + a.im * b.re)
}

fn complex_div(a: ComplexF64, b: ComplexF64) -> ComplexF64 {
    let d = b.re * b.re + b.im * b.im;
    ComplexF64::new(
        (a.re * b.re + a.im * b.im) / d,
        (a.im * b.re - a.re * b.im) / d,
    )
}

fn complex_pow(a: ComplexF64, b: ComplexF64) -> ComplexF64 {
    if b.im == 0.0 && b.re.fract() == 0.0 && b.re.abs() <= 64.0 {
        let mut out = ComplexF64::new(1.0, 0.0);
        for _ in 0..(b.re.abs() as u32) {
            out = complex_mul(out, a);
        }
        return if b.re < 0.0 {
            complex_div(ComplexF64::new(1.0, 0.0), out)
        } else {
            out
        };
    }
    let ln = ComplexF64::new(a.re.hypot(a.im).ln(), a.im.atan2(a.re));
    let w = complex_mul(b, ln);
    let scale = w.re.exp();
    ComplexF64::new(scale * w.im.cos(), scale * w.im.sin())
}

fn scalar(op: Builtin, a: &Value, b: &Value) -> CallResult {
    let (Some(ra), Some(rb)) = (rank(a), rank(b)) else {
        return Err(method_error(op.name(), &[a.clone(), b.clone()]));
    };
    let r = ra.max(rb);
    if r <= Rank::BigInt {
        let (x, y) = (as_i128(a).unwrap_or(0), as_i128(b).unwrap_or(0));
        return integer_op(op, r, x, y);
    }
    if r < Rank::Complex {
        let (x, y) = (as_f64(a).unwrap_or(0.0), as_f64(b).unwrap_or(0.0));
        let out = match op {
            Builtin::Add => x + y,
            Builtin::Sub => x - y,
            Builtin::Mul => x * y,
            Builtin::Div => x / y,
            Builtin::IntDiv => (x / y).trunc(),
            Builtin::Rem => x % y,
            Builtin::Pow => x.powf(y),
            _ => return Err(method_error(op.name(), &[a.clone(), b.clone()])),
        };
        return Ok(float_value(r, out));
    }
    let zero = ComplexF64::default();
    let (x, y) = (as_complex(a).unwrap_or(zero), as_complex(b).unwrap_or(zero));
    let out = match op {
        Builtin::Add => ComplexF64::new(x.re + y.re, x.im + y.im),
        Builtin::Sub => ComplexF64::new(x.re - y.re, x.im - y.im),
        Builtin::Mul => complex_mul(x, y),
        Builtin::Div => complex_div(x, y),
        Builtin::Pow => complex_pow(x, y),
        _ => return Err(method_error(op.name(), &[a.clone(), b.clone()])),
    };
    Ok(Value::Complex(out))
}

// ============================================================================
// Arrays
// ============================================================================

fn new_array(shape: Vec<usize>, data: Vec<Value>, fallback: ElemType) -> Value {
    let elem = if data.is_empty() {
        fallback
    } else {
        ElemType::infer(&data)
    };
    Value::array(elem, shape, data)
}

fn elementwise(
    array: &ArrayObj,
    mut f: impl FnMut(&Value) -> CallResult,
) -> CallResult {
    let data = array
        .data
        .borrow()
        .iter()
        .map(&mut f)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(new_array(array.shape.clone(), data, array.elem))
}

fn dimension_mismatch(message: String) -> ManagedException {
    exception("DimensionMismatch", message)
}

fn matmul(a: &ArrayObj, b: &ArrayObj) -> CallResult {
    let (m, k) = match a.shape.as_slice() {
        [m, k] => (*m, *k),
        _ => return Err(dimension_mismatch("left operand must be a matrix".into())),
    };
    let (k2, n, vector) = match b.shape.as_slice() {
        [k2] => (*k2, 1, true),
        [k2, n] => (*k2, *n, false),
        _ => return Err(dimension_mismatch("right operand must be a vector or matrix".into())),
    };
    if k != k2 {
        return Err(dimension_mismatch(format!(
            "matrix A has dimensions ({},{}), matrix B has dimensions ({},{})",
            m, k, k2, n
        )));
    }
    let (x, y) = (a.data.borrow(), b.data.borrow());
    let mut out = Vec::with_capacity(m * n);
    for j in 0..n {
        for i in 0..m {
            let mut acc = Value::Int(0);
            for l in 0..k {
                let product = scalar(Builtin::Mul, &x[l * m + i], &y[j * k + l])?;
                acc = scalar(Builtin::Add, &acc, &product)?;
            }
            out.push(acc);
        }
    }
    let shape = if vector { vec![m] } else { vec![m, n] };
    Ok(new_array(shape, out, ElemType::Native(DType::Int64)))
}

fn binary(op: Builtin, a: &Value, b: &Value) -> CallResult {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => match op {
            Builtin::Add | Builtin::Sub => {
                if x.shape != y.shape {
                    return Err(dimension_mismatch(format!(
                        "dimensions must match: a has dims {:?}, b has dims {:?}",
                        x.shape, y.shape
                    )));
                }
                let data = x
                    .data
                    .borrow()
                    .iter()
                    .zip(y.data.borrow().iter())
                    .map(|(p, q)| scalar(op, p, q))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(new_array(x.shape.clone(), data, x.elem))
            }
            Builtin::Mul => matmul(x, y),
            _ => Err(method_error(op.name(), &[a.clone(), b.clone()])),
        },
        (Value::Array(x), s) if s.is_number() && matches!(op, Builtin::Mul | Builtin::Div) => {
            elementwise(x, |e| scalar(op, e, s))
        }
        (s, Value::Array(y)) if s.is_number() && op == Builtin::Mul => {
            elementwise(y, |e| scalar(op, s, e))
        }
        (
            Value::Str(x) | Value::SubString(x),
            Value::Str(y) | Value::SubString(y),
        ) if op == Builtin::Mul => Ok(Value::str(format!("{}{}", x, y))),
        _ => scalar(op, a, b),
    }
}

fn compare(op: Builtin, a: &Value, b: &Value) -> CallResult {
    let ordering = match (a, b) {
        (
            Value::Str(x) | Value::SubString(x),
            Value::Str(y) | Value::SubString(y),
        ) => x.as_str().partial_cmp(y.as_str()),
        _ => match (rank(a), rank(b)) {
            (Some(ra), Some(rb)) if ra.max(rb) <= Rank::BigInt => {
                as_i128(a).partial_cmp(&as_i128(b))
            }
            (Some(ra), Some(rb)) if ra.max(rb) < Rank::Complex => {
                as_f64(a).partial_cmp(&as_f64(b))
            }
            _ => return Err(method_error("isless", &[a.clone(), b.clone()])),
        },
    };
    let Some(ordering) = ordering else {
        // NaN compares false every way
        return Ok(Value::Bool(false));
    };
    let out = match op {
        Builtin::Lt => ordering.is_lt(),
        Builtin::Le => ordering.is_le(),
        Builtin::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(out))
}

// ============================================================================
// Unary operators
// ============================================================================

fn unary_plus(x: &Value) -> CallResult {
    match x {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Array(_) => Ok(x.clone()),
        v if v.is_number() => Ok(v.clone()),
        _ => Err(method_error("+", &[x.clone()])),
    }
}

fn negate(x: &Value) -> CallResult {
    match x {
        Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::UInt(u) => Ok(Value::UInt(u.wrapping_neg())),
        Value::BigInt(i) => i
            .checked_neg()
            .map(Value::BigInt)
            .ok_or_else(|| overflow(Builtin::Sub)),
        Value::Float(f) | Value::Irrational(_, f) => Ok(Value::Float(-f)),
        Value::Float32(f) => Ok(Value::Float32(-f)),
        Value::Complex(c) => Ok(Value::Complex(ComplexF64::new(-c.re, -c.im))),
        Value::Array(array) => elementwise(array, negate),
        _ => Err(method_error("-", &[x.clone()])),
    }
}

fn bit_not(x: &Value) -> CallResult {
    match x {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        Value::Int(i) => Ok(Value::Int(!i)),
        Value::UInt(u) => Ok(Value::UInt(!u)),
        Value::BigInt(i) => Ok(Value::BigInt(!i)),
        _ => Err(method_error("~", &[x.clone()])),
    }
}

fn abs(x: &Value) -> CallResult {
    match x {
        Value::Bool(_) | Value::UInt(_) => Ok(x.clone()),
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::BigInt(i) => i
            .checked_abs()
            .map(Value::BigInt)
            .ok_or_else(|| overflow(Builtin::Abs)),
        Value::Float(f) | Value::Irrational(_, f) => Ok(Value::Float(f.abs())),
        Value::Float32(f) => Ok(Value::Float32(f.abs())),
        Value::Complex(c) => Ok(Value::Float(c.re.hypot(c.im))),
        _ => Err(method_error("abs", &[x.clone()])),
    }
}

// ============================================================================
// Collections
// ============================================================================

fn length(x: &Value) -> CallResult {
    let len = match x {
        Value::Str(s) | Value::SubString(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::Array(array) => array.data.borrow().len(),
        Value::Dict(pairs) => pairs.borrow().len(),
        Value::Set(items) => items.borrow().len(),
        v if v.is_number() => 1,
        _ => return Err(method_error("length", &[x.clone()])),
    };
    Ok(Value::Int(len as i64))
}

fn isempty(x: &Value) -> CallResult {
    match x {
        Value::Str(_)
        | Value::SubString(_)
        | Value::Tuple(_)
        | Value::Array(_)
        | Value::Dict(_)
        | Value::Set(_) => {
            let len = length(x)?;
            Ok(Value::Bool(len.equals(&Value::Int(0))))
        }
        _ => Err(method_error("isempty", &[x.clone()])),
    }
}

fn contains(coll: &Value, item: &Value) -> CallResult {
    let found = match coll {
        Value::Array(array) => array.data.borrow().iter().any(|v| v.equals(item)),
        Value::Tuple(items) => items.iter().any(|v| v.equals(item)),
        Value::Set(items) => items.borrow().iter().any(|v| v.equals(item)),
        Value::Dict(pairs) => pairs.borrow().iter().any(|(k, _)| k.equals(item)),
        Value::Str(haystack) | Value::SubString(haystack) => match item {
            Value::Str(needle) | Value::SubString(needle) => {
                haystack.contains(needle.as_str())
            }
            _ => return Err(method_error("in", &[item.clone(), coll.clone()])),
        },
        _ => return Err(method_error("in", &[item.clone(), coll.clone()])),
    };
    Ok(Value::Bool(found))
}

fn to_index(value: &Value) -> Result<i128, ManagedException> {
    match value {
        Value::Int(_) | Value::UInt(_) | Value::BigInt(_) => Ok(as_i128(value).unwrap_or(0)),
        other => Err(exception(
            "ArgumentError",
            format!("invalid index: {} of type {}", other.repr(), other.type_name()),
        )),
    }
}

fn checked_offset(index: i128, len: usize) -> Option<usize> {
    if index >= 1 && index <= len as i128 {
        Some(index as usize - 1)
    } else {
        None
    }
}

fn array_offset(coll: &Value, array: &ArrayObj, index: &[Value]) -> Result<usize, ManagedException> {
    let len = array.data.borrow().len();
    let out_of_bounds = || bounds_error(coll, index);
    match index {
        [] if len == 1 => Ok(0),
        [i] => checked_offset(to_index(i)?, len).ok_or_else(out_of_bounds),
        many if many.len() == array.shape.len() => {
            let mut offset = 0usize;
            let mut stride = 1usize;
            for (i, &dim) in many.iter().zip(&array.shape) {
                let k = checked_offset(to_index(i)?, dim).ok_or_else(out_of_bounds)?;
                offset += k * stride;
                stride *= dim;
            }
            Ok(offset)
        }
        _ => Err(out_of_bounds()),
    }
}

fn dict_key(index: &[Value]) -> Result<Value, ManagedException> {
    match index {
        [] => Err(method_error("getindex", &[])),
        [key] => Ok(key.clone()),
        many => Ok(Value::Tuple(many.to_vec())),
    }
}

fn getindex(coll: &Value, index: &[Value]) -> CallResult {
    match coll {
        Value::Array(array) => {
            let offset = array_offset(coll, array, index)?;
            Ok(array.data.borrow()[offset].clone())
        }
        Value::Tuple(items) => match index {
            [i] => checked_offset(to_index(i)?, items.len())
                .map(|k| items[k].clone())
                .ok_or_else(|| bounds_error(coll, index)),
            _ => Err(bounds_error(coll, index)),
        },
        Value::Dict(pairs) => {
            let key = dict_key(index)?;
            pairs
                .borrow()
                .iter()
                .find(|(k, _)| k.equals(&key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| exception("KeyError", format!("key {} not found", key.repr())))
        }
        Value::Str(s) | Value::SubString(s) => match index {
            [i] => {
                let i = to_index(i)?;
                checked_offset(i, s.chars().count())
                    .and_then(|k| s.chars().nth(k))
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| bounds_error(coll, index))
            }
            _ => Err(bounds_error(coll, index)),
        },
        _ => {
            let mut args = vec![coll.clone()];
            args.extend_from_slice(index);
            Err(method_error("getindex", &args))
        }
    }
}

fn inexact(target: &str, value: &Value) -> ManagedException {
    exception("InexactError", format!("{}({})", target, value.repr()))
}

/// Convert `value` for storage in an array of `elem`.
pub(crate) fn coerce_elem(elem: ElemType, value: &Value) -> CallResult {
    let convert_error = || method_error("convert", &[Value::Type(Category::Any), value.clone()]);
    match elem {
        ElemType::Any => Ok(value.clone()),
        ElemType::String => match value {
            Value::Str(s) | Value::SubString(s) => Ok(Value::Str(s.clone())),
            _ => Err(convert_error()),
        },
        ElemType::Bit | ElemType::Native(DType::Bool) => match as_f64(value) {
            Some(x) if x == 0.0 => Ok(Value::Bool(false)),
            Some(x) if x == 1.0 => Ok(Value::Bool(true)),
            Some(_) => Err(inexact("Bool", value)),
            None => Err(convert_error()),
        },
        ElemType::Native(
            dtype @ (DType::Int8
            | DType::Int16
            | DType::Int32
            | DType::Int64
            | DType::UInt8
            | DType::UInt16
            | DType::UInt32
            | DType::UInt64),
        ) => {
            let integral = match as_i128(value) {
                Some(i) => i,
                None => match as_f64(value) {
                    Some(x) if x.fract() == 0.0 => x as i128,
                    Some(_) => return Err(inexact(elem.name(), value)),
                    None => return Err(convert_error()),
                },
            };
            if dtype == DType::UInt64 {
                u64::try_from(integral)
                    .map(Value::UInt)
                    .map_err(|_| inexact(elem.name(), value))
            } else {
                i64::try_from(integral)
                    .map(Value::Int)
                    .map_err(|_| inexact(elem.name(), value))
            }
        }
        ElemType::Native(DType::Float32) => as_f64(value)
            .map(|x| Value::Float32(x as f32))
            .ok_or_else(convert_error),
        ElemType::Native(DType::Float64) => {
            as_f64(value).map(Value::Float).ok_or_else(convert_error)
        }
        ElemType::Native(_) => as_complex(value)
            .map(Value::Complex)
            .ok_or_else(convert_error),
    }
}

fn setindex(coll: &Value, value: &Value, index: &[Value]) -> CallResult {
    match coll {
        Value::Array(array) => {
            let offset = array_offset(coll, array, index)?;
            let stored = coerce_elem(array.elem, value)?;
            array.data.borrow_mut()[offset] = stored;
            Ok(coll.clone())
        }
        Value::Dict(pairs) => {
            let key = dict_key(index)?;
            let mut pairs = pairs.borrow_mut();
            match pairs.iter_mut().find(|(k, _)| k.equals(&key)) {
                Some(slot) => slot.1 = value.clone(),
                None => pairs.push((key, value.clone())),
            }
            Ok(coll.clone())
        }
        _ => {
            let mut args = vec![coll.clone(), value.clone()];
            args.extend_from_slice(index);
            Err(method_error("setindex!", &args))
        }
    }
}

fn reshape(array: &Value, dims: &[Value]) -> CallResult {
    let Value::Array(source) = array else {
        let mut args = vec![array.clone()];
        args.extend_from_slice(dims);
        return Err(method_error("reshape", &args));
    };
    let dims: &[Value] = match dims {
        [Value::Tuple(items)] => items,
        other => other,
    };
    let mut shape = Vec::with_capacity(dims.len());
    for dim in dims {
        let n = to_index(dim)?;
        let n = usize::try_from(n).map_err(|_| {
            exception("ArgumentError", format!("invalid dimension {}", n))
        })?;
        shape.push(n);
    }
    let len = source.data.borrow().len();
    let product: usize = shape.iter().product();
    if product != len {
        let rendered: Vec<String> = shape.iter().map(usize::to_string).collect();
        return Err(dimension_mismatch(format!(
            "new dimensions ({}) must be consistent with array size {}",
            rendered.join(", "),
            len
        )));
    }
    Ok(Value::array(source.elem, shape, source.data.borrow().clone()))
}

// ============================================================================
// Properties
// ============================================================================

fn getproperty(x: &Value, name: &str) -> CallResult {
    match x {
        Value::Struct(obj) => obj
            .fields
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| no_field(x, name)),
        Value::Complex(c) => match name {
            "re" => Ok(Value::Float(c.re)),
            "im" => Ok(Value::Float(c.im)),
            _ => Err(no_field(x, name)),
        },
        _ => Err(no_field(x, name)),
    }
}

fn setproperty(x: &Value, name: &str, value: &Value) -> CallResult {
    match x {
        Value::Struct(obj) if obj.def.mutable => {
            let mut fields = obj.fields.borrow_mut();
            match fields.get_mut(name) {
                Some(slot) => {
                    *slot = value.clone();
                    Ok(value.clone())
                }
                None => Err(no_field(x, name)),
            }
        }
        _ => Err(exception(
            "ErrorException",
            format!(
                "setfield!: immutable struct of type {} cannot be changed",
                x.type_name()
            ),
        )),
    }
}

fn hasproperty(x: &Value, name: &str) -> bool {
    match x {
        Value::Struct(obj) => obj.fields.borrow().contains_key(name),
        Value::Complex(_) => matches!(name, "re" | "im"),
        _ => false,
    }
}

/// Construct an instance of a struct type from positional or keyword
/// arguments.
pub fn construct(def: &Rc<StructDef>, args: &[Value], kwargs: &[(SmolStr, Value)]) -> CallResult {
    let mut fields = IndexMap::with_capacity(def.fields.len());
    if kwargs.is_empty() && args.len() == def.fields.len() {
        for (name, value) in def.fields.iter().zip(args) {
            fields.insert(name.clone(), value.clone());
        }
    } else if args.is_empty() && kwargs.len() == def.fields.len() {
        for name in &def.fields {
            let Some((_, value)) = kwargs.iter().find(|(k, _)| k == name) else {
                return Err(method_error_kw(&def.name, args, kwargs));
            };
            fields.insert(name.clone(), value.clone());
        }
    } else {
        return Err(method_error_kw(&def.name, args, kwargs));
    }
    Ok(Value::Struct(Rc::new(StructObj {
        def: Rc::clone(def),
        fields: RefCell::new(fields),
    })))
}

// ============================================================================
// Hashing
// ============================================================================

fn hash_key(value: &Value) -> String {
    if let Some(i) = as_i128(value) {
        return format!("i{}", i);
    }
    let real = match value {
        Value::Complex(c) if c.im == 0.0 => Some(c.re),
        Value::Complex(_) => None,
        other => as_f64(other),
    };
    match real {
        Some(x) if x.fract() == 0.0 && x.abs() < 1e38 => format!("i{}", x as i128),
        Some(x) => format!("f{}", x.to_bits()),
        None => value.repr(),
    }
}

/// Hash consistent with `==` for numbers
pub(crate) fn hash_value(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(hash_key(value).as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(f: Builtin, args: &[Value]) -> Value {
        f.apply(args, &[]).unwrap()
    }

    #[test]
    fn test_names_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(*b));
        }
        assert_eq!(Builtin::from_name("setindex!"), Some(Builtin::SetIndex));
        assert_eq!(Builtin::from_name("nope"), None);
    }

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(call(Builtin::Add, &[Value::Int(2), Value::Int(3)]), Value::Int(5));
        assert_eq!(
            call(Builtin::Add, &[Value::Int(i64::MAX), Value::Int(1)]),
            Value::Int(i64::MIN)
        );
        assert_eq!(call(Builtin::Div, &[Value::Int(1), Value::Int(2)]), Value::Float(0.5));
        assert_eq!(call(Builtin::IntDiv, &[Value::Int(7), Value::Int(2)]), Value::Int(3));
        assert_eq!(call(Builtin::Rem, &[Value::Int(-7), Value::Int(2)]), Value::Int(-1));
        assert_eq!(call(Builtin::Pow, &[Value::Int(2), Value::Int(10)]), Value::Int(1024));
        assert_eq!(call(Builtin::Shl, &[Value::Int(1), Value::Int(64)]), Value::Int(0));
        assert_eq!(call(Builtin::Shr, &[Value::Int(-8), Value::Int(1)]), Value::Int(-4));
    }

    #[test]
    fn test_bool_promotion() {
        assert_eq!(call(Builtin::Add, &[Value::Bool(true), Value::Bool(true)]), Value::Int(2));
        assert_eq!(
            call(Builtin::BitAnd, &[Value::Bool(true), Value::Bool(false)]),
            Value::Bool(false)
        );
        assert_eq!(call(Builtin::Mul, &[Value::Int(2), Value::Float(1.5)]), Value::Float(3.0));
    }

    #[test]
    fn test_division_by_zero() {
        let err = Builtin::IntDiv.apply(&[Value::Int(1), Value::Int(0)], &[]).unwrap_err();
        assert_eq!(err.exception, "DivideError");
    }

    #[test]
    fn test_complex_arithmetic() {
        let i = Value::Complex(ComplexF64::new(0.0, 1.0));
        assert_eq!(
            call(Builtin::Mul, &[i.clone(), i.clone()]),
            Value::Complex(ComplexF64::new(-1.0, 0.0))
        );
        assert_eq!(call(Builtin::Abs, &[Value::Complex(ComplexF64::new(3.0, 4.0))]), Value::Float(5.0));
        let err = Builtin::Lt.apply(&[i.clone(), i], &[]).unwrap_err();
        assert_eq!(err.exception, "MethodError");
    }

    #[test]
    fn test_matmul() {
        // [1 2; 3 4] stored column-major
        let a = Value::array(
            ElemType::Native(DType::Int64),
            vec![2, 2],
            vec![Value::Int(1), Value::Int(3), Value::Int(2), Value::Int(4)],
        );
        let v = Value::int_vector(vec![1, 1]);
        assert_eq!(call(Builtin::Mul, &[a, v]), Value::int_vector(vec![3, 7]));
    }

    #[test]
    fn test_dict_tuple_keys() {
        let d = Value::dict(vec![]);
        call(Builtin::SetIndex, &[d.clone(), Value::Int(3), Value::Int(1), Value::Int(2)]);
        let key = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call(Builtin::GetIndex, &[d.clone(), key]), Value::Int(3));
        assert_eq!(call(Builtin::GetIndex, &[d.clone(), Value::Int(1), Value::Int(2)]), Value::Int(3));
        let err = Builtin::GetIndex.apply(&[d, Value::Int(9)], &[]).unwrap_err();
        assert_eq!(err.exception, "KeyError");
    }

    #[test]
    fn test_array_indexing_column_major() {
        let m = Value::array(
            ElemType::Native(DType::Int64),
            vec![2, 2],
            vec![Value::Int(1), Value::Int(3), Value::Int(2), Value::Int(4)],
        );
        assert_eq!(call(Builtin::GetIndex, &[m.clone(), Value::Int(1), Value::Int(2)]), Value::Int(2));
        assert_eq!(call(Builtin::GetIndex, &[m.clone(), Value::Int(2)]), Value::Int(3));
        let err = Builtin::GetIndex.apply(&[m, Value::Int(5)], &[]).unwrap_err();
        assert_eq!(err.exception, "BoundsError");
    }

    #[test]
    fn test_setindex_converts_element() {
        let v = Value::int_vector(vec![1, 2]);
        call(Builtin::SetIndex, &[v.clone(), Value::Float(5.0), Value::Int(1)]);
        assert_eq!(v, Value::int_vector(vec![5, 2]));
        let err = Builtin::SetIndex
            .apply(&[v, Value::Float(1.5), Value::Int(1)], &[])
            .unwrap_err();
        assert_eq!(err.exception, "InexactError");
    }

    #[test]
    fn test_reshape_checks_size() {
        let v = Value::int_vector(vec![1, 2, 3, 4]);
        let m = call(Builtin::Reshape, &[v.clone(), Value::Int(2), Value::Int(2)]);
        assert_eq!(m.type_name(), "Matrix{Int64}");
        let err = Builtin::Reshape.apply(&[v, Value::Int(3)], &[]).unwrap_err();
        assert_eq!(err.exception, "DimensionMismatch");
    }

    #[test]
    fn test_isempty_and_in() {
        assert_eq!(call(Builtin::IsEmpty, &[Value::str("")]), Value::Bool(true));
        assert_eq!(call(Builtin::IsEmpty, &[Value::int_vector(vec![1])]), Value::Bool(false));
        assert!(Builtin::IsEmpty.apply(&[Value::Int(0)], &[]).is_err());
        assert_eq!(
            call(Builtin::In, &[Value::Int(2), Value::int_vector(vec![1, 2])]),
            Value::Bool(true)
        );
        assert_eq!(call(Builtin::In, &[Value::str("b"), Value::str("abc")]), Value::Bool(true));
    }

    #[test]
    fn test_hash_consistent_with_equality() {
        assert_eq!(hash_value(&Value::Int(1)), hash_value(&Value::Float(1.0)));
        assert_ne!(hash_value(&Value::Int(1)), hash_value(&Value::Int(2)));
    }

    #[test]
    fn test_struct_construction_and_properties() {
        let def = Rc::new(StructDef {
            name: "Point".into(),
            fields: vec!["x".into(), "y".into()],
            mutable: true,
        });
        let p = construct(
            &def,
            &[],
            &[("y".into(), Value::Int(2)), ("x".into(), Value::Int(1))],
        )
        .unwrap();
        assert_eq!(p.repr(), "Point(1, 2)");
        call(Builtin::SetProperty, &[p.clone(), Value::Symbol("x".into()), Value::Int(9)]);
        assert_eq!(call(Builtin::GetProperty, &[p.clone(), Value::Symbol("x".into())]), Value::Int(9));
        assert_eq!(call(Builtin::HasProperty, &[p, Value::Symbol("z".into())]), Value::Bool(false));
    }

    #[test]
    fn test_immutable_struct_rejects_setproperty() {
        let def = Rc::new(StructDef {
            name: "Frozen".into(),
            fields: vec!["a".into()],
            mutable: false,
        });
        let f = construct(&def, &[Value::Int(1)], &[]).unwrap();
        let err = Builtin::SetProperty
            .apply(&[f, Value::Symbol("a".into()), Value::Int(2)], &[])
            .unwrap_err();
        assert!(err.message.contains("immutable struct of type Frozen"));
    }
}
