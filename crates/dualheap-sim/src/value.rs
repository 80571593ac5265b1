//! Managed values
//!
//! Containers are reference-shared (`Rc`) the way managed heap objects are:
//! reading an element out of a dict or array and mutating it is visible
//! through every other handle to the same object. Arrays are stored
//! column-major.

use std::cell::RefCell;
use std::rc::Rc;

use dualheap_ffi::{ComplexF64, DType};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::builtins::Builtin;
use crate::category::Category;

/// Element type of a managed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    /// Plain numeric storage with a host array counterpart
    Native(DType),
    /// `String` elements
    String,
    /// Packed booleans (`BitArray`)
    Bit,
    /// Arbitrary values
    Any,
}

impl ElemType {
    /// Managed name of the element type
    pub fn name(self) -> &'static str {
        match self {
            ElemType::Native(dtype) => match dtype {
                DType::Bool => "Bool",
                DType::Int8 => "Int8",
                DType::Int16 => "Int16",
                DType::Int32 => "Int32",
                DType::Int64 => "Int64",
                DType::UInt8 => "UInt8",
                DType::UInt16 => "UInt16",
                DType::UInt32 => "UInt32",
                DType::UInt64 => "UInt64",
                DType::Float32 => "Float32",
                DType::Float64 => "Float64",
                DType::Complex64 => "ComplexF32",
                DType::Complex128 => "ComplexF64",
                DType::Str { .. } => "String",
            },
            ElemType::String => "String",
            ElemType::Bit => "Bool",
            ElemType::Any => "Any",
        }
    }

    /// Narrowest element type holding every value
    pub fn infer(values: &[Value]) -> ElemType {
        let mut elem: Option<ElemType> = None;
        for value in values {
            let this = match value {
                Value::Bool(_) => ElemType::Native(DType::Bool),
                Value::Int(_) => ElemType::Native(DType::Int64),
                Value::UInt(_) => ElemType::Native(DType::UInt64),
                Value::Float(_) => ElemType::Native(DType::Float64),
                Value::Float32(_) => ElemType::Native(DType::Float32),
                Value::Complex(_) => ElemType::Native(DType::Complex128),
                Value::Str(_) => ElemType::String,
                _ => ElemType::Any,
            };
            elem = match elem {
                None => Some(this),
                Some(prev) if prev == this => Some(prev),
                Some(_) => return ElemType::Any,
            };
        }
        elem.unwrap_or(ElemType::Any)
    }
}

/// Array object: shape plus column-major elements.
#[derive(Debug, PartialEq)]
pub struct ArrayObj {
    pub elem: ElemType,
    pub shape: Vec<usize>,
    pub data: RefCell<Vec<Value>>,
}

/// A user-defined struct type.
#[derive(Debug, PartialEq)]
pub struct StructDef {
    pub name: SmolStr,
    pub fields: Vec<SmolStr>,
    pub mutable: bool,
}

/// An instance of a [`StructDef`].
#[derive(Debug, PartialEq)]
pub struct StructObj {
    pub def: Rc<StructDef>,
    pub fields: RefCell<IndexMap<SmolStr, Value>>,
}

/// A value on the managed heap.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nothing,
    Bool(bool),
    Int(i64),
    UInt(u64),
    BigInt(i128),
    Float(f64),
    Float32(f32),
    Complex(ComplexF64),
    Irrational(SmolStr, f64),
    Str(SmolStr),
    SubString(SmolStr),
    Symbol(SmolStr),
    Tuple(Vec<Value>),
    Array(Rc<ArrayObj>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Struct(Rc<StructObj>),
    StructType(Rc<StructDef>),
    Type(Category),
    Function(Builtin),
}

impl Value {
    /// `String` value
    pub fn str(text: impl Into<SmolStr>) -> Value {
        Value::Str(text.into())
    }

    /// Array from column-major elements
    pub fn array(elem: ElemType, shape: Vec<usize>, data: Vec<Value>) -> Value {
        Value::Array(Rc::new(ArrayObj {
            elem,
            shape,
            data: RefCell::new(data),
        }))
    }

    /// `Vector{Int64}`
    pub fn int_vector(items: Vec<i64>) -> Value {
        let len = items.len();
        let data = items.into_iter().map(Value::Int).collect();
        Value::array(ElemType::Native(DType::Int64), vec![len], data)
    }

    /// `Vector{String}`
    pub fn string_vector(items: &[&str]) -> Value {
        let data = items.iter().map(|s| Value::str(*s)).collect();
        Value::array(ElemType::String, vec![items.len()], data)
    }

    /// `BitVector`
    pub fn bit_vector(items: Vec<bool>) -> Value {
        let len = items.len();
        let data = items.into_iter().map(Value::Bool).collect();
        Value::array(ElemType::Bit, vec![len], data)
    }

    /// `Dict{Any, Any}`
    pub fn dict(pairs: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    /// `Set{Any}`, deduplicated
    pub fn set(items: Vec<Value>) -> Value {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| u.equals(&item)) {
                unique.push(item);
            }
        }
        Value::Set(Rc::new(RefCell::new(unique)))
    }

    /// Managed type name
    pub fn type_name(&self) -> String {
        match self {
            Value::Nothing => "Nothing".into(),
            Value::Bool(_) => "Bool".into(),
            Value::Int(_) => "Int64".into(),
            Value::UInt(_) => "UInt64".into(),
            Value::BigInt(_) => "Int128".into(),
            Value::Float(_) => "Float64".into(),
            Value::Float32(_) => "Float32".into(),
            Value::Complex(_) => "ComplexF64".into(),
            Value::Irrational(name, _) => format!("Irrational{{:{}}}", name),
            Value::Str(_) => "String".into(),
            Value::SubString(_) => "SubString{String}".into(),
            Value::Symbol(_) => "Symbol".into(),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::type_name).collect();
                format!("Tuple{{{}}}", parts.join(", "))
            }
            Value::Array(array) => match (array.elem, array.shape.len()) {
                (ElemType::Bit, 1) => "BitVector".into(),
                (ElemType::Bit, 2) => "BitMatrix".into(),
                (ElemType::Bit, n) => format!("BitArray{{{}}}", n),
                (elem, 1) => format!("Vector{{{}}}", elem.name()),
                (elem, 2) => format!("Matrix{{{}}}", elem.name()),
                (elem, n) => format!("Array{{{}, {}}}", elem.name(), n),
            },
            Value::Dict(_) => "Dict{Any, Any}".into(),
            Value::Set(_) => "Set{Any}".into(),
            Value::Struct(obj) => obj.def.name.to_string(),
            Value::StructType(_) | Value::Type(_) => "DataType".into(),
            Value::Function(f) => format!("typeof({})", f.name()),
        }
    }

    /// Whether the value is any kind of number
    pub fn is_number(&self) -> bool {
        Category::Number.contains(self)
    }

    /// `==` semantics: numbers compare by value across types, containers
    /// compare element-wise, mutable objects also by identity.
    pub fn equals(&self, other: &Value) -> bool {
        if self.is_number() && other.is_number() {
            return crate::builtins::numbers_equal(self, other);
        }
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (
                Value::Str(a) | Value::SubString(a),
                Value::Str(b) | Value::SubString(b),
            ) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.shape == b.shape
                        && a.data
                            .borrow()
                            .iter()
                            .zip(b.data.borrow().iter())
                            .all(|(x, y)| x.equals(y)))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.equals(k2) && v.equals(v2))
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.equals(y)))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                Rc::ptr_eq(a, b)
                    || (Rc::ptr_eq(&a.def, &b.def)
                        && !a.def.mutable
                        && a.fields
                            .borrow()
                            .values()
                            .zip(b.fields.borrow().values())
                            .all(|(x, y)| x.equals(y)))
            }
            (Value::StructType(a), Value::StructType(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }

    /// Source-like rendering (`repr`)
    pub fn repr(&self) -> String {
        match self {
            Value::Nothing => "nothing".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => format!("0x{:016x}", u),
            Value::BigInt(i) => i.to_string(),
            Value::Float(f) => render_float(*f),
            Value::Float32(f) => format!("{}f0", render_float(f64::from(*f))),
            Value::Complex(c) => {
                let sign = if c.im.is_sign_negative() { '-' } else { '+' };
                format!("{} {} {}im", render_float(c.re), sign, render_float(c.im.abs()))
            }
            Value::Irrational(name, _) => name.to_string(),
            Value::Str(s) | Value::SubString(s) => format!("{:?}", s.as_str()),
            Value::Symbol(s) => format!(":{}", s),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Array(array) => render_array(array),
            Value::Dict(pairs) => {
                let parts: Vec<String> = pairs
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{} => {}", k.repr(), v.repr()))
                    .collect();
                format!("Dict({})", parts.join(", "))
            }
            Value::Set(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("Set([{}])", parts.join(", "))
            }
            Value::Struct(obj) => {
                let parts: Vec<String> = obj.fields.borrow().values().map(Value::repr).collect();
                format!("{}({})", obj.def.name, parts.join(", "))
            }
            Value::StructType(def) => def.name.to_string(),
            Value::Type(category) => category.name().into(),
            Value::Function(f) => f.name().into(),
        }
    }

    /// Plain rendering (`string`): text is unquoted, everything else is
    /// its `repr`.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) | Value::SubString(s) | Value::Symbol(s) => s.to_string(),
            other => other.repr(),
        }
    }
}

fn render_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Inf" } else { "-Inf" };
        text.into()
    } else {
        format!("{:?}", value)
    }
}

fn render_array(array: &ArrayObj) -> String {
    let data = array.data.borrow();
    let prefix = if array.elem == ElemType::Bit { "Bool" } else { "" };
    let item = |v: &Value| match (array.elem, v) {
        (ElemType::Bit, Value::Bool(b)) => u8::from(*b).to_string(),
        _ => v.repr(),
    };
    match array.shape.as_slice() {
        [_] => {
            let parts: Vec<String> = data.iter().map(item).collect();
            format!("{}[{}]", prefix, parts.join(", "))
        }
        [rows, cols] => {
            let lines: Vec<String> = (0..*rows)
                .map(|r| {
                    (0..*cols)
                        .map(|c| item(&data[c * rows + r]))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            format!("{}[{}]", prefix, lines.join("; "))
        }
        dims => {
            let parts: Vec<String> = data.iter().map(item).collect();
            let dims: Vec<String> = dims.iter().map(usize::to_string).collect();
            format!("reshape({}[{}], {})", prefix, parts.join(", "), dims.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repr_scalars() {
        assert_eq!(Value::Int(5).repr(), "5");
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::Bool(true).repr(), "true");
        assert_eq!(Value::Nothing.repr(), "nothing");
        assert_eq!(Value::str("a\"b").repr(), "\"a\\\"b\"");
        assert_eq!(Value::Complex(ComplexF64::new(1.0, -2.0)).repr(), "1.0 - 2.0im");
    }

    #[test]
    fn test_repr_containers() {
        let tuple = Value::Tuple(vec![Value::Int(1), Value::str("a"), Value::Nothing]);
        assert_eq!(tuple.repr(), "(1, \"a\", nothing)");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");

        let matrix = Value::array(
            ElemType::Native(DType::Int64),
            vec![2, 2],
            vec![Value::Int(1), Value::Int(3), Value::Int(2), Value::Int(4)],
        );
        assert_eq!(matrix.repr(), "[1 2; 3 4]");
        assert_eq!(Value::bit_vector(vec![true, false]).repr(), "Bool[1, 0]");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::string_vector(&["a"]).type_name(), "Vector{String}");
        assert_eq!(Value::bit_vector(vec![true]).type_name(), "BitVector");
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Float(2.0)]).type_name(),
            "Tuple{Int64, Float64}"
        );
    }

    #[test]
    fn test_equals_across_numeric_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(1).equals(&Value::str("1")));
        assert!(Value::str("ab").equals(&Value::SubString("ab".into())));
    }

    #[test]
    fn test_set_deduplicates() {
        let set = Value::set(vec![Value::Int(1), Value::Float(1.0), Value::Int(2)]);
        match set {
            Value::Set(items) => assert_eq!(items.borrow().len(), 2),
            other => panic!("expected set, got {:?}", other),
        }
    }

    #[test]
    fn test_infer_elem() {
        assert_eq!(
            ElemType::infer(&[Value::Int(1), Value::Int(2)]),
            ElemType::Native(DType::Int64)
        );
        assert_eq!(ElemType::infer(&[Value::Int(1), Value::str("a")]), ElemType::Any);
        assert_eq!(ElemType::infer(&[]), ElemType::Any);
    }
}
