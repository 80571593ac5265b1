//! Abstract type lattice
//!
//! Only the part of the managed type hierarchy the bridge asks about is
//! modelled. Membership is structural over [`Value`] variants.

use crate::value::{ElemType, Value};

/// A managed type that can be named and tested with `isa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Any,
    Nothing,
    Number,
    Real,
    Integer,
    Signed,
    Unsigned,
    Bool,
    AbstractFloat,
    Complex,
    AbstractString,
    String,
    Symbol,
    AbstractArray,
    BitArray,
    Tuple,
    AbstractDict,
    AbstractSet,
    Function,
    DataType,
}

impl Category {
    /// Every category, in slot order
    pub const ALL: [Category; 20] = [
        Category::Any,
        Category::Nothing,
        Category::Number,
        Category::Real,
        Category::Integer,
        Category::Signed,
        Category::Unsigned,
        Category::Bool,
        Category::AbstractFloat,
        Category::Complex,
        Category::AbstractString,
        Category::String,
        Category::Symbol,
        Category::AbstractArray,
        Category::BitArray,
        Category::Tuple,
        Category::AbstractDict,
        Category::AbstractSet,
        Category::Function,
        Category::DataType,
    ];

    /// Global binding name
    pub fn name(self) -> &'static str {
        match self {
            Category::Any => "Any",
            Category::Nothing => "Nothing",
            Category::Number => "Number",
            Category::Real => "Real",
            Category::Integer => "Integer",
            Category::Signed => "Signed",
            Category::Unsigned => "Unsigned",
            Category::Bool => "Bool",
            Category::AbstractFloat => "AbstractFloat",
            Category::Complex => "Complex",
            Category::AbstractString => "AbstractString",
            Category::String => "String",
            Category::Symbol => "Symbol",
            Category::AbstractArray => "AbstractArray",
            Category::BitArray => "BitArray",
            Category::Tuple => "Tuple",
            Category::AbstractDict => "AbstractDict",
            Category::AbstractSet => "AbstractSet",
            Category::Function => "Function",
            Category::DataType => "DataType",
        }
    }

    /// Type slot handed out through `type_slot`, never zero
    pub fn slot(self) -> u64 {
        Self::ALL
            .iter()
            .position(|c| *c == self)
            .map_or(0, |i| i as u64 + 1)
    }

    /// Inverse of [`Category::slot`]
    pub fn from_slot(slot: u64) -> Option<Category> {
        let index = usize::try_from(slot).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }

    /// `value isa self`
    pub fn contains(self, value: &Value) -> bool {
        match self {
            Category::Any => true,
            Category::Nothing => matches!(value, Value::Nothing),
            Category::Number => Category::Real.contains(value) || Category::Complex.contains(value),
            Category::Real => {
                Category::Integer.contains(value)
                    || Category::AbstractFloat.contains(value)
                    || matches!(value, Value::Irrational(..))
            }
            Category::Integer => {
                Category::Bool.contains(value)
                    || Category::Signed.contains(value)
                    || Category::Unsigned.contains(value)
            }
            Category::Signed => matches!(value, Value::Int(_) | Value::BigInt(_)),
            Category::Unsigned => matches!(value, Value::UInt(_)),
            Category::Bool => matches!(value, Value::Bool(_)),
            Category::AbstractFloat => matches!(value, Value::Float(_) | Value::Float32(_)),
            Category::Complex => matches!(value, Value::Complex(_)),
            Category::AbstractString => matches!(value, Value::Str(_) | Value::SubString(_)),
            Category::String => matches!(value, Value::Str(_)),
            Category::Symbol => matches!(value, Value::Symbol(_)),
            Category::AbstractArray => matches!(value, Value::Array(_)),
            Category::BitArray => {
                matches!(value, Value::Array(array) if array.elem == ElemType::Bit)
            }
            Category::Tuple => matches!(value, Value::Tuple(_)),
            Category::AbstractDict => matches!(value, Value::Dict(_)),
            Category::AbstractSet => matches!(value, Value::Set(_)),
            Category::Function => matches!(value, Value::Function(_)),
            Category::DataType => matches!(value, Value::Type(_) | Value::StructType(_)),
        }
    }
}
