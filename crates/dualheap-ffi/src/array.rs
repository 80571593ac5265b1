//! Array payloads exchanged across the boundary
//!
//! Host n-dimensional arrays are row-major (C order); the managed runtime
//! stores arrays column-major. `ArrayData` is always row-major, and
//! [`column_major_order`] gives the permutation between the two layouts.
//!
//! ## DType
//!
//! Covers the host dtypes the bridge converts, plus the fixed-width
//! string dtype that has no native managed array counterpart and goes
//! through the string-vector path instead.

use std::fmt;

use crate::error::{FfiError, FfiResult};

/// `complex_t` as laid out by the managed C API.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexF64 {
    /// Real part
    pub re: f64,
    /// Imaginary part
    pub im: f64,
}

impl ComplexF64 {
    /// Create a complex number from its parts
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Single-precision complex element.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexF32 {
    /// Real part
    pub re: f32,
    /// Imaginary part
    pub im: f32,
}

/// Host array data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Boolean
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// 64-bit complex (2x float32)
    Complex64,
    /// 128-bit complex (2x float64)
    Complex128,
    /// Fixed-width unicode string, `width` code points per element
    Str {
        /// Maximum element length in code points
        width: usize,
    },
}

impl DType {
    /// Get the dtype name (e.g., "float64")
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
            DType::Str { .. } => "str",
        }
    }

    /// Check if this is the fixed-width string dtype
    pub fn is_string(&self) -> bool {
        matches!(self, DType::Str { .. })
    }

    /// Check if this is a numeric (or boolean) dtype
    pub fn is_numeric(&self) -> bool {
        !self.is_string()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Str { width } => write!(f, "<U{}", width),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Typed element storage, one variant per dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayBuffer {
    /// Boolean elements
    Bool(Vec<bool>),
    /// int8 elements
    Int8(Vec<i8>),
    /// int16 elements
    Int16(Vec<i16>),
    /// int32 elements
    Int32(Vec<i32>),
    /// int64 elements
    Int64(Vec<i64>),
    /// uint8 elements
    UInt8(Vec<u8>),
    /// uint16 elements
    UInt16(Vec<u16>),
    /// uint32 elements
    UInt32(Vec<u32>),
    /// uint64 elements
    UInt64(Vec<u64>),
    /// float32 elements
    Float32(Vec<f32>),
    /// float64 elements
    Float64(Vec<f64>),
    /// complex64 elements
    Complex64(Vec<ComplexF32>),
    /// complex128 elements
    Complex128(Vec<ComplexF64>),
    /// Fixed-width string elements
    Str {
        /// Declared width in code points
        width: usize,
        /// Elements, each at most `width` code points
        items: Vec<String>,
    },
}

/// Apply the same expression to the vector inside every variant.
macro_rules! map_buffer {
    ($buf:expr, $v:ident => $body:expr, |$w:ident, $items:ident| $str_body:expr) => {
        match $buf {
            ArrayBuffer::Bool($v) => ArrayBuffer::Bool($body),
            ArrayBuffer::Int8($v) => ArrayBuffer::Int8($body),
            ArrayBuffer::Int16($v) => ArrayBuffer::Int16($body),
            ArrayBuffer::Int32($v) => ArrayBuffer::Int32($body),
            ArrayBuffer::Int64($v) => ArrayBuffer::Int64($body),
            ArrayBuffer::UInt8($v) => ArrayBuffer::UInt8($body),
            ArrayBuffer::UInt16($v) => ArrayBuffer::UInt16($body),
            ArrayBuffer::UInt32($v) => ArrayBuffer::UInt32($body),
            ArrayBuffer::UInt64($v) => ArrayBuffer::UInt64($body),
            ArrayBuffer::Float32($v) => ArrayBuffer::Float32($body),
            ArrayBuffer::Float64($v) => ArrayBuffer::Float64($body),
            ArrayBuffer::Complex64($v) => ArrayBuffer::Complex64($body),
            ArrayBuffer::Complex128($v) => ArrayBuffer::Complex128($body),
            ArrayBuffer::Str {
                width: $w,
                items: $items,
            } => $str_body,
        }
    };
}

fn gather<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| items[i].clone()).collect()
}

fn scatter<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    let mut out = items.to_vec();
    for (src, &dst) in order.iter().enumerate() {
        out[dst] = items[src].clone();
    }
    out
}

impl ArrayBuffer {
    /// The dtype of the stored elements
    pub fn dtype(&self) -> DType {
        match self {
            ArrayBuffer::Bool(_) => DType::Bool,
            ArrayBuffer::Int8(_) => DType::Int8,
            ArrayBuffer::Int16(_) => DType::Int16,
            ArrayBuffer::Int32(_) => DType::Int32,
            ArrayBuffer::Int64(_) => DType::Int64,
            ArrayBuffer::UInt8(_) => DType::UInt8,
            ArrayBuffer::UInt16(_) => DType::UInt16,
            ArrayBuffer::UInt32(_) => DType::UInt32,
            ArrayBuffer::UInt64(_) => DType::UInt64,
            ArrayBuffer::Float32(_) => DType::Float32,
            ArrayBuffer::Float64(_) => DType::Float64,
            ArrayBuffer::Complex64(_) => DType::Complex64,
            ArrayBuffer::Complex128(_) => DType::Complex128,
            ArrayBuffer::Str { width, .. } => DType::Str { width: *width },
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayBuffer::Bool(v) => v.len(),
            ArrayBuffer::Int8(v) => v.len(),
            ArrayBuffer::Int16(v) => v.len(),
            ArrayBuffer::Int32(v) => v.len(),
            ArrayBuffer::Int64(v) => v.len(),
            ArrayBuffer::UInt8(v) => v.len(),
            ArrayBuffer::UInt16(v) => v.len(),
            ArrayBuffer::UInt32(v) => v.len(),
            ArrayBuffer::UInt64(v) => v.len(),
            ArrayBuffer::Float32(v) => v.len(),
            ArrayBuffer::Float64(v) => v.len(),
            ArrayBuffer::Complex64(v) => v.len(),
            ArrayBuffer::Complex128(v) => v.len(),
            ArrayBuffer::Str { items, .. } => items.len(),
        }
    }

    /// Check if there are no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `out[p] = self[order[p]]`
    pub fn gather(&self, order: &[usize]) -> ArrayBuffer {
        map_buffer!(self, v => gather(v, order), |width, items| ArrayBuffer::Str {
            width: *width,
            items: gather(items, order),
        })
    }

    /// `out[order[p]] = self[p]`, the inverse of [`ArrayBuffer::gather`]
    pub fn scatter(&self, order: &[usize]) -> ArrayBuffer {
        map_buffer!(self, v => scatter(v, order), |width, items| ArrayBuffer::Str {
            width: *width,
            items: scatter(items, order),
        })
    }
}

/// Row-major array: shape plus element storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    shape: Vec<usize>,
    buffer: ArrayBuffer,
}

impl ArrayData {
    /// Create an array, checking that the shape covers the buffer exactly
    pub fn new(shape: Vec<usize>, buffer: ArrayBuffer) -> FfiResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != buffer.len() {
            return Err(FfiError::ShapeMismatch {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self { shape, buffer })
    }

    /// One-dimensional array over the whole buffer
    pub fn vector(buffer: ArrayBuffer) -> Self {
        Self {
            shape: vec![buffer.len()],
            buffer,
        }
    }

    /// Dimensions
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if there are no elements
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Element dtype
    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    /// Row-major element storage
    pub fn buffer(&self) -> &ArrayBuffer {
        &self.buffer
    }

    /// Elements in column-major order
    pub fn to_column_major(&self) -> ArrayBuffer {
        self.buffer.gather(&column_major_order(&self.shape))
    }

    /// Build from column-major storage
    pub fn from_column_major(shape: Vec<usize>, buffer: &ArrayBuffer) -> FfiResult<Self> {
        let order = column_major_order(&shape);
        if order.len() != buffer.len() {
            return Err(FfiError::ShapeMismatch {
                expected: order.len(),
                actual: buffer.len(),
            });
        }
        Ok(Self {
            buffer: buffer.scatter(&order),
            shape,
        })
    }

    /// String elements in column-major order; `None` for non-string dtypes
    pub fn strings_column_major(&self) -> Option<Vec<&str>> {
        match &self.buffer {
            ArrayBuffer::Str { items, .. } => Some(
                column_major_order(&self.shape)
                    .into_iter()
                    .map(|i| items[i].as_str())
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Row-major offsets visited in column-major order.
///
/// Entry `p` is the row-major offset of the `p`-th element when walking
/// the array with the first index varying fastest.
pub fn column_major_order(shape: &[usize]) -> Vec<usize> {
    let len: usize = shape.iter().product();
    let mut strides = vec![1usize; shape.len()];
    for k in (0..shape.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * shape[k + 1];
    }

    let mut index = vec![0usize; shape.len()];
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(index.iter().zip(&strides).map(|(i, s)| i * s).sum());
        for k in 0..shape.len() {
            index[k] += 1;
            if index[k] < shape[k] {
                break;
            }
            index[k] = 0;
        }
    }
    out
}
