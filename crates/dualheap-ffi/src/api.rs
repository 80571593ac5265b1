//! The managed runtime's function-call surface
//!
//! [`ManagedApi`] is everything the bridge may ask of the managed side.
//! It mirrors the managed runtime's C table one-to-one in spirit: every
//! fallible entry returns a discriminated outcome and never unwinds. On
//! failure the runtime keeps an exception pending, and the only way to
//! get rid of it is [`ManagedApi::fetch_error`], which consumes it.
//!
//! Handle conventions:
//!
//! - Entries returning a `Handle` hand out a fresh handle the caller owns,
//!   except [`ManagedApi::lookup`], whose result is rooted for the life of
//!   the runtime and must never be released.
//! - Entries taking a `Handle` only borrow it.

use std::fmt;

use crate::array::{ArrayData, ComplexF64};
use crate::error::PendingError;
use crate::handle::{Handle, Symbol, TypeSlot};

/// Outcome of a managed API call
pub type ApiResult<T> = Result<T, PendingError>;

/// An exception retrieved from the managed runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedException {
    /// Exception type name (e.g., "MethodError")
    pub exception: String,
    /// Rendered message
    pub message: String,
}

impl ManagedException {
    /// Create a new exception record
    pub fn new(exception: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception, self.message)
    }
}

/// Managed runtime function table.
///
/// Single-threaded: implementations are driven from the host
/// interpreter's one logical thread and are never re-entered concurrently.
pub trait ManagedApi {
    // ---- lifetime -------------------------------------------------------

    /// Release a handle the caller owns. Must be called once per owned
    /// handle; calling it on a borrowed or rooted handle is a caller error.
    fn release(&self, value: Handle);

    /// Resolve a global binding by name. The result is rooted.
    fn lookup(&self, name: &str) -> ApiResult<Handle>;

    /// Evaluate source code in the runtime's main module.
    fn eval(&self, code: &str) -> ApiResult<Handle>;

    // ---- errors ---------------------------------------------------------

    /// Take the pending exception, clearing the runtime's error state.
    fn fetch_error(&self) -> Option<ManagedException>;

    /// Check whether an exception is pending without consuming it.
    fn has_pending_error(&self) -> bool;

    /// Toggle backtraces in fetched exception messages.
    fn enable_backtrace(&self, enabled: bool);

    // ---- calls and types ------------------------------------------------

    /// Call `func` with positional and keyword arguments.
    fn call(&self, func: Handle, args: &[Handle], kwargs: &[(Symbol, Handle)])
        -> ApiResult<Handle>;

    /// Intern a symbol.
    fn symbol(&self, name: &str) -> ApiResult<Symbol>;

    /// Slot identifier of a type value.
    fn type_slot(&self, ty: Handle) -> ApiResult<TypeSlot>;

    /// Category membership test (`value isa T` for the type in `slot`).
    fn is_instance(&self, value: Handle, slot: TypeSlot) -> bool;

    // ---- properties and indexing ----------------------------------------

    /// `value.name`
    fn get_property(&self, value: Handle, name: Symbol) -> ApiResult<Handle>;

    /// `value.name = new`
    fn set_property(&self, value: Handle, name: Symbol, new: Handle) -> ApiResult<()>;

    /// `hasproperty(value, name)`
    fn has_property(&self, value: Handle, name: Symbol) -> ApiResult<bool>;

    /// `value[index...]`
    fn get_index(&self, value: Handle, index: &[Handle]) -> ApiResult<Handle>;

    /// `value[index]` with a 1-based integer index
    fn get_index_i(&self, value: Handle, index: i64) -> ApiResult<Handle>;

    /// `value[index...] = new`
    fn set_index(&self, value: Handle, index: &[Handle], new: Handle) -> ApiResult<()>;

    // ---- scalar getters -------------------------------------------------

    /// Read a `Bool`.
    fn get_bool(&self, value: Handle) -> ApiResult<bool>;

    /// Read an integer that fits `Int64`.
    fn get_i64(&self, value: Handle) -> ApiResult<i64>;

    /// Read an integer that fits `UInt64`.
    fn get_u64(&self, value: Handle) -> ApiResult<u64>;

    /// Read a real number as `Float64`.
    fn get_f64(&self, value: Handle) -> ApiResult<f64>;

    /// Read a number as `ComplexF64`.
    fn get_complex(&self, value: Handle) -> ApiResult<ComplexF64>;

    /// Read the UTF-8 contents of a `String`.
    fn get_utf8(&self, value: Handle) -> ApiResult<String>;

    // ---- constructors ---------------------------------------------------

    /// New `Bool`.
    fn new_bool(&self, value: bool) -> ApiResult<Handle>;

    /// New `Int64`.
    fn new_i64(&self, value: i64) -> ApiResult<Handle>;

    /// New `Float64`.
    fn new_f64(&self, value: f64) -> ApiResult<Handle>;

    /// New `ComplexF64`.
    fn new_complex(&self, value: ComplexF64) -> ApiResult<Handle>;

    /// New `String` from UTF-8 text.
    fn new_string(&self, value: &str) -> ApiResult<Handle>;

    // ---- arrays ---------------------------------------------------------

    /// New `Vector{String}` of `len` empty strings.
    fn new_string_vector(&self, len: usize) -> ApiResult<Handle>;

    /// Write element `index` (1-based) of a string vector.
    fn str_vec_write(&self, vector: Handle, index: usize, value: &str) -> ApiResult<()>;

    /// Convert a host array into a native managed array.
    fn array_import(&self, data: &ArrayData) -> ApiResult<Handle>;

    /// Convert a managed array into host array data.
    fn array_export(&self, value: Handle) -> ApiResult<ArrayData>;

    /// Number of dimensions of an array.
    fn array_rank(&self, value: Handle) -> ApiResult<usize>;

    /// Size of dimension `dim` (1-based) of an array.
    fn array_size(&self, value: Handle, dim: usize) -> ApiResult<usize>;
}
