//! # dualheap FFI
//!
//! Boundary types for talking to the managed runtime.
//!
//! The bridge never looks inside a managed value. Everything it knows
//! about one goes through the [`ManagedApi`] trait, which mirrors the
//! managed runtime's fixed, versioned C function table ([`capi`]).
//!
//! ## Module Structure
//!
//! - [`handle`]: `Handle`, `TypeSlot` and `Symbol` identifiers
//! - [`ownership`]: the `Converted` owned/borrowed sum type
//! - [`array`]: dtype and array payloads exchanged with the managed side
//! - [`api`]: the `ManagedApi` trait
//! - [`capi`]: `#[repr(C)]` function table and its `ManagedApi` adapter
//! - [`error`]: error types for the boundary

pub mod api;
pub mod array;
pub mod capi;
pub mod error;
pub mod handle;
pub mod ownership;

pub use api::{ApiResult, ManagedApi, ManagedException};
pub use array::{column_major_order, ArrayBuffer, ArrayData, ComplexF32, ComplexF64, DType};
pub use capi::{CApiTable, TableApi, CAPI_VERSION};
pub use error::{FfiError, FfiResult, PendingError};
pub use handle::{Handle, Symbol, TypeSlot};
pub use ownership::{release_all, Converted};
