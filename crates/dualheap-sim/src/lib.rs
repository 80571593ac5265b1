//! # dualheap Simulated Runtime
//!
//! An in-process managed runtime implementing [`dualheap_ffi::ManagedApi`].
//! It stands in for the real runtime wherever the bridge needs to be
//! driven end to end: unit tests, integration tests and examples.
//!
//! ## Module Structure
//!
//! - [`value`]: heap values (scalars, strings, tuples, arrays, dicts, structs)
//! - [`category`]: the abstract type lattice used for `isa`
//! - [`builtins`]: the functions bound as globals (`+`, `getindex`, `repr`, ...)
//! - [`eval`]: the expression reader behind `eval`
//! - [`runtime`]: the heap, handle ledger and `ManagedApi` implementation
//!
//! ## Example
//!
//! ```
//! use dualheap_ffi::ManagedApi;
//! use dualheap_sim::{SimRuntime, Value};
//!
//! let rt = SimRuntime::new();
//! let h = rt.eval("*(6, 7)").unwrap();
//! assert_eq!(rt.value_of(h), Some(Value::Int(42)));
//! rt.release(h);
//! assert_eq!(rt.release_count(h), 1);
//! ```

pub mod builtins;
pub mod category;
pub mod eval;
pub mod runtime;
pub mod value;

pub use builtins::Builtin;
pub use category::Category;
pub use runtime::SimRuntime;
pub use value::{ArrayObj, ElemType, StructDef, StructObj, Value};
