//! # dualheap Bridge
//!
//! Value marshaling between a dynamically typed host runtime and a managed
//! runtime, each with its own garbage-collected heap.
//!
//! ## Overview
//!
//! Host code works with managed values through opaque boxes, and managed
//! code receives host values as plain managed values whenever a lossless
//! representation exists. Every crossing goes through a [`BridgeContext`]:
//!
//! - unboxing turns a host object into a managed handle tagged owned or
//!   borrowed, dispatching on the object's exact class
//! - boxing turns a managed handle into a native host value, or wraps it
//!   in an opaque box when no native form exists
//! - composite conversion handles tuples and argument lists so that a
//!   failure part way through releases what was already converted
//! - the operator entry points implement attribute, item, call, operator,
//!   truthiness and hash protocols on opaque boxes
//!
//! ## Module Structure
//!
//! - [`host`]: the host object model and interpreter state
//! - [`registry`]: resolved type slots and functions on both sides
//! - [`context`]: `BridgeContext` and the shared `ContextSlot`
//! - [`unboxing`]: host → managed
//! - [`boxing`]: managed → host
//! - [`composite`]: tuple and argument-list conversion
//! - [`opaque`]: the opaque box class
//! - [`ops`]: operator entry points
//! - [`config`]: `BridgeConfig` read from TOML
//! - [`error`]: error types for the bridge
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use dualheap_bridge::{BinaryOp, BridgeConfig, BridgeContext, Interp};
//! use dualheap_sim::SimRuntime;
//!
//! let rt = Rc::new(SimRuntime::new());
//! let ctx = BridgeContext::initialize(rt, Rc::new(Interp::new()), BridgeConfig::default())?;
//! let pi = ctx.eval("pi")?;
//! let two = ctx.interp().int(2);
//! let tau = ctx.binary(BinaryOp::Mul, pi.as_host(), &two)?;
//! assert_eq!(tau.as_float(), Some(std::f64::consts::TAU));
//! # Ok::<(), dualheap_bridge::BridgeError>(())
//! ```

pub mod boxing;
pub mod composite;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod opaque;
pub mod ops;
pub mod registry;
pub mod unboxing;

pub use composite::CompositeBuffer;
pub use config::BridgeConfig;
pub use context::{BridgeContext, ContextSlot};
pub use error::{BridgeError, BridgeResult, ConversionError};
pub use host::{BuiltinType, HostErrorKind, HostException, HostRef, HostType, HostTypeId, Interp, Payload};
pub use opaque::{OpaqueBox, OPAQUE_TYPE_NAME};
pub use ops::{BinaryOp, UnaryOp};
pub use registry::{BoxRule, ManagedFunctions, ManagedTypes, ScalarKind, TypeRegistry, UnboxKind};
pub use unboxing::Unboxed;
