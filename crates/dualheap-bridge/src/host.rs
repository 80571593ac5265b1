//! Host Object Model
//!
//! The host side of the bridge: a dynamically-typed, reference-counted
//! object heap with a class hierarchy and a C-API-style error indicator.
//!
//! ## Object Layout
//!
//! - `HostType`: a class with an id, a name and an optional base class
//! - `HostRef`: a shared reference to a `HostObject` (type + payload)
//! - `Interp`: the interpreter state: builtin classes, the `None`/`True`/
//!   `False` singletons and the pending-exception indicator
//!
//! ## Extraction Convention
//!
//! The numeric readers (`long_as_ssize`, `float_as_double`, ...) return a
//! sentinel (`-1`, `-1.0`) on failure and set the error indicator. Because
//! the sentinel is also a legitimate value, callers must consult
//! [`Interp::err_occurred`] after every read.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use dualheap_ffi::{ArrayData, ComplexF64};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::opaque::OpaqueSlot;

// ============================================================================
// Host exceptions
// ============================================================================

/// Class of a host exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// Wrong argument type
    TypeError,
    /// Right type, bad value
    ValueError,
    /// Integer out of range
    OverflowError,
    /// Generic failure
    RuntimeError,
    /// The bridge's own exception type
    BridgeError,
}

impl HostErrorKind {
    /// Exception class name
    pub fn name(&self) -> &'static str {
        match self {
            HostErrorKind::TypeError => "TypeError",
            HostErrorKind::ValueError => "ValueError",
            HostErrorKind::OverflowError => "OverflowError",
            HostErrorKind::RuntimeError => "RuntimeError",
            HostErrorKind::BridgeError => "BridgeError",
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised host exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    /// Exception class
    pub kind: HostErrorKind,
    /// Message
    pub message: String,
}

impl HostException {
    /// Create a new exception
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ============================================================================
// Classes
// ============================================================================

/// Identity of a host class. Exact-type dispatch keys on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(u32);

impl HostTypeId {
    /// Raw id
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A host class
pub struct HostType {
    id: HostTypeId,
    name: SmolStr,
    base: Option<Rc<HostType>>,
}

impl HostType {
    /// Class id
    pub fn id(&self) -> HostTypeId {
        self.id
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct base class
    pub fn base(&self) -> Option<&Rc<HostType>> {
        self.base.as_ref()
    }

    /// Check if this class is `other` or inherits from it
    pub fn is_subtype_of(&self, other: HostTypeId) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty.id == other {
                return true;
            }
            current = ty.base.as_deref();
        }
        false
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

/// Classes every interpreter starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Object = 0,
    NoneType = 1,
    Int = 2,
    Bool = 3,
    Float = 4,
    Complex = 5,
    Str = 6,
    Tuple = 7,
    List = 8,
    Dict = 9,
    NdArray = 10,
}

impl BuiltinType {
    /// All builtin classes, bases before subclasses
    pub const ALL: [BuiltinType; 11] = [
        BuiltinType::Object,
        BuiltinType::NoneType,
        BuiltinType::Int,
        BuiltinType::Bool,
        BuiltinType::Float,
        BuiltinType::Complex,
        BuiltinType::Str,
        BuiltinType::Tuple,
        BuiltinType::List,
        BuiltinType::Dict,
        BuiltinType::NdArray,
    ];

    /// Class name
    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Object => "object",
            BuiltinType::NoneType => "NoneType",
            BuiltinType::Int => "int",
            BuiltinType::Bool => "bool",
            BuiltinType::Float => "float",
            BuiltinType::Complex => "complex",
            BuiltinType::Str => "str",
            BuiltinType::Tuple => "tuple",
            BuiltinType::List => "list",
            BuiltinType::Dict => "dict",
            BuiltinType::NdArray => "ndarray",
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Object contents
#[derive(Debug)]
pub enum Payload {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Complex(ComplexF64),
    Str(SmolStr),
    Tuple(Vec<HostRef>),
    List(RefCell<Vec<HostRef>>),
    Dict(RefCell<Vec<(HostRef, HostRef)>>),
    NdArray(ArrayData),
    /// Capsule slot owning a managed handle
    Opaque(OpaqueSlot),
    /// Plain instance attributes
    Object(RefCell<IndexMap<SmolStr, HostRef>>),
}

/// A host object: its class plus contents
#[derive(Debug)]
pub struct HostObject {
    ty: Rc<HostType>,
    payload: Payload,
}

/// Reference-counted handle to a host object.
///
/// Cloning is the host's incref; dropping the last clone frees the object
/// and, for opaque boxes, releases the managed handle it owns.
#[derive(Clone)]
pub struct HostRef(Rc<HostObject>);

impl HostRef {
    /// Allocate an object of class `ty`
    pub fn new(ty: Rc<HostType>, payload: Payload) -> Self {
        HostRef(Rc::new(HostObject { ty, payload }))
    }

    /// The object's class
    pub fn ty(&self) -> &HostType {
        &self.0.ty
    }

    /// Exact class id
    pub fn type_id(&self) -> HostTypeId {
        self.0.ty.id
    }

    /// Exact class name
    pub fn type_name(&self) -> &str {
        &self.0.ty.name
    }

    /// Object contents
    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// Identity comparison (`a is b`)
    pub fn is(&self, other: &HostRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// `isinstance` (subclass-aware)
    pub fn is_instance(&self, ty: HostTypeId) -> bool {
        self.0.ty.is_subtype_of(ty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload() {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self.payload() {
            Payload::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.payload() {
            Payload::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<ComplexF64> {
        match self.payload() {
            Payload::Complex(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.payload() {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[HostRef]> {
        match self.payload() {
            Payload::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self.payload() {
            Payload::NdArray(data) => Some(data),
            _ => None,
        }
    }

    /// Check if this is the `None` singleton's payload
    pub fn is_none(&self) -> bool {
        matches!(self.payload(), Payload::None)
    }
}

/// Value equality by contents; opaque and plain objects compare by identity.
impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        if self.is(other) {
            return true;
        }
        match (self.payload(), other.payload()) {
            (Payload::None, Payload::None) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Complex(a), Payload::Complex(b)) => a == b,
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::Tuple(a), Payload::Tuple(b)) => a == b,
            (Payload::List(a), Payload::List(b)) => *a.borrow() == *b.borrow(),
            (Payload::Dict(a), Payload::Dict(b)) => *a.borrow() == *b.borrow(),
            (Payload::NdArray(a), Payload::NdArray(b)) => a == b,
            _ => false,
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[HostRef]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// `repr()`
impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Payload::None => f.write_str("None"),
            Payload::Bool(true) => f.write_str("True"),
            Payload::Bool(false) => f.write_str("False"),
            Payload::Int(i) => write!(f, "{}", i),
            Payload::Float(x) => write!(f, "{:?}", x),
            Payload::Complex(c) => write!(f, "({:?}{:+?}j)", c.re, c.im),
            Payload::Str(s) => write!(f, "'{}'", s),
            Payload::Tuple(items) => {
                f.write_str("(")?;
                write_seq(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Payload::List(items) => {
                f.write_str("[")?;
                write_seq(f, &items.borrow())?;
                f.write_str("]")
            }
            Payload::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Payload::NdArray(data) => {
                write!(f, "array(shape={:?}, dtype={})", data.shape(), data.dtype())
            }
            Payload::Opaque(slot) => write!(f, "<{} {}>", self.type_name(), slot.handle()),
            Payload::Object(_) => write!(f, "<{} object>", self.type_name()),
        }
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Interpreter
// ============================================================================

/// Host interpreter state
pub struct Interp {
    builtins: Vec<Rc<HostType>>,
    next_type: Cell<u32>,
    none: HostRef,
    true_: HostRef,
    false_: HostRef,
    error: RefCell<Option<HostException>>,
}

impl Interp {
    /// Create an interpreter with the builtin classes and singletons
    pub fn new() -> Self {
        let mut builtins: Vec<Rc<HostType>> = Vec::with_capacity(BuiltinType::ALL.len());
        for kind in BuiltinType::ALL {
            let base = match kind {
                BuiltinType::Object => None,
                // bool subclasses int
                BuiltinType::Bool => Some(Rc::clone(&builtins[BuiltinType::Int as usize])),
                _ => Some(Rc::clone(&builtins[BuiltinType::Object as usize])),
            };
            builtins.push(Rc::new(HostType {
                id: HostTypeId(kind as u32),
                name: kind.name().into(),
                base,
            }));
        }

        let none = HostRef::new(Rc::clone(&builtins[BuiltinType::NoneType as usize]), Payload::None);
        let bool_ty = &builtins[BuiltinType::Bool as usize];
        let true_ = HostRef::new(Rc::clone(bool_ty), Payload::Bool(true));
        let false_ = HostRef::new(Rc::clone(bool_ty), Payload::Bool(false));

        Self {
            next_type: Cell::new(builtins.len() as u32),
            builtins,
            none,
            true_,
            false_,
            error: RefCell::new(None),
        }
    }

    /// A builtin class
    pub fn builtin(&self, kind: BuiltinType) -> &Rc<HostType> {
        &self.builtins[kind as usize]
    }

    /// Define a new class; the base defaults to `object`
    pub fn define_class(&self, name: &str, base: Option<&Rc<HostType>>) -> Rc<HostType> {
        let id = HostTypeId(self.next_type.get());
        self.next_type.set(id.0 + 1);
        let base = base.unwrap_or_else(|| self.builtin(BuiltinType::Object));
        Rc::new(HostType {
            id,
            name: name.into(),
            base: Some(Rc::clone(base)),
        })
    }

    /// Allocate an instance of `ty`
    pub fn instance(&self, ty: &Rc<HostType>, payload: Payload) -> HostRef {
        HostRef::new(Rc::clone(ty), payload)
    }

    fn make(&self, kind: BuiltinType, payload: Payload) -> HostRef {
        self.instance(self.builtin(kind), payload)
    }

    /// The `None` singleton
    pub fn none(&self) -> HostRef {
        self.none.clone()
    }

    /// One of the two bool singletons
    pub fn bool(&self, value: bool) -> HostRef {
        if value {
            self.true_.clone()
        } else {
            self.false_.clone()
        }
    }

    pub fn int(&self, value: impl Into<i128>) -> HostRef {
        self.make(BuiltinType::Int, Payload::Int(value.into()))
    }

    pub fn float(&self, value: f64) -> HostRef {
        self.make(BuiltinType::Float, Payload::Float(value))
    }

    pub fn complex(&self, re: f64, im: f64) -> HostRef {
        self.make(BuiltinType::Complex, Payload::Complex(ComplexF64::new(re, im)))
    }

    pub fn str(&self, value: &str) -> HostRef {
        self.make(BuiltinType::Str, Payload::Str(value.into()))
    }

    pub fn tuple(&self, items: Vec<HostRef>) -> HostRef {
        self.make(BuiltinType::Tuple, Payload::Tuple(items))
    }

    pub fn list(&self, items: Vec<HostRef>) -> HostRef {
        self.make(BuiltinType::List, Payload::List(RefCell::new(items)))
    }

    pub fn dict(&self, entries: Vec<(HostRef, HostRef)>) -> HostRef {
        self.make(BuiltinType::Dict, Payload::Dict(RefCell::new(entries)))
    }

    pub fn ndarray(&self, data: ArrayData) -> HostRef {
        self.make(BuiltinType::NdArray, Payload::NdArray(data))
    }

    // ---- error indicator ------------------------------------------------

    /// Set the pending exception, replacing any previous one
    pub fn err_set(&self, kind: HostErrorKind, message: impl Into<String>) {
        *self.error.borrow_mut() = Some(HostException::new(kind, message));
    }

    /// Check if an exception is pending
    pub fn err_occurred(&self) -> bool {
        self.error.borrow().is_some()
    }

    /// Take the pending exception
    pub fn err_fetch(&self) -> Option<HostException> {
        self.error.borrow_mut().take()
    }

    /// Drop the pending exception
    pub fn err_clear(&self) {
        self.error.borrow_mut().take();
    }

    fn type_error<T>(&self, message: String, sentinel: T) -> T {
        self.err_set(HostErrorKind::TypeError, message);
        sentinel
    }

    // ---- extraction -----------------------------------------------------

    /// Read an integer as a machine word
    pub fn long_as_ssize(&self, obj: &HostRef) -> i64 {
        match obj.payload() {
            Payload::Int(v) => match i64::try_from(*v) {
                Ok(v) => v,
                Err(_) => {
                    self.err_set(
                        HostErrorKind::OverflowError,
                        "int too large to convert to C ssize_t",
                    );
                    -1
                }
            },
            Payload::Bool(b) => i64::from(*b),
            _ => self.type_error(
                format!("'{}' object cannot be interpreted as an integer", obj.type_name()),
                -1,
            ),
        }
    }

    /// Read a real number as a double
    pub fn float_as_double(&self, obj: &HostRef) -> f64 {
        match obj.payload() {
            Payload::Float(v) => *v,
            Payload::Int(v) => *v as f64,
            Payload::Bool(b) => f64::from(u8::from(*b)),
            _ => self.type_error(
                format!("must be real number, not {}", obj.type_name()),
                -1.0,
            ),
        }
    }

    /// Read a number as real and imaginary doubles
    pub fn complex_as_parts(&self, obj: &HostRef) -> (f64, f64) {
        match obj.payload() {
            Payload::Complex(c) => (c.re, c.im),
            Payload::Float(_) | Payload::Int(_) | Payload::Bool(_) => {
                (self.float_as_double(obj), 0.0)
            }
            _ => self.type_error(
                format!("complex() argument must be a number, not '{}'", obj.type_name()),
                (-1.0, 0.0),
            ),
        }
    }

    /// UTF-8 contents of a string object
    pub fn unicode_as_utf8(&self, obj: &HostRef) -> Option<SmolStr> {
        match obj.payload() {
            Payload::Str(s) => Some(s.clone()),
            _ => self.type_error(
                format!("bad argument type for built-in operation: '{}'", obj.type_name()),
                None,
            ),
        }
    }

    /// Generic truthiness: `1`, `0`, or `-1` with the error indicator set
    pub fn is_true(&self, obj: &HostRef) -> i32 {
        let truth = match obj.payload() {
            Payload::None => false,
            Payload::Bool(b) => *b,
            Payload::Int(i) => *i != 0,
            Payload::Float(x) => *x != 0.0,
            Payload::Complex(c) => c.re != 0.0 || c.im != 0.0,
            Payload::Str(s) => !s.is_empty(),
            Payload::Tuple(items) => !items.is_empty(),
            Payload::List(items) => !items.borrow().is_empty(),
            Payload::Dict(entries) => !entries.borrow().is_empty(),
            Payload::NdArray(data) => {
                if data.len() > 1 {
                    self.err_set(
                        HostErrorKind::ValueError,
                        "the truth value of an array with more than one element is ambiguous",
                    );
                    return -1;
                }
                !data.is_empty()
            }
            Payload::Opaque(_) | Payload::Object(_) => true,
        };
        i32::from(truth)
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interp")
            .field("classes", &self.next_type.get())
            .field("error", &self.error.borrow())
            .finish()
    }
}
