//! Type Registry
//!
//! Everything the conversion engines need to know about both runtimes,
//! resolved once when a [`crate::BridgeContext`] is built and read-only
//! afterwards:
//!
//! - host classes the unboxing engine dispatches on
//! - managed type slots the boxing engine tests category membership with
//! - managed functions the operator entry points call
//! - the rooted `nothing` singleton and an owned `0` constant
//!
//! A name that fails to resolve aborts construction with
//! [`BridgeError::MissingSymbol`]; nothing is skipped.

use std::rc::Rc;

use dualheap_ffi::{Handle, ManagedApi, TypeSlot};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::host::{BuiltinType, HostType, HostTypeId, Interp};

/// Resolve a global binding, turning a lookup failure into `MissingSymbol`
fn resolve_function(api: &dyn ManagedApi, name: &str) -> BridgeResult<Handle> {
    api.lookup(name).map_err(|_| {
        if let Some(exc) = api.fetch_error() {
            debug!(name, error = %exc, "managed symbol lookup failed");
        }
        BridgeError::missing_symbol(name)
    })
}

/// Resolve a global type binding to its slot
fn resolve_type(api: &dyn ManagedApi, name: &str) -> BridgeResult<TypeSlot> {
    let ty = resolve_function(api, name)?;
    api.type_slot(ty).map_err(|_| {
        if let Some(exc) = api.fetch_error() {
            debug!(name, error = %exc, "managed binding is not a type");
        }
        BridgeError::missing_symbol(name)
    })
}

/// Declare a table of managed bindings resolved by global name.
macro_rules! managed_table {
    (
        $(#[$meta:meta])*
        $name:ident: $ty:ty = $resolve:ident {
            $($(#[$field_meta:meta])* $field:ident => $symbol:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            $($(#[$field_meta])* pub $field: $ty,)*
        }

        impl $name {
            /// Global names in declaration order
            pub const NAMES: &'static [&'static str] = &[$($symbol),*];

            fn resolve(api: &dyn ManagedApi) -> BridgeResult<Self> {
                Ok(Self {
                    $($field: $resolve(api, $symbol)?,)*
                })
            }
        }
    };
}

managed_table! {
    /// Managed type slots used for category dispatch
    ManagedTypes: TypeSlot = resolve_type {
        nothing => "Nothing",
        integer => "Integer",
        abstract_float => "AbstractFloat",
        bool => "Bool",
        complex => "Complex",
        string => "String",
        number => "Number",
        abstract_array => "AbstractArray",
        bit_array => "BitArray",
        tuple => "Tuple",
        abstract_string => "AbstractString",
        abstract_dict => "AbstractDict",
        abstract_set => "AbstractSet",
    }
}

managed_table! {
    /// Managed functions called by the engines and operator entry points
    ManagedFunctions: Handle = resolve_function {
        square => "square",
        repr => "repr",
        tuple => "tuple",
        reshape => "reshape",
        /// Conversion of any `AbstractString` to `String`
        string => "string",
        length => "length",
        getindex => "getindex",
        setindex => "setindex!",
        getproperty => "getproperty",
        setproperty => "setproperty!",
        hasproperty => "hasproperty",
        eq => "==",
        ne => "!=",
        lt => "<",
        le => "<=",
        gt => ">",
        ge => ">=",
        add => "+",
        sub => "-",
        mul => "*",
        truediv => "/",
        floordiv => "div",
        rem => "%",
        pow => "^",
        lshift => "<<",
        rshift => ">>",
        bitor => "|",
        bitand => "&",
        bitxor => "xor",
        invert => "~",
        abs => "abs",
        /// Matrix product; the managed runtime spells it `*`
        matmul => "*",
        hash => "hash",
        isempty => "isempty",
        contains => "in",
    }
}

/// Host classes the engines dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTypes {
    pub none: HostTypeId,
    pub int: HostTypeId,
    pub float: HostTypeId,
    pub bool: HostTypeId,
    pub complex: HostTypeId,
    pub str: HostTypeId,
    pub tuple: HostTypeId,
    pub dict: HostTypeId,
    pub ndarray: HostTypeId,
    pub opaque: HostTypeId,
}

impl HostTypes {
    /// Collect the builtin classes of `interp` plus the opaque box class
    pub fn from_interp(interp: &Interp, opaque: &HostType) -> Self {
        let id = |kind| interp.builtin(kind).id();
        Self {
            none: id(BuiltinType::NoneType),
            int: id(BuiltinType::Int),
            float: id(BuiltinType::Float),
            bool: id(BuiltinType::Bool),
            complex: id(BuiltinType::Complex),
            str: id(BuiltinType::Str),
            tuple: id(BuiltinType::Tuple),
            dict: id(BuiltinType::Dict),
            ndarray: id(BuiltinType::NdArray),
            opaque: opaque.id(),
        }
    }
}

/// Unboxing rule selected by exact host type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnboxKind {
    Nothing,
    Opaque,
    Int,
    Float,
    Str,
    Bool,
    Complex,
    Tuple,
    NdArray,
}

/// Native conversion for scalar managed categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Integer,
    AbstractFloat,
    Bool,
    Complex,
    String,
    /// Float if representable, complex otherwise
    Number,
}

/// Boxing rule selected by managed category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxRule {
    Nothing,
    Scalar(ScalarKind),
    Array,
    Tuple,
    /// Any `AbstractString` other than `String`
    AbstractString,
}

/// Resolved type and function tables for one pair of runtimes
pub struct TypeRegistry {
    pub host: HostTypes,
    pub managed: ManagedTypes,
    pub functions: ManagedFunctions,
    nothing: Handle,
    zero: Handle,
    unbox_table: FxHashMap<HostTypeId, UnboxKind>,
    api: Rc<dyn ManagedApi>,
}

impl TypeRegistry {
    /// Resolve every managed name and build the dispatch tables
    pub fn build(api: Rc<dyn ManagedApi>, host: HostTypes) -> BridgeResult<Self> {
        let managed = ManagedTypes::resolve(&*api)?;
        let functions = ManagedFunctions::resolve(&*api)?;
        let nothing = resolve_function(&*api, "nothing")?;
        let zero = api.eval("0").map_err(|_| {
            let _ = api.fetch_error();
            BridgeError::missing_symbol("0")
        })?;

        let unbox_table: FxHashMap<HostTypeId, UnboxKind> = [
            (host.none, UnboxKind::Nothing),
            (host.opaque, UnboxKind::Opaque),
            (host.int, UnboxKind::Int),
            (host.float, UnboxKind::Float),
            (host.str, UnboxKind::Str),
            (host.bool, UnboxKind::Bool),
            (host.complex, UnboxKind::Complex),
            (host.tuple, UnboxKind::Tuple),
            (host.ndarray, UnboxKind::NdArray),
        ]
        .into_iter()
        .collect();

        debug!(
            types = ManagedTypes::NAMES.len(),
            functions = ManagedFunctions::NAMES.len(),
            %nothing,
            %zero,
            "type registry built"
        );

        Ok(Self {
            host,
            managed,
            functions,
            nothing,
            zero,
            unbox_table,
            api,
        })
    }

    /// Unboxing rule for an exact host class; subclasses have none
    pub fn unbox_kind(&self, ty: HostTypeId) -> Option<UnboxKind> {
        self.unbox_table.get(&ty).copied()
    }

    /// Category tests for boxing, in precedence order
    pub fn box_rules(&self) -> [(TypeSlot, BoxRule); 10] {
        let m = &self.managed;
        [
            (m.nothing, BoxRule::Nothing),
            (m.integer, BoxRule::Scalar(ScalarKind::Integer)),
            (m.abstract_float, BoxRule::Scalar(ScalarKind::AbstractFloat)),
            (m.bool, BoxRule::Scalar(ScalarKind::Bool)),
            (m.complex, BoxRule::Scalar(ScalarKind::Complex)),
            (m.string, BoxRule::Scalar(ScalarKind::String)),
            (m.number, BoxRule::Scalar(ScalarKind::Number)),
            (m.abstract_array, BoxRule::Array),
            (m.tuple, BoxRule::Tuple),
            (m.abstract_string, BoxRule::AbstractString),
        ]
    }

    /// First matching boxing rule for `value`
    pub fn box_rule(&self, value: Handle) -> Option<BoxRule> {
        self.box_rules()
            .into_iter()
            .find(|(slot, _)| self.api.is_instance(value, *slot))
            .map(|(_, rule)| rule)
    }

    /// The rooted `nothing` singleton. Never released.
    pub fn nothing(&self) -> Handle {
        self.nothing
    }

    /// The managed integer `0`, owned by the registry
    pub fn zero(&self) -> Handle {
        self.zero
    }
}

impl Drop for TypeRegistry {
    fn drop(&mut self) {
        self.api.release(self.zero);
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("host", &self.host)
            .field("managed", &self.managed)
            .field("nothing", &self.nothing)
            .field("zero", &self.zero)
            .finish_non_exhaustive()
    }
}
