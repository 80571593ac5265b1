//! Operator Entry Points
//!
//! The operations host code performs on opaque boxes: attribute and item
//! access, calls, arithmetic and comparison operators, truthiness, hashing
//! and `repr`. Each one checks its receiver before touching the managed
//! runtime, unboxes the operands, calls one registered managed function,
//! boxes the result and leaves the guards to release what was converted.
//!
//! [`BridgeContext::dispatch`] routes host protocol method names
//! (`__add__`, `__getitem__`, ...) to these entry points.

use dualheap_ffi::{Handle, Symbol};
use tracing::trace;

use crate::composite::CompositeBuffer;
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostRef;
use crate::opaque::OpaqueBox;
use crate::registry::ManagedFunctions;
use crate::unboxing::Unboxed;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `item in receiver`
    Contains,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 20] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::MatMul,
        BinaryOp::TrueDiv,
        BinaryOp::FloorDiv,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::LShift,
        BinaryOp::RShift,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::BitAnd,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Contains,
    ];

    /// Host protocol method name
    pub fn method_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "__add__",
            BinaryOp::Sub => "__sub__",
            BinaryOp::Mul => "__mul__",
            BinaryOp::MatMul => "__matmul__",
            BinaryOp::TrueDiv => "__truediv__",
            BinaryOp::FloorDiv => "__floordiv__",
            BinaryOp::Mod => "__mod__",
            BinaryOp::Pow => "__pow__",
            BinaryOp::LShift => "__lshift__",
            BinaryOp::RShift => "__rshift__",
            BinaryOp::BitOr => "__or__",
            BinaryOp::BitXor => "__xor__",
            BinaryOp::BitAnd => "__and__",
            BinaryOp::Eq => "__eq__",
            BinaryOp::Ne => "__ne__",
            BinaryOp::Lt => "__lt__",
            BinaryOp::Le => "__le__",
            BinaryOp::Gt => "__gt__",
            BinaryOp::Ge => "__ge__",
            BinaryOp::Contains => "__contains__",
        }
    }

    pub fn from_method_name(name: &str) -> Option<BinaryOp> {
        Self::ALL.into_iter().find(|op| op.method_name() == name)
    }

    fn function(self, f: &ManagedFunctions) -> Handle {
        match self {
            BinaryOp::Add => f.add,
            BinaryOp::Sub => f.sub,
            BinaryOp::Mul => f.mul,
            BinaryOp::MatMul => f.matmul,
            BinaryOp::TrueDiv => f.truediv,
            BinaryOp::FloorDiv => f.floordiv,
            BinaryOp::Mod => f.rem,
            BinaryOp::Pow => f.pow,
            BinaryOp::LShift => f.lshift,
            BinaryOp::RShift => f.rshift,
            BinaryOp::BitOr => f.bitor,
            BinaryOp::BitXor => f.bitxor,
            BinaryOp::BitAnd => f.bitand,
            BinaryOp::Eq => f.eq,
            BinaryOp::Ne => f.ne,
            BinaryOp::Lt => f.lt,
            BinaryOp::Le => f.le,
            BinaryOp::Gt => f.gt,
            BinaryOp::Ge => f.ge,
            BinaryOp::Contains => f.contains,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Invert,
    Pos,
    Neg,
    Abs,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 4] = [UnaryOp::Invert, UnaryOp::Pos, UnaryOp::Neg, UnaryOp::Abs];

    /// Host protocol method name
    pub fn method_name(self) -> &'static str {
        match self {
            UnaryOp::Invert => "__invert__",
            UnaryOp::Pos => "__pos__",
            UnaryOp::Neg => "__neg__",
            UnaryOp::Abs => "__abs__",
        }
    }

    pub fn from_method_name(name: &str) -> Option<UnaryOp> {
        Self::ALL.into_iter().find(|op| op.method_name() == name)
    }

    // unary `+` and `-` are the one-argument methods of the binary functions
    fn function(self, f: &ManagedFunctions) -> Handle {
        match self {
            UnaryOp::Invert => f.invert,
            UnaryOp::Pos => f.add,
            UnaryOp::Neg => f.sub,
            UnaryOp::Abs => f.abs,
        }
    }
}

impl BridgeContext {
    fn call_and_box(
        &self,
        func: Handle,
        args: &[Handle],
        kwargs: &[(Symbol, Handle)],
    ) -> BridgeResult<HostRef> {
        let result = self.check(self.api.call(func, args, kwargs))?;
        self.box_value(result)
    }

    /// Call a managed predicate and read its `Bool` result
    fn call_bool(&self, func: Handle, args: &[Handle]) -> BridgeResult<bool> {
        let api = self.api();
        let result = Unboxed::owned(api, self.check(api.call(func, args, &[]))?);
        self.check(api.get_bool(result.handle()))
    }

    /// Evaluate code in the managed runtime; the result stays opaque
    pub fn eval(&self, code: &str) -> BridgeResult<OpaqueBox> {
        let result = self.check(self.api.eval(code))?;
        self.wrap(result)
    }

    /// Evaluate code and box the result
    pub fn eval_boxed(&self, code: &str) -> BridgeResult<HostRef> {
        let result = self.check(self.api.eval(code))?;
        self.box_value(result)
    }

    /// `x * x` on the managed side, for any unboxable `x`
    pub fn square(&self, x: &HostRef) -> BridgeResult<HostRef> {
        let x = self.unbox(x)?;
        self.call_and_box(self.registry.functions.square, &[x.handle()], &[])
    }

    /// The managed `repr` of a box
    pub fn repr(&self, obj: &HostRef) -> BridgeResult<String> {
        let receiver = self.expect_opaque(obj)?;
        let api = self.api();
        let text = api.call(self.registry.functions.repr, &[receiver.handle()], &[]);
        let text = Unboxed::owned(api, self.check(text)?);
        self.check(api.get_utf8(text.handle()))
    }

    pub fn getattr(&self, obj: &HostRef, name: &str) -> BridgeResult<HostRef> {
        let receiver = self.expect_opaque(obj)?;
        let name = self.check(self.api.symbol(name))?;
        let value = self.check(self.api.get_property(receiver.handle(), name))?;
        self.box_value(value)
    }

    pub fn setattr(&self, obj: &HostRef, name: &str, value: &HostRef) -> BridgeResult<()> {
        let receiver = self.expect_opaque(obj)?;
        let value = self.unbox(value)?;
        let name = self.check(self.api.symbol(name))?;
        self.check(self.api.set_property(receiver.handle(), name, value.handle()))
    }

    pub fn hasattr(&self, obj: &HostRef, name: &str) -> BridgeResult<bool> {
        let receiver = self.expect_opaque(obj)?;
        let name = self.check(self.api.symbol(name))?;
        self.check(self.api.has_property(receiver.handle(), name))
    }

    /// Index arguments for `receiver[key]`.
    ///
    /// A tuple key is one managed tuple for dictionaries and one index per
    /// element for everything else, so `m[1, 2]` indexes a matrix while
    /// `d[1, 2]` looks up the key `(1, 2)`.
    fn index_args(&self, receiver: Handle, key: &HostRef) -> BridgeResult<CompositeBuffer<'_>> {
        match key.as_tuple() {
            Some(items)
                if !self
                    .api
                    .is_instance(receiver, self.registry.managed.abstract_dict) =>
            {
                self.unbox_all(items)
            }
            _ => self.unbox_all(std::slice::from_ref(key)),
        }
    }

    pub fn getitem(&self, obj: &HostRef, key: &HostRef) -> BridgeResult<HostRef> {
        let receiver = self.expect_opaque(obj)?;
        let index = self.index_args(receiver.handle(), key)?;
        let value = self.check(self.api.get_index(receiver.handle(), &index.handles()))?;
        self.box_value(value)
    }

    pub fn setitem(&self, obj: &HostRef, key: &HostRef, value: &HostRef) -> BridgeResult<()> {
        let receiver = self.expect_opaque(obj)?;
        let value = self.unbox(value)?;
        let index = self.index_args(receiver.handle(), key)?;
        self.check(
            self.api
                .set_index(receiver.handle(), &index.handles(), value.handle()),
        )
    }

    /// Call a boxed managed function with positional and keyword arguments
    pub fn call(
        &self,
        func: &HostRef,
        args: &[HostRef],
        kwargs: &[(&str, HostRef)],
    ) -> BridgeResult<HostRef> {
        let func = self.expect_opaque(func)?;
        let positional = self.unbox_all(args)?;
        let mut keywords = CompositeBuffer::with_capacity(self.api(), kwargs.len());
        let mut names = Vec::with_capacity(kwargs.len());
        for (name, value) in kwargs {
            names.push(self.check(self.api.symbol(name))?);
            keywords.push(self.unbox(value)?);
        }
        let named: Vec<(Symbol, Handle)> = names.into_iter().zip(keywords.handles()).collect();
        trace!(
            func = %func.handle(),
            args = args.len(),
            kwargs = kwargs.len(),
            "call"
        );
        self.call_and_box(func.handle(), &positional.handles(), &named)
    }

    pub fn binary(&self, op: BinaryOp, lhs: &HostRef, rhs: &HostRef) -> BridgeResult<HostRef> {
        let receiver = self.expect_opaque(lhs)?;
        let other = self.unbox(rhs)?;
        let args = match op {
            BinaryOp::Contains => [other.handle(), receiver.handle()],
            _ => [receiver.handle(), other.handle()],
        };
        trace!(op = op.method_name(), "binary operator");
        self.call_and_box(op.function(&self.registry.functions), &args, &[])
    }

    pub fn unary(&self, op: UnaryOp, operand: &HostRef) -> BridgeResult<HostRef> {
        let receiver = self.expect_opaque(operand)?;
        trace!(op = op.method_name(), "unary operator");
        self.call_and_box(
            op.function(&self.registry.functions),
            &[receiver.handle()],
            &[],
        )
    }

    /// Truth value of a box.
    ///
    /// Numbers are true when nonzero and collections and strings when
    /// nonempty; any other value is true.
    pub fn truthy(&self, obj: &HostRef) -> BridgeResult<bool> {
        let receiver = self.expect_opaque(obj)?.handle();
        let managed = &self.registry.managed;
        let functions = &self.registry.functions;
        if self.api.is_instance(receiver, managed.number) {
            return self.call_bool(functions.ne, &[receiver, self.registry.zero()]);
        }
        let sized = [
            managed.abstract_array,
            managed.abstract_dict,
            managed.abstract_set,
            managed.abstract_string,
        ];
        if sized.iter().any(|slot| self.api.is_instance(receiver, *slot)) {
            return Ok(!self.call_bool(functions.isempty, &[receiver])?);
        }
        Ok(true)
    }

    /// Managed `hash` of a box
    pub fn hash(&self, obj: &HostRef) -> BridgeResult<u64> {
        let receiver = self.expect_opaque(obj)?;
        let api = self.api();
        let hash = api.call(self.registry.functions.hash, &[receiver.handle()], &[]);
        let hash = Unboxed::owned(api, self.check(hash)?);
        self.check(api.get_u64(hash.handle()))
    }

    /// Dimensions of a boxed managed array
    pub fn shape(&self, obj: &HostRef) -> BridgeResult<Vec<usize>> {
        let receiver = self.expect_opaque(obj)?.handle();
        let rank = self.check(self.api.array_rank(receiver))?;
        (1..=rank)
            .map(|dim| self.check(self.api.array_size(receiver, dim)))
            .collect()
    }

    /// Run a host protocol method on a box.
    ///
    /// `args[0]` is the receiver. Unknown names and wrong arities are host
    /// `TypeError`s.
    pub fn dispatch(&self, method: &str, args: &[HostRef]) -> BridgeResult<HostRef> {
        let interp = &self.interp;
        if let Some(op) = BinaryOp::from_method_name(method) {
            let [lhs, rhs] = expect_args(method, args)?;
            return self.binary(op, lhs, rhs);
        }
        if let Some(op) = UnaryOp::from_method_name(method) {
            let [operand] = expect_args(method, args)?;
            return self.unary(op, operand);
        }
        match method {
            "__repr__" => {
                let [obj] = expect_args(method, args)?;
                Ok(interp.str(&self.repr(obj)?))
            }
            "__getattr__" => {
                let [obj, name] = expect_args(method, args)?;
                self.getattr(obj, attr_name(name)?)
            }
            "__setattr__" => {
                let [obj, name, value] = expect_args(method, args)?;
                self.setattr(obj, attr_name(name)?, value)?;
                Ok(interp.none())
            }
            "__hasattr__" => {
                let [obj, name] = expect_args(method, args)?;
                Ok(interp.bool(self.hasattr(obj, attr_name(name)?)?))
            }
            "__getitem__" => {
                let [obj, key] = expect_args(method, args)?;
                self.getitem(obj, key)
            }
            "__setitem__" => {
                let [obj, key, value] = expect_args(method, args)?;
                self.setitem(obj, key, value)?;
                Ok(interp.none())
            }
            "__call__" => match args.split_first() {
                Some((func, rest)) => self.call(func, rest, &[]),
                None => Err(arity_error(method, 1, 0)),
            },
            "__bool__" => {
                let [obj] = expect_args(method, args)?;
                Ok(interp.bool(self.truthy(obj)?))
            }
            "__hash__" => {
                let [obj] = expect_args(method, args)?;
                Ok(interp.int(self.hash(obj)?))
            }
            _ => Err(BridgeError::host_type_error(format!(
                "opaque objects have no method '{}'",
                method
            ))),
        }
    }

    /// Run a protocol method with the host's calling convention: `None` on
    /// failure, with the exception set on the interpreter
    pub fn dispatch_raising(&self, method: &str, args: &[HostRef]) -> Option<HostRef> {
        match self.dispatch(method, args) {
            Ok(obj) => Some(obj),
            Err(err) => {
                err.raise(&self.interp);
                None
            }
        }
    }
}

fn arity_error(method: &str, expected: usize, actual: usize) -> BridgeError {
    BridgeError::host_type_error(format!(
        "{}() takes {} arguments ({} given)",
        method, expected, actual
    ))
}

fn expect_args<'a, const N: usize>(
    method: &str,
    args: &'a [HostRef],
) -> BridgeResult<&'a [HostRef; N]> {
    args.try_into()
        .map_err(|_| arity_error(method, N, args.len()))
}

fn attr_name(name: &HostRef) -> BridgeResult<&str> {
    name.as_str().ok_or_else(|| {
        BridgeError::host_type_error(format!(
            "attribute name must be str, not '{}'",
            name.type_name()
        ))
    })
}
