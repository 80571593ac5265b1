//! The simulated managed runtime
//!
//! `SimRuntime` owns a heap of [`Value`]s addressed by [`Handle`] and
//! implements [`ManagedApi`] over it. Beyond the API it keeps a ledger of
//! every release so tests can assert exact ownership behavior:
//!
//! - releasing a live owned handle removes it and counts one release
//! - releasing it again is recorded as a double release
//! - releasing a rooted or never-issued handle is recorded as illegal
//!
//! Failures can be injected per function name and for array
//! import/export.

use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;

use dualheap_ffi::{
    ApiResult, ArrayBuffer, ArrayData, ComplexF32, ComplexF64, DType, Handle, ManagedApi,
    ManagedException, PendingError, Symbol, TypeSlot,
};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::builtins::{
    as_complex, as_f64, as_i128, construct, exception, method_error, Builtin, CallResult,
};
use crate::category::Category;
use crate::eval;
use crate::value::{ArrayObj, ElemType, StructDef, Value};

#[derive(Debug)]
struct Slot {
    value: Value,
    rooted: bool,
}

#[derive(Debug, Default)]
struct Heap {
    slots: FxHashMap<Handle, Slot>,
    next: u64,
    globals: IndexMap<SmolStr, Handle>,
    symbols: IndexSet<SmolStr>,
    pending: Option<ManagedException>,
    backtrace: bool,
    release_counts: FxHashMap<Handle, usize>,
    release_log: Vec<Handle>,
    double_releases: Vec<Handle>,
    illegal_releases: Vec<Handle>,
    fail_functions: FxHashSet<SmolStr>,
    fail_array_import: bool,
    fail_array_export: bool,
    call_counts: FxHashMap<SmolStr, usize>,
}

impl Heap {
    fn insert(&mut self, value: Value, rooted: bool) -> Handle {
        self.next += 1;
        let handle = Handle::from_raw(self.next);
        self.slots.insert(handle, Slot { value, rooted });
        handle
    }

    fn define(&mut self, name: &str, value: Value) -> Handle {
        let handle = self.insert(value, true);
        self.globals.insert(SmolStr::new(name), handle);
        handle
    }
}

/// In-process managed runtime.
#[derive(Debug)]
pub struct SimRuntime {
    heap: RefCell<Heap>,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    /// A runtime with every category, builtin and `nothing` bound globally
    pub fn new() -> Self {
        let mut heap = Heap::default();
        for category in Category::ALL {
            heap.define(category.name(), Value::Type(category));
        }
        for builtin in Builtin::ALL {
            heap.define(builtin.name(), Value::Function(*builtin));
        }
        heap.define("nothing", Value::Nothing);
        heap.define("pi", Value::Irrational("π".into(), PI));
        heap.define("π", Value::Irrational("π".into(), PI));
        Self {
            heap: RefCell::new(heap),
        }
    }

    // ========================================================================
    // Test helpers
    // ========================================================================

    /// Allocate an owned handle for `value`
    pub fn alloc(&self, value: Value) -> Handle {
        self.heap.borrow_mut().insert(value, false)
    }

    /// Bind a rooted global
    pub fn define_global(&self, name: &str, value: Value) -> Handle {
        self.heap.borrow_mut().define(name, value)
    }

    /// Bind a struct type as a rooted global
    pub fn define_struct(&self, name: &str, fields: &[&str], mutable: bool) -> Handle {
        let def = StructDef {
            name: name.into(),
            fields: fields.iter().map(|f| SmolStr::new(f)).collect(),
            mutable,
        };
        self.define_global(name, Value::StructType(Rc::new(def)))
    }

    /// Value behind a live handle
    pub fn value_of(&self, handle: Handle) -> Option<Value> {
        self.heap
            .borrow()
            .slots
            .get(&handle)
            .map(|slot| slot.value.clone())
    }

    /// Whether the handle is live
    pub fn is_live(&self, handle: Handle) -> bool {
        self.heap.borrow().slots.contains_key(&handle)
    }

    /// Number of live owned (non-rooted) handles
    pub fn live_count(&self) -> usize {
        self.heap
            .borrow()
            .slots
            .values()
            .filter(|slot| !slot.rooted)
            .count()
    }

    /// How many times `handle` was released, double releases included
    pub fn release_count(&self, handle: Handle) -> usize {
        self.heap
            .borrow()
            .release_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Every successful release, in order
    pub fn release_log(&self) -> Vec<Handle> {
        self.heap.borrow().release_log.clone()
    }

    /// Releases of already-released handles
    pub fn double_releases(&self) -> Vec<Handle> {
        self.heap.borrow().double_releases.clone()
    }

    /// Releases of rooted or unknown handles
    pub fn illegal_releases(&self) -> Vec<Handle> {
        self.heap.borrow().illegal_releases.clone()
    }

    /// Make every call to the named function fail
    pub fn fail_function(&self, name: &str) {
        self.heap.borrow_mut().fail_functions.insert(SmolStr::new(name));
    }

    /// Make array import fail
    pub fn set_fail_array_import(&self, fail: bool) {
        self.heap.borrow_mut().fail_array_import = fail;
    }

    /// Make array export fail
    pub fn set_fail_array_export(&self, fail: bool) {
        self.heap.borrow_mut().fail_array_export = fail;
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut heap = self.heap.borrow_mut();
        heap.fail_functions.clear();
        heap.fail_array_import = false;
        heap.fail_array_export = false;
    }

    /// Number of `call`s made to the named function
    pub fn call_count(&self, name: &str) -> usize {
        self.heap
            .borrow()
            .call_counts
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Leave an exception pending, as if a previous call had failed
    pub fn raise(&self, exception: &str, message: &str) {
        self.heap.borrow_mut().pending = Some(ManagedException::new(exception, message));
    }

    /// Peek at the pending exception without clearing it
    pub fn pending_error(&self) -> Option<ManagedException> {
        self.heap.borrow().pending.clone()
    }

    /// Whether fetched messages carry a backtrace
    pub fn backtrace_enabled(&self) -> bool {
        self.heap.borrow().backtrace
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn fail<T>(&self, exc: ManagedException) -> ApiResult<T> {
        let mut heap = self.heap.borrow_mut();
        let exc = if heap.backtrace {
            ManagedException::new(
                exc.exception,
                format!("{}\nStacktrace:\n [1] top-level scope", exc.message),
            )
        } else {
            exc
        };
        heap.pending = Some(exc);
        Err(PendingError)
    }

    fn value(&self, handle: Handle) -> ApiResult<Value> {
        match self.value_of(handle) {
            Some(value) => Ok(value),
            None => self.fail(exception(
                "UndefRefError",
                format!("{} is not a live handle", handle),
            )),
        }
    }

    fn values(&self, handles: &[Handle]) -> ApiResult<Vec<Value>> {
        handles.iter().map(|h| self.value(*h)).collect()
    }

    fn symbol_name(&self, symbol: Symbol) -> ApiResult<SmolStr> {
        let name = usize::try_from(symbol.raw())
            .ok()
            .and_then(|raw| raw.checked_sub(1))
            .and_then(|index| self.heap.borrow().symbols.get_index(index).cloned());
        match name {
            Some(name) => Ok(name),
            None => self.fail(exception("ArgumentError", format!("unknown {}", symbol))),
        }
    }

    fn finish(&self, result: CallResult) -> ApiResult<Handle> {
        match result {
            Ok(value) => Ok(self.alloc(value)),
            Err(exc) => self.fail(exc),
        }
    }

    fn count_call(&self, name: &str) -> CallResult {
        let mut heap = self.heap.borrow_mut();
        *heap.call_counts.entry(SmolStr::new(name)).or_default() += 1;
        if heap.fail_functions.contains(name) {
            return Err(exception(
                "ErrorException",
                format!("injected failure in `{}`", name),
            ));
        }
        Ok(Value::Nothing)
    }

    fn invoke(&self, func: &Value, args: &[Value], kwargs: &[(SmolStr, Value)]) -> CallResult {
        match func {
            Value::Function(builtin) => {
                self.count_call(builtin.name())?;
                builtin.apply(args, kwargs)
            }
            Value::StructType(def) => {
                self.count_call(&def.name)?;
                construct(def, args, kwargs)
            }
            other => Err(exception(
                "MethodError",
                format!("objects of type {} are not callable", other.type_name()),
            )),
        }
    }

    fn resolve_global(&self, name: &str) -> Result<Value, ManagedException> {
        let handle = self.heap.borrow().globals.get(name).copied();
        handle
            .and_then(|h| self.value_of(h))
            .ok_or_else(|| exception("UndefVarError", format!("`{}` not defined", name)))
    }

    fn with_array<T>(
        &self,
        handle: Handle,
        entry: &str,
        f: impl FnOnce(&ArrayObj) -> Result<T, ManagedException>,
    ) -> ApiResult<T> {
        let value = self.value(handle)?;
        let result = match &value {
            Value::Array(array) => f(array),
            other => Err(method_error(entry, &[other.clone()])),
        };
        result.or_else(|exc| self.fail(exc))
    }
}

fn type_error(expected: &str, got: &Value) -> ManagedException {
    exception(
        "TypeError",
        format!("expected {}, got a value of type {}", expected, got.type_name()),
    )
}

fn inexact(target: &str, value: &Value) -> ManagedException {
    exception("InexactError", format!("{}({})", target, value.repr()))
}

fn buffer_values(buffer: &ArrayBuffer) -> Vec<Value> {
    match buffer {
        ArrayBuffer::Bool(v) => v.iter().map(|b| Value::Bool(*b)).collect(),
        ArrayBuffer::Int8(v) => v.iter().map(|i| Value::Int(i64::from(*i))).collect(),
        ArrayBuffer::Int16(v) => v.iter().map(|i| Value::Int(i64::from(*i))).collect(),
        ArrayBuffer::Int32(v) => v.iter().map(|i| Value::Int(i64::from(*i))).collect(),
        ArrayBuffer::Int64(v) => v.iter().map(|i| Value::Int(*i)).collect(),
        ArrayBuffer::UInt8(v) => v.iter().map(|u| Value::UInt(u64::from(*u))).collect(),
        ArrayBuffer::UInt16(v) => v.iter().map(|u| Value::UInt(u64::from(*u))).collect(),
        ArrayBuffer::UInt32(v) => v.iter().map(|u| Value::UInt(u64::from(*u))).collect(),
        ArrayBuffer::UInt64(v) => v.iter().map(|u| Value::UInt(*u)).collect(),
        ArrayBuffer::Float32(v) => v.iter().map(|f| Value::Float32(*f)).collect(),
        ArrayBuffer::Float64(v) => v.iter().map(|f| Value::Float(*f)).collect(),
        ArrayBuffer::Complex64(v) => v
            .iter()
            .map(|c| Value::Complex(ComplexF64::new(f64::from(c.re), f64::from(c.im))))
            .collect(),
        ArrayBuffer::Complex128(v) => v.iter().map(|c| Value::Complex(*c)).collect(),
        ArrayBuffer::Str { items, .. } => items.iter().map(|s| Value::str(s.as_str())).collect(),
    }
}

fn values_buffer(dtype: DType, values: &[Value]) -> Option<ArrayBuffer> {
    macro_rules! collect {
        ($variant:ident, $conv:expr) => {
            ArrayBuffer::$variant(values.iter().map($conv).collect::<Option<Vec<_>>>()?)
        };
    }
    let int = |v: &Value| as_i128(v);
    Some(match dtype {
        DType::Bool => collect!(Bool, |v: &Value| match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        }),
        DType::Int8 => collect!(Int8, |v| int(v).and_then(|i| i8::try_from(i).ok())),
        DType::Int16 => collect!(Int16, |v| int(v).and_then(|i| i16::try_from(i).ok())),
        DType::Int32 => collect!(Int32, |v| int(v).and_then(|i| i32::try_from(i).ok())),
        DType::Int64 => collect!(Int64, |v| int(v).and_then(|i| i64::try_from(i).ok())),
        DType::UInt8 => collect!(UInt8, |v| int(v).and_then(|i| u8::try_from(i).ok())),
        DType::UInt16 => collect!(UInt16, |v| int(v).and_then(|i| u16::try_from(i).ok())),
        DType::UInt32 => collect!(UInt32, |v| int(v).and_then(|i| u32::try_from(i).ok())),
        DType::UInt64 => collect!(UInt64, |v| int(v).and_then(|i| u64::try_from(i).ok())),
        DType::Float32 => collect!(Float32, |v| as_f64(v).map(|x| x as f32)),
        DType::Float64 => collect!(Float64, as_f64),
        DType::Complex64 => collect!(Complex64, |v| as_complex(v).map(|c| ComplexF32 {
            re: c.re as f32,
            im: c.im as f32,
        })),
        DType::Complex128 => collect!(Complex128, as_complex),
        DType::Str { .. } => return None,
    })
}

impl ManagedApi for SimRuntime {
    fn release(&self, value: Handle) {
        let mut guard = self.heap.borrow_mut();
        let heap = &mut *guard;
        match heap.slots.get(&value).map(|slot| slot.rooted) {
            Some(true) => heap.illegal_releases.push(value),
            Some(false) => {
                heap.slots.remove(&value);
                *heap.release_counts.entry(value).or_default() += 1;
                heap.release_log.push(value);
            }
            None => match heap.release_counts.get_mut(&value) {
                Some(count) => {
                    *count += 1;
                    heap.double_releases.push(value);
                }
                None => heap.illegal_releases.push(value),
            },
        }
    }

    fn lookup(&self, name: &str) -> ApiResult<Handle> {
        let handle = self.heap.borrow().globals.get(name).copied();
        match handle {
            Some(handle) => Ok(handle),
            None => self.fail(exception("UndefVarError", format!("`{}` not defined", name))),
        }
    }

    fn eval(&self, code: &str) -> ApiResult<Handle> {
        let result = eval::parse(code).and_then(|expr| {
            expr.evaluate(&|name| self.resolve_global(name), &|func, args| {
                self.invoke(func, args, &[])
            })
        });
        self.finish(result)
    }

    fn fetch_error(&self) -> Option<ManagedException> {
        self.heap.borrow_mut().pending.take()
    }

    fn has_pending_error(&self) -> bool {
        self.heap.borrow().pending.is_some()
    }

    fn enable_backtrace(&self, enabled: bool) {
        self.heap.borrow_mut().backtrace = enabled;
    }

    fn call(
        &self,
        func: Handle,
        args: &[Handle],
        kwargs: &[(Symbol, Handle)],
    ) -> ApiResult<Handle> {
        let func = self.value(func)?;
        let args = self.values(args)?;
        let mut named = Vec::with_capacity(kwargs.len());
        for (symbol, value) in kwargs {
            named.push((self.symbol_name(*symbol)?, self.value(*value)?));
        }
        let result = self.invoke(&func, &args, &named);
        self.finish(result)
    }

    fn symbol(&self, name: &str) -> ApiResult<Symbol> {
        let (index, _) = self.heap.borrow_mut().symbols.insert_full(SmolStr::new(name));
        Ok(Symbol::from_raw(index as u64 + 1))
    }

    fn type_slot(&self, ty: Handle) -> ApiResult<TypeSlot> {
        match self.value(ty)? {
            Value::Type(category) => Ok(TypeSlot::from_raw(category.slot())),
            other => self.fail(type_error("Type", &other)),
        }
    }

    fn is_instance(&self, value: Handle, slot: TypeSlot) -> bool {
        match (self.value_of(value), Category::from_slot(slot.raw())) {
            (Some(value), Some(category)) => category.contains(&value),
            _ => false,
        }
    }

    fn get_property(&self, value: Handle, name: Symbol) -> ApiResult<Handle> {
        let target = self.value(value)?;
        let name = self.symbol_name(name)?;
        self.finish(Builtin::GetProperty.apply(&[target, Value::Symbol(name)], &[]))
    }

    fn set_property(&self, value: Handle, name: Symbol, new: Handle) -> ApiResult<()> {
        let target = self.value(value)?;
        let name = self.symbol_name(name)?;
        let new = self.value(new)?;
        match Builtin::SetProperty.apply(&[target, Value::Symbol(name), new], &[]) {
            Ok(_) => Ok(()),
            Err(exc) => self.fail(exc),
        }
    }

    fn has_property(&self, value: Handle, name: Symbol) -> ApiResult<bool> {
        let target = self.value(value)?;
        let name = self.symbol_name(name)?;
        match Builtin::HasProperty.apply(&[target, Value::Symbol(name)], &[]) {
            Ok(Value::Bool(b)) => Ok(b),
            Ok(other) => self.fail(type_error("Bool", &other)),
            Err(exc) => self.fail(exc),
        }
    }

    fn get_index(&self, value: Handle, index: &[Handle]) -> ApiResult<Handle> {
        let mut args = vec![self.value(value)?];
        args.extend(self.values(index)?);
        self.finish(Builtin::GetIndex.apply(&args, &[]))
    }

    fn get_index_i(&self, value: Handle, index: i64) -> ApiResult<Handle> {
        let target = self.value(value)?;
        self.finish(Builtin::GetIndex.apply(&[target, Value::Int(index)], &[]))
    }

    fn set_index(&self, value: Handle, index: &[Handle], new: Handle) -> ApiResult<()> {
        let mut args = vec![self.value(value)?, self.value(new)?];
        args.extend(self.values(index)?);
        match Builtin::SetIndex.apply(&args, &[]) {
            Ok(_) => Ok(()),
            Err(exc) => self.fail(exc),
        }
    }

    fn get_bool(&self, value: Handle) -> ApiResult<bool> {
        match self.value(value)? {
            Value::Bool(b) => Ok(b),
            other => self.fail(type_error("Bool", &other)),
        }
    }

    fn get_i64(&self, value: Handle) -> ApiResult<i64> {
        let value = self.value(value)?;
        match as_i128(&value) {
            Some(i) => match i64::try_from(i) {
                Ok(i) => Ok(i),
                Err(_) => self.fail(inexact("Int64", &value)),
            },
            None => self.fail(type_error("Integer", &value)),
        }
    }

    fn get_u64(&self, value: Handle) -> ApiResult<u64> {
        let value = self.value(value)?;
        match as_i128(&value) {
            Some(i) => match u64::try_from(i) {
                Ok(u) => Ok(u),
                Err(_) => self.fail(inexact("UInt64", &value)),
            },
            None => self.fail(type_error("Integer", &value)),
        }
    }

    fn get_f64(&self, value: Handle) -> ApiResult<f64> {
        let value = self.value(value)?;
        match &value {
            Value::Complex(c) if c.im == 0.0 => Ok(c.re),
            Value::Complex(_) => self.fail(inexact("Float64", &value)),
            other => match as_f64(other) {
                Some(x) => Ok(x),
                None => self.fail(type_error("Real", other)),
            },
        }
    }

    fn get_complex(&self, value: Handle) -> ApiResult<ComplexF64> {
        let value = self.value(value)?;
        match as_complex(&value) {
            Some(c) => Ok(c),
            None => self.fail(type_error("Number", &value)),
        }
    }

    fn get_utf8(&self, value: Handle) -> ApiResult<String> {
        match self.value(value)? {
            Value::Str(s) => Ok(s.to_string()),
            other => self.fail(type_error("String", &other)),
        }
    }

    fn new_bool(&self, value: bool) -> ApiResult<Handle> {
        Ok(self.alloc(Value::Bool(value)))
    }

    fn new_i64(&self, value: i64) -> ApiResult<Handle> {
        Ok(self.alloc(Value::Int(value)))
    }

    fn new_f64(&self, value: f64) -> ApiResult<Handle> {
        Ok(self.alloc(Value::Float(value)))
    }

    fn new_complex(&self, value: ComplexF64) -> ApiResult<Handle> {
        Ok(self.alloc(Value::Complex(value)))
    }

    fn new_string(&self, value: &str) -> ApiResult<Handle> {
        Ok(self.alloc(Value::str(value)))
    }

    fn new_string_vector(&self, len: usize) -> ApiResult<Handle> {
        let data = vec![Value::str(""); len];
        Ok(self.alloc(Value::array(ElemType::String, vec![len], data)))
    }

    fn str_vec_write(&self, vector: Handle, index: usize, value: &str) -> ApiResult<()> {
        let target = self.value(vector)?;
        let args = [target, Value::str(value), Value::Int(index as i64)];
        match Builtin::SetIndex.apply(&args, &[]) {
            Ok(_) => Ok(()),
            Err(exc) => self.fail(exc),
        }
    }

    fn array_import(&self, data: &ArrayData) -> ApiResult<Handle> {
        if self.heap.borrow().fail_array_import {
            return self.fail(exception("ErrorException", "injected array import failure"));
        }
        let dtype = data.dtype();
        if dtype.is_string() {
            return self.fail(exception(
                "ArgumentError",
                format!("no managed array type for host dtype {}", dtype),
            ));
        }
        let values = buffer_values(&data.to_column_major());
        Ok(self.alloc(Value::array(
            ElemType::Native(dtype),
            data.shape().to_vec(),
            values,
        )))
    }

    fn array_export(&self, value: Handle) -> ApiResult<ArrayData> {
        if self.heap.borrow().fail_array_export {
            return self.fail(exception("ErrorException", "injected array export failure"));
        }
        let target = self.value(value)?;
        let type_name = target.type_name();
        self.with_array(value, "array_export", |array| {
            let unsupported = || {
                exception(
                    "ArgumentError",
                    format!("cannot export {} as a host array", type_name),
                )
            };
            let ElemType::Native(dtype) = array.elem else {
                return Err(unsupported());
            };
            let buffer = values_buffer(dtype, &array.data.borrow()).ok_or_else(unsupported)?;
            ArrayData::from_column_major(array.shape.clone(), &buffer)
                .map_err(|err| exception("ArgumentError", err.to_string()))
        })
    }

    fn array_rank(&self, value: Handle) -> ApiResult<usize> {
        self.with_array(value, "ndims", |array| Ok(array.shape.len()))
    }

    fn array_size(&self, value: Handle, dim: usize) -> ApiResult<usize> {
        self.with_array(value, "size", |array| {
            if dim == 0 {
                return Err(exception("BoundsError", "array dimension must be >= 1"));
            }
            Ok(array.shape.get(dim - 1).copied().unwrap_or(1))
        })
    }
}
