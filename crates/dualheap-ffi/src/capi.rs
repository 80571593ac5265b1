//! C API Function Table
//!
//! The managed runtime exports its API as a versioned `#[repr(C)]` table
//! of function pointers. [`TableApi`] validates a table once and then
//! implements [`ManagedApi`] by calling through it.
//!
//! ## Calling Convention
//!
//! - Every fallible entry returns a status byte, `0` for success.
//! - Results are written through the first (`out`) pointer argument.
//! - Strings and argument lists travel as [`SList`] (pointer + length);
//!   strings are UTF-8 and not NUL-terminated.
//! - `fetch_error` writes the pending exception as `"Type: message"` and
//!   clears it.
//!
//! Entries the bridge cannot work without are checked by
//! [`TableApi::new`]; the others may be null, in which case the matching
//! `ManagedApi` method fails with an "unavailable" exception.

use std::cell::RefCell;
use std::fmt;

use crate::api::{ApiResult, ManagedApi, ManagedException};
use crate::array::{ArrayData, ComplexF64};
use crate::error::{FfiError, FfiResult, PendingError};
use crate::handle::{Handle, Symbol, TypeSlot};

/// Table revision this crate understands
pub const CAPI_VERSION: u32 = 1;

/// Status byte for a successful call
pub const STATUS_OK: u8 = 0;

/// Borrowed list passed to the managed side (`SList<T>` in C)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SList<T> {
    /// First element
    pub data: *const T,
    /// Number of elements
    pub len: i64,
}

impl<T> SList<T> {
    /// View a Rust slice as an `SList`
    pub fn adapt(items: &[T]) -> Self {
        Self {
            data: items.as_ptr(),
            len: items.len() as i64,
        }
    }
}

/// Writable buffer filled by the managed side
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SListMut<T> {
    /// First element
    pub data: *mut T,
    /// Capacity in elements
    pub len: i64,
}

/// Keyword argument pair (`STuple<JSym, JV>` in C)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KwArg {
    /// Keyword name
    pub name: Symbol,
    /// Argument value (borrowed)
    pub value: Handle,
}

type Status = u8;

/// The managed runtime's exported function table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CApiTable {
    /// Must equal [`CAPI_VERSION`]
    pub version: u32,
    /// Release an owned handle
    pub free: Option<unsafe extern "C" fn(Handle)>,
    /// Evaluate code in a module (`Handle::NULL` for main)
    pub eval: Option<unsafe extern "C" fn(*mut Handle, Handle, SList<u8>) -> Status>,
    /// Byte size of the pending exception message, 0 if none
    pub fetch_error_size: Option<unsafe extern "C" fn(*mut i64) -> Status>,
    /// Write and clear the pending exception
    pub fetch_error: Option<unsafe extern "C" fn(SListMut<u8>) -> Status>,
    /// Toggle backtraces in exception messages
    pub enable_backtrace: Option<unsafe extern "C" fn(u8)>,
    /// Call a function
    pub call: Option<unsafe extern "C" fn(*mut Handle, Handle, SList<Handle>, SList<KwArg>) -> Status>,
    /// Intern a symbol
    pub symbol_from_string: Option<unsafe extern "C" fn(*mut Symbol, SList<u8>) -> Status>,
    /// Slot of a type value
    pub type_to_ident: Option<unsafe extern "C" fn(*mut TypeSlot, Handle) -> Status>,
    /// `value isa slot`, nonzero for true
    pub is_instance_with_slot: Option<unsafe extern "C" fn(Handle, TypeSlot) -> u8>,
    /// Property read
    pub get_property: Option<unsafe extern "C" fn(*mut Handle, Handle, Symbol) -> Status>,
    /// Property write
    pub set_property: Option<unsafe extern "C" fn(Handle, Symbol, Handle) -> Status>,
    /// Property test
    pub has_property: Option<unsafe extern "C" fn(*mut u8, Handle, Symbol) -> Status>,
    /// Indexed read
    pub get_index: Option<unsafe extern "C" fn(*mut Handle, Handle, SList<Handle>) -> Status>,
    /// Indexed read with an integer
    pub get_index_i: Option<unsafe extern "C" fn(*mut Handle, Handle, i64) -> Status>,
    /// Indexed write
    pub set_index: Option<unsafe extern "C" fn(Handle, SList<Handle>, Handle) -> Status>,
    /// Read a Bool
    pub get_bool: Option<unsafe extern "C" fn(*mut u8, Handle, u8) -> Status>,
    /// Read an Int64
    pub get_i64: Option<unsafe extern "C" fn(*mut i64, Handle, u8) -> Status>,
    /// Read a UInt64
    pub get_u64: Option<unsafe extern "C" fn(*mut u64, Handle, u8) -> Status>,
    /// Read a Float64
    pub get_f64: Option<unsafe extern "C" fn(*mut f64, Handle, u8) -> Status>,
    /// Read a ComplexF64
    pub get_complex: Option<unsafe extern "C" fn(*mut ComplexF64, Handle, u8) -> Status>,
    /// Byte length of a String
    pub utf8_nbytes: Option<unsafe extern "C" fn(*mut i64, Handle) -> Status>,
    /// Copy a String's bytes
    pub get_utf8: Option<unsafe extern "C" fn(SListMut<u8>, Handle) -> Status>,
    /// New Bool
    pub to_bool: Option<unsafe extern "C" fn(*mut Handle, u8) -> Status>,
    /// New Int64
    pub to_i64: Option<unsafe extern "C" fn(*mut Handle, i64) -> Status>,
    /// New Float64
    pub to_f64: Option<unsafe extern "C" fn(*mut Handle, f64) -> Status>,
    /// New ComplexF64
    pub to_complex: Option<unsafe extern "C" fn(*mut Handle, ComplexF64) -> Status>,
    /// New String
    pub to_string: Option<unsafe extern "C" fn(*mut Handle, SList<u8>) -> Status>,
    /// New Vector{String}
    pub new_string_vector: Option<unsafe extern "C" fn(*mut Handle, i64) -> Status>,
    /// Write a string vector element (1-based)
    pub str_vec_write: Option<unsafe extern "C" fn(Handle, i64, SList<u8>) -> Status>,
    /// Array rank
    pub array_rank: Option<unsafe extern "C" fn(*mut i64, Handle) -> Status>,
    /// Array dimension size (1-based)
    pub array_size: Option<unsafe extern "C" fn(*mut i64, Handle, i64) -> Status>,
}

impl CApiTable {
    /// A table of the current version with every entry null
    pub const fn empty() -> Self {
        Self {
            version: CAPI_VERSION,
            free: None,
            eval: None,
            fetch_error_size: None,
            fetch_error: None,
            enable_backtrace: None,
            call: None,
            symbol_from_string: None,
            type_to_ident: None,
            is_instance_with_slot: None,
            get_property: None,
            set_property: None,
            has_property: None,
            get_index: None,
            get_index_i: None,
            set_index: None,
            get_bool: None,
            get_i64: None,
            get_u64: None,
            get_f64: None,
            get_complex: None,
            utf8_nbytes: None,
            get_utf8: None,
            to_bool: None,
            to_i64: None,
            to_f64: None,
            to_complex: None,
            to_string: None,
            new_string_vector: None,
            str_vec_write: None,
            array_rank: None,
            array_size: None,
        }
    }

    fn required_entries(&self) -> [(&'static str, bool); 8] {
        [
            ("free", self.free.is_some()),
            ("eval", self.eval.is_some()),
            ("fetch_error_size", self.fetch_error_size.is_some()),
            ("fetch_error", self.fetch_error.is_some()),
            ("call", self.call.is_some()),
            ("symbol_from_string", self.symbol_from_string.is_some()),
            ("type_to_ident", self.type_to_ident.is_some()),
            ("is_instance_with_slot", self.is_instance_with_slot.is_some()),
        ]
    }
}

impl fmt::Debug for CApiTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing: Vec<&str> = self
            .required_entries()
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect();
        f.debug_struct("CApiTable")
            .field("version", &self.version)
            .field("missing_required", &missing)
            .finish_non_exhaustive()
    }
}

/// Fetch a table entry or fail the surrounding call as unavailable.
macro_rules! entry {
    ($self:ident, $name:ident) => {
        match $self.table.$name {
            Some(f) => f,
            None => return $self.unavailable(stringify!($name)),
        }
    };
}

/// [`ManagedApi`] over a validated [`CApiTable`].
///
/// Failures raised by this adapter itself (a null optional entry) are
/// kept locally and reported by `fetch_error` ahead of the runtime's own.
/// `lookup` goes through `eval`; its results are held for the life of the
/// process and never freed.
pub struct TableApi {
    table: CApiTable,
    local_error: RefCell<Option<ManagedException>>,
}

impl TableApi {
    /// Validate the version and the required entries of a table
    pub fn new(table: &CApiTable) -> FfiResult<Self> {
        if table.version != CAPI_VERSION {
            return Err(FfiError::VersionMismatch {
                expected: CAPI_VERSION,
                actual: table.version,
            });
        }
        for (entry, present) in table.required_entries() {
            if !present {
                return Err(FfiError::MissingEntry { entry });
            }
        }
        Ok(Self {
            table: *table,
            local_error: RefCell::new(None),
        })
    }

    fn unavailable<T>(&self, entry: &'static str) -> ApiResult<T> {
        *self.local_error.borrow_mut() = Some(ManagedException::new(
            "UnavailableError",
            format!("C API entry '{}' is not provided", entry),
        ));
        Err(PendingError)
    }

    fn status(status: Status) -> ApiResult<()> {
        if status == STATUS_OK {
            Ok(())
        } else {
            Err(PendingError)
        }
    }

    fn pending_size(&self) -> i64 {
        let Some(size_fn) = self.table.fetch_error_size else {
            return 0;
        };
        let mut size = 0i64;
        let status = unsafe { size_fn(&mut size) };
        if status == STATUS_OK {
            size
        } else {
            0
        }
    }
}

impl fmt::Debug for TableApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableApi")
            .field("table", &self.table)
            .field("local_error", &self.local_error.borrow())
            .finish()
    }
}

impl ManagedApi for TableApi {
    fn release(&self, value: Handle) {
        if let Some(free) = self.table.free {
            unsafe { free(value) }
        }
    }

    fn lookup(&self, name: &str) -> ApiResult<Handle> {
        self.eval(name)
    }

    fn eval(&self, code: &str) -> ApiResult<Handle> {
        let f = entry!(self, eval);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, Handle::NULL, SList::adapt(code.as_bytes())) })?;
        Ok(out)
    }

    fn fetch_error(&self) -> Option<ManagedException> {
        if let Some(local) = self.local_error.borrow_mut().take() {
            return Some(local);
        }
        let size = self.pending_size();
        if size <= 0 {
            return None;
        }
        let fetch = self.table.fetch_error?;
        let mut buf = vec![0u8; size as usize];
        let status = unsafe {
            fetch(SListMut {
                data: buf.as_mut_ptr(),
                len: size,
            })
        };
        if status != STATUS_OK {
            return None;
        }
        let text = String::from_utf8_lossy(&buf).into_owned();
        Some(match text.split_once(": ") {
            Some((exception, message)) => ManagedException::new(exception, message),
            None => ManagedException::new("ManagedError", text),
        })
    }

    fn has_pending_error(&self) -> bool {
        self.local_error.borrow().is_some() || self.pending_size() > 0
    }

    fn enable_backtrace(&self, enabled: bool) {
        if let Some(f) = self.table.enable_backtrace {
            unsafe { f(u8::from(enabled)) }
        }
    }

    fn call(
        &self,
        func: Handle,
        args: &[Handle],
        kwargs: &[(Symbol, Handle)],
    ) -> ApiResult<Handle> {
        let f = entry!(self, call);
        let kwargs: Vec<KwArg> = kwargs
            .iter()
            .map(|&(name, value)| KwArg { name, value })
            .collect();
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, func, SList::adapt(args), SList::adapt(&kwargs)) })?;
        Ok(out)
    }

    fn symbol(&self, name: &str) -> ApiResult<Symbol> {
        let f = entry!(self, symbol_from_string);
        let mut out = Symbol::NULL;
        Self::status(unsafe { f(&mut out, SList::adapt(name.as_bytes())) })?;
        Ok(out)
    }

    fn type_slot(&self, ty: Handle) -> ApiResult<TypeSlot> {
        let f = entry!(self, type_to_ident);
        let mut out = TypeSlot::NULL;
        Self::status(unsafe { f(&mut out, ty) })?;
        Ok(out)
    }

    fn is_instance(&self, value: Handle, slot: TypeSlot) -> bool {
        match self.table.is_instance_with_slot {
            Some(f) => unsafe { f(value, slot) != 0 },
            None => false,
        }
    }

    fn get_property(&self, value: Handle, name: Symbol) -> ApiResult<Handle> {
        let f = entry!(self, get_property);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value, name) })?;
        Ok(out)
    }

    fn set_property(&self, value: Handle, name: Symbol, new: Handle) -> ApiResult<()> {
        let f = entry!(self, set_property);
        Self::status(unsafe { f(value, name, new) })
    }

    fn has_property(&self, value: Handle, name: Symbol) -> ApiResult<bool> {
        let f = entry!(self, has_property);
        let mut out = 0u8;
        Self::status(unsafe { f(&mut out, value, name) })?;
        Ok(out != 0)
    }

    fn get_index(&self, value: Handle, index: &[Handle]) -> ApiResult<Handle> {
        let f = entry!(self, get_index);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value, SList::adapt(index)) })?;
        Ok(out)
    }

    fn get_index_i(&self, value: Handle, index: i64) -> ApiResult<Handle> {
        let f = entry!(self, get_index_i);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value, index) })?;
        Ok(out)
    }

    fn set_index(&self, value: Handle, index: &[Handle], new: Handle) -> ApiResult<()> {
        let f = entry!(self, set_index);
        Self::status(unsafe { f(value, SList::adapt(index), new) })
    }

    fn get_bool(&self, value: Handle) -> ApiResult<bool> {
        let f = entry!(self, get_bool);
        let mut out = 0u8;
        Self::status(unsafe { f(&mut out, value, 1) })?;
        Ok(out != 0)
    }

    fn get_i64(&self, value: Handle) -> ApiResult<i64> {
        let f = entry!(self, get_i64);
        let mut out = 0i64;
        Self::status(unsafe { f(&mut out, value, 1) })?;
        Ok(out)
    }

    fn get_u64(&self, value: Handle) -> ApiResult<u64> {
        let f = entry!(self, get_u64);
        let mut out = 0u64;
        Self::status(unsafe { f(&mut out, value, 1) })?;
        Ok(out)
    }

    fn get_f64(&self, value: Handle) -> ApiResult<f64> {
        let f = entry!(self, get_f64);
        let mut out = 0f64;
        Self::status(unsafe { f(&mut out, value, 1) })?;
        Ok(out)
    }

    fn get_complex(&self, value: Handle) -> ApiResult<ComplexF64> {
        let f = entry!(self, get_complex);
        let mut out = ComplexF64::default();
        Self::status(unsafe { f(&mut out, value, 1) })?;
        Ok(out)
    }

    fn get_utf8(&self, value: Handle) -> ApiResult<String> {
        let nbytes = entry!(self, utf8_nbytes);
        let read = entry!(self, get_utf8);
        let mut len = 0i64;
        Self::status(unsafe { nbytes(&mut len, value) })?;
        let mut buf = vec![0u8; len.max(0) as usize];
        Self::status(unsafe {
            read(
                SListMut {
                    data: buf.as_mut_ptr(),
                    len,
                },
                value,
            )
        })?;
        match String::from_utf8(buf) {
            Ok(text) => Ok(text),
            Err(err) => {
                *self.local_error.borrow_mut() = Some(ManagedException::new(
                    "UnicodeError",
                    FfiError::from(err).to_string(),
                ));
                Err(PendingError)
            }
        }
    }

    fn new_bool(&self, value: bool) -> ApiResult<Handle> {
        let f = entry!(self, to_bool);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, u8::from(value)) })?;
        Ok(out)
    }

    fn new_i64(&self, value: i64) -> ApiResult<Handle> {
        let f = entry!(self, to_i64);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value) })?;
        Ok(out)
    }

    fn new_f64(&self, value: f64) -> ApiResult<Handle> {
        let f = entry!(self, to_f64);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value) })?;
        Ok(out)
    }

    fn new_complex(&self, value: ComplexF64) -> ApiResult<Handle> {
        let f = entry!(self, to_complex);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, value) })?;
        Ok(out)
    }

    fn new_string(&self, value: &str) -> ApiResult<Handle> {
        let f = entry!(self, to_string);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, SList::adapt(value.as_bytes())) })?;
        Ok(out)
    }

    fn new_string_vector(&self, len: usize) -> ApiResult<Handle> {
        let f = entry!(self, new_string_vector);
        let mut out = Handle::NULL;
        Self::status(unsafe { f(&mut out, len as i64) })?;
        Ok(out)
    }

    fn str_vec_write(&self, vector: Handle, index: usize, value: &str) -> ApiResult<()> {
        let f = entry!(self, str_vec_write);
        Self::status(unsafe { f(vector, index as i64, SList::adapt(value.as_bytes())) })
    }

    fn array_import(&self, _data: &ArrayData) -> ApiResult<Handle> {
        self.unavailable("array_import")
    }

    fn array_export(&self, _value: Handle) -> ApiResult<ArrayData> {
        self.unavailable("array_export")
    }

    fn array_rank(&self, value: Handle) -> ApiResult<usize> {
        let f = entry!(self, array_rank);
        let mut out = 0i64;
        Self::status(unsafe { f(&mut out, value) })?;
        Ok(out.max(0) as usize)
    }

    fn array_size(&self, value: Handle, dim: usize) -> ApiResult<usize> {
        let f = entry!(self, array_size);
        let mut out = 0i64;
        Self::status(unsafe { f(&mut out, value, dim as i64) })?;
        Ok(out.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    thread_local! {
        static FREED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
        static PENDING: RefCell<Option<String>> = const { RefCell::new(None) };
    }

    unsafe extern "C" fn t_free(value: Handle) {
        FREED.with(|freed| freed.borrow_mut().push(value.raw()));
    }

    unsafe extern "C" fn t_eval(out: *mut Handle, _module: Handle, code: SList<u8>) -> u8 {
        let bytes = std::slice::from_raw_parts(code.data, code.len as usize);
        if bytes == b"boom" {
            PENDING.with(|p| *p.borrow_mut() = Some("ErrorException: boom".to_string()));
            return 1;
        }
        *out = Handle::from_raw(100 + bytes.len() as u64);
        STATUS_OK
    }

    unsafe extern "C" fn t_fetch_size(size: *mut i64) -> u8 {
        *size = PENDING.with(|p| p.borrow().as_ref().map_or(0, |m| m.len() as i64));
        STATUS_OK
    }

    unsafe extern "C" fn t_fetch(buf: SListMut<u8>) -> u8 {
        let Some(message) = PENDING.with(|p| p.borrow_mut().take()) else {
            return 1;
        };
        let n = message.len().min(buf.len as usize);
        std::ptr::copy_nonoverlapping(message.as_ptr(), buf.data, n);
        STATUS_OK
    }

    unsafe extern "C" fn t_call(
        out: *mut Handle,
        func: Handle,
        args: SList<Handle>,
        _kwargs: SList<KwArg>,
    ) -> u8 {
        *out = Handle::from_raw(func.raw() * 10 + args.len as u64);
        STATUS_OK
    }

    unsafe extern "C" fn t_symbol(out: *mut Symbol, name: SList<u8>) -> u8 {
        *out = Symbol::from_raw(name.len as u64);
        STATUS_OK
    }

    unsafe extern "C" fn t_type_to_ident(out: *mut TypeSlot, ty: Handle) -> u8 {
        *out = TypeSlot::from_raw(ty.raw());
        STATUS_OK
    }

    unsafe extern "C" fn t_isa(value: Handle, slot: TypeSlot) -> u8 {
        u8::from(value.raw() % slot.raw().max(1) == 0)
    }

    fn minimal_table() -> CApiTable {
        CApiTable {
            free: Some(t_free),
            eval: Some(t_eval),
            fetch_error_size: Some(t_fetch_size),
            fetch_error: Some(t_fetch),
            call: Some(t_call),
            symbol_from_string: Some(t_symbol),
            type_to_ident: Some(t_type_to_ident),
            is_instance_with_slot: Some(t_isa),
            ..CApiTable::empty()
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let table = CApiTable {
            version: CAPI_VERSION + 1,
            ..minimal_table()
        };
        let err = TableApi::new(&table).unwrap_err();
        assert_eq!(
            err,
            FfiError::VersionMismatch {
                expected: CAPI_VERSION,
                actual: CAPI_VERSION + 1
            }
        );
    }

    #[test]
    fn test_missing_required_entry_rejected() {
        let table = CApiTable {
            call: None,
            ..minimal_table()
        };
        let err = TableApi::new(&table).unwrap_err();
        assert_eq!(err, FfiError::MissingEntry { entry: "call" });
    }

    #[test]
    fn test_calls_go_through_table() {
        let api = TableApi::new(&minimal_table()).unwrap();
        assert_eq!(api.eval("abc").unwrap(), Handle::from_raw(103));
        let out = api
            .call(Handle::from_raw(4), &[Handle::from_raw(1), Handle::from_raw(2)], &[])
            .unwrap();
        assert_eq!(out, Handle::from_raw(42));
        assert_eq!(api.symbol("name").unwrap(), Symbol::from_raw(4));
        assert!(api.is_instance(Handle::from_raw(6), TypeSlot::from_raw(3)));
        assert!(!api.is_instance(Handle::from_raw(7), TypeSlot::from_raw(3)));
    }

    #[test]
    fn test_release_forwards_to_free() {
        let api = TableApi::new(&minimal_table()).unwrap();
        api.release(Handle::from_raw(77));
        FREED.with(|freed| assert!(freed.borrow().contains(&77)));
    }

    #[test]
    fn test_managed_error_fetched_once() {
        let api = TableApi::new(&minimal_table()).unwrap();
        assert!(api.eval("boom").is_err());
        assert!(api.has_pending_error());

        let exc = api.fetch_error().unwrap();
        assert_eq!(exc, ManagedException::new("ErrorException", "boom"));
        assert!(!api.has_pending_error());
        assert!(api.fetch_error().is_none());
    }

    #[test]
    fn test_optional_entry_unavailable() {
        let api = TableApi::new(&minimal_table()).unwrap();
        assert!(api.get_i64(Handle::from_raw(1)).is_err());
        let exc = api.fetch_error().unwrap();
        assert_eq!(exc.exception, "UnavailableError");
        assert!(exc.message.contains("get_i64"));
        assert!(api.array_export(Handle::from_raw(1)).is_err());
        assert!(api.fetch_error().unwrap().message.contains("array_export"));
    }
}
