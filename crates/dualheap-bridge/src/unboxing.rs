//! Unboxing Engine
//!
//! Converts a host object into a managed handle. Dispatch is on the
//! object's exact class, so instances of user subclasses of `int` or
//! `str` are rejected rather than silently converted.
//!
//! | Host class      | Managed value                 | Ownership |
//! |-----------------|-------------------------------|-----------|
//! | `NoneType`      | `nothing`                     | Borrowed  |
//! | opaque box      | the wrapped handle            | Borrowed  |
//! | `int`           | `Int64`                       | Owned     |
//! | `float`         | `Float64`                     | Owned     |
//! | `str`           | `String`                      | Owned     |
//! | `bool`          | `Bool`                        | Owned     |
//! | `complex`       | `ComplexF64`                  | Owned     |
//! | `tuple`         | `Tuple` of unboxed elements   | Owned     |
//! | `ndarray`       | native array, or `String` array for string dtypes | Owned |
//!
//! The result comes back as an [`Unboxed`] guard that releases an owned
//! handle when dropped.

use std::fmt;

use dualheap_ffi::{ArrayData, ComplexF64, Converted, Handle, ManagedApi};
use tracing::trace;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult, ConversionError};
use crate::host::{HostErrorKind, HostRef};
use crate::opaque::OpaqueBox;
use crate::registry::UnboxKind;

/// A converted handle together with its release obligation.
///
/// Dropping the guard releases an owned handle; borrowed handles are left
/// alone. [`Unboxed::into_converted`] hands the obligation to the caller.
#[must_use = "dropping an unboxed value releases it immediately"]
pub struct Unboxed<'a> {
    api: &'a dyn ManagedApi,
    converted: Converted,
}

impl<'a> Unboxed<'a> {
    pub fn owned(api: &'a dyn ManagedApi, handle: Handle) -> Self {
        Self {
            api,
            converted: Converted::Owned(handle),
        }
    }

    pub fn borrowed(api: &'a dyn ManagedApi, handle: Handle) -> Self {
        Self {
            api,
            converted: Converted::Borrowed(handle),
        }
    }

    pub fn handle(&self) -> Handle {
        self.converted.handle()
    }

    pub fn is_owned(&self) -> bool {
        self.converted.is_owned()
    }

    /// Ownership tag without giving up the guard
    pub fn converted(&self) -> Converted {
        self.converted
    }

    /// Disarm the guard; the caller now releases an owned handle
    pub fn into_converted(self) -> Converted {
        let converted = self.converted;
        std::mem::forget(self);
        converted
    }
}

impl Drop for Unboxed<'_> {
    fn drop(&mut self) {
        self.converted.release(self.api);
    }
}

impl fmt::Debug for Unboxed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unboxed({:?})", self.converted)
    }
}

impl BridgeContext {
    /// Convert a host object into a managed handle
    pub fn unbox(&self, value: &HostRef) -> BridgeResult<Unboxed<'_>> {
        let kind = self
            .registry
            .unbox_kind(value.type_id())
            .ok_or_else(|| BridgeError::unsupported_type(value.type_name()))?;
        trace!(host_type = value.type_name(), ?kind, "unbox");

        let api = self.api();
        let handle = match kind {
            UnboxKind::Nothing => return Ok(Unboxed::borrowed(api, self.registry.nothing())),
            UnboxKind::Opaque => {
                let boxed = OpaqueBox::from_host(self, value)
                    .ok_or_else(|| BridgeError::null_handle("opaque box without a slot"))?;
                return Ok(Unboxed::borrowed(api, boxed.handle()));
            }
            UnboxKind::Int => {
                let v = self.interp.long_as_ssize(value);
                if v == -1 {
                    self.host_extraction_error(value, "Int64")?;
                }
                api.new_i64(v)
            }
            UnboxKind::Float => {
                let v = self.interp.float_as_double(value);
                if v == -1.0 {
                    self.host_extraction_error(value, "Float64")?;
                }
                api.new_f64(v)
            }
            UnboxKind::Str => {
                let text = self.interp.unicode_as_utf8(value).ok_or_else(|| {
                    let message = self
                        .interp
                        .err_fetch()
                        .map_or_else(|| "cannot read UTF-8".to_string(), |e| e.message);
                    BridgeError::from(ConversionError::Encoding { message })
                })?;
                api.new_string(&text)
            }
            UnboxKind::Bool => {
                let truth = if value.is(&self.interp.bool(true)) {
                    true
                } else if value.is(&self.interp.bool(false)) {
                    false
                } else {
                    match self.interp.is_true(value) {
                        -1 => {
                            self.host_extraction_error(value, "Bool")?;
                            false
                        }
                        n => n != 0,
                    }
                };
                api.new_bool(truth)
            }
            UnboxKind::Complex => {
                let (re, im) = self.interp.complex_as_parts(value);
                if re == -1.0 || im == -1.0 {
                    self.host_extraction_error(value, "ComplexF64")?;
                }
                api.new_complex(ComplexF64::new(re, im))
            }
            UnboxKind::Tuple => return Ok(Unboxed::owned(api, self.unbox_tuple(value)?)),
            UnboxKind::NdArray => {
                let data = value.as_array().ok_or_else(|| {
                    BridgeError::from(ConversionError::Extraction {
                        type_name: value.type_name().to_string(),
                        target: "Array",
                        message: "object has no array buffer".to_string(),
                    })
                })?;
                return self.unbox_ndarray(data);
            }
        };
        Ok(Unboxed::owned(api, self.check(handle)?))
    }

    /// Turn a pending host error after a sentinel read into a conversion
    /// error. A sentinel without a pending error is a legitimate value.
    fn host_extraction_error(&self, value: &HostRef, target: &'static str) -> BridgeResult<()> {
        let Some(exc) = self.interp.err_fetch() else {
            return Ok(());
        };
        let err = match exc.kind {
            HostErrorKind::OverflowError => ConversionError::Overflow {
                value: value.to_string(),
                target,
            },
            _ => ConversionError::Extraction {
                type_name: value.type_name().to_string(),
                target,
                message: exc.message,
            },
        };
        Err(err.into())
    }

    fn unbox_ndarray(&self, data: &ArrayData) -> BridgeResult<Unboxed<'_>> {
        let api = self.api();
        let dtype = data.dtype();
        let import_error = match api.array_import(data) {
            Ok(handle) => return Ok(Unboxed::owned(api, handle)),
            Err(_) => self.clear_pending_error(),
        };
        if !dtype.is_string() || !self.config.string_array_fallback {
            return Err(ConversionError::ArrayImport {
                dtype: dtype.to_string(),
                message: import_error
                    .map_or_else(|| "native import failed".to_string(), |e| e.to_string()),
            }
            .into());
        }
        self.unbox_string_array(data)
    }

    /// Build a managed `String` array element by element.
    ///
    /// Elements are written in column-major order so that reshaping the
    /// flat vector to the host shape reproduces the host's indexing.
    fn unbox_string_array(&self, data: &ArrayData) -> BridgeResult<Unboxed<'_>> {
        let api = self.api();
        let dtype = data.dtype();
        let failed = |stage: &str| -> BridgeError {
            let message = match self.clear_pending_error() {
                Some(exc) => format!("{}: {}", stage, exc),
                None => stage.to_string(),
            };
            ConversionError::ArrayImport {
                dtype: dtype.to_string(),
                message,
            }
            .into()
        };

        let items = data.strings_column_major().unwrap_or_default();
        trace!(len = items.len(), shape = ?data.shape(), "unbox string array");
        let vector = api
            .new_string_vector(items.len())
            .map_err(|_| failed("allocating string vector"))?;
        let vector = Unboxed::owned(api, vector);
        for (i, item) in items.iter().enumerate() {
            api.str_vec_write(vector.handle(), i + 1, item)
                .map_err(|_| failed("writing string element"))?;
        }
        if data.ndim() == 1 {
            return Ok(vector);
        }

        let mut dims = Vec::with_capacity(data.ndim().max(1));
        if data.ndim() == 0 {
            // zero-dimensional: reshape to the empty dimension tuple
            let empty = api
                .call(self.registry.functions.tuple, &[], &[])
                .map_err(|_| failed("allocating dimension"))?;
            dims.push(Unboxed::owned(api, empty));
        }
        for &extent in data.shape() {
            let dim = api
                .new_i64(extent as i64)
                .map_err(|_| failed("allocating dimension"))?;
            dims.push(Unboxed::owned(api, dim));
        }
        let mut args = Vec::with_capacity(dims.len() + 1);
        args.push(vector.handle());
        args.extend(dims.iter().map(Unboxed::handle));
        let reshaped = api
            .call(self.registry.functions.reshape, &args, &[])
            .map_err(|_| failed("reshaping string vector"))?;
        Ok(Unboxed::owned(api, reshaped))
    }
}
