//! Bridge Context
//!
//! A `BridgeContext` ties one managed runtime to one host interpreter. It
//! owns the [`TypeRegistry`] and the configuration, and every engine
//! operation is a method on it.
//!
//! ## Initialization
//!
//! [`BridgeContext::initialize`] registers the opaque box class with the
//! host, forwards the backtrace setting and builds the registry. Embedders
//! that need a single shared context keep it in a [`ContextSlot`], whose
//! `initialize` is a no-op once a context exists.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use dualheap_ffi::{ApiResult, ManagedApi, ManagedException};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostType, Interp};
use crate::opaque::OPAQUE_TYPE_NAME;
use crate::registry::{HostTypes, TypeRegistry};

/// Conversion context for one managed runtime and one host interpreter
pub struct BridgeContext {
    pub(crate) api: Rc<dyn ManagedApi>,
    pub(crate) interp: Rc<Interp>,
    pub(crate) opaque_type: Rc<HostType>,
    pub(crate) registry: TypeRegistry,
    pub(crate) config: BridgeConfig,
}

impl BridgeContext {
    /// Resolve both runtimes' types and functions
    pub fn initialize(
        api: Rc<dyn ManagedApi>,
        interp: Rc<Interp>,
        config: BridgeConfig,
    ) -> BridgeResult<Self> {
        let opaque_type = interp.define_class(OPAQUE_TYPE_NAME, None);
        let host = HostTypes::from_interp(&interp, &opaque_type);
        api.enable_backtrace(config.backtrace_messages);
        let registry = TypeRegistry::build(Rc::clone(&api), host)?;
        debug!(?config, opaque_type = opaque_type.name(), "bridge context initialized");
        Ok(Self {
            api,
            interp,
            opaque_type,
            registry,
            config,
        })
    }

    pub fn api(&self) -> &dyn ManagedApi {
        &*self.api
    }

    pub fn interp(&self) -> &Interp {
        &self.interp
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The host class of opaque boxes
    pub fn opaque_type(&self) -> &Rc<HostType> {
        &self.opaque_type
    }

    /// Consume the pending managed exception as a bridge error
    pub fn managed_error(&self) -> BridgeError {
        match self.api.fetch_error() {
            Some(exc) => exc.into(),
            None => BridgeError::managed(
                "UnknownError",
                "managed call failed without a pending exception",
            ),
        }
    }

    /// Lift a managed API outcome, fetching the exception on failure
    pub fn check<T>(&self, result: ApiResult<T>) -> BridgeResult<T> {
        result.map_err(|_| self.managed_error())
    }

    /// Discard a spent managed exception so the next call does not see it
    pub fn clear_pending_error(&self) -> Option<ManagedException> {
        let spent = self.api.fetch_error();
        if let Some(exc) = &spent {
            debug!(error = %exc, "cleared spent managed error");
        }
        spent
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Holder for a context that is initialized at most once
#[derive(Default)]
pub struct ContextSlot {
    inner: OnceCell<Rc<BridgeContext>>,
}

impl ContextSlot {
    pub const fn new() -> Self {
        Self {
            inner: OnceCell::new(),
        }
    }

    /// Initialize the context, or return the existing one unchanged
    pub fn initialize(
        &self,
        api: Rc<dyn ManagedApi>,
        interp: Rc<Interp>,
        config: BridgeConfig,
    ) -> BridgeResult<Rc<BridgeContext>> {
        if let Some(ctx) = self.inner.get() {
            debug!("bridge context already initialized");
            return Ok(Rc::clone(ctx));
        }
        let ctx = Rc::new(BridgeContext::initialize(api, interp, config)?);
        Ok(Rc::clone(self.inner.get_or_init(|| ctx)))
    }

    /// The initialized context
    pub fn get(&self) -> BridgeResult<Rc<BridgeContext>> {
        self.inner.get().cloned().ok_or(BridgeError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl fmt::Debug for ContextSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSlot")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
