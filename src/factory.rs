//! Constructors: one builder bound to one (type, name) slot.
//!
//! A constructor memoizes the first successful build and hands out the
//! same instance forever after. Concurrent first builds are serialized per
//! constructor: one caller wins the exclusive guard and builds, the others
//! wait on a shared acquisition and then observe the instance. A failed
//! build leaves the constructor unbuilt so a later call can retry.

use crate::context::Context;
use crate::error::{BoxError, DiError, Result};
use crate::flag::{Configurable, FlagValidation};
use crate::key::TypeKey;
use crate::provider::Builder;
use crate::validate::ValidatorHook;
use ahash::RandomState;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// A built value, type-erased. Always holds an `Arc<T>` for the key's `T`,
/// which lets `T` be a trait object.
pub(crate) type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Called with the dependency name and the error when a dependency the
/// constructor declared optional fails to build.
pub type OptionalHandler = Arc<dyn Fn(&str, &DiError) + Send + Sync>;

/// Object-safe view of a [`Builder`].
pub(crate) trait ErasedBuilder: Send + Sync {
    fn build(&self, ctx: &Context) -> std::result::Result<AnyInstance, BoxError>;
    fn retrofit(&self, instance: &AnyInstance) -> std::result::Result<(), BoxError>;
    fn options(&self) -> Option<&dyn Configurable>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct Typed<T: ?Sized, B> {
    builder: B,
    _type: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized, B> Typed<T, B> {
    pub(crate) fn new(builder: B) -> Self {
        Self {
            builder,
            _type: PhantomData,
        }
    }
}

impl<T, B> ErasedBuilder for Typed<T, B>
where
    T: ?Sized + Send + Sync + 'static,
    B: Builder<T>,
{
    fn build(&self, ctx: &Context) -> std::result::Result<AnyInstance, BoxError> {
        let value: Arc<T> = self.builder.build(ctx)?;
        Ok(Arc::new(value))
    }

    fn retrofit(&self, instance: &AnyInstance) -> std::result::Result<(), BoxError> {
        match instance.downcast_ref::<Arc<T>>() {
            Some(value) => self.builder.retrofit(value),
            None => Ok(()),
        }
    }

    fn options(&self) -> Option<&dyn Configurable> {
        self.builder.options()
    }

    fn as_any(&self) -> &dyn Any {
        &self.builder
    }
}

/// Registration-time settings carried by a constructor.
#[derive(Default)]
pub(crate) struct Wiring {
    pub(crate) validation: Option<FlagValidation>,
    pub(crate) selections: HashMap<TypeId, String, RandomState>,
    pub(crate) optionals: HashMap<TypeId, OptionalHandler, RandomState>,
}

pub(crate) struct Constructor {
    key: TypeKey,
    builder: Box<dyn ErasedBuilder>,
    instance: OnceCell<AnyInstance>,
    /// Held exclusively by the thread running the builder.
    guard: RwLock<()>,
    wiring: Wiring,
}

impl Constructor {
    pub(crate) fn new(key: TypeKey, builder: Box<dyn ErasedBuilder>, wiring: Wiring) -> Self {
        Self {
            key,
            builder,
            instance: OnceCell::new(),
            guard: RwLock::new(()),
            wiring,
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &TypeKey {
        &self.key
    }

    #[inline]
    pub(crate) fn instance(&self) -> Option<&AnyInstance> {
        self.instance.get()
    }

    #[inline]
    pub(crate) fn builder(&self) -> &dyn ErasedBuilder {
        &*self.builder
    }

    /// The name this constructor selected for dependencies of type `type_id`.
    #[inline]
    pub(crate) fn selection(&self, type_id: TypeId) -> Option<&str> {
        self.wiring.selections.get(&type_id).map(String::as_str)
    }

    #[inline]
    pub(crate) fn optional_handler(&self, type_id: TypeId) -> Option<&OptionalHandler> {
        self.wiring.optionals.get(&type_id)
    }

    /// Check the bound options of this constructor.
    pub(crate) fn validate(&self, hook: Option<&ValidatorHook>) -> Result<()> {
        match &self.wiring.validation {
            Some(validation) => validation.run(hook).map_err(|source| DiError::InvalidFlags {
                key: self.key.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn validation(&self) -> Option<&FlagValidation> {
        self.wiring.validation.as_ref()
    }

    /// Return the memoized instance, building it first if needed.
    pub(crate) fn build(&self, ctx: &Context) -> Result<AnyInstance> {
        loop {
            if let Some(instance) = self.instance.get() {
                return Ok(Arc::clone(instance));
            }

            if let Some(_building) = self.guard.try_write() {
                // another thread may have finished between the check and the guard
                if let Some(instance) = self.instance.get() {
                    return Ok(Arc::clone(instance));
                }

                #[cfg(feature = "logging")]
                debug!(
                    target: "di_registry",
                    service = self.key.type_name(),
                    name = self.key.name(),
                    depth = ctx.path().len(),
                    "Building instance"
                );

                let instance = self
                    .builder
                    .build(ctx)
                    .map_err(|source| DiError::build_failed(&self.key, source))?;
                let _ = self.instance.set(Arc::clone(&instance));

                #[cfg(feature = "logging")]
                debug!(
                    target: "di_registry",
                    service = self.key.type_name(),
                    name = self.key.name(),
                    "Instance built and memoized"
                );

                return Ok(instance);
            }

            // wait for the builder to finish, then look again
            drop(self.guard.read());
        }
    }

    /// Re-apply options to the built instance, if there is one.
    pub(crate) fn retrofit(&self) -> Result<()> {
        match self.instance.get() {
            Some(instance) => self
                .builder
                .retrofit(instance)
                .map_err(|source| DiError::RetrofitFailed {
                    key: self.key.clone(),
                    source,
                }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("key", &self.key)
            .field("built", &self.instance.get().is_some())
            .finish_non_exhaustive()
    }
}
