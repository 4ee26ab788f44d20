//! Per-registration settings for [`Registry::provide`](crate::Registry::provide).

use crate::error::DiError;
use crate::factory::{OptionalHandler, Wiring};
use crate::flag::FlagSet;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// How one builder is registered.
///
/// ```rust
/// use di_registry::ProvideOptions;
/// use di_registry::flag::FlagSet;
///
/// struct Cache;
///
/// let mut flags = FlagSet::new("app");
/// let opts = ProvideOptions::new()
///     .name("sessions")
///     .flags(&mut flags)
///     .flag_prefix("sessions")
///     .select::<Cache>("redis");
/// # drop(opts);
/// ```
#[derive(Default)]
pub struct ProvideOptions<'a> {
    pub(crate) name: String,
    pub(crate) overriding: bool,
    pub(crate) flags: Option<&'a mut FlagSet>,
    pub(crate) flag_prefix: String,
    pub(crate) wiring: Wiring,
}

impl<'a> ProvideOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `name` instead of the default slot.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace an existing registration for the same slot instead of failing.
    ///
    /// Flags the replaced builder bound into the same [`FlagSet`] are taken
    /// over: names the new builder binds again keep their position and start
    /// unchanged, the rest are dropped from the set. Values already set on
    /// them are not carried over.
    pub fn overriding(mut self) -> Self {
        self.overriding = true;
        self
    }

    /// Bind the builder's options into `flags`. Without a flag set only the
    /// declared defaults are applied.
    pub fn flags(mut self, flags: &'a mut FlagSet) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Prefix every flag of this registration with `prefix-`.
    pub fn flag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.flag_prefix = prefix.into();
        self
    }

    /// Resolve dependencies of type `T` from the slot named `name`.
    pub fn select<T: ?Sized + 'static>(mut self, name: impl Into<String>) -> Self {
        self.wiring.selections.insert(TypeId::of::<T>(), name.into());
        self
    }

    /// Treat failures of dependency `T` as recoverable: `Context::optional`
    /// yields `None` and `Context::build_all` skips the failed name, after
    /// `handler` has seen the error.
    pub fn optional<T: ?Sized + 'static>(
        mut self,
        handler: impl Fn(&str, &DiError) + Send + Sync + 'static,
    ) -> Self {
        let handler: OptionalHandler = Arc::new(handler);
        self.wiring.optionals.insert(TypeId::of::<T>(), handler);
        self
    }
}

impl fmt::Debug for ProvideOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideOptions")
            .field("name", &self.name)
            .field("overriding", &self.overriding)
            .field("flags", &self.flags.as_ref().map(|fs| fs.name()))
            .field("flag_prefix", &self.flag_prefix)
            .field("selections", &self.wiring.selections.len())
            .field("optionals", &self.wiring.optionals.len())
            .finish()
    }
}
