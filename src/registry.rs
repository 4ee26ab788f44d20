//! The registry: registration, validation and resolution.
//!
//! A [`Registry`] maps (type, name) slots to builders and builds each slot
//! at most once. Registration is startup work; the first build locks the
//! registry and any later `provide` panics.

use crate::context::Context;
use crate::error::{DiError, Result, ValidationError};
use crate::factory::{AnyInstance, Constructor, Typed};
use crate::flag::{Configurable, FlagBinds, FlagCodec, FlagSet};
use crate::key::TypeKey;
use crate::options::ProvideOptions;
use crate::provider::Builder;
use crate::storage::ConstructorMap;
use crate::validate::ValidatorHook;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Type-keyed registry of lazily built singletons.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Examples
///
/// ```rust
/// use di_registry::{ProvideOptions, Registry, func, instance};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct UserService { db: Arc<Database> }
///
/// let registry = Registry::new();
/// registry
///     .provide::<Database, _>(
///         instance(Database { url: "postgres://localhost".into() }),
///         ProvideOptions::new(),
///     )
///     .unwrap();
/// registry
///     .provide::<UserService, _>(
///         func(|ctx| Ok(Arc::new(UserService { db: ctx.build()? }))),
///         ProvideOptions::new(),
///     )
///     .unwrap();
///
/// let users = registry.must::<UserService>();
/// assert_eq!(users.db.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    constructors: ConstructorMap,
    binds: RwLock<FlagBinds>,
    validator: RwLock<Option<ValidatorHook>>,
    locked: AtomicBool,
    /// Set once registry-wide validation has passed.
    validated: AtomicBool,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry, created on first use.
pub fn global() -> &'static Registry {
    &GLOBAL
}

impl Registry {
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "di_registry", "Creating new registry");

        Self {
            inner: Arc::new(RegistryInner {
                constructors: ConstructorMap::new(),
                binds: RwLock::new(FlagBinds::new()),
                validator: RwLock::new(None),
                locked: AtomicBool::new(false),
                validated: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `builder` for `T`.
    ///
    /// If the builder carries options they are bound now: defaults are
    /// applied and, when [`ProvideOptions::flags`] is set, each field becomes
    /// a flag.
    ///
    /// # Panics
    ///
    /// If the registry has already been used to build.
    pub fn provide<T, B>(&self, builder: B, opts: ProvideOptions<'_>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
        B: Builder<T>,
    {
        let ProvideOptions {
            name,
            overriding,
            flags,
            flag_prefix,
            mut wiring,
        } = opts;
        let key = TypeKey::of::<T>(name);
        self.check_not_locked(&key);

        if !overriding && self.inner.constructors.contains(&key) {
            return Err(DiError::already_registered(&key));
        }

        if let Some(options) = builder.options() {
            let replacing = match (&flags, overriding) {
                (Some(flags), true) => self.bound_flags(&key, flags),
                _ => Vec::new(),
            };
            let binds = self.inner.binds.read();
            let validation = options.rebind_flags(flags, &binds, &flag_prefix, &replacing)?;
            wiring.validation = Some(validation);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "di_registry",
            service = key.type_name(),
            name = key.name(),
            overriding,
            service_count = self.inner.constructors.len() + 1,
            "Registering builder"
        );

        let constructor = Constructor::new(key, Box::new(Typed::<T, B>::new(builder)), wiring);
        let _replaced = self.inner.constructors.insert(constructor, overriding)?;

        #[cfg(feature = "logging")]
        if _replaced.is_some() {
            debug!(
                target: "di_registry",
                service = type_name::<T>(),
                "Replaced previous registration"
            );
        }

        self.inner.validated.store(false, Ordering::Release);
        Ok(())
    }

    /// Flags the current registration at `key` owns in `flags`.
    fn bound_flags(&self, key: &TypeKey, flags: &FlagSet) -> Vec<String> {
        self.inner
            .constructors
            .lookup(key)
            .ok()
            .and_then(|ctor| ctor.validation().map(|v| v.flags_in(flags).to_vec()))
            .unwrap_or_default()
    }

    /// Bind option fields of type `F` with `codec`, ahead of the built-in
    /// codecs. Each type can be bound once.
    pub fn register_flag_binder<F: 'static>(&self, codec: impl FlagCodec<F>) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(
            target: "di_registry",
            flag_type = type_name::<F>(),
            "Registering flag binder"
        );

        self.inner.binds.write().register(codec)
    }

    /// Validate every bound option struct with `f` after its `required` checks.
    pub fn set_validator<F>(&self, f: F)
    where
        F: Fn(&dyn Any) -> std::result::Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.set_validator_hook(Arc::new(f));
    }

    pub fn set_validator_hook(&self, hook: ValidatorHook) {
        *self.inner.validator.write() = Some(hook);
        self.inner.validated.store(false, Ordering::Release);
    }

    /// Refuse further registrations. Happens implicitly on the first build.
    pub fn lock(&self) {
        if self.inner.locked.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "di_registry",
            service_count = self.inner.constructors.len(),
            "Registry locked - no further registrations allowed"
        );
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    fn check_not_locked(&self, key: &TypeKey) {
        if self.inner.locked.load(Ordering::Relaxed) {
            panic!("Cannot register {key}: registry is locked after its first build");
        }
    }

    /// Number of registrations across all types and names.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.constructors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve the default slot of `T`.
    ///
    /// The first call validates every bound option struct; it is repeated
    /// until it passes.
    ///
    /// Cycles are detected per resolution path. Two threads entering the
    /// same cycle from opposite ends wait on each other's build guard.
    pub fn build<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.build_named::<T>("")
    }

    pub fn build_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.build_with::<T>(name, CancellationToken::new())
    }

    /// Resolve with a cancellation token. Builders observe it through
    /// [`Context::cancellation`]; once cancelled, no further builds start.
    pub fn build_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<T>> {
        let ctx = self.enter(cancel)?;
        ctx.build_named::<T>(name)
    }

    /// Like [`build`](Self::build), panicking on error.
    pub fn must<T: ?Sized + Send + Sync + 'static>(&self) -> Arc<T> {
        self.build::<T>().unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn must_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Arc<T> {
        self.build_named::<T>(name).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Whether the default slot of `T` is registered.
    pub fn exists<T: ?Sized + 'static>(&self) -> bool {
        self.exists_named::<T>("")
    }

    pub fn exists_named<T: ?Sized + 'static>(&self, name: &str) -> bool {
        self.inner.constructors.contains(&TypeKey::of::<T>(name))
    }

    /// Resolve every registered name of `T`; the first failure aborts.
    pub fn build_all<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<BTreeMap<String, Arc<T>>> {
        let ctx = self.enter(CancellationToken::new())?;
        self.resolve_all::<T>(&ctx, |_, _| false)
    }

    /// Resolve every registered name of `T`, handing failures to `handler`
    /// and returning whatever built.
    pub fn build_all_with<T, H>(&self, mut handler: H) -> Result<BTreeMap<String, Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
        H: FnMut(&str, &DiError),
    {
        let ctx = self.enter(CancellationToken::new())?;
        self.resolve_all::<T>(&ctx, |name, err| {
            handler(name, err);
            true
        })
    }

    pub fn must_all<T: ?Sized + Send + Sync + 'static>(&self) -> BTreeMap<String, Arc<T>> {
        self.build_all::<T>().unwrap_or_else(|e| panic!("{e}"))
    }

    fn enter(&self, cancel: CancellationToken) -> Result<Context> {
        self.lock();
        self.validate_once()?;
        Ok(Context::root(self.clone(), cancel))
    }

    fn validate_once(&self) -> Result<()> {
        if self.inner.validated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.validate_flags()?;
        self.inner.validated.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn resolve<T: ?Sized + Send + Sync + 'static>(
        &self,
        parent: &Context,
        key: &TypeKey,
    ) -> Result<Arc<T>> {
        let instance = self.resolve_key(parent, key)?;
        instance
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| DiError::TypeMismatch {
                key: key.clone(),
                expected: type_name::<T>(),
            })
    }

    fn resolve_key(&self, parent: &Context, key: &TypeKey) -> Result<AnyInstance> {
        parent.check_usable(key)?;
        let constructor = self.inner.constructors.lookup(key)?;

        if let Some(instance) = constructor.instance() {
            #[cfg(feature = "logging")]
            trace!(
                target: "di_registry",
                service = key.type_name(),
                name = key.name(),
                "Resolved memoized instance"
            );
            return Ok(Arc::clone(instance));
        }

        let ctx = parent.push(Arc::clone(&constructor));
        if parent.is_building(key) {
            let chain = ctx.path().to_vec();

            #[cfg(feature = "logging")]
            warn!(
                target: "di_registry",
                service = key.type_name(),
                name = key.name(),
                depth = chain.len(),
                "Dependency cycle detected"
            );

            return Err(DiError::CircularDependency { chain });
        }

        let hook = self.inner.validator.read().clone();
        constructor.validate(hook.as_ref())?;

        let _discard = ctx.discard_on_drop();
        constructor.build(&ctx)
    }

    /// Build every name of `T`. `recover` decides per failure whether to
    /// skip the name (`true`) or abort with the error.
    pub(crate) fn resolve_all<T: ?Sized + Send + Sync + 'static>(
        &self,
        ctx: &Context,
        mut recover: impl FnMut(&str, &DiError) -> bool,
    ) -> Result<BTreeMap<String, Arc<T>>> {
        let type_id = TypeId::of::<T>();
        if !self.inner.constructors.contains_type(type_id) {
            return Err(DiError::not_registered::<T>(""));
        }

        let mut built = BTreeMap::new();
        for constructor in self.inner.constructors.group(type_id) {
            let key = constructor.key();
            match self.resolve::<T>(ctx, key) {
                Ok(value) => {
                    built.insert(key.name().to_string(), value);
                }
                Err(err) => {
                    if !recover(key.name(), &err) {
                        return Err(err);
                    }

                    #[cfg(feature = "logging")]
                    warn!(
                        target: "di_registry",
                        service = key.type_name(),
                        name = key.name(),
                        error = %err,
                        "Skipping instance that failed to build"
                    );
                }
            }
        }
        Ok(built)
    }

    // =========================================================================
    // Inspection and reconfiguration
    // =========================================================================

    /// Call `f` for every built instance, ordered by type name then name.
    pub fn visit(&self, mut f: impl FnMut(&BuiltValue<'_>)) {
        for constructor in self.inner.constructors.all() {
            if let Some(instance) = constructor.instance() {
                f(&BuiltValue {
                    constructor: &constructor,
                    instance,
                });
            }
        }
    }

    /// Run every bound option struct's validation and report all failures.
    pub fn validate_flags(&self) -> Result<()> {
        let hook = self.inner.validator.read().clone();
        let mut failures = ValidationError::new();
        for constructor in self.inner.constructors.all() {
            if let Some(validation) = constructor.validation() {
                if let Err(err) = validation.run(hook.as_ref()) {
                    failures.merge(err);
                }
            }
        }
        failures.into_result().map_err(DiError::Validation)
    }

    /// Re-apply current options to every built instance.
    pub fn retrofit(&self) -> Result<()> {
        let mut errors = Vec::new();
        self.visit(|value| {
            if let Err(err) = value.retrofit() {
                errors.push(err);
            }
        });
        DiError::collect(errors)
    }

    /// Apply `items` to `flags`, then validate and retrofit everything.
    /// Every step runs; all failures are reported together.
    pub fn reconfigure<I, K, V>(&self, flags: &mut FlagSet, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        #[cfg(feature = "logging")]
        debug!(
            target: "di_registry",
            flag_set = flags.name(),
            "Reconfiguring registry"
        );

        let mut errors = Vec::new();
        for result in [
            flags.apply(items),
            self.validate_flags(),
            self.retrofit(),
        ] {
            match result {
                Ok(()) => {}
                Err(DiError::Multiple(inner)) => errors.extend(inner),
                Err(err) => errors.push(err),
            }
        }
        DiError::collect(errors)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// A built instance seen through [`Registry::visit`].
pub struct BuiltValue<'a> {
    constructor: &'a Constructor,
    instance: &'a AnyInstance,
}

impl BuiltValue<'_> {
    pub fn key(&self) -> &TypeKey {
        self.constructor.key()
    }

    /// The builder, if it is a `B`.
    pub fn builder<B: 'static>(&self) -> Option<&B> {
        self.constructor.builder().as_any().downcast_ref::<B>()
    }

    /// The builder's bound options, if it has any.
    pub fn options(&self) -> Option<&dyn Configurable> {
        self.constructor.builder().options()
    }

    /// The instance, if it was registered as a `T`.
    pub fn instance<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.downcast_ref::<Arc<T>>().cloned()
    }

    pub fn retrofit(&self) -> Result<()> {
        self.constructor.retrofit()
    }
}

impl fmt::Debug for BuiltValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltValue")
            .field("key", self.key())
            .finish_non_exhaustive()
    }
}
