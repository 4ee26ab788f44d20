//! Builders: how a registered type is produced.
//!
//! Anything implementing [`Builder<T>`] can be registered for `T`. The
//! adapters in this module cover the usual shapes:
//!
//! | adapter | closure receives |
//! |---|---|
//! | [`func`] | the [`Context`] |
//! | [`inject`] | the context and a snapshot of the bound options |
//! | [`wire`] | a typed [`Dependencies`] tuple |
//! | [`wire_inject`] | the dependency tuple and the options |
//! | [`instance`] | nothing; the value already exists |

use crate::context::Context;
use crate::deps::Dependencies;
use crate::error::BoxError;
use crate::flag::{Configurable, OptionCell, Options};
use std::marker::PhantomData;
use std::sync::Arc;

/// Produces the instance registered for `T`.
///
/// `T` may be unsized, so a builder can be registered for `dyn Trait`.
pub trait Builder<T: ?Sized>: Send + Sync + 'static {
    /// Build the instance. Runs at most once per registration.
    fn build(&self, ctx: &Context) -> Result<Arc<T>, BoxError>;

    /// Re-apply changed options to an already built instance.
    fn retrofit(&self, _instance: &Arc<T>) -> Result<(), BoxError> {
        Ok(())
    }

    /// The option struct bound to flags at registration, if any.
    fn options(&self) -> Option<&dyn Configurable> {
        None
    }
}

type RetrofitFn<T, O> = Box<dyn Fn(&Arc<T>, &O) -> Result<(), BoxError> + Send + Sync>;

// =============================================================================
// func
// =============================================================================

/// Builder from a closure over the [`Context`].
pub struct Func<F> {
    f: F,
}

/// Register a closure that receives the resolution context.
///
/// ```rust
/// use di_registry::{ProvideOptions, Registry, func};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let registry = Registry::new();
/// registry
///     .provide::<dyn Greeter, _>(
///         func(|_| Ok(Arc::new(English) as Arc<dyn Greeter>)),
///         ProvideOptions::new(),
///     )
///     .unwrap();
/// assert_eq!(registry.must::<dyn Greeter>().greet(), "hello");
/// ```
pub fn func<T, F>(f: F) -> Func<F>
where
    T: ?Sized,
    F: Fn(&Context) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    Func { f }
}

impl<T, F> Builder<T> for Func<F>
where
    T: ?Sized,
    F: Fn(&Context) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    fn build(&self, ctx: &Context) -> Result<Arc<T>, BoxError> {
        (self.f)(ctx)
    }
}

// =============================================================================
// inject
// =============================================================================

/// Builder from a closure over the context and a bound option struct.
pub struct Inject<T: ?Sized, O, F> {
    options: OptionCell<O>,
    f: F,
    retrofit: Option<RetrofitFn<T, O>>,
}

/// Register a closure that receives a snapshot of its option struct.
///
/// The options start at `O::default()`; their flags are bound when the
/// builder is provided.
pub fn inject<T, O, F>(f: F) -> Inject<T, O, F>
where
    T: ?Sized,
    O: Options + Clone + Default,
    F: Fn(&Context, O) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    inject_with(O::default(), f)
}

/// Like [`inject`], starting from the given options instead of the default.
pub fn inject_with<T, O, F>(options: O, f: F) -> Inject<T, O, F>
where
    T: ?Sized,
    O: Options + Clone,
    F: Fn(&Context, O) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    Inject {
        options: OptionCell::new(options),
        f,
        retrofit: None,
    }
}

impl<T: ?Sized, O: Options, F> Inject<T, O, F> {
    /// Called by [`Registry::retrofit`](crate::Registry::retrofit) with the
    /// built instance and the current options.
    pub fn on_retrofit(
        mut self,
        f: impl Fn(&Arc<T>, &O) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.retrofit = Some(Box::new(f));
        self
    }

    /// Shared handle to the bound options.
    pub fn options_cell(&self) -> &OptionCell<O> {
        &self.options
    }
}

impl<T, O, F> Builder<T> for Inject<T, O, F>
where
    T: ?Sized + 'static,
    O: Options + Clone,
    F: Fn(&Context, O) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    fn build(&self, ctx: &Context) -> Result<Arc<T>, BoxError> {
        (self.f)(ctx, self.options.snapshot())
    }

    fn retrofit(&self, instance: &Arc<T>) -> Result<(), BoxError> {
        match &self.retrofit {
            Some(retrofit) => retrofit(instance, &self.options.read()),
            None => Ok(()),
        }
    }

    fn options(&self) -> Option<&dyn Configurable> {
        Some(&self.options)
    }
}

// =============================================================================
// wire
// =============================================================================

/// Builder from a closure over a typed dependency tuple.
pub struct Wire<D, F> {
    f: F,
    _deps: PhantomData<fn() -> D>,
}

/// Register a closure whose argument lists its dependencies.
///
/// ```rust
/// use di_registry::{ProvideOptions, Registry, instance, wire};
/// use std::sync::Arc;
///
/// struct Db;
/// struct Repo {
///     db: Arc<Db>,
/// }
///
/// let registry = Registry::new();
/// registry.provide::<Db, _>(instance(Db), ProvideOptions::new()).unwrap();
/// registry
///     .provide::<Repo, _>(
///         wire(|db: Arc<Db>| Ok(Arc::new(Repo { db }))),
///         ProvideOptions::new(),
///     )
///     .unwrap();
///
/// let repo = registry.must::<Repo>();
/// assert!(Arc::ptr_eq(&repo.db, &registry.must::<Db>()));
/// ```
pub fn wire<T, D, F>(f: F) -> Wire<D, F>
where
    T: ?Sized,
    D: Dependencies,
    F: Fn(D) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    Wire {
        f,
        _deps: PhantomData,
    }
}

impl<T, D, F> Builder<T> for Wire<D, F>
where
    T: ?Sized,
    D: Dependencies + 'static,
    F: Fn(D) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    fn build(&self, ctx: &Context) -> Result<Arc<T>, BoxError> {
        (self.f)(D::resolve(ctx)?)
    }
}

/// Builder from a closure over dependencies and bound options.
pub struct WireInject<T: ?Sized, D, O, F> {
    options: OptionCell<O>,
    f: F,
    retrofit: Option<RetrofitFn<T, O>>,
    _deps: PhantomData<fn() -> D>,
}

/// Register a closure receiving its dependency tuple and option snapshot.
pub fn wire_inject<T, D, O, F>(f: F) -> WireInject<T, D, O, F>
where
    T: ?Sized,
    D: Dependencies,
    O: Options + Clone + Default,
    F: Fn(D, O) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    WireInject {
        options: OptionCell::new(O::default()),
        f,
        retrofit: None,
        _deps: PhantomData,
    }
}

impl<T: ?Sized, D, O: Options, F> WireInject<T, D, O, F> {
    /// Start from `options` instead of `O::default()`.
    pub fn with_options(mut self, options: O) -> Self {
        self.options = OptionCell::new(options);
        self
    }

    /// See [`Inject::on_retrofit`].
    pub fn on_retrofit(
        mut self,
        f: impl Fn(&Arc<T>, &O) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.retrofit = Some(Box::new(f));
        self
    }

    pub fn options_cell(&self) -> &OptionCell<O> {
        &self.options
    }
}

impl<T, D, O, F> Builder<T> for WireInject<T, D, O, F>
where
    T: ?Sized + 'static,
    D: Dependencies + 'static,
    O: Options + Clone,
    F: Fn(D, O) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    fn build(&self, ctx: &Context) -> Result<Arc<T>, BoxError> {
        let deps = D::resolve(ctx)?;
        (self.f)(deps, self.options.snapshot())
    }

    fn retrofit(&self, instance: &Arc<T>) -> Result<(), BoxError> {
        match &self.retrofit {
            Some(retrofit) => retrofit(instance, &self.options.read()),
            None => Ok(()),
        }
    }

    fn options(&self) -> Option<&dyn Configurable> {
        Some(&self.options)
    }
}

// =============================================================================
// instance
// =============================================================================

/// Builder that hands out a value created up front.
pub struct Instance<T: ?Sized> {
    value: Arc<T>,
}

/// Register an existing value.
pub fn instance<T: ?Sized>(value: impl Into<Arc<T>>) -> Instance<T> {
    Instance {
        value: value.into(),
    }
}

impl<T: ?Sized + Send + Sync + 'static> Builder<T> for Instance<T> {
    fn build(&self, _ctx: &Context) -> Result<Arc<T>, BoxError> {
        Ok(Arc::clone(&self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::{Binder, FlagSet, FlagSpec};
    use crate::{ProvideOptions, Registry};
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct PoolOptions {
        size: u32,
    }

    impl Options for PoolOptions {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> crate::Result<()> {
            b.field(FlagSpec::new("size").default_value("4"), |o| &mut o.size)
        }
    }

    struct Pool {
        size: Mutex<u32>,
    }

    #[test]
    fn test_inject_reads_bound_options() {
        let registry = Registry::new();
        let mut flags = FlagSet::new("test");
        registry
            .provide::<Pool, _>(
                inject(|_, opts: PoolOptions| {
                    Ok(Arc::new(Pool {
                        size: Mutex::new(opts.size),
                    }))
                }),
                ProvideOptions::new().flags(&mut flags),
            )
            .unwrap();

        flags.set("size", "16").unwrap();
        assert_eq!(*registry.must::<Pool>().size.lock(), 16);
    }

    #[test]
    fn test_inject_with_start_value_beats_default() {
        let registry = Registry::new();
        registry
            .provide::<Pool, _>(
                inject_with(PoolOptions { size: 2 }, |_, opts: PoolOptions| {
                    Ok(Arc::new(Pool {
                        size: Mutex::new(opts.size),
                    }))
                }),
                ProvideOptions::new(),
            )
            .unwrap();
        assert_eq!(*registry.must::<Pool>().size.lock(), 2);
    }

    #[test]
    fn test_retrofit_sees_current_options() {
        let registry = Registry::new();
        let mut flags = FlagSet::new("test");
        registry
            .provide::<Pool, _>(
                inject(|_, opts: PoolOptions| {
                    Ok(Arc::new(Pool {
                        size: Mutex::new(opts.size),
                    }))
                })
                .on_retrofit(|pool: &Arc<Pool>, opts: &PoolOptions| {
                    *pool.size.lock() = opts.size;
                    Ok(())
                }),
                ProvideOptions::new().flags(&mut flags),
            )
            .unwrap();

        let pool = registry.must::<Pool>();
        assert_eq!(*pool.size.lock(), 4);

        registry.reconfigure(&mut flags, [("size", "32")]).unwrap();
        assert_eq!(*pool.size.lock(), 32);
    }

    #[test]
    fn test_instance_is_shared() {
        let value = Arc::new(Pool {
            size: Mutex::new(1),
        });
        let registry = Registry::new();
        registry
            .provide::<Pool, _>(instance(Arc::clone(&value)), ProvideOptions::new())
            .unwrap();
        assert!(Arc::ptr_eq(&value, &registry.must::<Pool>()));
    }
}
