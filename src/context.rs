//! Resolution context handed to builders.
//!
//! A [`Context`] is one frame of a resolution chain: the keys being built,
//! outermost first, plus the constructor currently running. Builders use it
//! to request their dependencies. A context is only valid while the builder
//! call it was created for is running; afterwards every request fails with
//! [`DiError::ContextInvalid`].

use crate::error::{DiError, Result};
use crate::factory::Constructor;
use crate::key::TypeKey;
use crate::registry::Registry;
use std::any::TypeId;
#[cfg(feature = "logging")]
use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "logging")]
use tracing::warn;

/// Handle for resolving dependencies from inside a builder.
///
/// # Examples
///
/// ```rust
/// use di_registry::{ProvideOptions, Registry, func};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Client { url: String }
///
/// let registry = Registry::new();
/// registry
///     .provide::<Config, _>(
///         func(|_| Ok(Arc::new(Config { url: "db:5432".into() }))),
///         ProvideOptions::new(),
///     )
///     .unwrap();
/// registry
///     .provide::<Client, _>(
///         func(|ctx| {
///             let config = ctx.build::<Config>()?;
///             Ok(Arc::new(Client { url: config.url.clone() }))
///         }),
///         ProvideOptions::new(),
///     )
///     .unwrap();
///
/// assert_eq!(registry.must::<Client>().url, "db:5432");
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Frame>,
}

struct Frame {
    registry: Registry,
    path: Vec<TypeKey>,
    constructor: Option<Arc<Constructor>>,
    discarded: AtomicBool,
    cancel: CancellationToken,
}

impl Context {
    /// The context of a top-level request: empty path, no constructor.
    pub(crate) fn root(registry: Registry, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Frame {
                registry,
                path: Vec::new(),
                constructor: None,
                discarded: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    /// A child frame for building `constructor`.
    pub(crate) fn push(&self, constructor: Arc<Constructor>) -> Self {
        let mut path = Vec::with_capacity(self.inner.path.len() + 1);
        path.extend(self.inner.path.iter().cloned());
        path.push(constructor.key().clone());
        Self {
            inner: Arc::new(Frame {
                registry: self.inner.registry.clone(),
                path,
                constructor: Some(constructor),
                discarded: AtomicBool::new(false),
                cancel: self.inner.cancel.clone(),
            }),
        }
    }

    /// Whether `key` is already being built further up the chain.
    pub(crate) fn is_building(&self, key: &TypeKey) -> bool {
        self.inner.path.iter().any(|k| k == key)
    }

    /// Mark this frame discarded when the returned guard drops.
    pub(crate) fn discard_on_drop(&self) -> DiscardGuard<'_> {
        DiscardGuard(self)
    }

    #[inline]
    pub(crate) fn is_discarded(&self) -> bool {
        self.inner.discarded.load(Ordering::Acquire)
    }

    /// The keys being built, outermost first. The last one is the key this
    /// context's builder produces.
    #[inline]
    pub fn path(&self) -> &[TypeKey] {
        &self.inner.path
    }

    /// The token shared by every frame of this resolution.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Name to use for a dependency of type `T`: the running constructor's
    /// selection, else the default slot.
    fn selected<T: ?Sized + 'static>(&self) -> &str {
        self.inner
            .constructor
            .as_ref()
            .and_then(|c| c.selection(TypeId::of::<T>()))
            .unwrap_or("")
    }

    fn optional_handler<T: ?Sized + 'static>(&self) -> Option<&crate::factory::OptionalHandler> {
        self.inner
            .constructor
            .as_ref()
            .and_then(|c| c.optional_handler(TypeId::of::<T>()))
    }

    /// Resolve a dependency of type `T`.
    pub fn build<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let name = self.selected::<T>().to_string();
        self.build_named::<T>(&name)
    }

    /// Resolve the dependency of type `T` registered under `name`.
    pub fn build_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.inner
            .registry
            .resolve::<T>(self, &TypeKey::of::<T>(name))
    }

    /// Like [`build`](Self::build), panicking on error.
    pub fn must<T: ?Sized + Send + Sync + 'static>(&self) -> Arc<T> {
        self.build::<T>().unwrap_or_else(|e| panic!("{e}"))
    }

    /// Whether a dependency of type `T` (under the selected name) is registered.
    pub fn exists<T: ?Sized + 'static>(&self) -> bool {
        self.inner
            .registry
            .exists_named::<T>(self.selected::<T>())
    }

    /// Resolve `T` if it is registered.
    ///
    /// A registered dependency that fails to build is an error, unless the
    /// running constructor installed an optional handler for `T`; then the
    /// handler sees the error and `None` is returned.
    pub fn optional<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        if !self.exists::<T>() {
            return Ok(None);
        }
        match self.build::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(err) => match self.optional_handler::<T>() {
                Some(handler) => {
                    #[cfg(feature = "logging")]
                    warn!(
                        target: "di_registry",
                        service = type_name::<T>(),
                        error = %err,
                        "Optional dependency failed, continuing without it"
                    );
                    handler(self.selected::<T>(), &err);
                    Ok(None)
                }
                None => Err(err),
            },
        }
    }

    /// Resolve every registered name of `T`.
    ///
    /// Failures go to the optional handler for `T` when the running
    /// constructor installed one; otherwise the first failure is returned.
    pub fn build_all<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<BTreeMap<String, Arc<T>>> {
        let handler = self.optional_handler::<T>().cloned();
        self.inner.registry.resolve_all::<T>(self, |name, err| match &handler {
            Some(handler) => {
                handler(name, err);
                true
            }
            None => false,
        })
    }

    /// Like [`build_all`](Self::build_all), panicking on error.
    pub fn must_all<T: ?Sized + Send + Sync + 'static>(&self) -> BTreeMap<String, Arc<T>> {
        self.build_all::<T>().unwrap_or_else(|e| panic!("{e}"))
    }

    pub(crate) fn check_usable(&self, key: &TypeKey) -> Result<()> {
        if self.is_discarded() {
            return Err(DiError::ContextInvalid {
                type_name: key.type_name(),
            });
        }
        if self.is_cancelled() {
            return Err(DiError::Cancelled { key: key.clone() });
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.inner.path)
            .field("discarded", &self.is_discarded())
            .finish()
    }
}

/// Marks a frame discarded when its builder call returns.
pub(crate) struct DiscardGuard<'a>(&'a Context);

impl Drop for DiscardGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.discarded.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{Typed, Wiring};
    use crate::provider::instance;

    #[derive(Debug)]
    struct Leaf;

    fn leaf_constructor() -> Arc<Constructor> {
        Arc::new(Constructor::new(
            TypeKey::of::<Leaf>(""),
            Box::new(Typed::<Leaf, _>::new(instance(Leaf))),
            Wiring::default(),
        ))
    }

    #[test]
    fn test_push_extends_path() {
        let root = Context::root(Registry::new(), CancellationToken::new());
        assert!(root.path().is_empty());

        let child = root.push(leaf_constructor());
        assert_eq!(child.path(), &[TypeKey::of::<Leaf>("")]);
        assert!(child.is_building(&TypeKey::of::<Leaf>("")));
        assert!(!root.is_building(&TypeKey::of::<Leaf>("")));
    }

    #[test]
    fn test_discarded_frame_rejects_builds() {
        let root = Context::root(Registry::new(), CancellationToken::new());
        let child = root.push(leaf_constructor());
        let escaped = child.clone();
        drop(child.discard_on_drop());

        let err = escaped.build::<Leaf>().unwrap_err();
        assert!(matches!(err, DiError::ContextInvalid { .. }));
        assert!(!root.is_discarded());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let root = Context::root(Registry::new(), token.clone());
        let child = root.push(leaf_constructor());

        token.cancel();
        assert!(child.is_cancelled());
        let err = child.build::<Leaf>().unwrap_err();
        assert!(matches!(err, DiError::Cancelled { .. }));
    }
}
