//! Typed dependency lists for [`wire`](crate::wire) builders.
//!
//! A builder declares what it needs as a tuple; each element is resolved
//! from the builder's [`Context`] in order, left to right.

use crate::context::Context;
use crate::error::Result;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

/// Something a builder can receive from its context.
///
/// Implemented for:
/// - `()` - no dependencies
/// - `Arc<T>` - the selected (or default) `T`
/// - `Option<Arc<T>>` - `T` if registered
/// - [`All<T>`] - every registered name of `T`
/// - tuples of the above, up to 12 elements
pub trait Dependencies: Sized {
    fn resolve(ctx: &Context) -> Result<Self>;
}

impl Dependencies for () {
    #[inline]
    fn resolve(_ctx: &Context) -> Result<Self> {
        Ok(())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependencies for Arc<T> {
    #[inline]
    fn resolve(ctx: &Context) -> Result<Self> {
        ctx.build::<T>()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependencies for Option<Arc<T>> {
    #[inline]
    fn resolve(ctx: &Context) -> Result<Self> {
        ctx.optional::<T>()
    }
}

/// Every registered instance of `T`, keyed by name.
pub struct All<T: ?Sized>(pub BTreeMap<String, Arc<T>>);

impl<T: ?Sized> All<T> {
    pub fn into_inner(self) -> BTreeMap<String, Arc<T>> {
        self.0
    }
}

impl<T: ?Sized> Deref for All<T> {
    type Target = BTreeMap<String, Arc<T>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependencies for All<T> {
    #[inline]
    fn resolve(ctx: &Context) -> Result<Self> {
        ctx.build_all::<T>().map(All)
    }
}

macro_rules! impl_dependencies_tuple {
    ($($T:ident),+) => {
        impl<$($T: Dependencies),+> Dependencies for ($($T,)+) {
            #[inline]
            fn resolve(ctx: &Context) -> Result<Self> {
                Ok(($($T::resolve(ctx)?,)+))
            }
        }
    };
}

impl_dependencies_tuple!(A);
impl_dependencies_tuple!(A, B);
impl_dependencies_tuple!(A, B, C);
impl_dependencies_tuple!(A, B, C, D);
impl_dependencies_tuple!(A, B, C, D, E);
impl_dependencies_tuple!(A, B, C, D, E, F);
impl_dependencies_tuple!(A, B, C, D, E, F, G);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProvideOptions, Registry, func, instance, wire};
    use parking_lot::Mutex;

    struct Db;
    struct Cache;
    struct Metrics;
    struct App {
        has_metrics: bool,
        caches: usize,
    }

    #[test]
    fn test_tuple_resolves_left_to_right() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();

        let seen = Arc::clone(&order);
        registry
            .provide::<Db, _>(
                func(move |_| {
                    seen.lock().push("db");
                    Ok(Arc::new(Db))
                }),
                ProvideOptions::new(),
            )
            .unwrap();
        let seen = Arc::clone(&order);
        registry
            .provide::<Cache, _>(
                func(move |_| {
                    seen.lock().push("cache");
                    Ok(Arc::new(Cache))
                }),
                ProvideOptions::new(),
            )
            .unwrap();
        registry
            .provide::<Cache, _>(instance(Cache), ProvideOptions::new().name("l2"))
            .unwrap();
        registry
            .provide::<App, _>(
                wire(
                    |(_db, _cache, metrics, all): (
                        Arc<Db>,
                        Arc<Cache>,
                        Option<Arc<Metrics>>,
                        All<Cache>,
                    )| {
                        Ok(Arc::new(App {
                            has_metrics: metrics.is_some(),
                            caches: all.len(),
                        }))
                    },
                ),
                ProvideOptions::new(),
            )
            .unwrap();

        let app = registry.must::<App>();
        assert!(!app.has_metrics);
        assert_eq!(app.caches, 2);
        assert_eq!(*order.lock(), vec!["db", "cache"]);
    }
}
