//! # di-registry - Type-keyed dependency injection with flag-bound options
//!
//! A registry of lazily built singletons keyed by type and name, for wiring
//! an application together at startup.
//!
//! ## Features
//!
//! - **Lazy singletons** - each registration builds at most once, on first
//!   request, even under concurrent first requests
//! - **Named instances** - several registrations per type, selectable per
//!   dependent
//! - **Cycle detection** - a dependency cycle fails with the full chain
//!   instead of hanging
//! - **Flag-bound options** - builder option structs become named
//!   command-line flags with defaults, `required` checks and validation
//! - **Trait objects** - register and resolve `dyn Trait` directly
//! - **Observable** - optional `tracing` events under the `di_registry` target
//!
//! ## Quick Start
//!
//! ```rust
//! use di_registry::{ProvideOptions, Registry, func, instance, wire};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let registry = Registry::new();
//!
//! registry
//!     .provide::<Database, _>(
//!         instance(Database { url: "postgres://localhost".into() }),
//!         ProvideOptions::new(),
//!     )
//!     .unwrap();
//! registry
//!     .provide::<UserService, _>(
//!         wire(|db: Arc<Database>| Ok(Arc::new(UserService { db }))),
//!         ProvideOptions::new(),
//!     )
//!     .unwrap();
//!
//! let users = registry.must::<UserService>();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Named Instances
//!
//! ```rust
//! use di_registry::{ProvideOptions, Registry, func, instance};
//! use std::sync::Arc;
//!
//! struct Cache(&'static str);
//! struct Sessions(Arc<Cache>);
//!
//! let registry = Registry::new();
//! registry
//!     .provide::<Cache, _>(instance(Cache("memory")), ProvideOptions::new())
//!     .unwrap();
//! registry
//!     .provide::<Cache, _>(instance(Cache("redis")), ProvideOptions::new().name("redis"))
//!     .unwrap();
//! registry
//!     .provide::<Sessions, _>(
//!         func(|ctx| Ok(Arc::new(Sessions(ctx.build()?)))),
//!         ProvideOptions::new().select::<Cache>("redis"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(registry.must::<Sessions>().0.0, "redis");
//! assert_eq!(registry.must_all::<Cache>().len(), 2);
//! ```
//!
//! ## Flag-Bound Options
//!
//! See the [`flag`] module.
//!
//! ## Feature Flags
//!
//! - `logging` (default) - `tracing` events
//! - `logging-json` / `logging-pretty` - subscriber setup in [`logging`]
//! - `derive` - `#[derive(Options)]`
//! - `validator` (default) - [`validator_hook`] for `validator::Validate` types

mod context;
mod deps;
mod error;
mod factory;
pub mod flag;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod options;
mod provider;
mod registry;
mod storage;
mod validate;

pub use context::Context;
pub use deps::{All, Dependencies};
pub use error::{BoxError, DiError, FieldFailure, Result, ValidationError};
pub use factory::OptionalHandler;
pub use key::TypeKey;
pub use options::ProvideOptions;
pub use provider::{
    Builder, Func, Inject, Instance, Wire, WireInject, func, inject, inject_with, instance, wire,
    wire_inject,
};
pub use registry::{BuiltValue, Registry, global};
#[cfg(feature = "validator")]
pub use validate::validator_hook;
pub use validate::{ValidatorHook, chain};

#[cfg(feature = "derive")]
pub use di_registry_derive::Options;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::flag::{FlagSet, FlagSpec, Options};
    pub use crate::{
        All, Builder, Context, DiError, ProvideOptions, Registry, Result, func, inject, instance,
        wire, wire_inject,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    trait Notifier: Send + Sync {
        fn channel(&self) -> &'static str;
    }

    struct Email;

    impl Notifier for Email {
        fn channel(&self) -> &'static str {
            "email"
        }
    }

    struct Alerts {
        notifier: Arc<dyn Notifier>,
    }

    #[test]
    fn test_trait_object_dependency() {
        let registry = Registry::new();
        registry
            .provide::<dyn Notifier, _>(
                func(|_| Ok(Arc::new(Email) as Arc<dyn Notifier>)),
                ProvideOptions::new(),
            )
            .unwrap();
        registry
            .provide::<Alerts, _>(
                wire(|notifier: Arc<dyn Notifier>| Ok(Arc::new(Alerts { notifier }))),
                ProvideOptions::new(),
            )
            .unwrap();

        assert_eq!(registry.must::<Alerts>().notifier.channel(), "email");
    }

    #[test]
    fn test_builder_runs_on_first_request_only() {
        static BUILT: AtomicU32 = AtomicU32::new(0);

        struct Lazy;

        let registry = Registry::new();
        registry
            .provide::<Lazy, _>(
                func(|_| {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Lazy))
                }),
                ProvideOptions::new(),
            )
            .unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), 0);

        let first = registry.must::<Lazy>();
        let second = registry.must::<Lazy>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cycle_reports_chain() {
        #[derive(Debug)]
        struct A;
        struct B;

        let registry = Registry::new();
        registry
            .provide::<A, _>(wire(|_: Arc<B>| Ok(Arc::new(A))), ProvideOptions::new())
            .unwrap();
        registry
            .provide::<B, _>(wire(|_: Arc<A>| Ok(Arc::new(B))), ProvideOptions::new())
            .unwrap();

        let err = registry.build::<A>().unwrap_err();
        assert!(err.is_cycle());
        assert!(err.to_string().contains("A"));
    }
}
