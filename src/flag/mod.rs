//! Flag binding for builder options.
//!
//! Every option struct handed to [`inject`](crate::inject) or
//! [`wire_inject`](crate::wire_inject) is walked at registration time; its
//! declared fields become named flags in the [`FlagSet`] given to
//! [`ProvideOptions::flags`](crate::ProvideOptions::flags). Values set on
//! the flag set write straight through to the options the builder reads.
//!
//! ```rust
//! use di_registry::flag::{Binder, FlagSet, FlagSpec, Options};
//! use di_registry::{ProvideOptions, Registry, inject};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Default)]
//! struct HttpOptions {
//!     port: u16,
//! }
//!
//! impl Options for HttpOptions {
//!     fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> di_registry::Result<()> {
//!         b.field(FlagSpec::new("port").default_value("8080"), |o| &mut o.port)
//!     }
//! }
//!
//! struct Server {
//!     port: u16,
//! }
//!
//! let registry = Registry::new();
//! let mut flags = FlagSet::new("app");
//! registry
//!     .provide::<Server, _>(
//!         inject(|_ctx, opts: HttpOptions| Ok(Arc::new(Server { port: opts.port }))),
//!         ProvideOptions::new().flags(&mut flags).flag_prefix("http"),
//!     )
//!     .unwrap();
//!
//! flags.set("http-port", "9090").unwrap();
//! assert_eq!(registry.must::<Server>().port, 9090);
//! ```

mod binder;
mod codec;
mod csv;
mod set;
mod watch;

pub use binder::{Binder, Configurable, FlagSpec, FlagValidation, OptionCell, Options};
pub use codec::{
    FlagBinds, FlagCodec, FnCodec, ListCodec, MapCodec, Scalar, ScalarCodec, TextCodec,
    ValueCodec,
};
pub use set::{Flag, FlagSet, Value};
pub use watch::FlagWatcher;
