//! Option structs and the binder that turns their fields into flags.
//!
//! An option struct declares its schema in [`Options::bind`]: which fields
//! are flags, under what names, with which defaults. Nested option structs
//! bind under `parent-child` names. `#[derive(Options)]` (feature `derive`)
//! generates the same calls from `#[flag(...)]` attributes.

use super::codec::{FlagBinds, FlagCodec, TextCodec, ValueCodec};
use super::set::{FlagSet, Value};
use crate::error::{DiError, Result, ValidationError};
use crate::validate::ValidatorHook;
use parking_lot::{RwLock, RwLockReadGuard};
use std::any::{Any, type_name};
use std::collections::HashSet;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

/// A builder's option struct.
///
/// # Examples
///
/// ```rust
/// use di_registry::flag::{Binder, FlagSpec, Options};
///
/// #[derive(Clone, Default)]
/// struct ServerOptions {
///     port: u16,
///     hosts: Vec<String>,
/// }
///
/// impl Options for ServerOptions {
///     fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> di_registry::Result<()> {
///         b.field(FlagSpec::new("port").default_value("8080").usage("listen port"), |o| &mut o.port)?;
///         b.field(FlagSpec::new("hosts").usage("allowed hosts"), |o| &mut o.hosts)
///     }
/// }
/// ```
pub trait Options: Send + Sync + 'static {
    /// Declare the flag fields of this struct.
    fn bind<R: Send + Sync + 'static>(binder: &mut Binder<'_, R, Self>) -> Result<()>
    where
        Self: Sized;

    /// Custom validation. Returning `Some` replaces the `required` checks and
    /// the registry validator for this struct.
    fn validate_flags(&self) -> Option<std::result::Result<(), ValidationError>> {
        None
    }
}

impl Options for () {
    fn bind<R: Send + Sync + 'static>(_: &mut Binder<'_, R, Self>) -> Result<()> {
        Ok(())
    }
}

/// Name, default literal, usage and constraint of one declared field.
#[derive(Debug, Clone)]
pub struct FlagSpec {
    name: String,
    default: Option<String>,
    usage: String,
    required: bool,
}

impl FlagSpec {
    /// A field named `name`. For nested structs an empty name flattens the
    /// child's flags into the parent prefix.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            usage: String::new(),
            required: false,
        }
    }

    /// Literal assigned at registration when the field holds its zero value.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Fail validation while the field holds its zero value.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Binding state
// =============================================================================

/// Projection from the root option struct to one of its (nested) fields.
type Accessor<R, C> = Arc<dyn for<'x> Fn(&'x mut R) -> &'x mut C + Send + Sync>;

#[inline]
fn accessor<R, C, G>(f: G) -> Accessor<R, C>
where
    R: 'static,
    C: 'static,
    G: for<'x> Fn(&'x mut R) -> &'x mut C + Send + Sync + 'static,
{
    Arc::new(f)
}

fn compose<R, M, C, G>(outer: &Accessor<R, M>, inner: G) -> Accessor<R, C>
where
    R: 'static,
    M: 'static,
    C: 'static,
    G: for<'x> Fn(&'x mut M) -> &'x mut C + Send + Sync + 'static,
{
    let outer = Arc::clone(outer);
    accessor(move |root: &mut R| inner(outer(root)))
}

#[derive(Debug, Clone, Default)]
struct Prefix {
    name: String,
    usage: String,
}

impl Prefix {
    fn concat(&self, name: &str, usage: &str) -> Prefix {
        let name = match (self.name.is_empty(), name.is_empty()) {
            (_, true) => self.name.clone(),
            (true, false) => name.to_string(),
            (false, false) => format!("{}-{}", self.name, name),
        };
        let usage = match (self.usage.is_empty(), usage.is_empty()) {
            (_, true) => self.usage.clone(),
            (true, false) => usage.to_string(),
            (false, false) => format!("{}{}", self.usage, usage),
        };
        Prefix { name, usage }
    }
}

struct RequiredCheck<R> {
    flag: String,
    is_zero: Box<dyn Fn(&mut R) -> bool + Send + Sync>,
}

/// Where binders send what they find.
trait Sink<R> {
    fn cell(&self) -> &Arc<RwLock<R>>;
    fn binds(&self) -> &FlagBinds;
    fn register(&mut self, name: String, usage: String, value: Box<dyn Value>) -> Result<()>;
    fn require(&mut self, check: RequiredCheck<R>);
}

struct StagedFlag {
    name: String,
    usage: String,
    value: Box<dyn Value>,
}

/// Flags are staged while the schema binds and reach the [`FlagSet`] only
/// once every field has bound, so a failed bind leaves the set untouched.
struct BindState<'f, R> {
    cell: Arc<RwLock<R>>,
    binds: &'f FlagBinds,
    staged: Vec<StagedFlag>,
    checks: Vec<RequiredCheck<R>>,
}

type Committed<R> = (Vec<RequiredCheck<R>>, Option<(u64, Vec<String>)>);

impl<R> BindState<'_, R> {
    /// Move the staged flags into `flags`. Names in `replacing` may already
    /// exist; any other clash fails before the set is touched.
    fn commit(self, flags: Option<&mut FlagSet>, replacing: &[String]) -> Result<Committed<R>> {
        let Some(flags) = flags else {
            return Ok((self.checks, None));
        };

        let mut seen = HashSet::with_capacity(self.staged.len());
        for staged in &self.staged {
            let taken = flags.lookup(&staged.name).is_some() && !replacing.contains(&staged.name);
            if taken || !seen.insert(staged.name.as_str()) {
                return Err(DiError::FlagRedefined(staged.name.clone()));
            }
        }

        for stale in replacing.iter().filter(|name| !seen.contains(name.as_str())) {
            flags.remove(stale);
        }
        let mut names = Vec::with_capacity(self.staged.len());
        for StagedFlag { name, usage, value } in self.staged {
            names.push(name.clone());
            if flags.lookup(&name).is_some() {
                flags.replace(&name, value, usage);
            } else {
                flags.var(name, value, usage)?;
            }
        }
        Ok((self.checks, Some((flags.id(), names))))
    }
}

impl<R> Sink<R> for BindState<'_, R> {
    fn cell(&self) -> &Arc<RwLock<R>> {
        &self.cell
    }

    fn binds(&self) -> &FlagBinds {
        self.binds
    }

    fn register(&mut self, name: String, usage: String, value: Box<dyn Value>) -> Result<()> {
        self.staged.push(StagedFlag { name, usage, value });
        Ok(())
    }

    fn require(&mut self, check: RequiredCheck<R>) {
        self.checks.push(check);
    }
}

/// The flag side of a bound field: parses into the shared option struct.
struct BoundField<R, F> {
    cell: Arc<RwLock<R>>,
    access: Accessor<R, F>,
    codec: Arc<dyn FlagCodec<F>>,
    changed: bool,
}

impl<R: Send + Sync, F: 'static> Value for BoundField<R, F> {
    fn set(&mut self, raw: &str) -> std::result::Result<(), String> {
        let mut root = self.cell.write();
        self.codec.set((self.access)(&mut *root), raw, !self.changed)?;
        self.changed = true;
        Ok(())
    }

    fn get(&self) -> String {
        let mut root = self.cell.write();
        self.codec.render((self.access)(&mut *root))
    }
}

// =============================================================================
// Binder
// =============================================================================

/// Declares the flag fields of option struct `C`, which lives inside the
/// root option struct `R` held by the registry.
pub struct Binder<'a, R, C> {
    sink: &'a mut dyn Sink<R>,
    access: Accessor<R, C>,
    prefix: Prefix,
}

impl<'a, R, C> Binder<'a, R, C>
where
    R: Send + Sync + 'static,
    C: 'static,
{
    /// A field with a built-in or application-registered codec: integers,
    /// floats, `bool`, `String`, `char`, `Duration`, lists and string maps
    /// of those.
    pub fn field<F, G>(&mut self, spec: FlagSpec, field: G) -> Result<()>
    where
        F: Send + Sync + 'static,
        G: for<'x> Fn(&'x mut C) -> &'x mut F + Send + Sync + 'static,
    {
        let full = self.leaf(&spec)?;
        reject_pointer::<F>(&full.name)?;
        let codec = self
            .sink
            .binds()
            .lookup::<F>()
            .ok_or_else(|| DiError::UnsupportedFlagType {
                owner: type_name::<C>(),
                field: full.name.clone(),
                type_name: type_name::<F>(),
            })?;
        self.bind_leaf(&spec, full, field, codec)
    }

    /// A field whose type parses and renders itself.
    pub fn var<F, G>(&mut self, spec: FlagSpec, field: G) -> Result<()>
    where
        F: Value + 'static,
        G: for<'x> Fn(&'x mut C) -> &'x mut F + Send + Sync + 'static,
    {
        let full = self.leaf(&spec)?;
        reject_pointer::<F>(&full.name)?;
        let codec = self
            .sink
            .binds()
            .custom::<F>()
            .unwrap_or_else(|| Arc::new(ValueCodec::<F>::new()));
        self.bind_leaf(&spec, full, field, codec)
    }

    /// A field with a textual form (`FromStr` + `Display`), such as `IpAddr`.
    pub fn text<F, G>(&mut self, spec: FlagSpec, field: G) -> Result<()>
    where
        F: FromStr + Display + Send + Sync + 'static,
        F::Err: Display,
        G: for<'x> Fn(&'x mut C) -> &'x mut F + Send + Sync + 'static,
    {
        let full = self.leaf(&spec)?;
        reject_pointer::<F>(&full.name)?;
        let codec = self
            .sink
            .binds()
            .custom::<F>()
            .unwrap_or_else(|| Arc::new(TextCodec::<F>::new()));
        self.bind_leaf(&spec, full, field, codec)
    }

    /// A field with an explicit codec, bypassing the lookup.
    pub fn with_codec<F, G>(
        &mut self,
        spec: FlagSpec,
        field: G,
        codec: impl FlagCodec<F>,
    ) -> Result<()>
    where
        F: 'static,
        G: for<'x> Fn(&'x mut C) -> &'x mut F + Send + Sync + 'static,
    {
        let full = self.leaf(&spec)?;
        reject_pointer::<F>(&full.name)?;
        self.bind_leaf(&spec, full, field, Arc::new(codec))
    }

    /// A nested option struct. Its flags are named `<name>-<child>`; an
    /// empty name flattens them into this prefix.
    pub fn nested<N, G>(&mut self, spec: FlagSpec, field: G) -> Result<()>
    where
        N: Options,
        G: for<'x> Fn(&'x mut C) -> &'x mut N + Send + Sync + 'static,
    {
        let access = compose(&self.access, field);
        self.descend::<N>(&spec, access)
    }

    /// A nested option struct behind `Option<Box<_>>`; `None` is replaced with
    /// `N::default()` before binding.
    pub fn nested_boxed<N, G>(&mut self, spec: FlagSpec, field: G) -> Result<()>
    where
        N: Options + Default,
        G: for<'x> Fn(&'x mut C) -> &'x mut Option<Box<N>> + Send + Sync + 'static,
    {
        let slot = compose(&self.access, field);
        let access: Accessor<R, N> = accessor(move |root: &mut R| {
            &mut **slot(root).get_or_insert_with(|| Box::new(N::default()))
        });
        {
            let mut root = self.sink.cell().write();
            let _ = access(&mut *root);
        }
        self.descend::<N>(&spec, access)
    }

    fn descend<N: Options>(&mut self, spec: &FlagSpec, access: Accessor<R, N>) -> Result<()> {
        let mut child = Binder {
            sink: &mut *self.sink,
            access,
            prefix: self.prefix.concat(&spec.name, &spec.usage),
        };
        N::bind(&mut child)
    }

    fn leaf(&self, spec: &FlagSpec) -> Result<Prefix> {
        if spec.name.is_empty() {
            return Err(DiError::UnnamedFlag {
                owner: type_name::<C>(),
            });
        }
        Ok(self.prefix.concat(&spec.name, &spec.usage))
    }

    fn bind_leaf<F, G>(
        &mut self,
        spec: &FlagSpec,
        full: Prefix,
        field: G,
        codec: Arc<dyn FlagCodec<F>>,
    ) -> Result<()>
    where
        F: 'static,
        G: for<'x> Fn(&'x mut C) -> &'x mut F + Send + Sync + 'static,
    {
        let access = compose(&self.access, field);
        let cell = Arc::clone(self.sink.cell());

        if let Some(default) = spec.default.as_deref().filter(|d| !d.is_empty()) {
            let mut root = cell.write();
            let slot = access(&mut *root);
            if codec.is_zero(slot) {
                codec
                    .set(slot, default, true)
                    .map_err(|reason| DiError::InvalidDefault {
                        name: full.name.clone(),
                        value: default.to_string(),
                        reason,
                    })?;
            }
        }

        if spec.required {
            let access = Arc::clone(&access);
            let codec = Arc::clone(&codec);
            self.sink.require(RequiredCheck {
                flag: full.name.clone(),
                is_zero: Box::new(move |root: &mut R| codec.is_zero(access(root))),
            });
        }

        self.sink.register(
            full.name,
            full.usage,
            Box::new(BoundField {
                cell,
                access,
                codec,
                changed: false,
            }),
        )
    }
}

/// Flags bind to owned storage; smart pointers, references and `Option`
/// leaves are refused.
fn reject_pointer<F: ?Sized>(name: &str) -> Result<()> {
    const POINTERS: [&str; 7] = [
        "&",
        "*const ",
        "*mut ",
        "alloc::boxed::Box<",
        "alloc::rc::Rc<",
        "alloc::sync::Arc<",
        "core::option::Option<",
    ];
    let ty = type_name::<F>();
    if POINTERS.iter().any(|p| ty.starts_with(p)) {
        return Err(DiError::PointerFlag {
            name: name.to_string(),
            type_name: ty,
        });
    }
    Ok(())
}

// =============================================================================
// Shared option storage
// =============================================================================

/// Runs the `required` checks and validator hook of one bound option struct.
pub struct FlagValidation {
    owner: &'static str,
    /// The set the flags went into and their names.
    bound: Option<(u64, Vec<String>)>,
    check: Box<dyn Fn(Option<&ValidatorHook>) -> std::result::Result<(), ValidationError> + Send + Sync>,
}

impl FlagValidation {
    /// The option struct being validated.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn run(&self, hook: Option<&ValidatorHook>) -> std::result::Result<(), ValidationError> {
        (self.check)(hook)
    }

    /// Names of the flags this struct registered into `flags`.
    pub fn flags_in(&self, flags: &FlagSet) -> &[String] {
        match &self.bound {
            Some((set, names)) if *set == flags.id() => names,
            _ => &[],
        }
    }
}

impl fmt::Debug for FlagValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagValidation")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a builder's option storage.
pub trait Configurable: Send + Sync {
    /// Bind the option fields into `flags` (or only apply defaults when there
    /// is no flag set) and return the validation for them.
    fn bind_flags(
        &self,
        flags: Option<&mut FlagSet>,
        binds: &FlagBinds,
        prefix: &str,
    ) -> Result<FlagValidation>;

    /// Like [`bind_flags`](Self::bind_flags), taking over the flags named in
    /// `replacing`: rebound names keep their place in the set, the rest are
    /// removed.
    fn rebind_flags(
        &self,
        flags: Option<&mut FlagSet>,
        binds: &FlagBinds,
        prefix: &str,
        replacing: &[String],
    ) -> Result<FlagValidation>;

    fn options_type(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Option struct shared between its flags and the builder that reads it.
///
/// Flags write through the cell; builders take a snapshot when they run.
pub struct OptionCell<O> {
    inner: Arc<RwLock<O>>,
}

impl<O> Clone for OptionCell<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: Options> OptionCell<O> {
    pub fn new(options: O) -> Self {
        Self {
            inner: Arc::new(RwLock::new(options)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, O> {
        self.inner.read()
    }

    pub fn snapshot(&self) -> O
    where
        O: Clone,
    {
        self.inner.read().clone()
    }

    fn bind(
        &self,
        flags: Option<&mut FlagSet>,
        binds: &FlagBinds,
        prefix: &str,
        replacing: &[String],
    ) -> Result<FlagValidation> {
        let mut state = BindState {
            cell: Arc::clone(&self.inner),
            binds,
            staged: Vec::new(),
            checks: Vec::new(),
        };
        {
            let mut root: Binder<'_, O, O> = Binder {
                sink: &mut state,
                access: accessor(|root: &mut O| root),
                prefix: Prefix {
                    name: prefix.to_string(),
                    usage: String::new(),
                },
            };
            O::bind(&mut root)?;
        }

        let (checks, bound) = state.commit(flags, replacing)?;
        let cell = Arc::clone(&self.inner);
        let owner = type_name::<O>();
        Ok(FlagValidation {
            owner,
            bound,
            check: Box::new(move |hook| {
                let mut options = cell.write();
                if let Some(result) = options.validate_flags() {
                    return result.map_err(|e| e.with_owner(owner));
                }

                let mut err = ValidationError::new();
                for check in &checks {
                    if (check.is_zero)(&mut *options) {
                        err.push(owner, check.flag.as_str(), "is required");
                    }
                }
                if let Some(hook) = hook {
                    if let Err(e) = hook(&*options as &dyn Any) {
                        err.merge(e.with_owner(owner));
                    }
                }
                err.into_result()
            }),
        })
    }
}

impl<O: Options + Default> Default for OptionCell<O> {
    fn default() -> Self {
        Self::new(O::default())
    }
}

impl<O: Options> Configurable for OptionCell<O> {
    fn bind_flags(
        &self,
        flags: Option<&mut FlagSet>,
        binds: &FlagBinds,
        prefix: &str,
    ) -> Result<FlagValidation> {
        self.bind(flags, binds, prefix, &[])
    }

    fn rebind_flags(
        &self,
        flags: Option<&mut FlagSet>,
        binds: &FlagBinds,
        prefix: &str,
        replacing: &[String],
    ) -> Result<FlagValidation> {
        self.bind(flags, binds, prefix, replacing)
    }

    fn options_type(&self) -> &'static str {
        type_name::<O>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<O: fmt::Debug> fmt::Debug for OptionCell<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OptionCell").field(&*self.inner.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FnCodec;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Endpoint(String);

    impl FromStr for Endpoint {
        type Err = String;

        fn from_str(s: &str) -> std::result::Result<Self, String> {
            if s.contains(':') {
                Ok(Endpoint(s.to_string()))
            } else {
                Err(format!("{s} is not host:port"))
            }
        }
    }

    impl Display for Endpoint {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Default, Debug)]
    struct Tls {
        cert: String,
        verify: bool,
    }

    impl Options for Tls {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("cert").usage(" certificate path"), |o| &mut o.cert)?;
            b.field(FlagSpec::new("verify").default_value("true"), |o| &mut o.verify)
        }
    }

    #[derive(Clone, Default, Debug)]
    struct Cache {
        size: usize,
    }

    impl Options for Cache {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("size").default_value("64"), |o| &mut o.size)
        }
    }

    #[derive(Clone, Default, Debug)]
    struct Server {
        port: u16,
        hosts: Vec<String>,
        limits: HashMap<String, u32>,
        timeout: Duration,
        addr: Endpoint,
        tls: Tls,
        shared: Tls,
        cache: Option<Box<Cache>>,
    }

    impl Options for Server {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(
                FlagSpec::new("port").default_value("8080").usage("listen port"),
                |o| &mut o.port,
            )?;
            b.field(FlagSpec::new("hosts").default_value("localhost"), |o| &mut o.hosts)?;
            b.field(FlagSpec::new("limits"), |o| &mut o.limits)?;
            b.field(FlagSpec::new("timeout").default_value("5s"), |o| &mut o.timeout)?;
            b.text(FlagSpec::new("addr"), |o| &mut o.addr)?;
            b.nested(FlagSpec::new("tls").usage("TLS:"), |o| &mut o.tls)?;
            b.nested(FlagSpec::new(""), |o| &mut o.shared)?;
            b.nested_boxed(FlagSpec::new("cache"), |o| &mut o.cache)
        }
    }

    fn bind<O: Options>(cell: &OptionCell<O>, flags: &mut FlagSet) -> Result<FlagValidation> {
        cell.bind_flags(Some(flags), &FlagBinds::new(), "")
    }

    #[test]
    fn test_defaults_and_names() {
        let cell = OptionCell::new(Server::default());
        let mut flags = FlagSet::new("test");
        bind(&cell, &mut flags).unwrap();

        let names: Vec<String> = {
            let mut names = Vec::new();
            flags.visit_all(|f| names.push(f.name().to_string()));
            names
        };
        assert_eq!(
            names,
            vec![
                "port", "hosts", "limits", "timeout", "addr", "tls-cert", "tls-verify", "cert",
                "verify", "cache-size",
            ]
        );

        let opts = cell.snapshot();
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.hosts, vec!["localhost"]);
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert!(opts.tls.verify);
        assert_eq!(opts.cache.as_ref().map(|c| c.size), Some(64));
        assert_eq!(flags.lookup("tls-cert").unwrap().usage(), "TLS: certificate path");
        assert_eq!(flags.lookup("port").unwrap().default_value(), "8080");
    }

    #[test]
    fn test_set_writes_through() {
        let cell = OptionCell::new(Server::default());
        let mut flags = FlagSet::new("test");
        bind(&cell, &mut flags).unwrap();

        flags.set("port", "9090").unwrap();
        flags.set("tls-cert", "/etc/cert.pem").unwrap();
        flags.set("addr", "127.0.0.1:80").unwrap();
        flags.set("cache-size", "8").unwrap();

        let opts = cell.snapshot();
        assert_eq!(opts.port, 9090);
        assert_eq!(opts.tls.cert, "/etc/cert.pem");
        assert_eq!(opts.addr, Endpoint("127.0.0.1:80".into()));
        assert!(flags.set("addr", "nowhere").is_err());
        assert_eq!(opts.cache.unwrap().size, 8);
        assert_eq!(flags.get("port").as_deref(), Some("9090"));
    }

    #[test]
    fn test_list_first_set_replaces_default() {
        let cell = OptionCell::new(Server::default());
        let mut flags = FlagSet::new("test");
        bind(&cell, &mut flags).unwrap();

        flags.set("hosts", "a,b").unwrap();
        assert_eq!(cell.read().hosts, vec!["a", "b"]);
        flags.set("hosts", "c").unwrap();
        assert_eq!(cell.read().hosts, vec!["a", "b", "c"]);

        flags.set("limits", "x=1").unwrap();
        flags.set("limits", "y=2,x=3").unwrap();
        assert_eq!(cell.read().limits.get("x"), Some(&3));
        assert_eq!(cell.read().limits.len(), 2);
    }

    #[test]
    fn test_preset_value_wins_over_default() {
        let cell = OptionCell::new(Server {
            port: 1,
            ..Default::default()
        });
        cell.bind_flags(None, &FlagBinds::new(), "").unwrap();
        assert_eq!(cell.read().port, 1);
        assert_eq!(cell.read().hosts, vec!["localhost"]);
    }

    #[test]
    fn test_prefix() {
        let cell = OptionCell::new(Cache::default());
        let mut flags = FlagSet::new("test");
        cell.bind_flags(Some(&mut flags), &FlagBinds::new(), "redis")
            .unwrap();
        assert!(flags.lookup("redis-size").is_some());
    }

    #[derive(Default)]
    struct Pointers {
        boxed: Box<u16>,
        maybe: Option<u16>,
    }

    impl Options for Pointers {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("maybe"), |o| &mut o.maybe)?;
            b.field(FlagSpec::new("boxed"), |o| &mut o.boxed)
        }
    }

    #[test]
    fn test_pointer_fields_rejected() {
        let cell = OptionCell::new(Pointers::default());
        let err = cell.bind_flags(None, &FlagBinds::new(), "").unwrap_err();
        assert!(matches!(err, DiError::PointerFlag { ref name, .. } if name == "maybe"));
    }

    #[derive(Default)]
    struct Unsupported {
        nested: Vec<Vec<u8>>,
    }

    impl Options for Unsupported {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("nested"), |o| &mut o.nested)
        }
    }

    #[test]
    fn test_unsupported_type_names_struct_and_field() {
        let cell = OptionCell::new(Unsupported::default());
        let err = cell.bind_flags(None, &FlagBinds::new(), "").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unsupported"), "{msg}");
        assert!(msg.contains("nested"), "{msg}");
    }

    #[test]
    fn test_custom_codec_for_unsupported_type() {
        let mut binds = FlagBinds::new();
        binds
            .register(FnCodec::new(
                |raw| {
                    Ok(raw
                        .split(';')
                        .map(|s| s.as_bytes().to_vec())
                        .collect::<Vec<Vec<u8>>>())
                },
                |v: &Vec<Vec<u8>>| {
                    v.iter()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .collect::<Vec<_>>()
                        .join(";")
                },
            ))
            .unwrap();

        let cell = OptionCell::new(Unsupported::default());
        let mut flags = FlagSet::new("test");
        cell.bind_flags(Some(&mut flags), &binds, "").unwrap();
        flags.set("nested", "ab;c").unwrap();
        assert_eq!(cell.read().nested, vec![b"ab".to_vec(), b"c".to_vec()]);
    }

    #[derive(Default)]
    struct BadDefault {
        port: u16,
    }

    impl Options for BadDefault {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("port").default_value("http"), |o| &mut o.port)
        }
    }

    #[test]
    fn test_invalid_default() {
        let cell = OptionCell::new(BadDefault::default());
        let err = cell.bind_flags(None, &FlagBinds::new(), "").unwrap_err();
        assert!(matches!(err, DiError::InvalidDefault { ref value, .. } if value == "http"));
    }

    #[derive(Default)]
    struct Database {
        dsn: String,
        pool: u32,
        name: String,
    }

    impl Options for Database {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("dsn").required(), |o| &mut o.dsn)?;
            b.field(FlagSpec::new("pool").required(), |o| &mut o.pool)?;
            b.field(FlagSpec::new("name").default_value("main").required(), |o| &mut o.name)
        }
    }

    #[test]
    fn test_required_fields_aggregate() {
        let cell = OptionCell::new(Database::default());
        let mut flags = FlagSet::new("test");
        let validation = bind(&cell, &mut flags).unwrap();

        let err = validation.run(None).unwrap_err();
        assert_eq!(err.len(), 2);
        let fields: Vec<&str> = err.failures().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["dsn", "pool"]);

        flags.set("dsn", "postgres://").unwrap();
        flags.set("pool", "4").unwrap();
        assert!(validation.run(None).is_ok());
    }

    #[test]
    fn test_validator_hook_sees_options() {
        let cell = OptionCell::new(Database::default());
        let validation = cell.bind_flags(None, &FlagBinds::new(), "").unwrap();
        let hook: ValidatorHook = Arc::new(|opts: &dyn Any| match opts.downcast_ref::<Database>() {
            Some(db) if db.name == "main" => Err(ValidationError::field("name", "is reserved")),
            _ => Ok(()),
        });

        let err = validation.run(Some(&hook)).unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.to_string().contains("name: is reserved"));
    }

    #[derive(Default)]
    struct SelfChecked {
        level: u8,
    }

    impl Options for SelfChecked {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("level").required(), |o| &mut o.level)
        }

        fn validate_flags(&self) -> Option<std::result::Result<(), ValidationError>> {
            Some(if self.level > 3 {
                Err(ValidationError::field("level", "must be at most 3"))
            } else {
                Ok(())
            })
        }
    }

    #[test]
    fn test_override_replaces_required_checks() {
        let cell = OptionCell::new(SelfChecked::default());
        let mut flags = FlagSet::new("test");
        let validation = bind(&cell, &mut flags).unwrap();

        assert!(validation.run(None).is_ok());
        flags.set("level", "5").unwrap();
        assert!(validation.run(None).is_err());
    }

    #[derive(Default)]
    struct Unnamed {
        port: u16,
    }

    impl Options for Unnamed {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new(""), |o| &mut o.port)
        }
    }

    #[test]
    fn test_unnamed_leaf() {
        let cell = OptionCell::new(Unnamed::default());
        let err = cell.bind_flags(None, &FlagBinds::new(), "").unwrap_err();
        assert!(matches!(err, DiError::UnnamedFlag { .. }));
    }

    #[derive(Default)]
    struct HalfBound {
        port: u16,
        nested: Vec<Vec<u8>>,
    }

    impl Options for HalfBound {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.field(FlagSpec::new("port").default_value("8080"), |o| &mut o.port)?;
            b.field(FlagSpec::new("nested"), |o| &mut o.nested)
        }
    }

    #[test]
    fn test_failed_bind_registers_nothing() {
        let cell = OptionCell::new(HalfBound::default());
        let mut flags = FlagSet::new("test");
        let err = bind(&cell, &mut flags).unwrap_err();
        assert!(matches!(err, DiError::UnsupportedFlagType { .. }));
        assert!(flags.is_empty());
    }

    #[test]
    fn test_name_clash_registers_nothing() {
        let mut flags = FlagSet::new("test");
        flags.var("cache-size", Box::new(Note::default()), "").unwrap();

        let err = bind(&OptionCell::new(Server::default()), &mut flags).unwrap_err();
        assert!(matches!(err, DiError::FlagRedefined(ref name) if name == "cache-size"));
        assert_eq!(flags.len(), 1);
        assert!(flags.lookup("port").is_none());
    }

    #[test]
    fn test_rebind_takes_over_flags() {
        let old = OptionCell::new(Server::default());
        let mut flags = FlagSet::new("test");
        flags.var("other", Box::new(Note::default()), "").unwrap();
        let validation = bind(&old, &mut flags).unwrap();
        let owned = validation.flags_in(&flags).to_vec();
        assert_eq!(owned.len(), 10);
        assert!(validation.flags_in(&FlagSet::new("elsewhere")).is_empty());

        let new = OptionCell::new(Cache::default());
        let rebound = new
            .rebind_flags(Some(&mut flags), &FlagBinds::new(), "cache", &owned)
            .unwrap();
        assert_eq!(rebound.flags_in(&flags), ["cache-size".to_string()]);

        let mut names = Vec::new();
        flags.visit_all(|f| names.push(f.name().to_string()));
        assert_eq!(names, vec!["other", "cache-size"]);

        flags.set("cache-size", "16").unwrap();
        assert_eq!(new.read().size, 16);
        assert_eq!(old.read().cache.as_ref().map(|c| c.size), Some(64));
    }

    #[derive(Default)]
    struct Note(String);

    impl Value for Note {
        fn set(&mut self, raw: &str) -> std::result::Result<(), String> {
            self.0 = raw.to_string();
            Ok(())
        }

        fn get(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Optional {
        retries: Option<u16>,
    }

    impl Options for Optional {
        fn bind<R: Send + Sync + 'static>(b: &mut Binder<'_, R, Self>) -> Result<()> {
            b.with_codec(
                FlagSpec::new("retries"),
                |o| &mut o.retries,
                FnCodec::new(
                    |raw| raw.parse::<u16>().map(Some).map_err(|e| e.to_string()),
                    |v: &Option<u16>| v.map(|n| n.to_string()).unwrap_or_default(),
                ),
            )
        }
    }

    #[test]
    fn test_explicit_codec_still_rejects_pointers() {
        let cell = OptionCell::new(Optional::default());
        let err = cell.bind_flags(None, &FlagBinds::new(), "").unwrap_err();
        assert!(matches!(err, DiError::PointerFlag { ref name, .. } if name == "retries"));
    }
}
