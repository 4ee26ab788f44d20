//! Value codecs: how a field type is parsed from and rendered to a string.
//!
//! Lookup order for a field of type `F`:
//!
//! 1. a codec the application registered for exactly `F`
//!    ([`Registry::register_flag_binder`](crate::Registry::register_flag_binder));
//! 2. a built-in codec for the kind of `F`: every integer width, `f32`,
//!    `f64`, `bool`, `String`, `char`, [`Duration`], `Vec<scalar>` and
//!    `HashMap<String, scalar>`.

use super::csv::{read_record, write_record};
use super::set::Value;
use crate::error::{DiError, Result};
use ahash::RandomState;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Parses and renders one field type.
pub trait FlagCodec<F>: Send + Sync + 'static {
    /// Parse `raw` into `slot`.
    ///
    /// `first` is true for a default literal and for the first external
    /// value; collection codecs replace on the first set and accumulate after.
    fn set(&self, slot: &mut F, raw: &str, first: bool) -> std::result::Result<(), String>;

    /// Render the current value.
    fn render(&self, slot: &F) -> String;

    /// Whether the field holds its zero value. Defaults only apply to zero fields
    /// and `required` fields fail validation when zero.
    fn is_zero(&self, slot: &F) -> bool {
        self.render(slot).is_empty()
    }
}

// =============================================================================
// Scalars
// =============================================================================

/// A single value with a string form. Lists and maps are built from these.
pub trait Scalar: Sized + Send + Sync + 'static {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String>;
    fn render_flag(&self) -> String;
    fn is_zero_flag(&self) -> bool;
}

macro_rules! impl_scalar_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl Scalar for $t {
                #[inline]
                fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
                    raw.trim().parse::<$t>().map_err(|e| e.to_string())
                }

                #[inline]
                fn render_flag(&self) -> String {
                    self.to_string()
                }

                #[inline]
                fn is_zero_flag(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

impl_scalar_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_scalar_float {
    ($($t:ty),* $(,)?) => {
        $(
            impl Scalar for $t {
                #[inline]
                fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
                    raw.trim().parse::<$t>().map_err(|e| e.to_string())
                }

                #[inline]
                fn render_flag(&self) -> String {
                    self.to_string()
                }

                #[inline]
                fn is_zero_flag(&self) -> bool {
                    *self == 0.0
                }
            }
        )*
    };
}

impl_scalar_float!(f32, f64);

impl Scalar for bool {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        match raw.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            other => Err(format!("invalid boolean {other:?}")),
        }
    }

    fn render_flag(&self) -> String {
        self.to_string()
    }

    fn is_zero_flag(&self) -> bool {
        !*self
    }
}

impl Scalar for String {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        Ok(raw.to_string())
    }

    fn render_flag(&self) -> String {
        self.clone()
    }

    fn is_zero_flag(&self) -> bool {
        self.is_empty()
    }
}

impl Scalar for char {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(format!("expected a single character, got {raw:?}")),
        }
    }

    fn render_flag(&self) -> String {
        if *self == '\0' { String::new() } else { self.to_string() }
    }

    fn is_zero_flag(&self) -> bool {
        *self == '\0'
    }
}

impl Scalar for Duration {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        let raw = raw.trim();
        if raw == "0" {
            return Ok(Duration::ZERO);
        }
        humantime::parse_duration(raw).map_err(|e| e.to_string())
    }

    fn render_flag(&self) -> String {
        humantime::format_duration(*self).to_string()
    }

    fn is_zero_flag(&self) -> bool {
        self.is_zero()
    }
}

/// Codec for a bare [`Scalar`] field.
pub struct ScalarCodec<T>(PhantomData<fn() -> T>);

impl<T> ScalarCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ScalarCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> FlagCodec<T> for ScalarCodec<T> {
    fn set(&self, slot: &mut T, raw: &str, _first: bool) -> std::result::Result<(), String> {
        *slot = T::parse_flag(raw)?;
        Ok(())
    }

    fn render(&self, slot: &T) -> String {
        slot.render_flag()
    }

    fn is_zero(&self, slot: &T) -> bool {
        slot.is_zero_flag()
    }
}

// =============================================================================
// Collections
// =============================================================================

/// Codec for `Vec<T>`: one comma-separated record per set.
pub struct ListCodec<T>(PhantomData<fn() -> T>);

impl<T> ListCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ListCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> FlagCodec<Vec<T>> for ListCodec<T> {
    fn set(&self, slot: &mut Vec<T>, raw: &str, first: bool) -> std::result::Result<(), String> {
        let items = read_record(raw)?
            .iter()
            .map(|field| T::parse_flag(field))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if first {
            *slot = items;
        } else {
            slot.extend(items);
        }
        Ok(())
    }

    fn render(&self, slot: &Vec<T>) -> String {
        let fields: Vec<String> = slot.iter().map(Scalar::render_flag).collect();
        write_record(&fields)
    }

    fn is_zero(&self, slot: &Vec<T>) -> bool {
        slot.is_empty()
    }
}

/// Codec for `HashMap<String, T>`: comma-separated `key=value` items.
pub struct MapCodec<T>(PhantomData<fn() -> T>);

impl<T> MapCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for MapCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> FlagCodec<HashMap<String, T>> for MapCodec<T> {
    fn set(
        &self,
        slot: &mut HashMap<String, T>,
        raw: &str,
        first: bool,
    ) -> std::result::Result<(), String> {
        let mut items = HashMap::new();
        for pair in read_record(raw)? {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("{pair} must be formatted as key=value"))?;
            items.insert(key.to_string(), T::parse_flag(value)?);
        }
        if first {
            *slot = items;
        } else {
            slot.extend(items);
        }
        Ok(())
    }

    fn render(&self, slot: &HashMap<String, T>) -> String {
        let mut pairs: Vec<String> = slot
            .iter()
            .map(|(key, value)| format!("{key}={}", value.render_flag()))
            .collect();
        pairs.sort();
        write_record(&pairs)
    }

    fn is_zero(&self, slot: &HashMap<String, T>) -> bool {
        slot.is_empty()
    }
}

// =============================================================================
// Self-describing types
// =============================================================================

/// Codec for fields that implement [`Value`] themselves.
pub struct ValueCodec<F>(PhantomData<fn() -> F>);

impl<F> ValueCodec<F> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<F> Default for ValueCodec<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Value + 'static> FlagCodec<F> for ValueCodec<F> {
    fn set(&self, slot: &mut F, raw: &str, _first: bool) -> std::result::Result<(), String> {
        slot.set(raw)
    }

    fn render(&self, slot: &F) -> String {
        slot.get()
    }
}

/// Codec for `FromStr + Display` types such as `IpAddr` or `PathBuf`-like
/// newtypes. The zero value is one that renders empty.
pub struct TextCodec<F>(PhantomData<fn() -> F>);

impl<F> TextCodec<F> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<F> Default for TextCodec<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> FlagCodec<F> for TextCodec<F>
where
    F: FromStr + Display + Send + Sync + 'static,
    F::Err: Display,
{
    fn set(&self, slot: &mut F, raw: &str, _first: bool) -> std::result::Result<(), String> {
        *slot = raw.parse().map_err(|e: F::Err| e.to_string())?;
        Ok(())
    }

    fn render(&self, slot: &F) -> String {
        slot.to_string()
    }
}

type ParseFn<F> = Box<dyn Fn(&str) -> std::result::Result<F, String> + Send + Sync>;
type RenderFn<F> = Box<dyn Fn(&F) -> String + Send + Sync>;
type ZeroFn<F> = Box<dyn Fn(&F) -> bool + Send + Sync>;

/// Codec assembled from closures, for registering application types.
///
/// # Examples
///
/// ```rust
/// use di_registry::flag::FnCodec;
/// use std::net::Ipv4Addr;
///
/// let codec = FnCodec::new(
///     |raw| raw.parse::<Ipv4Addr>().map_err(|e| e.to_string()),
///     |ip| ip.to_string(),
/// )
/// .with_zero(|ip| ip.is_unspecified());
/// # let _ = codec;
/// ```
pub struct FnCodec<F> {
    parse: ParseFn<F>,
    render: RenderFn<F>,
    zero: Option<ZeroFn<F>>,
}

impl<F: 'static> FnCodec<F> {
    pub fn new(
        parse: impl Fn(&str) -> std::result::Result<F, String> + Send + Sync + 'static,
        render: impl Fn(&F) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            parse: Box::new(parse),
            render: Box::new(render),
            zero: None,
        }
    }

    /// Override the zero-value test (default: renders empty).
    pub fn with_zero(mut self, zero: impl Fn(&F) -> bool + Send + Sync + 'static) -> Self {
        self.zero = Some(Box::new(zero));
        self
    }
}

impl<F: 'static> FlagCodec<F> for FnCodec<F> {
    fn set(&self, slot: &mut F, raw: &str, _first: bool) -> std::result::Result<(), String> {
        *slot = (self.parse)(raw)?;
        Ok(())
    }

    fn render(&self, slot: &F) -> String {
        (self.render)(slot)
    }

    fn is_zero(&self, slot: &F) -> bool {
        match &self.zero {
            Some(zero) => zero(slot),
            None => self.render(slot).is_empty(),
        }
    }
}

// =============================================================================
// Codec tables
// =============================================================================

/// Holds an `Arc<dyn FlagCodec<F>>` for some `F`, keyed by `TypeId::of::<F>()`.
type ErasedCodec = Arc<dyn Any + Send + Sync>;

fn erase<F: 'static>(codec: impl FlagCodec<F>) -> ErasedCodec {
    let codec: Arc<dyn FlagCodec<F>> = Arc::new(codec);
    Arc::new(codec)
}

fn unerase<F: 'static>(codec: &ErasedCodec) -> Option<Arc<dyn FlagCodec<F>>> {
    codec.downcast_ref::<Arc<dyn FlagCodec<F>>>().cloned()
}

macro_rules! kind_binds {
    ($map:ident; $($t:ty),* $(,)?) => {
        $(
            $map.insert(TypeId::of::<$t>(), erase(ScalarCodec::<$t>::new()));
            $map.insert(TypeId::of::<Vec<$t>>(), erase(ListCodec::<$t>::new()));
            $map.insert(
                TypeId::of::<HashMap<String, $t>>(),
                erase(MapCodec::<$t>::new()),
            );
        )*
    };
}

static KIND_BINDS: Lazy<HashMap<TypeId, ErasedCodec, RandomState>> = Lazy::new(|| {
    let mut map = HashMap::with_hasher(RandomState::new());
    kind_binds!(map;
        i8, i16, i32, i64, i128, isize,
        u8, u16, u32, u64, u128, usize,
        f32, f64, bool, String, char, Duration,
    );
    map
});

/// Per-type codecs registered by the application, consulted before the
/// built-in kind table.
#[derive(Default)]
pub struct FlagBinds {
    custom: HashMap<TypeId, ErasedCodec, RandomState>,
}

impl FlagBinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the codec for `F`. Each type can be bound once.
    pub fn register<F: 'static>(&mut self, codec: impl FlagCodec<F>) -> Result<()> {
        let type_id = TypeId::of::<F>();
        if self.custom.contains_key(&type_id) {
            return Err(DiError::FlagBinderExists(type_name::<F>()));
        }
        self.custom.insert(type_id, erase(codec));
        Ok(())
    }

    /// The application codec for `F`, if one was registered.
    pub fn custom<F: 'static>(&self) -> Option<Arc<dyn FlagCodec<F>>> {
        self.custom.get(&TypeId::of::<F>()).and_then(unerase::<F>)
    }

    /// The built-in codec for `F`, if its kind is supported.
    pub fn kind<F: 'static>() -> Option<Arc<dyn FlagCodec<F>>> {
        KIND_BINDS.get(&TypeId::of::<F>()).and_then(unerase::<F>)
    }

    /// Application codec first, then the built-in one.
    pub fn lookup<F: 'static>(&self) -> Option<Arc<dyn FlagCodec<F>>> {
        self.custom::<F>().or_else(Self::kind::<F>)
    }
}

impl std::fmt::Debug for FlagBinds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagBinds")
            .field("custom", &self.custom.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_scalar_kinds() {
        let mut port = 0u16;
        let codec = FlagBinds::kind::<u16>().unwrap();
        assert!(codec.is_zero(&port));
        codec.set(&mut port, "8080", true).unwrap();
        assert_eq!(port, 8080);
        assert_eq!(codec.render(&port), "8080");
        assert!(codec.set(&mut port, "70000", false).is_err());

        let mut on = false;
        let codec = FlagBinds::kind::<bool>().unwrap();
        for raw in ["1", "t", "T", "TRUE", "true", "True"] {
            on = false;
            codec.set(&mut on, raw, true).unwrap();
            assert!(on, "{raw}");
        }
        assert!(codec.set(&mut on, "yes", true).is_err());
    }

    #[test]
    fn test_duration() {
        let codec = FlagBinds::kind::<Duration>().unwrap();
        let mut timeout = Duration::ZERO;
        codec.set(&mut timeout, "1m30s", true).unwrap();
        assert_eq!(timeout, Duration::from_secs(90));
        assert_eq!(codec.render(&timeout), "1m 30s");
        codec.set(&mut timeout, "0", true).unwrap();
        assert!(codec.is_zero(&timeout));
    }

    #[test]
    fn test_list_replaces_then_appends() {
        let codec = FlagBinds::kind::<Vec<String>>().unwrap();
        let mut hosts = vec!["default".to_string()];

        codec.set(&mut hosts, "a,b", true).unwrap();
        assert_eq!(hosts, vec!["a", "b"]);
        codec.set(&mut hosts, r#"c,"d,e""#, false).unwrap();
        assert_eq!(hosts, vec!["a", "b", "c", "d,e"]);
        assert_eq!(codec.render(&hosts), r#"a,b,c,"d,e""#);

        let ints = FlagBinds::kind::<Vec<i32>>().unwrap();
        let mut values = Vec::new();
        assert!(ints.set(&mut values, "1,x", true).is_err());
    }

    #[test]
    fn test_map_replaces_then_merges() {
        let codec = FlagBinds::kind::<HashMap<String, u32>>().unwrap();
        let mut limits = HashMap::new();

        codec.set(&mut limits, "a=1,b=2", true).unwrap();
        codec.set(&mut limits, "b=3,c=4", false).unwrap();
        assert_eq!(limits.len(), 3);
        assert_eq!(limits["b"], 3);
        assert_eq!(codec.render(&limits), "a=1,b=3,c=4");

        let err = codec.set(&mut limits, "oops", false).unwrap_err();
        assert!(err.contains("key=value"));
    }

    #[test]
    fn test_unsupported_kind() {
        assert!(FlagBinds::kind::<Vec<Vec<u8>>>().is_none());
        assert!(FlagBinds::kind::<Ipv4Addr>().is_none());
    }

    #[test]
    fn test_custom_codec_wins_and_binds_once() {
        let mut binds = FlagBinds::new();
        binds
            .register(FnCodec::new(
                |raw| raw.parse::<u16>().map(|p| p + 1).map_err(|e| e.to_string()),
                |p: &u16| p.to_string(),
            ))
            .unwrap();

        let codec = binds.lookup::<u16>().unwrap();
        let mut port = 0u16;
        codec.set(&mut port, "1", true).unwrap();
        assert_eq!(port, 2);

        let err = binds.register(ScalarCodec::<u16>::new()).unwrap_err();
        assert!(matches!(err, DiError::FlagBinderExists(_)));
        assert!(binds.lookup::<u32>().is_some());
    }

    #[test]
    fn test_text_codec() {
        let codec = TextCodec::<Ipv4Addr>::new();
        let mut ip = Ipv4Addr::UNSPECIFIED;
        codec.set(&mut ip, "10.0.0.1", true).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 1));
        assert!(codec.set(&mut ip, "nope", true).is_err());
    }
}
