//! Named, typed parameters that option fields register into.

use crate::error::{DiError, Result};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

/// A value that can be set from, and rendered back to, a string.
///
/// Implement this for option field types that know how to parse themselves
/// and declare the field with [`Binder::var`](crate::flag::Binder::var).
///
/// # Examples
///
/// ```rust
/// use di_registry::flag::Value;
///
/// #[derive(Default)]
/// struct Level(u8);
///
/// impl Value for Level {
///     fn set(&mut self, raw: &str) -> Result<(), String> {
///         self.0 = match raw {
///             "low" => 1,
///             "high" => 9,
///             other => return Err(format!("unknown level {other}")),
///         };
///         Ok(())
///     }
///
///     fn get(&self) -> String {
///         match self.0 {
///             0 => String::new(),
///             1 => "low".into(),
///             _ => "high".into(),
///         }
///     }
/// }
/// ```
pub trait Value: Send + Sync {
    /// Parse `raw` and store it.
    fn set(&mut self, raw: &str) -> std::result::Result<(), String>;

    /// Render the current value. An empty string is the zero value.
    fn get(&self) -> String;
}

/// One registered flag.
pub struct Flag {
    name: String,
    usage: String,
    default_value: String,
    value: Box<dyn Value>,
    changed: bool,
}

impl Flag {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn usage(&self) -> &str {
        &self.usage
    }

    /// The rendered value at registration time.
    #[inline]
    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    /// The current rendered value.
    #[inline]
    pub fn value(&self) -> String {
        self.value.get()
    }

    /// Whether [`FlagSet::set`] has been called for this flag.
    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("default", &self.default_value)
            .field("changed", &self.changed)
            .finish()
    }
}

/// An ordered set of flags, keyed by name.
///
/// Option structs register their fields here at `provide` time; an
/// application's argv parser, env loader or config file reader then feeds
/// values through [`set`](Self::set) or [`apply`](Self::apply).
///
/// # Examples
///
/// ```rust
/// use di_registry::flag::FlagSet;
///
/// let mut flags = FlagSet::new("app");
/// assert!(flags.set("missing", "1").is_err());
/// assert!(flags.is_empty());
/// ```
pub struct FlagSet {
    id: u64,
    name: String,
    flags: Vec<Flag>,
    index: HashMap<String, usize, RandomState>,
}

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

impl FlagSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            flags: Vec::new(),
            index: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Identity of this set, distinct from every other set in the process.
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Register a flag. Its current value becomes the displayed default.
    pub fn var(
        &mut self,
        name: impl Into<String>,
        value: Box<dyn Value>,
        usage: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(DiError::FlagRedefined(name));
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "di_registry",
            flag_set = %self.name,
            flag = %name,
            "Registering flag"
        );

        let default_value = value.get();
        self.index.insert(name.clone(), self.flags.len());
        self.flags.push(Flag {
            name,
            usage: usage.into(),
            default_value,
            value,
            changed: false,
        });
        Ok(())
    }

    /// Swap the value behind an existing flag, keeping its position. The
    /// flag reads as unchanged with the new value as its default.
    pub(crate) fn replace(&mut self, name: &str, value: Box<dyn Value>, usage: String) -> bool {
        let Some(&idx) = self.index.get(name) else {
            return false;
        };
        let flag = &mut self.flags[idx];
        flag.default_value = value.get();
        flag.value = value;
        flag.usage = usage;
        flag.changed = false;
        true
    }

    /// Drop a flag. Later flags keep their relative order.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let Some(idx) = self.index.remove(name) else {
            return false;
        };
        self.flags.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        true
    }

    /// Set a flag from its string form.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<()> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| DiError::UnknownFlag(name.to_string()))?;
        let flag = &mut self.flags[idx];
        flag.value
            .set(raw)
            .map_err(|reason| DiError::InvalidFlagValue {
                name: name.to_string(),
                value: raw.to_string(),
                reason,
            })?;
        flag.changed = true;
        Ok(())
    }

    /// Current rendered value of a flag.
    pub fn get(&self, name: &str) -> Option<String> {
        self.lookup(name).map(Flag::value)
    }

    pub fn lookup(&self, name: &str) -> Option<&Flag> {
        self.index.get(name).map(|&idx| &self.flags[idx])
    }

    /// Visit every flag in registration order.
    pub fn visit_all(&self, mut f: impl FnMut(&Flag)) {
        for flag in &self.flags {
            f(flag);
        }
    }

    /// Visit only flags that have been set.
    pub fn visit(&self, mut f: impl FnMut(&Flag)) {
        for flag in self.flags.iter().filter(|flag| flag.changed) {
            f(flag);
        }
    }

    /// Apply key/value overrides in order. Every item is attempted; the
    /// failures are reported together.
    pub fn apply<I, K, V>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let errors = items
            .into_iter()
            .filter_map(|(name, raw)| self.set(name.as_ref(), raw.as_ref()).err())
            .collect();
        DiError::collect(errors)
    }

    /// Help text, one entry per flag in registration order.
    pub fn usage(&self) -> String {
        let mut out = String::new();
        for flag in &self.flags {
            out.push_str("  -");
            out.push_str(&flag.name);
            out.push('\n');
            out.push_str("    \t");
            out.push_str(&flag.usage.replace('\n', "\n    \t"));
            if !flag.default_value.is_empty() {
                out.push_str(&format!(" (default {})", flag.default_value));
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagSet")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter(i64);

    impl Value for Counter {
        fn set(&mut self, raw: &str) -> std::result::Result<(), String> {
            self.0 = raw.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
            Ok(())
        }

        fn get(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_var_set_get() {
        let mut flags = FlagSet::new("test");
        flags
            .var("count", Box::new(Counter(3)), "how many")
            .unwrap();

        assert_eq!(flags.get("count").as_deref(), Some("3"));
        flags.set("count", "7").unwrap();
        assert_eq!(flags.get("count").as_deref(), Some("7"));

        let flag = flags.lookup("count").unwrap();
        assert_eq!(flag.default_value(), "3");
        assert!(flag.is_changed());
    }

    #[test]
    fn test_redefined() {
        let mut flags = FlagSet::new("test");
        flags.var("a", Box::new(Counter(0)), "").unwrap();
        let err = flags.var("a", Box::new(Counter(0)), "").unwrap_err();
        assert!(matches!(err, DiError::FlagRedefined(name) if name == "a"));
    }

    #[test]
    fn test_set_errors() {
        let mut flags = FlagSet::new("test");
        flags.var("a", Box::new(Counter(0)), "").unwrap();

        assert!(matches!(flags.set("b", "1"), Err(DiError::UnknownFlag(_))));
        let err = flags.set("a", "x").unwrap_err();
        assert!(matches!(err, DiError::InvalidFlagValue { ref name, .. } if name == "a"));
        assert!(!flags.lookup("a").unwrap().is_changed());
    }

    #[test]
    fn test_apply_reports_every_failure() {
        let mut flags = FlagSet::new("test");
        flags.var("a", Box::new(Counter(0)), "").unwrap();
        flags.var("b", Box::new(Counter(0)), "").unwrap();

        let err = flags
            .apply([("a", "1"), ("nope", "2"), ("b", "bad")])
            .unwrap_err();
        assert!(matches!(err, DiError::Multiple(ref errs) if errs.len() == 2));
        assert_eq!(flags.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_visit_order_and_usage() {
        let mut flags = FlagSet::new("test");
        flags.var("z", Box::new(Counter(1)), "last letter").unwrap();
        flags.var("a", Box::new(Counter(0)), "first letter").unwrap();
        flags.set("a", "2").unwrap();

        let mut all = Vec::new();
        flags.visit_all(|f| all.push(f.name().to_string()));
        assert_eq!(all, vec!["z", "a"]);

        let mut changed = Vec::new();
        flags.visit(|f| changed.push(f.name().to_string()));
        assert_eq!(changed, vec!["a"]);

        let usage = flags.usage();
        assert!(usage.contains("  -z\n    \tlast letter (default 1)\n"));
        assert!(usage.contains("  -a\n    \tfirst letter (default 0)\n"));
    }

    #[test]
    fn test_replace_and_remove_keep_order() {
        let mut flags = FlagSet::new("test");
        flags.var("a", Box::new(Counter(1)), "").unwrap();
        flags.var("b", Box::new(Counter(2)), "").unwrap();
        flags.var("c", Box::new(Counter(3)), "").unwrap();
        flags.set("b", "20").unwrap();

        assert!(flags.replace("b", Box::new(Counter(5)), "fresh".into()));
        let b = flags.lookup("b").unwrap();
        assert_eq!((b.value().as_str(), b.default_value(), b.usage()), ("5", "5", "fresh"));
        assert!(!b.is_changed());

        assert!(flags.remove("a"));
        assert!(!flags.remove("a"));
        let mut names = Vec::new();
        flags.visit_all(|f| names.push(f.name().to_string()));
        assert_eq!(names, vec!["b", "c"]);
        flags.set("c", "30").unwrap();
        assert_eq!(flags.get("c").as_deref(), Some("30"));
        assert_ne!(flags.id(), FlagSet::new("test").id());
    }
}
