//! Change detection over a [`FlagSet`].

use super::set::FlagSet;
use ahash::RandomState;
use std::collections::HashMap;

/// Remembers the rendered value of every flag and reports what changed
/// between checks. Used to decide whether a config reload needs a
/// [`Registry::reconfigure`](crate::Registry::reconfigure).
///
/// The first check only records a baseline.
#[derive(Debug, Default)]
pub struct FlagWatcher {
    snapshot: HashMap<String, String, RandomState>,
    has_baseline: bool,
}

impl FlagWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current values as the baseline.
    pub fn watch(flags: &FlagSet) -> Self {
        let mut watcher = Self::new();
        watcher.changed_flags(flags);
        watcher
    }

    /// Whether any flag differs from the previous check.
    pub fn changed(&mut self, flags: &FlagSet) -> bool {
        !self.changed_flags(flags).is_empty()
    }

    /// Names of the flags whose value differs from the previous check, in
    /// registration order. Flags registered since the previous check count
    /// as changed.
    pub fn changed_flags(&mut self, flags: &FlagSet) -> Vec<String> {
        let baseline = std::mem::replace(&mut self.has_baseline, true);
        let mut changed = Vec::new();
        flags.visit_all(|flag| {
            let value = flag.value();
            let previous = self.snapshot.insert(flag.name().to_string(), value.clone());
            if baseline && previous.as_deref() != Some(value.as_str()) {
                changed.push(flag.name().to_string());
            }
        });
        changed
    }
}
