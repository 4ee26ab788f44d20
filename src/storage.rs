//! Constructor storage: type-keyed groups of named constructors.
//!
//! Uses DashMap for concurrent lookups; each group is an ordered map so
//! bulk resolution visits names deterministically.

use crate::error::{DiError, Result};
use crate::factory::Constructor;
use crate::key::TypeKey;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// All constructors of one type, by name.
pub(crate) type ConstructorGroup = BTreeMap<String, Arc<Constructor>>;

pub(crate) struct ConstructorMap {
    groups: DashMap<TypeId, ConstructorGroup, RandomState>,
}

impl ConstructorMap {
    /// Uses 8 shards; registries hold tens of types, not thousands.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            groups: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Add a constructor. Without `overriding`, an occupied slot is an error;
    /// with it, the previous constructor is returned.
    pub(crate) fn insert(
        &self,
        constructor: Constructor,
        overriding: bool,
    ) -> Result<Option<Arc<Constructor>>> {
        let key = constructor.key().clone();
        let mut group = self.groups.entry(key.type_id()).or_default();
        if !overriding && group.contains_key(key.name()) {
            return Err(DiError::already_registered(&key));
        }
        Ok(group.insert(key.name().to_string(), Arc::new(constructor)))
    }

    /// The constructor for `key`, or why there is none.
    pub(crate) fn lookup(&self, key: &TypeKey) -> Result<Arc<Constructor>> {
        let group = self
            .groups
            .get(&key.type_id())
            .ok_or_else(|| DiError::NotRegistered {
                type_name: key.type_name(),
                name: key.name().to_string(),
            })?;
        group
            .get(key.name())
            .cloned()
            .ok_or_else(|| DiError::NameNotRegistered {
                type_name: key.type_name(),
                name: key.name().to_string(),
                available: group.keys().cloned().collect(),
            })
    }

    #[inline]
    pub(crate) fn contains(&self, key: &TypeKey) -> bool {
        self.groups
            .get(&key.type_id())
            .is_some_and(|group| group.contains_key(key.name()))
    }

    #[inline]
    pub(crate) fn contains_type(&self, type_id: TypeId) -> bool {
        self.groups.contains_key(&type_id)
    }

    /// Every constructor of one type, in name order.
    pub(crate) fn group(&self, type_id: TypeId) -> Vec<Arc<Constructor>> {
        self.groups
            .get(&type_id)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every constructor, ordered by type name then name.
    pub(crate) fn all(&self) -> Vec<Arc<Constructor>> {
        let mut all: Vec<Arc<Constructor>> = self
            .groups
            .iter()
            .flat_map(|group| group.values().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| {
            (a.key().type_name(), a.key().name()).cmp(&(b.key().type_name(), b.key().name()))
        });
        all
    }

    /// Number of registered constructors across all types.
    pub(crate) fn len(&self) -> usize {
        self.groups.iter().map(|group| group.len()).sum()
    }
}
