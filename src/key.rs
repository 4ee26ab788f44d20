//! Registration slot identity.
//!
//! A [`TypeKey`] is the pair (requested type, name). The empty name is the
//! default slot.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies one registration slot: a type plus an optional name.
#[derive(Clone)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
    name: String,
}

impl TypeKey {
    /// Key for `T` under `name` (`""` is the default slot).
    #[inline]
    pub fn of<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: name.into(),
        }
    }

    /// Same type, different name.
    #[inline]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            name: name.into(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({}, name={:?})", self.type_name, self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}[{}]", self.type_name, self.name)
        }
    }
}
