//! Error types for dependency injection

use crate::key::TypeKey;
use std::fmt;
use thiserror::Error;

/// Error type returned by user builders.
///
/// Anything implementing `std::error::Error + Send + Sync` converts into it
/// with `?`, including [`DiError`] itself.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while registering, validating or resolving
#[derive(Error, Debug)]
pub enum DiError {
    /// No builder was ever provided for the type
    #[error("type {type_name} (name=[{name}]) is not registered")]
    NotRegistered { type_name: &'static str, name: String },

    /// The type is registered, but not under the requested name
    #[error("type {type_name} has no builder named [{name}] (registered: {})", .available.join(", "))]
    NameNotRegistered {
        type_name: &'static str,
        name: String,
        available: Vec<String>,
    },

    /// The resolution chain requested a key that is already being built
    #[error("dependency cycle detected: {}", format_chain(.chain))]
    CircularDependency { chain: Vec<TypeKey> },

    /// A context was used after the builder call it belonged to returned
    #[error("cannot build {type_name} outside of its builder: context is invalid")]
    ContextInvalid { type_name: &'static str },

    /// The resolution context was cancelled before the build started
    #[error("resolution of {key} was cancelled")]
    Cancelled { key: TypeKey },

    /// The builder (or one of its dependencies) returned an error
    #[error("building {key} failed: {source}")]
    BuildFailed {
        key: TypeKey,
        #[source]
        source: BoxError,
    },

    /// A builder's retrofit hook rejected the reconfigured options
    #[error("retrofitting {key} failed: {source}")]
    RetrofitFailed {
        key: TypeKey,
        #[source]
        source: BoxError,
    },

    /// Flag validation for a single constructor failed during resolution
    #[error("validate flags of {key}: {source}")]
    InvalidFlags {
        key: TypeKey,
        #[source]
        source: ValidationError,
    },

    /// Aggregated flag validation across the registry
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Duplicate registration without an override
    #[error("type {type_name} (name=[{name}]) is already registered")]
    AlreadyRegistered { type_name: &'static str, name: String },

    /// No codec can bind the field type
    #[error("{owner} contains flag {field} of unsupported type {type_name}")]
    UnsupportedFlagType {
        owner: &'static str,
        field: String,
        type_name: &'static str,
    },

    /// A leaf flag was declared with an empty name
    #[error("{owner} declares a flag without a name")]
    UnnamedFlag { owner: &'static str },

    /// Flags must bind to owned storage, not to pointers
    #[error("flag {name} does not support pointer type {type_name}")]
    PointerFlag { name: String, type_name: &'static str },

    /// A default literal could not be parsed by the field codec
    #[error("invalid default {value:?} for flag {name}: {reason}")]
    InvalidDefault {
        name: String,
        value: String,
        reason: String,
    },

    /// Two flags with the same name were registered into one flag set
    #[error("flag redefined: {0}")]
    FlagRedefined(String),

    /// `set` was called for a flag that does not exist
    #[error("no such flag: {0}")]
    UnknownFlag(String),

    /// A flag rejected the value it was given
    #[error("invalid value {value:?} for flag {name}: {reason}")]
    InvalidFlagValue {
        name: String,
        value: String,
        reason: String,
    },

    /// A custom flag codec was registered twice for the same type
    #[error("flag type {0} has been bound")]
    FlagBinderExists(&'static str),

    /// A memoized instance did not downcast to the requested type
    #[error("instance of {key} is not a {expected}")]
    TypeMismatch { key: TypeKey, expected: &'static str },

    /// Several independent operations failed
    #[error("{}", join_errors(.0))]
    Multiple(Vec<DiError>),
}

impl DiError {
    /// Create a NotRegistered error for a type
    #[inline]
    pub fn not_registered<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::NotRegistered {
            type_name: std::any::type_name::<T>(),
            name: name.into(),
        }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(key: &TypeKey) -> Self {
        Self::AlreadyRegistered {
            type_name: key.type_name(),
            name: key.name().to_string(),
        }
    }

    /// Wrap a builder error with the key being built
    #[inline]
    pub fn build_failed(key: &TypeKey, source: BoxError) -> Self {
        Self::BuildFailed {
            key: key.clone(),
            source,
        }
    }

    /// Returns true if this is a dependency-cycle error, looking through
    /// `BuildFailed` wrappers.
    pub fn is_cycle(&self) -> bool {
        match self {
            Self::CircularDependency { .. } => true,
            Self::BuildFailed { source, .. } => source
                .downcast_ref::<DiError>()
                .is_some_and(DiError::is_cycle),
            _ => false,
        }
    }

    /// Collapse a list of errors: none is `Ok`, one is itself, more is `Multiple`.
    pub fn collect(mut errors: Vec<DiError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

fn format_chain(chain: &[TypeKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

fn join_errors(errors: &[DiError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One violated flag constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// The option struct (or registration) the field belongs to
    pub owner: String,
    /// The external flag name, or the field path for hook-reported failures
    pub field: String,
    /// What was wrong
    pub message: String,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.owner.is_empty(), self.field.is_empty()) {
            (true, true) => write!(f, "{}", self.message),
            (true, false) => write!(f, "{}: {}", self.field, self.message),
            (false, true) => write!(f, "{}: {}", self.owner, self.message),
            (false, false) => write!(f, "{}.{}: {}", self.owner, self.field, self.message),
        }
    }
}

/// Every flag constraint that failed, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    failures: Vec<FieldFailure>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single failure without an owner; the registry fills it in.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.push("", field, message);
        err
    }

    pub fn push(
        &mut self,
        owner: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.failures.push(FieldFailure {
            owner: owner.into(),
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: ValidationError) {
        self.failures.extend(other.failures);
    }

    /// Fill in the owner of failures that did not name one.
    pub fn with_owner(mut self, owner: &str) -> Self {
        for failure in &mut self.failures {
            if failure.owner.is_empty() {
                failure.owner = owner.to_string();
            }
        }
        self
    }

    pub fn failures(&self) -> &[FieldFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flag validation failed: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
