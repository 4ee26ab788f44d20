//! Registry-wide validation of bound option structs.
//!
//! After the `required` checks, every option struct is handed to the
//! registry's validator hook as `&dyn Any`. The default hook accepts
//! everything.

use crate::error::ValidationError;
use std::any::Any;
use std::sync::Arc;

/// Validates one option struct. Failures name the offending fields; the
/// registry fills in the owning struct.
pub type ValidatorHook =
    Arc<dyn Fn(&dyn Any) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// Run several hooks in order, collecting every failure.
pub fn chain(hooks: impl IntoIterator<Item = ValidatorHook>) -> ValidatorHook {
    let hooks: Vec<ValidatorHook> = hooks.into_iter().collect();
    Arc::new(move |options: &dyn Any| {
        let mut err = ValidationError::new();
        for hook in &hooks {
            if let Err(e) = hook(options) {
                err.merge(e);
            }
        }
        err.into_result()
    })
}

/// Adapt `validator::Validate` for option structs of type `T`. Other option
/// types pass through untouched; combine several with [`chain`].
///
/// ```rust
/// use di_registry::validator_hook;
/// use validator::Validate;
///
/// #[derive(Validate)]
/// struct PoolOptions {
///     #[validate(range(min = 1, max = 64))]
///     size: u32,
/// }
///
/// let hook = validator_hook::<PoolOptions>();
/// assert!(hook(&PoolOptions { size: 0 }).is_err());
/// assert!(hook(&PoolOptions { size: 8 }).is_ok());
/// assert!(hook(&"unrelated").is_ok());
/// ```
#[cfg(feature = "validator")]
pub fn validator_hook<T>() -> ValidatorHook
where
    T: validator::Validate + 'static,
{
    Arc::new(|options: &dyn Any| match options.downcast_ref::<T>() {
        Some(options) => options.validate().map_err(convert),
        None => Ok(()),
    })
}

#[cfg(feature = "validator")]
fn convert(errors: validator::ValidationErrors) -> ValidationError {
    let mut out = ValidationError::new();
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    for (field, failures) in fields {
        for failure in failures {
            let message = match &failure.message {
                Some(message) => message.to_string(),
                None => format!("failed {}", failure.code),
            };
            out.push("", field.as_ref(), message);
        }
    }
    if out.is_empty() {
        out.push("", "", errors.to_string());
    }
    out
}
