//! Function types of the matcher registry.

use crate::error::SigmaError;
use std::sync::Arc;

/// A match-type implementation.
///
/// Receives the transformed field value, the primitive's values and its raw
/// modifier names; returns whether any value matches.
///
/// ```
/// use sigma_dag::matcher::MatchFn;
/// use std::sync::Arc;
///
/// let exact: MatchFn = Arc::new(|field_value, values, _modifiers| {
///     Ok(values.iter().any(|&v| v == field_value))
/// });
/// assert!(exact("4624", &["4624", "4625"], &[]).unwrap());
/// ```
pub type MatchFn = Arc<dyn Fn(&str, &[&str], &[&str]) -> Result<bool, SigmaError> + Send + Sync>;

/// A string-to-string transform applied to a field value before matching.
/// Failures abort the primitive with a typed error.
pub type ModifierFn = Arc<dyn Fn(&str) -> Result<String, SigmaError> + Send + Sync>;

/// Injectable field extraction.
///
/// Returns every candidate value for the field (arrays are flattened to
/// their elements), or `None` when the field is absent.
pub type FieldExtractorFn = Arc<
    dyn Fn(&super::EventContext, &str) -> Result<Option<Vec<String>>, SigmaError> + Send + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_fn_shape() {
        let contains: MatchFn = Arc::new(|field_value, values, _modifiers| {
            Ok(values.iter().any(|&v| field_value.contains(v)))
        });
        assert!(contains("powershell -enc", &["-enc"], &[]).unwrap());
        assert!(!contains("cmd", &["-enc"], &[]).unwrap());
    }

    #[test]
    fn test_modifier_fn_shape() {
        let lowercase: ModifierFn = Arc::new(|input| Ok(input.to_lowercase()));
        assert_eq!(lowercase("ADMIN").unwrap(), "admin");

        let failing: ModifierFn =
            Arc::new(|_| Err(SigmaError::ModifierError("boom".to_string())));
        assert!(failing("x").is_err());
    }

    #[test]
    fn test_function_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MatchFn>();
        assert_send_sync::<ModifierFn>();
        assert_send_sync::<FieldExtractorFn>();
    }
}
