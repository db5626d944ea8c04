//! Struct-level constraint checks producing field-keyed error maps (C4).
//!
//! Grounded on `original_source/validation/validation.go` and
//! `validation/errors.go`: the original collects one or more messages per
//! field name into a map and renders `"field: msg1,msg2; field2: msg3"`.
//! Rust can express "the rule that produced this" as a trait instead of
//! reflecting over struct tags, so [`Validate::validate`] is implemented by
//! hand per request type rather than derived from field metadata.

use std::collections::BTreeMap;
use std::fmt;

/// A field-keyed multimap of validation failures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_default().push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `Ok(())` if no fields were recorded, or `Err(self)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `self` if any field has a recorded message.
    pub fn into_result(self) -> Result<(), Self> {
        if self.fields.is_empty() { Ok(()) } else { Err(self) }
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, messages)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {}", messages.join(","))?;
        }
        Ok(())
    }
}

/// Predicate used by the RPC and HTTP error mappers to detect validation
/// failures without downcasting at every call site.
///
/// Mirrors `validation.IsError` from the Go source, which type-asserted the
/// error against its private `validationError` map type.
#[must_use]
pub fn is_validation_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ValidationErrors>().is_some()
}

impl std::error::Error for ValidationErrors {}

/// A type that can check its own field-level constraints.
pub trait Validate {
    /// Validates `self`, returning a field-keyed error map on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] describing every failing field.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Validates a backend name: non-empty, alphanumeric (spec §3, §6).
#[must_use]
pub fn backend_name_is_valid(name: &str) -> bool {
    !name.is_empty() && name.chars().all(char::is_alphanumeric)
}

/// Validates an endpoint path: non-empty, bounded 1-64 bytes (spec §6).
#[must_use]
pub fn endpoint_path_is_valid(path: &str) -> bool {
    !path.is_empty() && path.len() <= 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fields_in_order_with_joined_messages() {
        let mut errs = ValidationErrors::new();
        errs.add("path", "must not be empty");
        errs.add("backend", "must be alphanumeric");
        errs.add("backend", "must not be empty");
        assert_eq!(
            errs.to_string(),
            "backend: must be alphanumeric,must not be empty; path: must not be empty"
        );
    }

    #[test]
    fn empty_errors_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn is_validation_error_detects_wrapped_validation_errors() {
        let mut errs = ValidationErrors::new();
        errs.add("path", "required");
        let wrapped: anyhow::Error = errs.into();
        assert!(is_validation_error(&wrapped));
        assert!(!is_validation_error(&anyhow::anyhow!("plain error")));
    }

    #[test]
    fn backend_name_rules() {
        assert!(backend_name_is_valid("bolt1"));
        assert!(!backend_name_is_valid(""));
        assert!(!backend_name_is_valid("bolt-1"));
    }

    #[test]
    fn endpoint_path_rules() {
        assert!(endpoint_path_is_valid("/orders"));
        assert!(!endpoint_path_is_valid(""));
        assert!(!endpoint_path_is_valid(&"a".repeat(65)));
    }
}
