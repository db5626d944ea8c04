//! Error taxonomy (C3, §7) and the ordered error aggregator (C3).

use std::fmt;

/// The domain error taxonomy from spec §7.
///
/// Boundary crates (`lobby-rpc`, `lobby-http`) map this onto their own
/// transport-specific status codes; `lobby-registry` and `lobby-supervisor`
/// are the primary producers.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Malformed or missing input; field detail lives in the attached
    /// [`crate::validate::ValidationErrors`] when the caller needs it.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No backend is registered under the requested name.
    #[error("backend not found")]
    BackendNotFound,

    /// No endpoint record exists for the requested path.
    #[error("endpoint not found")]
    EndpointNotFound,

    /// `Create` was called for a path that already has a bound endpoint.
    #[error("endpoint already exists")]
    EndpointAlreadyExists,

    /// No item exists under the requested key.
    #[error("key not found")]
    KeyNotFound,

    /// A transient failure (dial timeout, temporary store unavailability)
    /// the caller is expected to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything else. Logged with full context at the producing site;
    /// boundaries redact the message to an opaque token before it reaches
    /// the wire.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl DomainError {
    /// Wraps an arbitrary error as [`DomainError::Internal`].
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Ordered sequence of errors with a composite textual representation (C3).
///
/// Grounded on the original's `Errors []error` accumulator
/// (`original_source/app/errors.go`): order preserves arrival, and an empty
/// set renders as nothing (callers check `is_empty` rather than relying on
/// `Display`).
#[derive(Debug, Default)]
pub struct ErrorSet {
    errors: Vec<anyhow::Error>,
}

impl ErrorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<anyhow::Error>) {
        self.errors.push(err.into());
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = anyhow::Error>) {
        self.errors.extend(other);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Converts this set into `Ok(())` when empty, or a single composite
    /// `anyhow::Error` otherwise.
    ///
    /// # Errors
    ///
    /// Returns the composite error if the set is non-empty.
    pub fn into_result(self) -> Result<(), anyhow::Error> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(self))
        }
    }
}

impl fmt::Display for ErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Err: {err}")?;
        }
        Ok(())
    }
}

impl FromIterator<anyhow::Error> for ErrorSet {
    fn from_iter<T: IntoIterator<Item = anyhow::Error>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_has_no_display_output() {
        let set = ErrorSet::new();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
        assert!(set.into_result().is_ok());
    }

    #[test]
    fn preserves_arrival_order() {
        let mut set = ErrorSet::new();
        set.push(anyhow::anyhow!("first"));
        set.push(anyhow::anyhow!("second"));
        assert_eq!(set.to_string(), "Err: first\nErr: second");
        assert_eq!(set.len(), 2);
    }
}
