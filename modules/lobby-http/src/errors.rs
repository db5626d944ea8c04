//! Domain error → HTTP status/body mapping (§5 "Propagation", §4.9).
//!
//! Grounded on `original_source/http/errors.go` (`writeError`): internal
//! failures are logged with full context and redacted to an opaque token
//! before reaching the client; validation failures get a field-keyed body,
//! everything else a flat `{"err": "..."}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lobby_core::errors::DomainError;
use lobby_core::validate::ValidationErrors;
use serde_json::json;

/// Maps a [`DomainError`] onto the HTTP status table from §5: `400` for
/// validation, `404` for any not-found variant, `409` for a duplicate
/// create, `500` for anything transient or internal. `413` (body too
/// large) is produced by the body-limit middleware directly and never
/// flows through here.
#[must_use]
pub fn domain_to_http_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::BackendNotFound | DomainError::EndpointNotFound | DomainError::KeyNotFound => {
            StatusCode::NOT_FOUND
        }
        DomainError::EndpointAlreadyExists => StatusCode::CONFLICT,
        DomainError::Transient(_) | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The error type every handler in this crate returns, converting
/// uniformly into an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// A request-shape failure caught before any registry/backend call.
    Validation(ValidationErrors),
    /// A failure surfaced by the registry or a backend.
    Domain(DomainError),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        Self::Validation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(errs) => {
                tracing::debug!(errors = %errs, "http validation error");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"err": "validation error", "fields": errs.fields()})),
                )
                    .into_response()
            }
            Self::Domain(err) => {
                let status = domain_to_http_status(&err);
                tracing::debug!(error = %err, status = status.as_u16(), "http error");
                let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    json!({"err": "internal_error"})
                } else {
                    json!({"err": err.to_string()})
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_not_found_variants() {
        assert_eq!(domain_to_http_status(&DomainError::EndpointNotFound), StatusCode::NOT_FOUND);
        assert_eq!(domain_to_http_status(&DomainError::KeyNotFound), StatusCode::NOT_FOUND);
        assert_eq!(domain_to_http_status(&DomainError::BackendNotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn maps_conflict_and_validation() {
        assert_eq!(
            domain_to_http_status(&DomainError::EndpointAlreadyExists),
            StatusCode::CONFLICT
        );
        assert_eq!(
            domain_to_http_status(&DomainError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_and_transient_are_server_errors() {
        assert_eq!(
            domain_to_http_status(&DomainError::internal(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            domain_to_http_status(&DomainError::Transient("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
