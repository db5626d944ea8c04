//! Domain error ↔ RPC status code mapping (§4.4, §4.5).
//!
//! Grounded on `original_source/rpc/errors.go` (`newError`/`errFromGRPC`),
//! reimplemented against `tonic::Status` instead of grpc-go's `codes`/
//! `status` pair.

use lobby_core::errors::DomainError;
use tonic::{Code, Status};

/// Maps a [`DomainError`] to the RPC status the server sends on the wire
/// (§4.4's table). Internal failures are logged with full context at
/// debug and replaced with an opaque token in the payload.
pub fn domain_to_status(err: &DomainError) -> Status {
    let code = match err {
        DomainError::Validation(_) => Code::InvalidArgument,
        DomainError::BackendNotFound | DomainError::EndpointNotFound | DomainError::KeyNotFound => {
            Code::NotFound
        }
        DomainError::EndpointAlreadyExists => Code::AlreadyExists,
        DomainError::Transient(_) => Code::Unavailable,
        DomainError::Internal(_) => Code::Unknown,
    };

    tracing::debug!(error = %err, code = ?code, "rpc error");

    let message = if code == Code::Unknown {
        "internal".to_owned()
    } else {
        err.to_string()
    };

    Status::new(code, message)
}

/// Inverse mapping used by the client adapter (C7): restores the domain
/// error a status represents. Failures with no clear domain counterpart
/// are left as a [`DomainError::Transient`] for the caller to retry or
/// wrap further, matching the original's `errFromGRPC` default case of
/// "return the error as-is."
pub fn status_to_domain(status: &Status) -> DomainError {
    match status.code() {
        Code::AlreadyExists => DomainError::EndpointAlreadyExists,
        Code::NotFound => {
            if status.message().contains("backend") {
                DomainError::BackendNotFound
            } else if status.message().contains("key") {
                DomainError::KeyNotFound
            } else {
                DomainError::EndpointNotFound
            }
        }
        Code::InvalidArgument => DomainError::Validation(status.message().to_owned()),
        Code::Unavailable | Code::DeadlineExceeded => {
            DomainError::Transient(status.message().to_owned())
        }
        _ => DomainError::internal(anyhow::anyhow!("{status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_expected_codes() {
        assert_eq!(
            domain_to_status(&DomainError::BackendNotFound).code(),
            Code::NotFound
        );
        assert_eq!(
            domain_to_status(&DomainError::EndpointAlreadyExists).code(),
            Code::AlreadyExists
        );
        assert_eq!(
            domain_to_status(&DomainError::Validation("x".into())).code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn internal_errors_are_redacted_on_the_wire() {
        let status = domain_to_status(&DomainError::internal(anyhow::anyhow!("disk full")));
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "internal");
    }

    #[test]
    fn status_round_trips_already_exists() {
        let status = Status::already_exists("endpoint already exists");
        assert!(matches!(
            status_to_domain(&status),
            DomainError::EndpointAlreadyExists
        ));
    }
}
