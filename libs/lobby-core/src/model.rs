//! The data the registry persists and the payloads that flow through it.

use serde::{Deserialize, Serialize};

/// The persisted endpoint→backend binding.
///
/// `path` is the unique identifier under which producers address the
/// endpoint; `backend` names the backend registered to serve it. Immutable
/// once created — there is no update operation, only create and (logical)
/// delete via registry close or an external KV delete event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub path: String,
    pub backend: String,
}

impl EndpointRecord {
    #[must_use]
    pub fn new(backend: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            backend: backend.into(),
        }
    }
}

/// A registered backend, named and otherwise opaque to the registry.
///
/// The registry only ever needs the name to look a backend up again; the
/// handle itself lives behind [`crate::capability::Backend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRegistration {
    pub name: String,
}

impl BackendRegistration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Transport payload forwarded to a push-style endpoint.
///
/// Created per request, passed by value into the backend, never retained by
/// the core. `value` is capped at 1 MiB at the HTTP boundary (`lobby-http`);
/// this type itself places no limit, since the RPC boundary enforces its own
/// bound via the wire message size instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Optional routing subkey.
    pub group: Option<String>,
    /// Opaque payload bytes.
    pub value: Vec<u8>,
}

/// A key/value item stored at a path, used by `Put`/`Get`/`Delete`/`List`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
}

/// A single page of a paginated listing.
///
/// `per_page == -1` means "fetch all remaining items" (see SPEC_FULL §11
/// item 2), mirroring the original implementation's bucket-layer sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    pub const DEFAULT_PER_PAGE: i64 = 20;
    pub const FETCH_ALL: i64 = -1;

    /// Normalizes a caller-supplied page request: `page < 1` becomes `1`,
    /// `per_page < 1` (other than the `-1` "fetch all" sentinel) becomes the
    /// default page size.
    #[must_use]
    pub fn normalize(page: i64, per_page: i64) -> Self {
        let page = if page < 1 { 1 } else { page };
        let per_page = if per_page == Self::FETCH_ALL {
            per_page
        } else if per_page < 1 {
            Self::DEFAULT_PER_PAGE
        } else {
            per_page
        };
        Self { page, per_page }
    }

    #[must_use]
    pub fn fetches_all(self) -> bool {
        self.per_page == Self::FETCH_ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_page_and_per_page() {
        let p = Page::normalize(0, 0);
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, Page::DEFAULT_PER_PAGE);
    }

    #[test]
    fn normalize_preserves_fetch_all_sentinel() {
        let p = Page::normalize(1, -1);
        assert!(p.fetches_all());
    }

    #[test]
    fn normalize_keeps_valid_values() {
        let p = Page::normalize(3, 50);
        assert_eq!(p.page, 3);
        assert_eq!(p.per_page, 50);
    }
}
