//! The hot-swappable HTTP router (§4.9, §5 "router pointer ... swapped
//! atomically under a reader/writer lock").
//!
//! `ArcSwap` generalizes the registry-wide snapshot pattern already used
//! for concurrent lookup tables elsewhere in the workspace (the
//! component-registry's `ArcSwap<HashMap<..>>`) to a whole [`axum::Router`]:
//! every successful endpoint creation rebuilds the full router from the
//! registry's enumeration and atomically publishes it, so in-flight
//! requests keep running against the snapshot they started with while new
//! requests immediately see the new route.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::{Ready, ready};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, Response};
use axum::routing::{any, post};
use axum::serve::IncomingStream;
use lobby_core::errors::DomainError;
use lobby_registry::Registry;
use tower::Service;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

use crate::handlers::{create_endpoint, delegate};
use crate::request::client_ip;

/// 1 MiB, per §3's bound on `Message.value` and §4.9's body cap.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Shared state reachable from every route handler.
#[derive(Clone)]
pub struct HttpState {
    pub(crate) registry: Arc<dyn Registry>,
    router_swap: Arc<ArcSwap<Router>>,
    /// Maps the axum-legal mount path (always slash-prefixed) back to the
    /// registry's stored path, for endpoints whose path didn't already
    /// start with `/`.
    lookup: Arc<BTreeMap<String, String>>,
}

impl HttpState {
    pub(crate) fn resolve_path(&self, mount_path: &str) -> String {
        self.lookup
            .get(mount_path)
            .cloned()
            .unwrap_or_else(|| mount_path.to_owned())
    }

    /// Rebuilds the router from the registry's current enumeration and
    /// publishes it. Called after every successful endpoint creation.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] if the registry enumeration fails.
    pub async fn rebuild(&self) -> Result<(), DomainError> {
        rebuild(&self.registry, &self.router_swap).await
    }
}

fn mount_path(path: &str) -> String {
    if path.starts_with('/') { path.to_owned() } else { format!("/{path}") }
}

type RequestTraceLayer =
    TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>;

fn trace_layer() -> RequestTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            let peer_addr = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
            tracing::info_span!(
                "http_request",
                method = %req.method(),
                path = %req.uri().path(),
                client_ip = %client_ip(req.headers(), peer_addr),
                status = Empty,
                latency_ms = Empty,
                length = Empty,
            )
        })
        .on_response(|res: &Response<Body>, latency: std::time::Duration, span: &tracing::Span| {
            span.record("status", res.status().as_u16());
            span.record("latency_ms", latency.as_millis());
            span.record("length", response_length(res).unwrap_or_default());
        })
}

/// Response body length for the trace span, read from `Content-Length`
/// since most responses here are fully-buffered JSON bodies that set it.
fn response_length(res: &Response<Body>) -> Option<u64> {
    res.headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

async fn rebuild(
    registry: &Arc<dyn Registry>,
    router_swap: &Arc<ArcSwap<Router>>,
) -> Result<(), DomainError> {
    let records = registry.records().await?;

    let mut lookup = BTreeMap::new();
    let mut router = Router::new().route("/_/v1/endpoints", post(create_endpoint));
    for record in &records {
        let mounted = mount_path(&record.path);
        if mounted != record.path {
            lookup.insert(mounted.clone(), record.path.clone());
        }
        router = router.route(&mounted, any(delegate));
    }

    let state = HttpState {
        registry: registry.clone(),
        router_swap: router_swap.clone(),
        lookup: Arc::new(lookup),
    };

    let router = router
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(trace_layer())
        .with_state(state);

    router_swap.store(Arc::new(router));
    tracing::info!(endpoints = records.len(), "http router rebuilt");
    Ok(())
}

/// Owns the registry reference and the swappable router cell; the object
/// the application runtime hands to the HTTP server step.
pub struct Boundary {
    router_swap: Arc<ArcSwap<Router>>,
}

impl Boundary {
    /// Builds the initial router from the registry's current state.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] if the initial enumeration fails.
    pub async fn new(registry: Arc<dyn Registry>) -> Result<Self, DomainError> {
        let router_swap = Arc::new(ArcSwap::from_pointee(Router::new()));
        rebuild(&registry, &router_swap).await?;
        Ok(Self { router_swap })
    }

    /// A `tower::Service` that always dispatches into the current router
    /// snapshot, suitable for `axum::serve`. Has no peer address to stash
    /// (used directly by tests, which build requests by hand); prefer
    /// [`Boundary::make_service`] for real listeners so `client_ip`'s final
    /// fallback has something to fall back to.
    #[must_use]
    pub fn service(&self) -> SwappableRouter {
        SwappableRouter { router_swap: self.router_swap.clone(), peer_addr: None }
    }

    /// A per-connection `MakeService` that records each connection's remote
    /// address and stashes it on every request the connection makes, so
    /// `client_ip`'s peer-address fallback (SPEC_FULL §11 item 1) has a
    /// value even when no `X-Real-Ip`/`X-Forwarded-For` header is set.
    #[must_use]
    pub fn make_service(&self) -> ConnectInfoMakeService {
        ConnectInfoMakeService { router_swap: self.router_swap.clone() }
    }
}

/// Hands out a [`SwappableRouter`] per accepted connection, carrying that
/// connection's remote address along with it.
#[derive(Clone)]
pub struct ConnectInfoMakeService {
    router_swap: Arc<ArcSwap<Router>>,
}

impl Service<IncomingStream<'_>> for ConnectInfoMakeService {
    type Response = SwappableRouter;
    type Error = Infallible;
    type Future = Ready<Result<SwappableRouter, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, stream: IncomingStream<'_>) -> Self::Future {
        ready(Ok(SwappableRouter {
            router_swap: self.router_swap.clone(),
            peer_addr: Some(stream.remote_addr()),
        }))
    }
}

/// A `tower::Service` wrapper that loads the current router snapshot on
/// every call, so a hot-swapped router doesn't require rebinding the
/// listener.
#[derive(Clone)]
pub struct SwappableRouter {
    router_swap: Arc<ArcSwap<Router>>,
    peer_addr: Option<SocketAddr>,
}

impl Service<Request<Body>> for SwappableRouter {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if let Some(peer_addr) = self.peer_addr {
            req.extensions_mut().insert(ConnectInfo(peer_addr));
        }
        let mut router = (**self.router_swap.load()).clone();
        Box::pin(async move { router.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lobby_core::capability::testing::FakeBackend;
    use lobby_registry::embedded::EmbeddedRegistry;
    use tower::ServiceExt;

    async fn test_registry() -> Arc<dyn Registry> {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmbeddedRegistry::connect(&dir.path().join("registry.db"))
            .await
            .unwrap();
        registry.register_backend("fake", Arc::new(FakeBackend::new()));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn create_endpoint_then_delegate_put_and_get() {
        let registry = test_registry().await;
        let boundary = Boundary::new(registry).await.unwrap();

        let create_req = Request::builder()
            .method("POST")
            .uri("/_/v1/endpoints")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"/orders","backend":"fake"}"#))
            .unwrap();
        let resp = boundary.service().oneshot(create_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let put_req = Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"key":"a","value":[1,2,3]}"#))
            .unwrap();
        let resp = boundary.service().oneshot(put_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let get_req = Request::builder()
            .method("GET")
            .uri("/orders?key=a")
            .body(Body::empty())
            .unwrap();
        let resp = boundary.service().oneshot(get_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let registry = test_registry().await;
        let boundary = Boundary::new(registry).await.unwrap();

        let req = Request::builder()
            .method("GET")
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = boundary.service().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let registry = test_registry().await;
        let boundary = Boundary::new(registry).await.unwrap();

        let create_req = Request::builder()
            .method("POST")
            .uri("/_/v1/endpoints")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"/orders","backend":"fake"}"#))
            .unwrap();
        boundary.service().oneshot(create_req).await.unwrap();

        let oversized = vec![0u8; MAX_BODY_BYTES + 1];
        let req = Request::builder()
            .method("PUT")
            .uri("/orders")
            .header("content-length", oversized.len().to_string())
            .body(Body::from(oversized))
            .unwrap();
        let resp = boundary.service().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
