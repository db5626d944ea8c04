//! Route handlers: endpoint creation and per-path delegation (§4.9).

use axum::Json;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use lobby_core::model::{Item, Message, Page};
use lobby_core::validate::{ValidationErrors, backend_name_is_valid, endpoint_path_is_valid};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::ApiError;
use crate::router::HttpState;

#[derive(Debug, Deserialize)]
pub struct NewEndpointBody {
    pub path: String,
    pub backend: String,
}

#[derive(Debug, Serialize)]
struct EndpointCreatedBody {
    path: String,
    backend: String,
}

/// `POST /_/v1/endpoints` — create an endpoint, then rebuild the router so
/// the new path is reachable by the next request (§4.9).
pub async fn create_endpoint(
    State(state): State<HttpState>,
    Json(body): Json<NewEndpointBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errs = ValidationErrors::new();
    if !backend_name_is_valid(&body.backend) {
        errs.add("backend", "must be non-empty and alphanumeric");
    }
    if !endpoint_path_is_valid(&body.path) {
        errs.add("path", "must be 1-64 bytes and non-empty");
    }
    errs.into_result()?;

    state.registry.create(&body.backend, &body.path).await?;
    state.rebuild().await?;

    tracing::info!(path = %body.path, backend = %body.backend, "endpoint created");

    Ok((
        StatusCode::CREATED,
        Json(EndpointCreatedBody { path: body.path, backend: body.backend }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DelegateQuery {
    key: Option<String>,
    group: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PutBody {
    key: String,
    value: Vec<u8>,
}

/// `<endpoint.path>` — a thin translation of the HTTP verb onto the
/// resolved endpoint's capability surface: `GET` reads a key or lists a
/// page, `POST` writes an item, `PUT` pushes a message, `DELETE` removes a
/// key. Grounded on §4.9's "delegate to the endpoint's own request
/// handler", generalized against `lobby_core::capability::Endpoint` since
/// concrete per-endpoint HTTP handlers are out of scope.
pub async fn delegate(
    State(state): State<HttpState>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    Query(query): Query<DelegateQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.resolve_path(uri.path());
    let endpoint = state.registry.endpoint(&path).await?;

    match method {
        Method::GET => {
            if let Some(key) = query.key {
                let item = endpoint.get(&key).await?;
                return Ok(Json(json!({"key": item.key, "value": item.value})).into_response());
            }
            let page = Page::normalize(query.page.unwrap_or(0), query.per_page.unwrap_or(0));
            let items = endpoint.list(page).await?;
            let body: Vec<_> = items
                .into_iter()
                .map(|item| json!({"key": item.key, "value": item.value}))
                .collect();
            Ok(Json(body).into_response())
        }
        Method::POST => {
            let put_body: PutBody = serde_json::from_slice(&body).map_err(|err| {
                let mut errs = ValidationErrors::new();
                errs.add("body", err.to_string());
                ApiError::from(errs)
            })?;
            let item = endpoint
                .put(Item { key: put_body.key, value: put_body.value })
                .await?;
            Ok((StatusCode::CREATED, Json(json!({"key": item.key, "value": item.value}))).into_response())
        }
        Method::PUT => {
            endpoint
                .send(Message { group: query.group, value: body.to_vec() })
                .await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Method::DELETE => {
            let key = query.key.ok_or_else(|| {
                let mut errs = ValidationErrors::new();
                errs.add("key", "query parameter is required");
                ApiError::from(errs)
            })?;
            endpoint.delete(&key).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}
