//! # Castellan Gateway
//!
//! The HTTP/JSON bridge onto the model controller, mounted at
//! `/domain-api`.
//!
//! - `GET {path}?operation={alias}&{k}={v}` translates path segments
//!   into `(type, name)` address pairs and query parameters into the
//!   operation payload; the default is a non-recursive `read-resource`.
//!   A successful GET unwraps the envelope's `result` (the status code
//!   already says what happened); everything else returns the full
//!   envelope.
//! - `POST` bodies are complete operations, JSON or base64 binary when
//!   `Content-Type: application/dmr-encoded`.
//! - `Accept: application/dmr-encoded` (or a dmr-encoded request body)
//!   selects binary response encoding.
//! - `outcome=failed` maps to HTTP 500; methods other than GET/POST to
//!   405. CORS allows any origin.

pub mod convert;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use castellan_controller::{keys, ModelController};
use castellan_value::Value;

use crate::convert::{convert_get_request, convert_post_request};

/// Mount point of the management API.
pub const DOMAIN_API_CONTEXT: &str = "/domain-api";

/// Content type selecting the base64 binary encoding.
pub const DMR_ENCODED: &str = "application/dmr-encoded";

/// Request bodies beyond this size are rejected.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("http server failed: {0}")]
    Serve(std::io::Error),
}

#[derive(Clone)]
struct GatewayState {
    controller: Arc<dyn ModelController>,
}

/// Builds the gateway router around a controller.
pub fn router(controller: Arc<dyn ModelController>) -> Router {
    let state = GatewayState { controller };
    Router::new()
        .route(DOMAIN_API_CONTEXT, any(handle))
        .route(&format!("{DOMAIN_API_CONTEXT}/"), any(handle))
        .route(&format!("{DOMAIN_API_CONTEXT}/*path"), any(handle))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Binds and serves the gateway until the task is dropped.
pub async fn serve(
    controller: Arc<dyn ModelController>,
    address: SocketAddr,
) -> Result<(), GatewayError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| GatewayError::Bind(address, e))?;
    info!(%address, "management http api listening");
    axum::serve(listener, router(controller))
        .await
        .map_err(GatewayError::Serve)
}

async fn handle(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();

    let is_get = method == Method::GET;
    if !is_get && method != Method::POST {
        return empty_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let encode = wants_dmr_encoding(&parts.headers);
    let operation = if is_get {
        let path = parts
            .uri
            .path()
            .strip_prefix(DOMAIN_API_CONTEXT)
            .unwrap_or("");
        match convert_get_request(path, parts.uri.query()) {
            Ok(op) => op,
            Err(e) => {
                error!("malformed GET request: {e}");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    } else {
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to read request body: {e}");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let content_encoded = header_equals(&parts.headers, header::CONTENT_TYPE, DMR_ENCODED);
        match convert_post_request(&bytes, content_encoded) {
            Ok(op) => op,
            Err(e) => {
                error!("malformed POST body: {e}");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    };

    debug!(
        operation = %operation.find(keys::OP).unwrap_or(&castellan_value::Value::Undefined),
        address = %operation.find(keys::OP_ADDR).unwrap_or(&castellan_value::Value::Undefined),
        "dispatching http management request"
    );

    let pretty = operation
        .find("json.pretty")
        .map(|v| v.as_bool().unwrap_or(false))
        .unwrap_or(false);

    let controller = Arc::clone(&state.controller);
    let dispatched = operation.clone();
    let envelope = match tokio::task::spawn_blocking(move || controller.execute(dispatched)).await
    {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("controller task failed: {e}");
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let failed = envelope
        .find(keys::OUTCOME)
        .and_then(|o| o.as_str().ok().map(|s| s == keys::FAILED))
        .unwrap_or(false);
    let status = if failed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    // reads over GET have no compensating update and the status code
    // already carries the outcome, so unwrap them
    let payload = if is_get && status == StatusCode::OK {
        envelope.find(keys::RESULT).cloned().unwrap_or_default()
    } else {
        envelope
    };

    let (content_type, body) = if encode {
        (DMR_ENCODED, payload.to_base64())
    } else {
        ("application/json", payload.to_json_string(pretty))
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn wants_dmr_encoding(headers: &HeaderMap) -> bool {
    header_equals(headers, header::ACCEPT, DMR_ENCODED)
        || header_equals(headers, header::CONTENT_TYPE, DMR_ENCODED)
}

fn header_equals(headers: &HeaderMap, name: header::HeaderName, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn empty_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(axum::body::Body::empty())
        .unwrap_or_default()
}
