//! # objectql-http — Protocol adapters
//!
//! Maps external requests onto the [`objectql_core::Context`] API:
//!
//! - the **operation envelope**: `POST /api/objectql` with
//!   `{ op, object, args }`;
//! - **JSON-RPC 2.0** on the same endpoint (an array body or a
//!   `jsonrpc` member selects the codec);
//! - a **REST data API** under `/api/data/{object}`;
//! - the read-only **metadata API** under `/api/metadata`.
//!
//! Authentication is out of scope: an outer middleware verifies the
//! caller and inserts an [`AuthUser`] request extension; absent that,
//! requests run as the anonymous user. Errors map onto HTTP statuses
//! (400 validation, 401/403 auth, 404, 409, 429, 5xx otherwise) with
//! the structured `{ "error": { code, message, details? } }` body.

use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use objectql_core::{Context, Error, ObjectQL, UserContext};

pub mod envelope;
pub mod error;
pub mod metadata;
pub mod params;
pub mod rest;
pub mod rpc;

pub use error::{ApiError, ApiResult};

/// The verified caller, inserted as a request extension by the outer
/// authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserContext);

/// Extractor resolving the caller: the [`AuthUser`] extension when
/// present, the anonymous user otherwise.
pub struct CallerIdentity(pub UserContext);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<AuthUser>()
            .map(|auth| auth.0.clone())
            .unwrap_or_else(UserContext::anonymous);
        Ok(CallerIdentity(user))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runtime: ObjectQL,
}

impl AppState {
    pub fn context(&self, caller: CallerIdentity) -> Context {
        self.runtime.context(caller.0)
    }
}

/// Mount paths, overridable per deployment.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub objectql_path: String,
    pub data_prefix: String,
    pub metadata_prefix: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            objectql_path: "/api/objectql".to_string(),
            data_prefix: "/api/data".to_string(),
            metadata_prefix: "/api/metadata".to_string(),
        }
    }
}

/// The assembled adapter router with the default mount paths.
pub fn routes(runtime: ObjectQL) -> Router {
    routes_with(runtime, HttpOptions::default())
}

pub fn routes_with(runtime: ObjectQL, options: HttpOptions) -> Router {
    let data = Router::new()
        .route("/{object}", get(rest::list).post(rest::create))
        .route("/{object}/bulk-update", post(rest::bulk_update))
        .route("/{object}/bulk-delete", post(rest::bulk_delete))
        .route(
            "/{object}/{id}",
            get(rest::get_one).put(rest::update).delete(rest::remove),
        );
    let metadata = Router::new()
        .route("/objects", get(metadata::list_objects))
        .route("/objects/{name}", get(metadata::get_object))
        .route("/objects/{name}/fields/{field}", get(metadata::get_field))
        .route("/objects/{name}/actions", get(metadata::list_actions));

    Router::new()
        .route(&options.objectql_path, post(objectql_entry))
        .nest(&options.data_prefix, data)
        .nest(&options.metadata_prefix, metadata)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { runtime })
}

/// Entry point shared by the operation envelope and JSON-RPC: an array
/// body or a `jsonrpc` member selects the RPC codec, an `op` member
/// the envelope.
async fn objectql_entry(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            let error = rpc::rpc_error(
                Value::Null,
                rpc::PARSE_ERROR,
                format!("parse error: {e}"),
                None,
            );
            return Json(error).into_response();
        }
    };
    let ctx = state.context(caller);

    let is_rpc = payload.is_array()
        || payload
            .as_object()
            .is_some_and(|obj| obj.contains_key("jsonrpc") || obj.contains_key("method"));
    if is_rpc {
        return match rpc::handle_payload(&state.runtime, &ctx, &payload).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        };
    }

    let Some(obj) = payload.as_object() else {
        return ApiError(Error::validation("request body must be an object")).into_response();
    };
    let (Some(op), Some(object)) = (
        obj.get("op").and_then(Value::as_str),
        obj.get("object").and_then(Value::as_str),
    ) else {
        return ApiError(Error::validation(
            "operation envelope requires 'op' and 'object'",
        ))
        .into_response();
    };
    let args = obj.get("args").cloned().unwrap_or(Value::Null);
    tracing::debug!(op, object, "operation envelope");
    match envelope::dispatch_op(&ctx, op, object, &args).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// Convenience: a router with an [`AuthUser`] already installed —
/// useful in tests and trusted single-user deployments.
pub fn routes_as(runtime: ObjectQL, user: UserContext) -> Router {
    routes(runtime).layer(Extension(AuthUser(user)))
}
