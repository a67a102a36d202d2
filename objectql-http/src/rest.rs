//! REST adapter over the data API: `/api/data/{object}[/{id}]`.
//!
//! List query parameters (`filter`, `sort`, `fields`, `expand`) are
//! JSON-encoded when structured; `limit` / `skip` are plain integers.
//! `limit=0` turns the request into a count and answers `{ total }`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Map, Value};

use objectql_core::{record_from_value, Error};

use crate::envelope::dispatch_op;
use crate::error::{ApiError, ApiResult};
use crate::{AppState, CallerIdentity};

/// Decode one query parameter: JSON when it parses, bare string
/// otherwise (`?sort=name desc` and `?sort=["name desc"]` both work).
fn param_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn find_args(params: &HashMap<String, String>) -> Result<Map<String, Value>, Error> {
    let mut args = Map::new();
    for key in ["filter", "filters", "sort", "fields", "expand"] {
        if let Some(raw) = params.get(key) {
            args.insert(key.to_string(), param_value(raw));
        }
    }
    for key in ["limit", "skip"] {
        if let Some(raw) = params.get(key) {
            let n: u64 = raw
                .parse()
                .map_err(|_| Error::validation(format!("{key} must be a non-negative integer")))?;
            args.insert(key.to_string(), json!(n));
        }
    }
    Ok(args)
}

pub(crate) async fn list(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(object): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let args = find_args(&params)?;

    // `limit=0` is the count convention.
    if args.get("limit").and_then(Value::as_u64) == Some(0) {
        let filters = args.get("filters").or_else(|| args.get("filter")).cloned();
        let result = dispatch_op(
            &ctx,
            "count",
            &object,
            &Value::Object(
                filters
                    .map(|f| {
                        let mut map = Map::new();
                        map.insert("filters".to_string(), f);
                        map
                    })
                    .unwrap_or_default(),
            ),
        )
        .await?;
        return Ok(Json(result));
    }

    let result = dispatch_op(&ctx, "find", &object, &Value::Object(args)).await?;
    Ok(Json(result))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(object): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let result = dispatch_op(&ctx, "create", &object, &body).await?;
    Ok(Json(result))
}

pub(crate) async fn get_one(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path((object, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let mut args = find_args(&params)?;
    args.insert("id".to_string(), Value::String(id));
    let result = dispatch_op(&ctx, "findOne", &object, &Value::Object(args)).await?;
    Ok(Json(result))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path((object, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    // Accept both a bare record body and the `{ data }` envelope.
    let data = match &body {
        Value::Object(map) if map.contains_key("data") && map.len() == 1 => {
            map.get("data").cloned().expect("data present")
        }
        other => other.clone(),
    };
    record_from_value(data.clone()).map_err(ApiError)?;
    let result = dispatch_op(&ctx, "update", &object, &json!({ "id": id, "data": data })).await?;
    Ok(Json(result))
}

pub(crate) async fn remove(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path((object, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let result = dispatch_op(&ctx, "delete", &object, &json!({ "id": id })).await?;
    Ok(Json(result))
}

pub(crate) async fn bulk_update(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(object): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let result = dispatch_op(&ctx, "updateMany", &object, &body).await?;
    Ok(Json(result))
}

pub(crate) async fn bulk_delete(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(object): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let ctx = state.context(caller);
    let result = dispatch_op(&ctx, "deleteMany", &object, &body).await?;
    Ok(Json(result))
}
