//! Read-only metadata API: object catalog, full definitions, field and
//! action listings.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use objectql_core::{Error, MetadataKind};

use crate::error::ApiResult;
use crate::AppState;

pub(crate) async fn list_objects(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let defs = state.runtime.registry().list_objects().map_err(crate::error::ApiError)?;
    let objects: Vec<Value> = defs
        .iter()
        .map(|def| json!({ "name": def.fqn(), "label": def.label }))
        .collect();
    Ok(Json(json!({ "objects": objects })))
}

pub(crate) async fn get_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let document = state
        .runtime
        .registry()
        .get(MetadataKind::Object, &name)
        .ok_or_else(|| Error::not_found(format!("object '{name}' not found")))?;
    Ok(Json(document))
}

pub(crate) async fn get_field(
    State(state): State<AppState>,
    Path((name, field)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let document = state
        .runtime
        .registry()
        .get(MetadataKind::Object, &name)
        .ok_or_else(|| Error::not_found(format!("object '{name}' not found")))?;
    let field_def = document
        .get("fields")
        .and_then(|fields| fields.get(&field))
        .cloned()
        .ok_or_else(|| {
            Error::not_found(format!("field '{field}' not found on object '{name}'"))
        })?;
    Ok(Json(field_def))
}

pub(crate) async fn list_actions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let document = state
        .runtime
        .registry()
        .get(MetadataKind::Object, &name)
        .ok_or_else(|| Error::not_found(format!("object '{name}' not found")))?;
    let actions = document
        .get("actions")
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok(Json(json!({ "actions": actions })))
}
