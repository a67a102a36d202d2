//! JSON-RPC 2.0 adapter, sharing the operation endpoint.
//!
//! Positional and named params are both accepted; named params map to
//! positional through each method's declared signature. Batches run
//! in order and omit notification responses.

use serde_json::{json, Map, Value};

use objectql_core::{Context, Error, ErrorCode, MetadataKind, ObjectQL, Record};

use crate::envelope::dispatch_op;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Method table: name → positional parameter names (used to map named
/// params and to answer `system.describe`).
const METHODS: &[(&str, &[&str])] = &[
    ("object.find", &["object", "query"]),
    ("object.get", &["object", "id"]),
    ("object.create", &["object", "data"]),
    ("object.update", &["object", "id", "data"]),
    ("object.delete", &["object", "id"]),
    ("object.count", &["object", "filters"]),
    ("metadata.list", &[]),
    ("metadata.get", &["name"]),
    ("metadata.getAll", &[]),
    ("action.execute", &["object", "action", "id", "input"]),
    ("action.list", &["object"]),
    ("view.get", &["name"]),
    ("system.listMethods", &[]),
    ("system.describe", &[]),
];

pub fn rpc_error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), json!(code));
    error.insert("message".to_string(), json!(message.into()));
    if let Some(data) = data {
        error.insert("data".to_string(), data);
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Map a domain error onto the JSON-RPC code space; the full taxonomy
/// error rides along in `error.data`.
fn rpc_code_for(err: &Error) -> i64 {
    match err.code {
        ErrorCode::Validation => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    }
}

/// Handle one (non-batch) request document. `None` for notifications.
pub async fn handle_single(runtime: &ObjectQL, ctx: &Context, request: &Value) -> Option<Value> {
    let Some(obj) = request.as_object() else {
        return Some(rpc_error(
            Value::Null,
            INVALID_REQUEST,
            "request must be an object",
            None,
        ));
    };
    let id = obj.get("id").cloned();
    let response_id = id.clone().unwrap_or(Value::Null);
    let is_notification = id.is_none();

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return (!is_notification).then(|| {
            rpc_error(response_id, INVALID_REQUEST, "jsonrpc must be \"2.0\"", None)
        });
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return (!is_notification)
            .then(|| rpc_error(response_id, INVALID_REQUEST, "method is required", None));
    };
    let Some((_, signature)) = METHODS.iter().find(|(name, _)| *name == method) else {
        return (!is_notification).then(|| {
            rpc_error(
                response_id,
                METHOD_NOT_FOUND,
                format!("method '{method}' not found"),
                None,
            )
        });
    };

    let params = match positional_params(obj.get("params"), signature) {
        Ok(params) => params,
        Err(message) => {
            return (!is_notification)
                .then(|| rpc_error(response_id, INVALID_PARAMS, message, None))
        }
    };

    let outcome = call(runtime, ctx, method, &params).await;
    if is_notification {
        return None;
    }
    Some(match outcome {
        Ok(result) => rpc_result(response_id, result),
        Err(err) => {
            let data = serde_json::to_value(&err).ok();
            rpc_error(response_id, rpc_code_for(&err), err.message.clone(), data)
        }
    })
}

/// Map `params` (positional array, named object, or absent) onto the
/// method signature.
fn positional_params(params: Option<&Value>, signature: &[&str]) -> Result<Vec<Value>, String> {
    match params {
        None | Some(Value::Null) => Ok(vec![Value::Null; signature.len()]),
        Some(Value::Array(items)) => {
            let mut params = items.clone();
            params.resize(signature.len().max(params.len()), Value::Null);
            Ok(params)
        }
        Some(Value::Object(named)) => Ok(signature
            .iter()
            .map(|name| named.get(*name).cloned().unwrap_or(Value::Null))
            .collect()),
        Some(other) => Err(format!("params must be an array or object, got {other}")),
    }
}

fn required_str<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, Error> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation(format!("param '{name}' is required")))
}

async fn call(
    runtime: &ObjectQL,
    ctx: &Context,
    method: &str,
    params: &[Value],
) -> Result<Value, Error> {
    match method {
        "object.find" => {
            let object = required_str(params, 0, "object")?;
            let query = params.get(1).cloned().unwrap_or(Value::Null);
            dispatch_op(ctx, "find", object, &query).await
        }
        "object.get" => {
            let object = required_str(params, 0, "object")?;
            let id = required_str(params, 1, "id")?;
            dispatch_op(ctx, "findOne", object, &Value::String(id.to_string())).await
        }
        "object.create" => {
            let object = required_str(params, 0, "object")?;
            let data = params.get(1).cloned().unwrap_or(Value::Null);
            dispatch_op(ctx, "create", object, &data).await
        }
        "object.update" => {
            let object = required_str(params, 0, "object")?;
            let id = required_str(params, 1, "id")?;
            let data = params.get(2).cloned().unwrap_or(Value::Null);
            dispatch_op(ctx, "update", object, &json!({ "id": id, "data": data })).await
        }
        "object.delete" => {
            let object = required_str(params, 0, "object")?;
            let id = required_str(params, 1, "id")?;
            let result = dispatch_op(ctx, "delete", object, &json!({ "id": id })).await?;
            Ok(result.get("deleted").cloned().unwrap_or(Value::Bool(false)))
        }
        "object.count" => {
            // Lenient: a count with no object names nothing to count
            // and answers 0, so sloppy clients still get an integer.
            let Some(object) = params.first().and_then(Value::as_str) else {
                return Ok(json!(0));
            };
            let filters = params.get(1).cloned().unwrap_or(Value::Null);
            let result = dispatch_op(ctx, "count", object, &json!({ "filters": filters })).await?;
            Ok(result.get("total").cloned().unwrap_or(json!(0)))
        }
        "metadata.list" => {
            let defs = runtime.registry().list_objects()?;
            Ok(Value::Array(
                defs.into_iter()
                    .map(|def| json!({ "name": def.fqn(), "label": def.label }))
                    .collect(),
            ))
        }
        "metadata.get" => {
            let name = required_str(params, 0, "name")?;
            runtime
                .registry()
                .get(MetadataKind::Object, name)
                .ok_or_else(|| Error::not_found(format!("object '{name}' not found")))
        }
        "metadata.getAll" => {
            let names = runtime.registry().names(MetadataKind::Object);
            Ok(Value::Array(
                names
                    .iter()
                    .filter_map(|name| runtime.registry().get(MetadataKind::Object, name))
                    .collect(),
            ))
        }
        "action.execute" => {
            let object = required_str(params, 0, "object")?;
            let action = required_str(params, 1, "action")?;
            let id = params.get(2).and_then(Value::as_str);
            let input = match params.get(3) {
                Some(Value::Object(map)) => map.clone(),
                _ => Record::new(),
            };
            ctx.object(object).execute(action, id, input).await
        }
        "action.list" => {
            let object = required_str(params, 0, "object")?;
            let def = runtime
                .registry()
                .get_object(object)?
                .ok_or_else(|| Error::not_found(format!("object '{object}' not found")))?;
            Ok(Value::Array(
                def.actions
                    .iter()
                    .map(|(name, action)| {
                        json!({ "name": name, "kind": action.kind, "label": action.label })
                    })
                    .collect(),
            ))
        }
        "view.get" => {
            let name = required_str(params, 0, "name")?;
            runtime
                .registry()
                .get(MetadataKind::View, name)
                .ok_or_else(|| Error::not_found(format!("view '{name}' not found")))
        }
        "system.listMethods" => Ok(Value::Array(
            METHODS.iter().map(|(name, _)| json!(name)).collect(),
        )),
        "system.describe" => {
            let mut methods = Map::new();
            for (name, signature) in METHODS {
                methods.insert((*name).to_string(), json!({ "params": signature }));
            }
            Ok(Value::Object(methods))
        }
        _ => Err(Error::not_found(format!("method '{method}' not found"))),
    }
}

/// Handle a parsed JSON-RPC payload: a single request or a batch.
/// `None` means "nothing to answer" (a lone notification).
pub async fn handle_payload(runtime: &ObjectQL, ctx: &Context, payload: &Value) -> Option<Value> {
    match payload {
        Value::Array(requests) if requests.is_empty() => Some(rpc_error(
            Value::Null,
            INVALID_REQUEST,
            "batch must not be empty",
            None,
        )),
        Value::Array(requests) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                if let Some(response) = handle_single(runtime, ctx, request).await {
                    responses.push(response);
                }
            }
            (!responses.is_empty()).then(|| Value::Array(responses))
        }
        single => handle_single(runtime, ctx, single).await,
    }
}
