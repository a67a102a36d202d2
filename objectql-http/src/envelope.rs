//! The primary wire form: `POST /api/objectql` with
//! `{ "op": ..., "object": ..., "args": ... }`.

use serde_json::{json, Map, Value};

use objectql_core::{record_from_value, Context, Error, Record, Result};

use crate::params::{list_meta, parse_filters, parse_find_args, with_type};

fn args_object(args: &Value) -> Result<Map<String, Value>> {
    match args {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(Error::validation(format!(
            "args must be an object, got {other}"
        ))),
    }
}

fn args_record(args: &Value, what: &str) -> Result<Record> {
    match args {
        Value::Object(map) => Ok(map.clone()),
        other => Err(Error::validation(format!(
            "{what} expects a record object, got {other}"
        ))),
    }
}

/// Execute one operation envelope against a context.
pub async fn dispatch_op(ctx: &Context, op: &str, object: &str, args: &Value) -> Result<Value> {
    let repo = ctx.object(object);
    match op {
        "find" => {
            let parsed = parse_find_args(object, &args_object(args)?)?;
            let limit = parsed.query.limit;
            let offset = parsed.query.offset.unwrap_or(0);
            let filter = parsed.query.filter.clone();
            let mut items = repo.find(parsed.query).await?;
            if !parsed.expand.is_empty() {
                repo.expand(&mut items, &parsed.expand).await?;
            }
            let mut body = Map::new();
            if let Some(limit) = limit {
                let total = repo.count(filter).await?;
                body.insert("meta".to_string(), list_meta(total, limit, offset, items.len()));
            }
            body.insert(
                "items".to_string(),
                Value::Array(items.into_iter().map(Value::Object).collect()),
            );
            Ok(Value::Object(body))
        }
        "findOne" => {
            let (record, expand) = match args {
                Value::String(id) => (repo.find_one(id, None).await?, Vec::new()),
                Value::Object(_) => {
                    let map = args_object(args)?;
                    let parsed = parse_find_args(object, &map)?;
                    let record = match map.get("id").and_then(Value::as_str) {
                        Some(id) => repo.find_one(id, Some(parsed.query)).await?,
                        None => {
                            let mut query = parsed.query;
                            query.limit = Some(1);
                            repo.find(query).await?.into_iter().next()
                        }
                    };
                    (record, parsed.expand)
                }
                other => {
                    return Err(Error::validation(format!(
                        "findOne expects an id or an args object, got {other}"
                    )))
                }
            };
            let record = record.ok_or_else(|| {
                Error::not_found(format!("record not found on object '{object}'"))
            })?;
            let mut records = vec![record];
            if !expand.is_empty() {
                repo.expand(&mut records, &expand).await?;
            }
            Ok(with_type(records.remove(0), object))
        }
        "create" => {
            let created = repo.create(args_record(args, "create")?).await?;
            Ok(with_type(created, object))
        }
        "update" => {
            let map = args_object(args)?;
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("update requires an id"))?;
            let data = map
                .get("data")
                .cloned()
                .ok_or_else(|| Error::validation("update requires data"))?;
            let updated = repo.update(id, record_from_value(data)?).await?;
            Ok(with_type(updated, object))
        }
        "delete" => {
            let map = args_object(args)?;
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("delete requires an id"))?;
            let deleted = repo.delete(id).await?;
            Ok(json!({ "deleted": deleted }))
        }
        "count" => {
            let map = args_object(args)?;
            let filter = parse_filters(map.get("filters").or_else(|| map.get("filter")))?;
            let total = repo.count(filter).await?;
            Ok(json!({ "total": total }))
        }
        "action" => {
            let map = args_object(args)?;
            let action = map
                .get("action")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("action op requires an action name"))?;
            let id = map.get("id").and_then(Value::as_str);
            let input = match map.get("input") {
                Some(input) => record_from_value(input.clone())?,
                None => Record::new(),
            };
            let result = repo.execute(action, id, input).await?;
            Ok(json!({ "data": result }))
        }
        "createMany" => {
            let records = match args {
                Value::Array(items) => items
                    .iter()
                    .map(|item| record_from_value(item.clone()))
                    .collect::<Result<Vec<_>>>()?,
                other => {
                    return Err(Error::validation(format!(
                        "createMany expects an array of records, got {other}"
                    )))
                }
            };
            let created = repo.create_many(records).await?;
            Ok(json!({
                "items": created.into_iter().map(Value::Object).collect::<Vec<_>>(),
            }))
        }
        "updateMany" => {
            let map = args_object(args)?;
            let filter = parse_filters(map.get("filters").or_else(|| map.get("filter")))?
                .ok_or_else(|| Error::validation("updateMany requires filters"))?;
            let data = map
                .get("data")
                .cloned()
                .ok_or_else(|| Error::validation("updateMany requires data"))?;
            let affected = repo.update_many(filter, record_from_value(data)?).await?;
            Ok(json!({ "affected": affected }))
        }
        "deleteMany" => {
            let map = args_object(args)?;
            let filter = parse_filters(map.get("filters").or_else(|| map.get("filter")))?
                .ok_or_else(|| Error::validation("deleteMany requires filters"))?;
            let affected = repo.delete_many(filter).await?;
            Ok(json!({ "affected": affected }))
        }
        other => Err(Error::validation(format!("unknown op '{other}'"))),
    }
}
