//! Reference implementation of the aggregation pipeline.
//!
//! Drivers whose backend has native aggregation translate the pipeline
//! themselves; everyone else loads the matching records and runs them
//! through [`run_pipeline`]. Stages form a closed set: `$match`,
//! `$group`, `$sort`, `$project`, `$limit`, `$skip`. Expressions are
//! literal values or `$field` references.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::eval::{compare_values, matches, sort_records, values_equal};
use crate::normalize::normalize;
use crate::query::{SortOrder, SortSpec};
use crate::record::Record;

/// Execute an aggregation pipeline over an in-memory record set.
pub fn run_pipeline(records: Vec<Record>, stages: &[Value]) -> Result<Vec<Record>> {
    let mut current = records;
    for stage in stages {
        let Some(obj) = stage.as_object() else {
            return Err(Error::validation(format!(
                "aggregation stage must be an object, got {stage}"
            )));
        };
        if obj.len() != 1 {
            return Err(Error::validation(
                "aggregation stage must have exactly one operator key",
            ));
        }
        let (op, spec) = obj.iter().next().expect("one entry");
        current = match op.as_str() {
            "$match" => {
                let filter = normalize(spec)?;
                match filter {
                    Some(filter) => current
                        .into_iter()
                        .filter(|r| matches(&filter, r))
                        .collect(),
                    None => current,
                }
            }
            "$group" => group(current, spec)?,
            "$sort" => {
                let order_by = sort_specs(spec)?;
                sort_records(&mut current, &order_by);
                current
            }
            "$project" => project_stage(current, spec)?,
            "$limit" => {
                let n = stage_number(op, spec)?;
                current.truncate(n);
                current
            }
            "$skip" => {
                let n = stage_number(op, spec)?;
                if n >= current.len() {
                    Vec::new()
                } else {
                    current.split_off(n)
                }
            }
            other => {
                return Err(Error::validation(format!(
                    "unknown aggregation stage '{other}'"
                )))
            }
        };
    }
    Ok(current)
}

/// Evaluate a pipeline expression: `$field` references read from the
/// record, everything else is a literal.
fn eval_expr(expr: &Value, record: &Record) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            record.get(&s[1..]).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn group(records: Vec<Record>, spec: &Value) -> Result<Vec<Record>> {
    let Some(spec) = spec.as_object() else {
        return Err(Error::validation("$group stage must be an object"));
    };
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| Error::validation("$group stage requires an _id expression"))?;

    // Groups retain first-seen order.
    let mut groups: Vec<(Value, Vec<Record>)> = Vec::new();
    for record in records {
        let key = eval_expr(key_expr, &record);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            Some((_, members)) => members.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut row = Record::new();
        row.insert("_id".to_string(), key);
        for (field, acc) in spec.iter().filter(|(k, _)| *k != "_id") {
            row.insert(field.clone(), accumulate(acc, &members)?);
        }
        out.push(row);
    }
    Ok(out)
}

fn accumulate(acc: &Value, members: &[Record]) -> Result<Value> {
    let Some(obj) = acc.as_object() else {
        return Err(Error::validation(
            "$group accumulator must be an object like { \"$sum\": \"$field\" }",
        ));
    };
    if obj.len() != 1 {
        return Err(Error::validation(
            "$group accumulator must have exactly one operator key",
        ));
    }
    let (op, expr) = obj.iter().next().expect("one entry");
    let values: Vec<Value> = members.iter().map(|r| eval_expr(expr, r)).collect();
    let numbers = || values.iter().filter_map(Value::as_f64);

    let result = match op.as_str() {
        "$sum" => number_value(numbers().sum()),
        "$avg" => {
            let count = numbers().count();
            if count == 0 {
                Value::Null
            } else {
                number_value(numbers().sum::<f64>() / count as f64)
            }
        }
        "$min" => fold_extreme(&values, std::cmp::Ordering::Less),
        "$max" => fold_extreme(&values, std::cmp::Ordering::Greater),
        "$first" => values.first().cloned().unwrap_or(Value::Null),
        "$last" => values.last().cloned().unwrap_or(Value::Null),
        "$push" => Value::Array(values),
        "$addToSet" => {
            let mut set: Vec<Value> = Vec::new();
            for value in values {
                if !set.iter().any(|v| values_equal(v, &value)) {
                    set.push(value);
                }
            }
            Value::Array(set)
        }
        other => {
            return Err(Error::validation(format!(
                "unknown accumulator '{other}'"
            )))
        }
    };
    Ok(result)
}

fn fold_extreme(values: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values.iter().filter(|v| !v.is_null()) {
        best = match best {
            None => Some(value),
            Some(current) => match compare_values(value, current) {
                Some(ord) if ord == keep => Some(value),
                _ => Some(current),
            },
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

/// Emit integral results as JSON integers so `$avg` over integers does
/// not come back as `85000.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn sort_specs(spec: &Value) -> Result<Vec<SortSpec>> {
    let Some(obj) = spec.as_object() else {
        return Err(Error::validation("$sort stage must be an object"));
    };
    let mut order_by = Vec::with_capacity(obj.len());
    for (field, dir) in obj {
        let order = match dir.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => {
                return Err(Error::validation(format!(
                    "$sort direction for '{field}' must be 1 or -1"
                )))
            }
        };
        order_by.push(SortSpec {
            field: field.clone(),
            order,
        });
    }
    Ok(order_by)
}

fn project_stage(records: Vec<Record>, spec: &Value) -> Result<Vec<Record>> {
    let Some(obj) = spec.as_object() else {
        return Err(Error::validation("$project stage must be an object"));
    };
    let excluding = obj
        .values()
        .all(|v| matches!(v, Value::Bool(false)) || v.as_i64() == Some(0));

    let out = records
        .into_iter()
        .map(|record| {
            if excluding {
                let mut kept = record;
                for field in obj.keys() {
                    kept.shift_remove(field);
                }
                kept
            } else {
                let mut projected = Map::new();
                if !matches!(obj.get("_id"), Some(v) if is_falsy(v)) {
                    if let Some(id) = record.get("_id") {
                        projected.insert("_id".to_string(), id.clone());
                    }
                }
                for (field, rule) in obj {
                    if field == "_id" || is_falsy(rule) {
                        continue;
                    }
                    let value = match rule {
                        Value::String(s) if s.starts_with('$') => eval_expr(rule, &record),
                        _ => record.get(field).cloned().unwrap_or(Value::Null),
                    };
                    projected.insert(field.clone(), value);
                }
                projected
            }
        })
        .collect();
    Ok(out)
}

fn is_falsy(v: &Value) -> bool {
    matches!(v, Value::Bool(false)) || v.as_i64() == Some(0)
}

fn stage_number(op: &str, spec: &Value) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::validation(format!("{op} stage requires a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn salaries() -> Vec<Record> {
        vec![
            json!({ "department": "IT", "salary": 80000 }),
            json!({ "department": "IT", "salary": 90000 }),
            json!({ "department": "HR", "salary": 60000 }),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
    }

    #[test]
    fn group_avg_then_sort() {
        let out = run_pipeline(
            salaries(),
            &[
                json!({ "$group": { "_id": "$department", "avg": { "$avg": "$salary" } } }),
                json!({ "$sort": { "avg": -1 } }),
            ],
        )
        .unwrap();
        assert_eq!(
            out.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![
                json!({ "_id": "IT", "avg": 85000 }),
                json!({ "_id": "HR", "avg": 60000 }),
            ]
        );
    }

    #[test]
    fn match_limit_skip() {
        let out = run_pipeline(
            salaries(),
            &[
                json!({ "$match": { "salary": { "$gte": 70000 } } }),
                json!({ "$skip": 1 }),
                json!({ "$limit": 5 }),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["salary"], 90000);
    }

    #[test]
    fn push_and_add_to_set() {
        let out = run_pipeline(
            salaries(),
            &[json!({ "$group": {
                "_id": null,
                "all": { "$push": "$department" },
                "depts": { "$addToSet": "$department" },
                "min": { "$min": "$salary" },
                "max": { "$max": "$salary" },
                "first": { "$first": "$salary" },
                "last": { "$last": "$salary" },
            } })],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["all"], json!(["IT", "IT", "HR"]));
        assert_eq!(out[0]["depts"], json!(["IT", "HR"]));
        assert_eq!(out[0]["min"], 60000);
        assert_eq!(out[0]["max"], 90000);
        assert_eq!(out[0]["first"], 80000);
        assert_eq!(out[0]["last"], 60000);
    }

    #[test]
    fn project_includes_and_renames() {
        let out = run_pipeline(
            salaries(),
            &[json!({ "$project": { "pay": "$salary", "department": 1 } })],
        )
        .unwrap();
        assert_eq!(out[0]["pay"], 80000);
        assert_eq!(out[0]["department"], "IT");
        assert!(out[0].get("salary").is_none());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = run_pipeline(salaries(), &[json!({ "$lookup": {} })]).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::Validation);
        let err = run_pipeline(salaries(), &[json!({ "$group": { "_id": null, "x": { "$median": "$salary" } } })])
            .unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::Validation);
    }
}
