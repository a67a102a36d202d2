//! Conversions between the legacy filter spellings and the canonical
//! [`FilterCondition`] tree.
//!
//! Three input spellings are accepted:
//!
//! - structured: the serde form of [`FilterCondition`] itself
//!   (`{ "type": "comparison", ... }`);
//! - array form: `[[field, op, value], "and" | "or", ...]`, parsed
//!   left-to-right with no precedence — callers group with nested
//!   arrays, and a bare list of conditions is an implicit `and`;
//! - object form: `{ field: value }` or `{ field: { "$op": value } }`
//!   with the Mongo-style operators `$eq $ne $gt $gte $lt $lte $in
//!   $nin $regex`.
//!
//! Ill-formed input fails with `VALIDATION_ERROR`.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::filter::{ComparisonOperator, FilterCondition};

/// Normalize any accepted filter spelling into the canonical tree.
///
/// `null` and empty containers mean "no filter" and yield `None`.
pub fn normalize(value: &Value) -> Result<Option<FilterCondition>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) => parse_array(items).map(Some),
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Object(map) => {
            // Only the canonical node tags select the structured form;
            // a record field literally named "type" stays a legacy
            // equality filter.
            let tag = map.get("type").and_then(Value::as_str);
            if matches!(tag, Some("comparison" | "and" | "or" | "not")) {
                let cond: FilterCondition = serde_json::from_value(value.clone())
                    .map_err(|e| Error::validation(format!("malformed filter condition: {e}")))?;
                Ok(Some(cond))
            } else {
                parse_object(map).map(Some)
            }
        }
        other => Err(Error::validation(format!(
            "unsupported filter form: {other}"
        ))),
    }
}

/// Render a condition back into the legacy array form.
///
/// `not` has no array spelling, so it renders as its structured JSON;
/// [`normalize`] accepts that shape nested inside arrays, which keeps
/// the round-trip law `normalize(to_array_form(f)) ≡ f` total.
pub fn to_array_form(cond: &FilterCondition) -> Value {
    match cond {
        FilterCondition::Comparison {
            field,
            operator,
            value,
        } => Value::Array(vec![
            Value::String(field.clone()),
            Value::String(operator.as_str().to_string()),
            value.clone(),
        ]),
        FilterCondition::And { children } => interleave(children, "and"),
        FilterCondition::Or { children } => interleave(children, "or"),
        FilterCondition::Not { .. } => {
            serde_json::to_value(cond).expect("filter condition serializes")
        }
    }
}

fn interleave(children: &[FilterCondition], sep: &str) -> Value {
    let mut items = Vec::with_capacity(children.len() * 2);
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            items.push(Value::String(sep.to_string()));
        }
        items.push(to_array_form(child));
    }
    Value::Array(items)
}

fn parse_array(items: &[Value]) -> Result<FilterCondition> {
    if let Some(cond) = try_parse_triple(items)? {
        return Ok(cond);
    }

    // A sequence of operands optionally joined by "and"/"or" separators.
    // Folded left-to-right; a missing separator means "and".
    let mut current: Option<FilterCondition> = None;
    let mut pending: Option<&str> = None;
    for item in items {
        match item {
            Value::String(s) if s.eq_ignore_ascii_case("and") || s.eq_ignore_ascii_case("or") => {
                if current.is_none() || pending.is_some() {
                    return Err(Error::validation(format!(
                        "misplaced logical separator '{s}' in array filter"
                    )));
                }
                pending = Some(if s.eq_ignore_ascii_case("and") { "and" } else { "or" });
            }
            operand => {
                let cond = normalize(operand)?.ok_or_else(|| {
                    Error::validation("empty group inside array filter")
                })?;
                current = Some(match current.take() {
                    None => cond,
                    Some(acc) => combine(acc, pending.take().unwrap_or("and"), cond),
                });
            }
        }
    }
    if pending.is_some() {
        return Err(Error::validation("array filter ends with a dangling separator"));
    }
    current.ok_or_else(|| Error::validation("array filter contains no conditions"))
}

fn combine(acc: FilterCondition, sep: &str, next: FilterCondition) -> FilterCondition {
    match (sep, acc) {
        ("and", FilterCondition::And { mut children }) => {
            children.push(next);
            FilterCondition::And { children }
        }
        ("or", FilterCondition::Or { mut children }) => {
            children.push(next);
            FilterCondition::Or { children }
        }
        ("and", acc) => FilterCondition::and(vec![acc, next]),
        (_, acc) => FilterCondition::or(vec![acc, next]),
    }
}

fn try_parse_triple(items: &[Value]) -> Result<Option<FilterCondition>> {
    if items.len() != 3 {
        return Ok(None);
    }
    let (Some(field), Some(op)) = (items[0].as_str(), items[1].as_str()) else {
        return Ok(None);
    };
    // `["a", "and", ...]` is a malformed sequence, not a triple.
    if op.eq_ignore_ascii_case("and") || op.eq_ignore_ascii_case("or") {
        return Ok(None);
    }
    let operator = ComparisonOperator::parse(op)
        .ok_or_else(|| Error::validation(format!("unknown filter operator '{op}'")))?;
    Ok(Some(FilterCondition::comparison(
        field,
        operator,
        items[2].clone(),
    )))
}

fn parse_object(map: &serde_json::Map<String, Value>) -> Result<FilterCondition> {
    let mut conditions = Vec::with_capacity(map.len());
    for (field, value) in map {
        match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                for (op, operand) in ops {
                    conditions.push(FilterCondition::comparison(
                        field.clone(),
                        mongo_operator(op)?,
                        operand.clone(),
                    ));
                }
            }
            other => conditions.push(FilterCondition::eq(field.clone(), other.clone())),
        }
    }
    if conditions.len() == 1 {
        Ok(conditions.pop().expect("one condition"))
    } else {
        Ok(FilterCondition::And {
            children: conditions,
        })
    }
}

fn mongo_operator(op: &str) -> Result<ComparisonOperator> {
    let mapped = match op {
        "$eq" => ComparisonOperator::Eq,
        "$ne" => ComparisonOperator::Ne,
        "$gt" => ComparisonOperator::Gt,
        "$gte" => ComparisonOperator::Gte,
        "$lt" => ComparisonOperator::Lt,
        "$lte" => ComparisonOperator::Lte,
        "$in" => ComparisonOperator::In,
        "$nin" => ComparisonOperator::Nin,
        "$regex" => ComparisonOperator::Like,
        other => {
            return Err(Error::validation(format!(
                "unknown filter operator '{other}'"
            )))
        }
    };
    Ok(mapped)
}
