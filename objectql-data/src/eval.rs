//! In-memory evaluation of the query AST: filter matching, stable
//! multi-key sorting, pagination, and field projection.
//!
//! Drivers without native query support (the memory driver, drivers
//! post-filtering remote results) evaluate through these functions so
//! that every backend agrees on edge-case semantics.

use std::cmp::Ordering;

use serde_json::Value;

use crate::filter::{ComparisonOperator, FilterCondition};
use crate::query::{QueryAst, SortOrder, SortSpec};
use crate::record::{Record, ID_FIELD};

/// Whether a record satisfies a filter condition.
pub fn matches(cond: &FilterCondition, record: &Record) -> bool {
    match cond {
        FilterCondition::Comparison {
            field,
            operator,
            value,
        } => {
            let actual = record.get(field).unwrap_or(&Value::Null);
            compare_with_operator(actual, *operator, value)
        }
        FilterCondition::And { children } => children.iter().all(|c| matches(c, record)),
        FilterCondition::Or { children } => children.iter().any(|c| matches(c, record)),
        FilterCondition::Not { child } => !matches(child, record),
    }
}

fn compare_with_operator(actual: &Value, operator: ComparisonOperator, expected: &Value) -> bool {
    match operator {
        ComparisonOperator::Eq => values_equal(actual, expected),
        ComparisonOperator::Ne => !values_equal(actual, expected),
        ComparisonOperator::Lt => matches_ordering(actual, expected, |o| o == Ordering::Less),
        ComparisonOperator::Lte => matches_ordering(actual, expected, |o| o != Ordering::Greater),
        ComparisonOperator::Gt => matches_ordering(actual, expected, |o| o == Ordering::Greater),
        ComparisonOperator::Gte => matches_ordering(actual, expected, |o| o != Ordering::Less),
        ComparisonOperator::In => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
        ComparisonOperator::Nin => !expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
        ComparisonOperator::Contains => match actual {
            Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
            Value::Array(items) => items.iter().any(|v| values_equal(v, expected)),
            _ => false,
        },
        ComparisonOperator::StartsWith => match (actual.as_str(), expected.as_str()) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        ComparisonOperator::EndsWith => match (actual.as_str(), expected.as_str()) {
            (Some(s), Some(suffix)) => s.ends_with(suffix),
            _ => false,
        },
        ComparisonOperator::Like => match (actual.as_str(), expected.as_str()) {
            (Some(s), Some(pattern)) => like_match(pattern, s),
            _ => false,
        },
        ComparisonOperator::Between => {
            let Some(bounds) = expected.as_array() else {
                return false;
            };
            let [low, high] = bounds.as_slice() else {
                return false;
            };
            matches_ordering(actual, low, |o| o != Ordering::Less)
                && matches_ordering(actual, high, |o| o != Ordering::Greater)
        }
    }
}

fn matches_ordering(actual: &Value, expected: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    compare_values(actual, expected).is_some_and(pred)
}

/// Equality with numeric coercion, so `1` and `1.0` compare equal the
/// way they do at the JSON transport boundary.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Total order over comparable values; `None` for incomparable pairs.
///
/// Numbers compare numerically, strings lexically (which orders
/// ISO-8601 timestamps chronologically), booleans false < true.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Stable multi-key sort. Key precedence is left-to-right; nulls sort
/// last ascending and first descending.
pub fn sort_records(records: &mut [Record], order_by: &[SortSpec]) {
    if order_by.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for spec in order_by {
            let va = a.get(&spec.field).unwrap_or(&Value::Null);
            let vb = b.get(&spec.field).unwrap_or(&Value::Null);
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                // nulls last ascending, first descending
                (true, false) => match spec.order {
                    SortOrder::Asc => Ordering::Greater,
                    SortOrder::Desc => Ordering::Less,
                },
                (false, true) => match spec.order {
                    SortOrder::Asc => Ordering::Less,
                    SortOrder::Desc => Ordering::Greater,
                },
                (false, false) => match spec.order {
                    SortOrder::Asc => compare_values(va, vb).unwrap_or(Ordering::Equal),
                    SortOrder::Desc => compare_values(vb, va).unwrap_or(Ordering::Equal),
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// `offset` skips before `limit` caps.
pub fn paginate(records: Vec<Record>, offset: Option<u64>, limit: Option<u64>) -> Vec<Record> {
    let iter = records.into_iter().skip(offset.unwrap_or(0) as usize);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

/// Keep only the requested fields. `_id` is always retained.
pub fn project(record: &Record, fields: &[String]) -> Record {
    let mut out = Record::new();
    if let Some(id) = record.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        if field == ID_FIELD {
            continue;
        }
        if let Some(value) = record.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

/// Run the filter/sort/paginate/project portion of a query over an
/// in-memory record set.
pub fn apply_query(records: Vec<Record>, query: &QueryAst) -> Vec<Record> {
    let mut matched: Vec<Record> = match &query.filter {
        Some(filter) => records.into_iter().filter(|r| matches(filter, r)).collect(),
        None => records,
    };
    sort_records(&mut matched, &query.order_by);
    let matched = paginate(matched, query.offset, query.limit);
    match &query.fields {
        Some(fields) => matched.iter().map(|r| project(r, fields)).collect(),
        None => matched,
    }
}

fn like_match(pattern: &str, text: &str) -> bool {
    if pattern.contains('%') || pattern.contains('_') {
        let mut regex = String::with_capacity(pattern.len() + 8);
        regex.push('^');
        for ch in pattern.chars() {
            match ch {
                '%' => regex.push_str(".*"),
                '_' => regex.push('.'),
                other => regex.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex.push('$');
        regex::RegexBuilder::new(&regex)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    } else {
        // `$regex` filters normalize to `like`; try the pattern as a
        // regex before falling back to a substring test.
        match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(text),
            Err(_) => text.contains(pattern),
        }
    }
}
