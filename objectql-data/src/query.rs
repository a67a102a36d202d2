use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterCondition;

/// Sort direction. Nulls sort last ascending and first descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// The universal query representation consumed by drivers.
///
/// # Example
///
/// ```ignore
/// let query = QueryAst::new("todo")
///     .filter(FilterCondition::eq("status", "open"))
///     .order_by(SortSpec::desc("created_at"))
///     .limit(20)
///     .offset(40);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryAst {
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Value>,
}

impl QueryAst {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            ..Default::default()
        }
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn filter(mut self, filter: FilterCondition) -> Self {
        self.filter = Some(filter);
        self
    }

    /// AND an extra condition into the existing filter (row-level
    /// security appends through here).
    pub fn restrict(mut self, extra: FilterCondition) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and_with(extra),
            None => extra,
        });
        self
    }

    pub fn order_by(mut self, spec: SortSpec) -> Self {
        self.order_by.push(spec);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_wire_names() {
        let query = QueryAst::new("todo")
            .filter(FilterCondition::eq("status", "open"))
            .order_by(SortSpec::desc("created_at"))
            .limit(10);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["object"], "todo");
        assert_eq!(value["where"]["type"], "comparison");
        assert_eq!(value["orderBy"][0]["order"], "desc");
        let back: QueryAst = serde_json::from_value(value).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn restrict_appends_with_and() {
        let query = QueryAst::new("todo")
            .filter(FilterCondition::eq("status", "open"))
            .restrict(FilterCondition::eq("space_id", "s1"));
        match query.filter.unwrap() {
            FilterCondition::And { children } => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }

        let query = QueryAst::new("todo").restrict(FilterCondition::eq("space_id", "s1"));
        assert_eq!(query.filter, Some(FilterCondition::eq("space_id", "s1")));
    }
}
