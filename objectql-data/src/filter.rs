use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators understood by every driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "nin")]
    Nin,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "endswith")]
    EndsWith,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "between")]
    Between,
}

impl ComparisonOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "!=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::In => "in",
            ComparisonOperator::Nin => "nin",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::StartsWith => "startswith",
            ComparisonOperator::EndsWith => "endswith",
            ComparisonOperator::Like => "like",
            ComparisonOperator::Between => "between",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        let op = match op {
            "=" | "==" => ComparisonOperator::Eq,
            "!=" | "<>" => ComparisonOperator::Ne,
            "<" => ComparisonOperator::Lt,
            "<=" => ComparisonOperator::Lte,
            ">" => ComparisonOperator::Gt,
            ">=" => ComparisonOperator::Gte,
            "in" => ComparisonOperator::In,
            "nin" | "not in" => ComparisonOperator::Nin,
            "contains" => ComparisonOperator::Contains,
            "startswith" => ComparisonOperator::StartsWith,
            "endswith" => ComparisonOperator::EndsWith,
            "like" => ComparisonOperator::Like,
            "between" => ComparisonOperator::Between,
            _ => return None,
        };
        Some(op)
    }
}

/// The canonical filter representation consumed by drivers.
///
/// Protocol adapters accept several legacy spellings (array triples,
/// `$op` objects); all of them normalize into this tree. See
/// [`crate::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterCondition {
    Comparison {
        field: String,
        operator: ComparisonOperator,
        value: Value,
    },
    And {
        children: Vec<FilterCondition>,
    },
    Or {
        children: Vec<FilterCondition>,
    },
    Not {
        child: Box<FilterCondition>,
    },
}

impl FilterCondition {
    pub fn comparison(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        FilterCondition::Comparison {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Shorthand for the most common comparison.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(field, ComparisonOperator::Eq, value)
    }

    pub fn and(children: Vec<FilterCondition>) -> Self {
        FilterCondition::And { children }
    }

    pub fn or(children: Vec<FilterCondition>) -> Self {
        FilterCondition::Or { children }
    }

    pub fn not(child: FilterCondition) -> Self {
        FilterCondition::Not {
            child: Box::new(child),
        }
    }

    /// AND this condition with another, flattening nested ANDs.
    pub fn and_with(self, other: FilterCondition) -> Self {
        match self {
            FilterCondition::And { mut children } => {
                children.push(other);
                FilterCondition::And { children }
            }
            first => FilterCondition::And {
                children: vec![first, other],
            },
        }
    }
}
