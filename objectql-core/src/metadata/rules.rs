use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::field::FieldDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

/// The write operations a rule may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOp {
    Create,
    Update,
    Delete,
}

/// Operators allowed in cross-field rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossFieldOperator {
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
    #[serde(rename = "not in", alias = "nin")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateTransition {
    #[serde(default)]
    pub allowed_next: Vec<String>,
    #[serde(default)]
    pub is_terminal: bool,
}

/// The rule body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Constraints of a single field definition, usually derived
    /// implicitly from the object's fields.
    Field {
        field: String,
        definition: Box<FieldDefinition>,
    },
    /// Compare one field against another field or a literal.
    CrossField {
        field: String,
        operator: CrossFieldOperator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compare_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// A state machine over one field's values.
    StateMachine {
        field: String,
        transitions: BTreeMap<String, StateTransition>,
    },
}

/// A validation rule: a tagged body plus the common envelope
/// (severity, trigger scoping, changed-field scoping, message
/// template).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message template. `{{field}}` placeholders resolve from the
    /// record; state-machine rules additionally get `{{old_status}}`
    /// and `{{new_status}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// Operations the rule runs on. `None` means all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Vec<TriggerOp>>,
    /// Only run when one of these fields changed. `None` means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl ValidationRule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            name: None,
            message: None,
            error_code: None,
            severity: Severity::Error,
            trigger: None,
            fields: None,
            kind,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn trigger(mut self, ops: Vec<TriggerOp>) -> Self {
        self.trigger = Some(ops);
        self
    }

    pub fn scoped_to_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_rule_deserializes_from_yaml() {
        let yaml = r#"
type: state_machine
name: status_flow
field: status
severity: error
trigger: [update]
transitions:
  draft:
    allowed_next: [active]
  active:
    allowed_next: [completed, draft]
  completed:
    allowed_next: []
    is_terminal: true
"#;
        let rule: ValidationRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.name.as_deref(), Some("status_flow"));
        assert_eq!(rule.trigger, Some(vec![TriggerOp::Update]));
        match &rule.kind {
            RuleKind::StateMachine { field, transitions } => {
                assert_eq!(field, "status");
                assert!(transitions["completed"].is_terminal);
                assert_eq!(transitions["active"].allowed_next, ["completed", "draft"]);
            }
            other => panic!("expected state machine rule, got {other:?}"),
        }
    }

    #[test]
    fn cross_field_operator_accepts_both_not_in_spellings() {
        let a: CrossFieldOperator = serde_json::from_value(serde_json::json!("not in")).unwrap();
        let b: CrossFieldOperator = serde_json::from_value(serde_json::json!("nin")).unwrap();
        assert_eq!(a, CrossFieldOperator::NotIn);
        assert_eq!(b, CrossFieldOperator::NotIn);
    }
}
