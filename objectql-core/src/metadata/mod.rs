//! The typed metadata model: objects, fields, actions, validation
//! rules, permissions.
//!
//! Definitions are data. They arrive from YAML packages, inline
//! configuration, or a federated remote, and are held by the
//! [`crate::registry::MetadataRegistry`]; nothing here assumes a
//! compile-time schema.

mod field;
mod rules;

pub use field::{FieldDefinition, FieldFormat, FieldType, SelectOption};
pub use rules::{
    CrossFieldOperator, RuleKind, Severity, StateTransition, TriggerOp, ValidationRule,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespaces whose objects keep their short name as FQN and which
/// metadata packages may not claim.
pub const RESERVED_NAMESPACES: [&str; 2] = ["base", "system"];

pub fn is_reserved_namespace(namespace: &str) -> bool {
    RESERVED_NAMESPACES.contains(&namespace)
}

/// Compute the fully qualified name for a definition.
pub fn fully_qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !is_reserved_namespace(ns) => format!("{ns}__{name}"),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Targets one record; the call must carry a record id.
    #[default]
    Record,
    /// Object-scoped; the call must not carry a record id.
    Global,
}

/// A named operation beyond CRUD, with field-descriptor params.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(default)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, FieldDefinition>,
}

/// The repository operations a permission rule can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionOp {
    Find,
    Create,
    Update,
    Delete,
    Action,
}

/// Role-based gate checked before hooks run. System contexts bypass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub operations: Vec<PermissionOp>,
    pub allowed_roles: Vec<String>,
}

/// An entity schema: typed fields, rules, actions, hooks, permissions,
/// and the datasource its records live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_datasource")]
    pub datasource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldDefinition>,
    /// Declarative listener metadata carried through from packages.
    /// Handlers themselves are code, registered on the hook
    /// dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listeners: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ActionDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<PermissionRule>,
}

fn default_datasource() -> String {
    "default".to_string()
}

impl ObjectDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            label: None,
            datasource: default_datasource(),
            fields: BTreeMap::new(),
            listeners: None,
            actions: BTreeMap::new(),
            validation_rules: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = datasource.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name.into(), definition);
        self
    }

    pub fn action(mut self, name: impl Into<String>, definition: ActionDefinition) -> Self {
        self.actions.insert(name.into(), definition);
        self
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn permission(mut self, rule: PermissionRule) -> Self {
        self.permissions.push(rule);
        self
    }

    pub fn fqn(&self) -> String {
        fully_qualified_name(self.namespace.as_deref(), &self.name)
    }

    /// Whether `roles` may perform `op` on this object. Objects with
    /// no permission rules are open.
    pub fn allows(&self, op: PermissionOp, roles: &[String]) -> bool {
        let relevant: Vec<&PermissionRule> = self
            .permissions
            .iter()
            .filter(|rule| rule.operations.contains(&op))
            .collect();
        if relevant.is_empty() {
            return true;
        }
        relevant
            .iter()
            .any(|rule| rule.allowed_roles.iter().any(|r| roles.contains(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_applies_namespace_unless_reserved() {
        assert_eq!(fully_qualified_name(None, "todo"), "todo");
        assert_eq!(fully_qualified_name(Some("crm"), "lead"), "crm__lead");
        assert_eq!(fully_qualified_name(Some("base"), "user"), "user");
        assert_eq!(fully_qualified_name(Some("system"), "space"), "space");
    }

    #[test]
    fn object_definition_from_yaml() {
        let yaml = r#"
name: todo
label: Todo
fields:
  title:
    type: text
    required: true
  status:
    type: select
    options:
      - value: open
      - value: done
actions:
  archive:
    kind: record
    label: Archive
permissions:
  - operations: [delete]
    allowed_roles: [admin]
"#;
        let def: ObjectDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.fqn(), "todo");
        assert_eq!(def.datasource, "default");
        assert!(def.fields["title"].required);
        assert_eq!(def.actions["archive"].kind, ActionKind::Record);
        assert!(def.allows(PermissionOp::Find, &[]));
        assert!(!def.allows(PermissionOp::Delete, &["user".to_string()]));
        assert!(def.allows(PermissionOp::Delete, &["admin".to_string()]));
    }
}
