//! # objectql-core — The object runtime
//!
//! The metadata-driven heart of ObjectQL: a schema registry describing
//! objects (typed fields, validation rules, state machines, actions,
//! hooks, permissions), bound to pluggable storage drivers and driven
//! through per-request contexts.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ObjectQL`] | The runtime value: registry + hook dispatcher + datasources. Built via [`ObjectQL::builder`] |
//! | [`MetadataRegistry`] | Schema store with package-scoped contributors and FQN resolution |
//! | [`ObjectDefinition`] / [`FieldDefinition`] | The typed metadata model |
//! | [`Context`] / [`Repository`] | Per-request handle and the object-scoped operation pipeline |
//! | [`HookDispatcher`] | Ordered lifecycle hooks and named action handlers |
//! | [`validator`] | Field, cross-field, and state-machine validation |
//! | [`RuntimeConfig`] | YAML/env configuration |
//!
//! # A short tour
//!
//! ```ignore
//! let runtime = ObjectQL::builder()
//!     .datasource("default", Arc::new(MemoryDriver::new()))
//!     .object(ObjectDefinition::new("todo")
//!         .field("title", FieldDefinition::new(FieldType::Text).required()))
//!     .build()?;
//!
//! runtime.on(HookEvent::BeforeCreate, "todo", |mut hc| async move {
//!     if let Some(data) = hc.data.as_mut() {
//!         data.entry("status").or_insert(json!("draft"));
//!     }
//!     Ok(hc)
//! });
//!
//! let ctx = runtime.context(UserContext::user("u1").in_space("space-A"));
//! let record = ctx.object("todo").create(data).await?;
//! ```

pub mod config;
pub mod context;
pub mod hooks;
pub mod metadata;
pub mod registry;
pub mod runtime;
pub mod validator;

pub use config::{DatasourceConfig, PackageConfig, PoolConfig, RuntimeConfig, StorageConfig};
pub use context::{generate_id, Context, Repository, UserContext};
pub use hooks::{ActionContext, HookContext, HookDispatcher, HookEvent, HookId};
pub use metadata::{
    ActionDefinition, ActionKind, CrossFieldOperator, FieldDefinition, FieldFormat, FieldType,
    ObjectDefinition, PermissionOp, PermissionRule, RuleKind, SelectOption, Severity,
    StateTransition, TriggerOp, ValidationRule,
};
pub use registry::{MetadataKind, MetadataRegistry, Ownership, RegisterOptions};
pub use runtime::{Builder, ObjectQL};
pub use validator::{Operation, ValidationContext, ValidationIssue, ValidationOutcome};

// The data-layer types flow through every public signature here;
// re-export them so most users need a single dependency.
pub use objectql_data::{
    normalize, record_from_value, record_id, run_pipeline, to_array_form, CallOptions, Command,
    CommandResult, CommandType, ComparisonOperator, Driver, DriverCapabilities, Error, ErrorCode,
    FilterCondition, QueryAst, QueryResult, Record, Result, SortOrder, SortSpec, Transaction,
};

/// Re-exports of the most commonly used runtime types.
pub mod prelude {
    pub use crate::{
        Context, Error, ErrorCode, FieldDefinition, FieldType, FilterCondition, HookEvent,
        ObjectDefinition, ObjectQL, QueryAst, Record, Repository, Result, SortSpec, UserContext,
    };
}
