use std::any::Any;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::aggregate::run_pipeline;
use crate::error::{Error, Result};
use crate::eval::values_equal;
use crate::filter::FilterCondition;
use crate::query::QueryAst;
use crate::record::{record_id, Record};

/// What a driver can do natively. Protocol adapters and the repository
/// consult this vector before offering a feature; it is data, not a
/// type hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverCapabilities {
    pub transactions: bool,
    pub joins: bool,
    pub full_text_search: bool,
    pub json_fields: bool,
    pub array_fields: bool,
    pub query_filters: bool,
    pub query_aggregations: bool,
    pub query_sorting: bool,
    pub query_pagination: bool,
    pub query_window_functions: bool,
    pub query_subqueries: bool,
}

impl DriverCapabilities {
    /// A driver that can do nothing beyond basic CRUD.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Per-call options: deadline, cancellation, and the active
/// transaction, propagated to every driver suspension point.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    /// Set while the call runs inside `ctx.transaction`. Drivers
    /// downcast via [`Transaction::as_any`] to their own handle type.
    pub transaction: Option<std::sync::Arc<dyn Transaction>>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail fast when the caller has gone away or the deadline passed.
    /// Drivers call this at each suspension point.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::internal("operation cancelled"));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::internal("operation deadline exceeded"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Insert,
    Update,
    Delete,
    InsertMany,
    UpdateMany,
    DeleteMany,
}

/// The unified write envelope accepted by [`Driver::execute_command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub value: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// A driver-owned transaction handle.
///
/// The repository installs it on a child context and guarantees that
/// exactly one of `commit` / `rollback` runs, on success and failure
/// respectively. Drivers downcast via `as_any` to reach their own
/// transaction state.
#[async_trait::async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

/// The universal data operations every backend implements.
///
/// Only the primitive CRUD methods are required; `execute_query`,
/// `execute_command`, `distinct`, and `aggregate` have reference
/// default implementations built on them, which backends override when
/// the store can do better natively.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Datasource name this driver instance is registered under.
    fn name(&self) -> &str;

    fn capabilities(&self) -> DriverCapabilities;

    async fn connect(&self) -> Result<()>;

    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    async fn find(&self, object: &str, query: &QueryAst, opts: &CallOptions)
        -> Result<Vec<Record>>;

    async fn find_one(
        &self,
        object: &str,
        id: &str,
        query: Option<&QueryAst>,
        opts: &CallOptions,
    ) -> Result<Option<Record>>;

    async fn create(&self, object: &str, data: Record, opts: &CallOptions) -> Result<Record>;

    async fn update(
        &self,
        object: &str,
        id: &str,
        data: Record,
        opts: &CallOptions,
    ) -> Result<Record>;

    async fn delete(&self, object: &str, id: &str, opts: &CallOptions) -> Result<bool>;

    async fn count(
        &self,
        object: &str,
        filter: Option<&FilterCondition>,
        opts: &CallOptions,
    ) -> Result<u64>;

    async fn distinct(
        &self,
        object: &str,
        field: &str,
        filter: Option<&FilterCondition>,
        opts: &CallOptions,
    ) -> Result<Vec<Value>> {
        let mut query = QueryAst::new(object);
        query.filter = filter.cloned();
        let records = self.find(object, &query, opts).await?;
        let mut seen: Vec<Value> = Vec::new();
        for record in records {
            let value = record.get(field).cloned().unwrap_or(Value::Null);
            if !seen.iter().any(|v| values_equal(v, &value)) {
                seen.push(value);
            }
        }
        Ok(seen)
    }

    async fn aggregate(
        &self,
        object: &str,
        pipeline: &[Value],
        opts: &CallOptions,
    ) -> Result<Vec<Record>> {
        let records = self.find(object, &QueryAst::new(object), opts).await?;
        run_pipeline(records, pipeline)
    }

    async fn execute_query(&self, query: &QueryAst, opts: &CallOptions) -> Result<QueryResult> {
        if let Some(pipeline) = query.aggregate.as_ref().and_then(Value::as_array) {
            let mut stages = Vec::with_capacity(pipeline.len() + 1);
            if let Some(filter) = &query.filter {
                stages.push(serde_json::json!({
                    "$match": serde_json::to_value(filter).expect("filter serializes")
                }));
            }
            stages.extend(pipeline.iter().cloned());
            let value = self.aggregate(&query.object, &stages, opts).await?;
            return Ok(QueryResult { value, count: None });
        }

        let value = self.find(&query.object, query, opts).await?;
        // Paginated queries also report the unpaginated total so
        // adapters can build page metadata in one round trip.
        let count = if query.limit.is_some() || query.offset.is_some() {
            Some(self.count(&query.object, query.filter.as_ref(), opts).await?)
        } else {
            None
        };
        Ok(QueryResult { value, count })
    }

    async fn execute_command(&self, command: &Command, opts: &CallOptions) -> Result<CommandResult> {
        let object = command.object.as_str();
        let result = match command.kind {
            CommandType::Insert => {
                let data = command
                    .data
                    .clone()
                    .ok_or_else(|| Error::validation("insert command requires data"))?;
                let record = self.create(object, data, opts).await?;
                CommandResult {
                    success: true,
                    data: Some(Value::Object(record)),
                    affected: 1,
                    error: None,
                }
            }
            CommandType::Update => {
                let id = command
                    .id
                    .as_deref()
                    .ok_or_else(|| Error::validation("update command requires an id"))?;
                let data = command
                    .data
                    .clone()
                    .or_else(|| command.updates.clone())
                    .ok_or_else(|| Error::validation("update command requires data"))?;
                let record = self.update(object, id, data, opts).await?;
                CommandResult {
                    success: true,
                    data: Some(Value::Object(record)),
                    affected: 1,
                    error: None,
                }
            }
            CommandType::Delete => {
                let id = command
                    .id
                    .as_deref()
                    .ok_or_else(|| Error::validation("delete command requires an id"))?;
                let deleted = self.delete(object, id, opts).await?;
                CommandResult {
                    success: deleted,
                    data: None,
                    affected: u64::from(deleted),
                    error: None,
                }
            }
            CommandType::InsertMany => {
                let records = command
                    .records
                    .clone()
                    .ok_or_else(|| Error::validation("insert_many command requires records"))?;
                let mut created = Vec::with_capacity(records.len());
                for record in records {
                    created.push(Value::Object(self.create(object, record, opts).await?));
                }
                CommandResult {
                    success: true,
                    affected: created.len() as u64,
                    data: Some(Value::Array(created)),
                    error: None,
                }
            }
            CommandType::UpdateMany => {
                let updates = command
                    .updates
                    .clone()
                    .or_else(|| command.data.clone())
                    .ok_or_else(|| Error::validation("update_many command requires updates"))?;
                let ids = self.resolve_ids(object, command, opts).await?;
                let mut affected = 0;
                for id in ids {
                    self.update(object, &id, updates.clone(), opts).await?;
                    affected += 1;
                }
                CommandResult {
                    success: true,
                    data: None,
                    affected,
                    error: None,
                }
            }
            CommandType::DeleteMany => {
                let ids = self.resolve_ids(object, command, opts).await?;
                let mut affected = 0;
                for id in ids {
                    if self.delete(object, &id, opts).await? {
                        affected += 1;
                    }
                }
                CommandResult {
                    success: true,
                    data: None,
                    affected,
                    error: None,
                }
            }
        };
        Ok(result)
    }

    /// The target ids of a bulk command: explicit `ids` win, otherwise
    /// the filter is resolved to matching record ids.
    async fn resolve_ids(
        &self,
        object: &str,
        command: &Command,
        opts: &CallOptions,
    ) -> Result<Vec<String>> {
        if let Some(ids) = &command.ids {
            return Ok(ids.clone());
        }
        let mut query = QueryAst::new(object).fields(vec![crate::record::ID_FIELD.to_string()]);
        query.filter = command.filter.clone();
        let records = self.find(object, &query, opts).await?;
        Ok(records
            .iter()
            .filter_map(|r| record_id(r).map(str::to_string))
            .collect())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(Error::unsupported(format!(
            "driver '{}' does not support transactions",
            self.name()
        )))
    }
}
