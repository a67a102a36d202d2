//! Per-request contexts and object repositories.
//!
//! A [`Context`] carries the verified user, the tenant space, and (in
//! transactional mode) the driver transaction handle. It is the only
//! legitimate way to touch objects: `ctx.object("todo")` yields a
//! [`Repository`] whose operations drive the full pipeline — permission
//! gate, system stamps, `beforeX` hooks, validation, the driver call,
//! `afterX` hooks.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use objectql_data::{
    record_from_value, record_id, CallOptions, Error, FilterCondition, QueryAst, Record, Result,
    Transaction, CREATED_AT_FIELD, CREATED_BY_FIELD, ID_FIELD, SPACE_ID_FIELD, UPDATED_AT_FIELD,
    UPDATED_BY_FIELD,
};

use crate::hooks::{ActionContext, HookContext, HookEvent};
use crate::metadata::{ActionKind, ObjectDefinition, PermissionOp};
use crate::runtime::RuntimeInner;
use crate::validator::{self, Operation, ValidationContext};

/// The verified user record a protocol adapter hands to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

impl UserContext {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Bypasses permissions and row-level security.
    pub fn system() -> Self {
        Self {
            is_system: true,
            ..Self::default()
        }
    }

    pub fn in_space(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Immutable per-request handle. Cloning is cheap; clones share the
/// runtime and, when present, the transaction.
#[derive(Clone)]
pub struct Context {
    pub(crate) runtime: Arc<RuntimeInner>,
    user: UserContext,
    transaction: Option<Arc<dyn Transaction>>,
    options: CallOptions,
}

impl Context {
    pub(crate) fn new(runtime: Arc<RuntimeInner>, user: UserContext) -> Self {
        Self {
            runtime,
            user,
            transaction: None,
            options: CallOptions::default(),
        }
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn is_system(&self) -> bool {
        self.user.is_system
    }

    /// Attach a deadline / cancellation token for every driver call
    /// made through this context.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// The object-scoped repository.
    pub fn object(&self, name: impl Into<String>) -> Repository {
        Repository {
            ctx: self.clone(),
            object: name.into(),
        }
    }

    pub(crate) fn call_options(&self) -> CallOptions {
        let mut options = self.options.clone();
        options.transaction = self.transaction.clone();
        options
    }

    /// Run `f` inside a transaction on the default datasource:
    /// commit on `Ok`, rollback on `Err`. Nested calls reuse the
    /// outer handle.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transaction_on("default", f).await
    }

    /// Transaction on a named datasource (capability-gated).
    pub async fn transaction_on<F, Fut, T>(&self, datasource: &str, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.transaction.is_some() {
            return f(self.clone()).await;
        }
        let driver = self.runtime.datasource(datasource)?;
        if !driver.capabilities().transactions {
            return Err(Error::unsupported(format!(
                "datasource '{datasource}' does not support transactions"
            )));
        }
        let trx: Arc<dyn Transaction> = Arc::from(driver.begin_transaction().await?);
        let child = Context {
            transaction: Some(trx.clone()),
            ..self.clone()
        };
        match f(child).await {
            Ok(value) => {
                trx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = trx.rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Object-scoped operations obtained from [`Context::object`].
pub struct Repository {
    ctx: Context,
    object: String,
}

impl Repository {
    pub fn object_name(&self) -> &str {
        &self.object
    }

    fn resolve(&self) -> Result<(ObjectDefinition, Arc<dyn objectql_data::Driver>)> {
        let def = self
            .ctx
            .runtime
            .registry
            .get_object(&self.object)?
            .ok_or_else(|| Error::not_found(format!("object '{}' not found", self.object)))?;
        let driver = self.ctx.runtime.driver_for(&def)?;
        Ok((def, driver))
    }

    fn check_permission(&self, def: &ObjectDefinition, op: PermissionOp) -> Result<()> {
        if self.ctx.is_system() || def.allows(op, &self.ctx.user().roles) {
            return Ok(());
        }
        Err(Error::forbidden(format!(
            "operation not permitted on object '{}'",
            self.object
        )))
    }

    fn hook_context(&self, event: HookEvent) -> HookContext {
        HookContext::new(event, self.object.clone(), self.ctx.clone())
    }

    // ── reads ──────────────────────────────────────────────

    pub async fn find(&self, query: QueryAst) -> Result<Vec<Record>> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Find)?;

        let mut query = query;
        query.object = self.object.clone();
        let mut before = self.hook_context(HookEvent::BeforeFind);
        before.query = Some(query);
        let mut before = self.ctx.runtime.hooks.dispatch(before).await?;
        let query = before.query.take().unwrap_or_else(|| QueryAst::new(&self.object));

        let records = driver
            .find(&self.object, &query, &self.ctx.call_options())
            .await?;

        let mut after = self.hook_context(HookEvent::AfterFind);
        after.query = Some(query);
        after.state = before.state;
        after.result = Some(Value::Array(records.into_iter().map(Value::Object).collect()));
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        match after.result {
            Some(Value::Array(items)) => items.into_iter().map(record_from_value).collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn find_one(&self, id: &str, query: Option<QueryAst>) -> Result<Option<Record>> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Find)?;

        let mut before = self.hook_context(HookEvent::BeforeFind);
        before.query = Some(match query {
            Some(mut query) => {
                query.object = self.object.clone();
                query
            }
            None => QueryAst::new(&self.object),
        });
        let mut before = self.ctx.runtime.hooks.dispatch(before).await?;
        let query = before.query.take().unwrap_or_else(|| QueryAst::new(&self.object));

        let record = driver
            .find_one(&self.object, id, Some(&query), &self.ctx.call_options())
            .await?;

        let mut after = self.hook_context(HookEvent::AfterFind);
        after.query = Some(query);
        after.state = before.state;
        after.result = Some(match record {
            Some(record) => Value::Object(record),
            None => Value::Null,
        });
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        match after.result {
            Some(Value::Object(record)) => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    pub async fn count(&self, filter: Option<FilterCondition>) -> Result<u64> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Find)?;

        let mut query = QueryAst::new(&self.object);
        query.filter = filter;
        let mut before = self.hook_context(HookEvent::BeforeCount);
        before.query = Some(query);
        let mut before = self.ctx.runtime.hooks.dispatch(before).await?;
        let query = before.query.take().unwrap_or_else(|| QueryAst::new(&self.object));

        let count = driver
            .count(&self.object, query.filter.as_ref(), &self.ctx.call_options())
            .await?;

        let mut after = self.hook_context(HookEvent::AfterCount);
        after.state = before.state;
        after.result = Some(Value::from(count));
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        Ok(after.result.and_then(|v| v.as_u64()).unwrap_or(count))
    }

    pub async fn distinct(
        &self,
        field: &str,
        filter: Option<FilterCondition>,
    ) -> Result<Vec<Value>> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Find)?;
        driver
            .distinct(&self.object, field, filter.as_ref(), &self.ctx.call_options())
            .await
    }

    pub async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Record>> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Find)?;
        driver
            .aggregate(&self.object, pipeline, &self.ctx.call_options())
            .await
    }

    // ── writes ─────────────────────────────────────────────

    pub async fn create(&self, data: Record) -> Result<Record> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Create)?;

        let mut data = data;
        apply_defaults(&def, &mut data);
        let now = timestamp(Utc::now());
        let user = self.ctx.user();
        data.insert(CREATED_AT_FIELD.to_string(), Value::String(now.clone()));
        data.insert(UPDATED_AT_FIELD.to_string(), Value::String(now));
        if let Some(user_id) = &user.user_id {
            data.insert(CREATED_BY_FIELD.to_string(), Value::String(user_id.clone()));
            data.insert(UPDATED_BY_FIELD.to_string(), Value::String(user_id.clone()));
        }
        if !data.contains_key(SPACE_ID_FIELD) {
            if let Some(space_id) = &user.space_id {
                data.insert(SPACE_ID_FIELD.to_string(), Value::String(space_id.clone()));
            }
        }

        let mut before = self.hook_context(HookEvent::BeforeCreate);
        before.data = Some(data);
        let mut before = self.ctx.runtime.hooks.dispatch(before).await?;
        let data = before
            .data
            .take()
            .ok_or_else(|| Error::internal("a hook removed the write payload"))?;

        self.run_validation(&def, &data, None, Operation::Create)?;

        let created = driver
            .create(&self.object, data, &self.ctx.call_options())
            .await?;
        debug!(object = %self.object, id = record_id(&created).unwrap_or(""), "record created");

        let mut after = self.hook_context(HookEvent::AfterCreate);
        after.state = before.state;
        after.result = Some(Value::Object(created));
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        record_from_value(after.result.unwrap_or(Value::Null))
    }

    pub async fn update(&self, id: &str, data: Record) -> Result<Record> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Update)?;

        let previous = driver
            .find_one(&self.object, id, None, &self.ctx.call_options())
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("record '{id}' not found on object '{}'", self.object))
            })?;

        let mut data = data;
        // The stamps of record creation never move on update.
        data.remove(ID_FIELD);
        data.remove(CREATED_AT_FIELD);
        data.remove(CREATED_BY_FIELD);
        data.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(next_updated_at(&previous)),
        );
        if let Some(user_id) = &self.ctx.user().user_id {
            data.insert(UPDATED_BY_FIELD.to_string(), Value::String(user_id.clone()));
        }

        let mut before = self.hook_context(HookEvent::BeforeUpdate);
        before.data = Some(data);
        before.previous = Some(previous.clone());
        let mut before = self.ctx.runtime.hooks.dispatch(before).await?;
        let data = before
            .data
            .take()
            .ok_or_else(|| Error::internal("a hook removed the write payload"))?;

        self.run_validation(&def, &data, Some(&previous), Operation::Update)?;

        let updated = driver
            .update(&self.object, id, data, &self.ctx.call_options())
            .await?;
        debug!(object = %self.object, id, "record updated");

        let mut after = self.hook_context(HookEvent::AfterUpdate);
        after.state = before.state;
        after.previous = Some(previous);
        after.result = Some(Value::Object(updated));
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        record_from_value(after.result.unwrap_or(Value::Null))
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let (def, driver) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Delete)?;

        let previous = driver
            .find_one(&self.object, id, None, &self.ctx.call_options())
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("record '{id}' not found on object '{}'", self.object))
            })?;

        let mut before = self.hook_context(HookEvent::BeforeDelete);
        before.previous = Some(previous.clone());
        let before = self.ctx.runtime.hooks.dispatch(before).await?;

        self.run_validation(&def, &previous, Some(&previous), Operation::Delete)?;

        let deleted = driver
            .delete(&self.object, id, &self.ctx.call_options())
            .await?;
        debug!(object = %self.object, id, deleted, "record deleted");

        let mut after = self.hook_context(HookEvent::AfterDelete);
        after.state = before.state;
        after.previous = Some(previous);
        after.result = Some(Value::Bool(deleted));
        let after = self.ctx.runtime.hooks.dispatch(after).await?;
        Ok(after.result.and_then(|v| v.as_bool()).unwrap_or(deleted))
    }

    // ── bulk writes ────────────────────────────────────────

    pub async fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut created = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match self.create(record).await {
                Ok(record) => created.push(record),
                Err(err) => {
                    return Err(merge_details(
                        err,
                        serde_json::json!({
                            "failed_index": index,
                            "applied": created.len(),
                        }),
                    ))
                }
            }
        }
        Ok(created)
    }

    /// Update every record matching `filter`, one at a time through
    /// the full pipeline. Fails fast: the error reports the failing
    /// record and how many updates already applied.
    pub async fn update_many(&self, filter: FilterCondition, data: Record) -> Result<u64> {
        let ids = self.matching_ids(filter).await?;
        let mut applied = 0u64;
        for id in ids {
            if let Err(err) = self.update(&id, data.clone()).await {
                return Err(merge_details(
                    err,
                    serde_json::json!({ "failed_id": id, "applied": applied }),
                ));
            }
            applied += 1;
        }
        Ok(applied)
    }

    pub async fn delete_many(&self, filter: FilterCondition) -> Result<u64> {
        let ids = self.matching_ids(filter).await?;
        let mut applied = 0u64;
        for id in ids {
            if let Err(err) = self.delete(&id).await {
                return Err(merge_details(
                    err,
                    serde_json::json!({ "failed_id": id, "applied": applied }),
                ));
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn matching_ids(&self, filter: FilterCondition) -> Result<Vec<String>> {
        let query = QueryAst::new(&self.object)
            .filter(filter)
            .fields(vec![ID_FIELD.to_string()]);
        let records = self.find(query).await?;
        Ok(records
            .iter()
            .filter_map(|r| record_id(r).map(str::to_string))
            .collect())
    }

    // ── actions ────────────────────────────────────────────

    /// Execute a named action. Record actions require an id, global
    /// actions reject one; `input` is validated against the action's
    /// param descriptors.
    pub async fn execute(&self, action: &str, id: Option<&str>, input: Record) -> Result<Value> {
        let (def, _) = self.resolve()?;
        self.check_permission(&def, PermissionOp::Action)?;
        let action_def = def.actions.get(action).ok_or_else(|| {
            Error::not_found(format!("action '{action}' not found on object '{}'", self.object))
        })?;
        match action_def.kind {
            ActionKind::Record if id.is_none() => {
                return Err(Error::validation(format!(
                    "action '{action}' targets a record and requires an id"
                )))
            }
            ActionKind::Global if id.is_some() => {
                return Err(Error::validation(format!(
                    "action '{action}' is global and does not accept an id"
                )))
            }
            _ => {}
        }

        let param_rules: Vec<_> = action_def
            .params
            .iter()
            .filter(|(_, def)| def.has_constraints())
            .map(|(name, def)| {
                crate::metadata::ValidationRule::new(crate::metadata::RuleKind::Field {
                    field: name.clone(),
                    definition: Box::new(def.clone()),
                })
            })
            .collect();
        let outcome = validator::validate(
            &param_rules,
            &ValidationContext {
                record: &input,
                previous: None,
                operation: Operation::Create,
                changed_fields: None,
            },
        );
        if let Some(err) = outcome.into_error() {
            return Err(err);
        }

        let handler = self
            .ctx
            .runtime
            .hooks
            .action_handler(&self.object, action)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "action '{action}' on object '{}' has no registered handler",
                    self.object
                ))
            })?;
        handler(ActionContext {
            object: self.object.clone(),
            action: action.to_string(),
            id: id.map(str::to_string),
            input,
            ctx: self.ctx.clone(),
            state: serde_json::Map::new(),
        })
        .await
    }

    // ── expansion ──────────────────────────────────────────

    /// Replace lookup / master_detail id values with the referenced
    /// records, fetched through this context (hooks and row-level
    /// security apply). Unknown or non-reference names are ignored; a
    /// dangling id stays as-is.
    pub async fn expand(&self, records: &mut [Record], fields: &[String]) -> Result<()> {
        let (def, _) = self.resolve()?;
        for field in fields {
            let Some(field_def) = def.fields.get(field) else {
                continue;
            };
            if !field_def.field_type.is_reference() {
                continue;
            }
            let Some(target) = &field_def.reference_to else {
                continue;
            };
            // References are late-bound: the first read through the
            // field is where a dangling target surfaces.
            if self.ctx.runtime.registry.get_object(target)?.is_none() {
                return Err(Error::not_found(format!(
                    "field '{field}' references unknown object '{target}'"
                )));
            }
            let target_repo = self.ctx.object(target.clone());
            for record in records.iter_mut() {
                let Some(value) = record.get(field) else {
                    continue;
                };
                match value.clone() {
                    Value::String(id) => {
                        if let Some(expanded) = target_repo.find_one(&id, None).await? {
                            record.insert(field.clone(), Value::Object(expanded));
                        }
                    }
                    Value::Array(ids) => {
                        let mut expanded = Vec::with_capacity(ids.len());
                        for id in ids {
                            match id.as_str() {
                                Some(id) => match target_repo.find_one(id, None).await? {
                                    Some(rec) => expanded.push(Value::Object(rec)),
                                    None => expanded.push(Value::String(id.to_string())),
                                },
                                None => expanded.push(id),
                            }
                        }
                        record.insert(field.clone(), Value::Array(expanded));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    // ── internals ──────────────────────────────────────────

    fn run_validation(
        &self,
        def: &ObjectDefinition,
        record: &Record,
        previous: Option<&Record>,
        operation: Operation,
    ) -> Result<()> {
        let mut rules = validator::field_rules_for(def);
        rules.extend(def.validation_rules.iter().cloned());

        let changed: Vec<String> = match previous {
            Some(previous) => record
                .keys()
                .filter(|key| match previous.get(*key) {
                    Some(old) => !objectql_data::eval::values_equal(
                        record.get(*key).expect("key exists"),
                        old,
                    ),
                    None => true,
                })
                .cloned()
                .collect(),
            None => record.keys().cloned().collect(),
        };

        let outcome = validator::validate(
            &rules,
            &ValidationContext {
                record,
                previous,
                operation,
                changed_fields: Some(&changed),
            },
        );
        for warning in &outcome.warnings {
            warn!(object = %self.object, code = %warning.code, "{}", warning.message);
        }
        match outcome.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Add bulk-progress fields to an error without clobbering the
/// details it already carries (per-field validation errors survive).
fn merge_details(err: Error, extra: Value) -> Error {
    let Error {
        code,
        message,
        details,
    } = err;
    let mut details = match details {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("cause".to_string(), other);
            map
        }
        None => serde_json::Map::new(),
    };
    if let Value::Object(extra) = extra {
        details.extend(extra);
    }
    Error {
        code,
        message,
        details: Some(Value::Object(details)),
    }
}

fn apply_defaults(def: &ObjectDefinition, data: &mut Record) {
    for (name, field) in &def.fields {
        if data.contains_key(name) {
            continue;
        }
        if let Some(default) = &field.default_value {
            data.insert(name.clone(), default.clone());
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The next `updated_at` stamp, strictly after the previous one even
/// when the clock has not ticked between two writes.
fn next_updated_at(previous: &Record) -> String {
    let mut now = Utc::now();
    if let Some(prev) = previous
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        let prev = prev.with_timezone(&Utc);
        if now <= prev {
            now = prev + chrono::Duration::microseconds(1);
        }
    }
    timestamp(now)
}

/// A fresh record id, for drivers that want the runtime's format.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_updated_at_always_advances() {
        let mut previous = Record::new();
        let stamp = timestamp(Utc::now());
        previous.insert(UPDATED_AT_FIELD.to_string(), Value::String(stamp.clone()));
        let next = next_updated_at(&previous);
        assert!(next > stamp);

        // Even against a stamp from the future.
        let future = timestamp(Utc::now() + chrono::Duration::seconds(30));
        previous.insert(UPDATED_AT_FIELD.to_string(), Value::String(future.clone()));
        let next = next_updated_at(&previous);
        assert!(next > future);
    }

    #[test]
    fn user_context_builders() {
        let user = UserContext::user("u1").in_space("space-A").with_roles(vec!["admin".into()]);
        assert_eq!(user.user_id.as_deref(), Some("u1"));
        assert_eq!(user.space_id.as_deref(), Some("space-A"));
        assert!(!user.is_system);
        assert!(UserContext::system().is_system);
    }
}
