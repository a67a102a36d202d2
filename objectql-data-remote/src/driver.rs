use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use objectql_core::{MetadataKind, MetadataRegistry, ObjectQL, RegisterOptions};
use objectql_data::{
    record_from_value, CallOptions, Driver, DriverCapabilities, Error, FilterCondition, QueryAst,
    Record, Result,
};

use crate::client::{RemoteClient, RetryPolicy};

/// Federation driver options.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Mounts a remote ObjectQL endpoint as a local driver.
///
/// `connect` syncs the remote's object definitions into the local
/// registry, tagged `datasource = "remote:<base_url>"`; from then on
/// those objects are indistinguishable from local ones — local hooks
/// and validation run, only the storage calls proxy over HTTP.
pub struct RemoteDriver {
    name: String,
    client: RemoteClient,
    registry: Arc<MetadataRegistry>,
}

impl RemoteDriver {
    pub fn new(registry: Arc<MetadataRegistry>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(registry, base_url, RemoteOptions::default())
    }

    pub fn with_options(
        registry: Arc<MetadataRegistry>,
        base_url: impl Into<String>,
        options: RemoteOptions,
    ) -> Result<Self> {
        let client = RemoteClient::new(base_url, options.timeout, options.retry)?;
        Ok(Self {
            name: format!("remote:{}", client.base_url()),
            client,
            registry,
        })
    }

    /// Create, register, and connect a federation driver on a runtime.
    pub async fn mount(runtime: &ObjectQL, base_url: impl Into<String>) -> Result<Arc<Self>> {
        Self::mount_with_options(runtime, base_url, RemoteOptions::default()).await
    }

    pub async fn mount_with_options(
        runtime: &ObjectQL,
        base_url: impl Into<String>,
        options: RemoteOptions,
    ) -> Result<Arc<Self>> {
        let driver = Arc::new(Self::with_options(
            runtime.registry_handle(),
            base_url,
            options,
        )?);
        runtime.register_datasource(driver.name.clone(), driver.clone());
        driver.connect().await?;
        Ok(driver)
    }

    /// Mount every remote listed in the runtime configuration.
    pub async fn mount_configured(runtime: &ObjectQL) -> Result<Vec<Arc<Self>>> {
        let mut mounted = Vec::new();
        for url in runtime.config().remotes.clone() {
            mounted.push(Self::mount(runtime, url).await?);
        }
        Ok(mounted)
    }

    fn find_args(query: &QueryAst) -> Value {
        let mut args = Map::new();
        if let Some(fields) = &query.fields {
            args.insert("fields".to_string(), json!(fields));
        }
        if let Some(filter) = &query.filter {
            args.insert(
                "filters".to_string(),
                serde_json::to_value(filter).expect("filter serializes"),
            );
        }
        if !query.order_by.is_empty() {
            args.insert(
                "sort".to_string(),
                serde_json::to_value(&query.order_by).expect("sort serializes"),
            );
        }
        if let Some(limit) = query.limit {
            args.insert("limit".to_string(), json!(limit));
        }
        if let Some(offset) = query.offset {
            args.insert("skip".to_string(), json!(offset));
        }
        Value::Object(args)
    }
}

#[async_trait::async_trait]
impl Driver for RemoteDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            query_filters: true,
            query_sorting: true,
            query_pagination: true,
            json_fields: true,
            ..DriverCapabilities::none()
        }
    }

    /// Fetch the remote metadata and inject it locally. An unreachable
    /// remote logs and leaves the registry untouched — startup goes on.
    async fn connect(&self) -> Result<()> {
        let listing = match self.client.get_json("/api/metadata/objects").await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(remote = %self.client.base_url(), error = %err, "remote unreachable, no objects mounted");
                return Ok(());
            }
        };
        let names: Vec<String> = listing
            .get("objects")
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|o| o.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut mounted = 0;
        for name in names {
            let document = match self
                .client
                .get_json(&format!("/api/metadata/objects/{name}"))
                .await
            {
                Ok(document) => document,
                Err(err) => {
                    warn!(remote = %self.client.base_url(), object = %name, error = %err, "skipping remote object");
                    continue;
                }
            };
            let Value::Object(mut map) = document else {
                warn!(remote = %self.client.base_url(), object = %name, "remote definition is not an object");
                continue;
            };
            map.insert("datasource".to_string(), Value::String(self.name.clone()));
            self.registry.register(
                MetadataKind::Object,
                Value::Object(map),
                RegisterOptions::package(self.name.clone()),
            )?;
            mounted += 1;
        }
        info!(remote = %self.client.base_url(), count = mounted, "remote objects mounted");
        Ok(())
    }

    async fn check_health(&self) -> Result<()> {
        self.client.get_json("/api/metadata/objects").await.map(|_| ())
    }

    async fn find(
        &self,
        object: &str,
        query: &QueryAst,
        opts: &CallOptions,
    ) -> Result<Vec<Record>> {
        opts.check()?;
        let data = self
            .client
            .post_op("find", object, Self::find_args(query))
            .await?;
        match data {
            Value::Array(items) => items.into_iter().map(record_from_value).collect(),
            other => Err(Error::query(format!(
                "remote find returned a non-list payload: {other}"
            ))),
        }
    }

    async fn find_one(
        &self,
        object: &str,
        id: &str,
        query: Option<&QueryAst>,
        opts: &CallOptions,
    ) -> Result<Option<Record>> {
        opts.check()?;
        let mut args = Map::new();
        args.insert("id".to_string(), Value::String(id.to_string()));
        if let Some(fields) = query.and_then(|q| q.fields.as_ref()) {
            args.insert("fields".to_string(), json!(fields));
        }
        let data = self.client.post_op("findOne", object, Value::Object(args)).await;
        match data {
            Ok(Value::Object(record)) => Ok(Some(record)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => Err(Error::query(format!(
                "remote findOne returned an unexpected payload: {other}"
            ))),
            Err(err) if err.code == objectql_data::ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, object: &str, data: Record, opts: &CallOptions) -> Result<Record> {
        opts.check()?;
        let created = self
            .client
            .post_op("create", object, Value::Object(data))
            .await?;
        record_from_value(created)
    }

    async fn update(
        &self,
        object: &str,
        id: &str,
        data: Record,
        opts: &CallOptions,
    ) -> Result<Record> {
        opts.check()?;
        let updated = self
            .client
            .post_op("update", object, json!({ "id": id, "data": data }))
            .await?;
        record_from_value(updated)
    }

    async fn delete(&self, object: &str, id: &str, opts: &CallOptions) -> Result<bool> {
        opts.check()?;
        let result = self
            .client
            .post_op("delete", object, json!({ "id": id }))
            .await?;
        Ok(match result {
            Value::Bool(deleted) => deleted,
            Value::Object(map) => map.get("deleted").and_then(Value::as_bool).unwrap_or(true),
            _ => true,
        })
    }

    async fn count(
        &self,
        object: &str,
        filter: Option<&FilterCondition>,
        opts: &CallOptions,
    ) -> Result<u64> {
        opts.check()?;
        let mut args = Map::new();
        if let Some(filter) = filter {
            args.insert(
                "filters".to_string(),
                serde_json::to_value(filter).expect("filter serializes"),
            );
        }
        let result = self.client.post_op("count", object, Value::Object(args)).await?;
        match result {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| Error::query("remote count is not a non-negative integer")),
            Value::Object(map) => map
                .get("total")
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::query("remote count payload lacks a total")),
            other => Err(Error::query(format!(
                "remote count returned an unexpected payload: {other}"
            ))),
        }
    }
}
