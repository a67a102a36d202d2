use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use objectql_data::eval::{apply_query, matches};
use objectql_data::{
    record_id, CallOptions, Driver, DriverCapabilities, Error, FilterCondition, QueryAst, Record,
    Result, Transaction, ID_FIELD,
};

use crate::txn::{MemoryTransaction, Store};

/// In-memory driver: object name → ordered record list.
#[derive(Default)]
pub struct MemoryDriver {
    store: Arc<RwLock<Store>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store an operation should address: the transaction's
    /// working copy when one is active, the live store otherwise.
    fn store_for(&self, opts: &CallOptions) -> Arc<RwLock<Store>> {
        match &opts.transaction {
            Some(trx) => match trx.as_any().downcast_ref::<MemoryTransaction>() {
                Some(mem) => mem.working(),
                None => self.store.clone(),
            },
            None => self.store.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            transactions: true,
            query_filters: true,
            query_aggregations: true,
            query_sorting: true,
            query_pagination: true,
            json_fields: true,
            array_fields: true,
            ..DriverCapabilities::none()
        }
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn find(
        &self,
        object: &str,
        query: &QueryAst,
        opts: &CallOptions,
    ) -> Result<Vec<Record>> {
        opts.check()?;
        let store = self.store_for(opts);
        let records = {
            let store = store.read().await;
            store.get(object).cloned().unwrap_or_default()
        };
        Ok(apply_query(records, query))
    }

    async fn find_one(
        &self,
        object: &str,
        id: &str,
        query: Option<&QueryAst>,
        opts: &CallOptions,
    ) -> Result<Option<Record>> {
        opts.check()?;
        let store = self.store_for(opts);
        let store = store.read().await;
        let Some(records) = store.get(object) else {
            return Ok(None);
        };
        let found = records.iter().find(|r| record_id(r) == Some(id));
        let found = match (found, query) {
            (Some(record), Some(query)) => {
                // A query on findOne filters and projects, never pages.
                if let Some(filter) = &query.filter {
                    if !matches(filter, record) {
                        return Ok(None);
                    }
                }
                match &query.fields {
                    Some(fields) => Some(objectql_data::eval::project(record, fields)),
                    None => Some(record.clone()),
                }
            }
            (Some(record), None) => Some(record.clone()),
            (None, _) => None,
        };
        Ok(found)
    }

    async fn create(&self, object: &str, data: Record, opts: &CallOptions) -> Result<Record> {
        opts.check()?;
        let mut data = data;
        if record_id(&data).is_none() {
            data.insert(
                ID_FIELD.to_string(),
                Value::String(Uuid::new_v4().simple().to_string()),
            );
        }
        let id = record_id(&data).expect("id just ensured").to_string();

        let store = self.store_for(opts);
        let mut store = store.write().await;
        let records = store.entry(object.to_string()).or_default();
        if records.iter().any(|r| record_id(r) == Some(id.as_str())) {
            return Err(Error::conflict(format!(
                "record '{id}' already exists on object '{object}'"
            )));
        }
        records.push(data.clone());
        Ok(data)
    }

    async fn update(
        &self,
        object: &str,
        id: &str,
        data: Record,
        opts: &CallOptions,
    ) -> Result<Record> {
        opts.check()?;
        let store = self.store_for(opts);
        let mut store = store.write().await;
        let records = store.get_mut(object).ok_or_else(|| {
            Error::not_found(format!("record '{id}' not found on object '{object}'"))
        })?;
        let record = records
            .iter_mut()
            .find(|r| record_id(r) == Some(id))
            .ok_or_else(|| {
                Error::not_found(format!("record '{id}' not found on object '{object}'"))
            })?;
        for (key, value) in data {
            if key == ID_FIELD {
                continue;
            }
            record.insert(key, value);
        }
        Ok(record.clone())
    }

    async fn delete(&self, object: &str, id: &str, opts: &CallOptions) -> Result<bool> {
        opts.check()?;
        let store = self.store_for(opts);
        let mut store = store.write().await;
        let Some(records) = store.get_mut(object) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| record_id(r) != Some(id));
        Ok(records.len() < before)
    }

    async fn count(
        &self,
        object: &str,
        filter: Option<&FilterCondition>,
        opts: &CallOptions,
    ) -> Result<u64> {
        opts.check()?;
        let store = self.store_for(opts);
        let store = store.read().await;
        let Some(records) = store.get(object) else {
            return Ok(0);
        };
        let count = match filter {
            Some(filter) => records.iter().filter(|r| matches(filter, r)).count(),
            None => records.len(),
        };
        Ok(count as u64)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::begin(self.store.clone()).await))
    }
}
