use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use objectql_data::{Record, Result, Transaction};

pub(crate) type Store = HashMap<String, Vec<Record>>;

/// Snapshot transaction: `begin` clones the store, operations inside
/// the transaction hit the clone, `commit` swaps it back in wholesale.
/// Writes racing a transaction on the same objects lose to the commit
/// (last writer wins) — acceptable for a reference driver.
pub struct MemoryTransaction {
    live: Arc<RwLock<Store>>,
    working: Arc<RwLock<Store>>,
}

impl MemoryTransaction {
    pub(crate) async fn begin(live: Arc<RwLock<Store>>) -> Self {
        let snapshot = live.read().await.clone();
        Self {
            live,
            working: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub(crate) fn working(&self) -> Arc<RwLock<Store>> {
        self.working.clone()
    }
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&self) -> Result<()> {
        let working = self.working.read().await.clone();
        *self.live.write().await = working;
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        debug!("memory transaction rolled back");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
