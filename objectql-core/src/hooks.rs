//! Lifecycle hooks and named actions.
//!
//! A process-wide dispatcher keyed by `(event, object)` holds ordered
//! hook lists, and by `(object, action)` a single action handler.
//! Dispatch awaits handlers sequentially in registration order, so a
//! downstream handler observes every upstream mutation; a handler
//! error aborts the chain (and, in writes, the surrounding
//! transaction).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use objectql_data::{FilterCondition, QueryAst, Record, Result};

use crate::context::Context;

/// The lifecycle events a hook can attach to, scoped per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeFind,
    AfterFind,
    BeforeCount,
    AfterCount,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::BeforeFind => "beforeFind",
            HookEvent::AfterFind => "afterFind",
            HookEvent::BeforeCount => "beforeCount",
            HookEvent::AfterCount => "afterCount",
            HookEvent::BeforeCreate => "beforeCreate",
            HookEvent::AfterCreate => "afterCreate",
            HookEvent::BeforeUpdate => "beforeUpdate",
            HookEvent::AfterUpdate => "afterUpdate",
            HookEvent::BeforeDelete => "beforeDelete",
            HookEvent::AfterDelete => "afterDelete",
        }
    }
}

/// The mutable value threaded through a hook chain.
///
/// Handlers receive the context by value and return it, mutated or
/// not. `ctx` is the per-request [`Context`] and doubles as the CRUD
/// api surface (`hc.ctx.object("other").find(..)`).
pub struct HookContext {
    pub event: HookEvent,
    pub object: String,
    pub ctx: Context,
    /// The write payload; mutations feed the downstream driver call.
    pub data: Option<Record>,
    /// The stored record before the write. Hooks get a copy; the
    /// pipeline validates against its own snapshot.
    pub previous: Option<Record>,
    /// The query of a read operation; mutations feed the driver.
    pub query: Option<QueryAst>,
    /// Set on `afterX` events; hooks may replace it.
    pub result: Option<Value>,
    /// Scratch map shared by the before/after hooks of one operation.
    pub state: Map<String, Value>,
}

impl HookContext {
    pub(crate) fn new(event: HookEvent, object: impl Into<String>, ctx: Context) -> Self {
        Self {
            event,
            object: object.into(),
            ctx,
            data: None,
            previous: None,
            query: None,
            result: None,
            state: Map::new(),
        }
    }

    /// Whether a field's incoming value differs from the stored one.
    pub fn is_modified(&self, field: &str) -> bool {
        let Some(data) = &self.data else {
            return false;
        };
        let Some(new) = data.get(field) else {
            return false;
        };
        match self.previous.as_ref().and_then(|p| p.get(field)) {
            Some(old) => !objectql_data::eval::values_equal(new, old),
            None => true,
        }
    }

    /// AND a filter into the query — the row-level-security primitive.
    /// A no-op for system contexts.
    pub fn restrict(&mut self, filter: FilterCondition) {
        if self.ctx.is_system() {
            return;
        }
        if let Some(query) = self.query.take() {
            self.query = Some(query.restrict(filter));
        }
    }
}

/// The call payload handed to an action handler.
pub struct ActionContext {
    pub object: String,
    pub action: String,
    pub id: Option<String>,
    pub input: Record,
    /// The caller's context; also the CRUD api surface.
    pub ctx: Context,
    pub state: Map<String, Value>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type HookFn = Arc<dyn Fn(HookContext) -> BoxFuture<Result<HookContext>> + Send + Sync>;
type ActionFn = Arc<dyn Fn(ActionContext) -> BoxFuture<Result<Value>> + Send + Sync>;

/// Identifies one registration, for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

#[derive(Default)]
pub struct HookDispatcher {
    hooks: RwLock<HashMap<(HookEvent, String), Vec<(u64, HookFn)>>>,
    actions: RwLock<HashMap<(String, String), ActionFn>>,
    next_id: AtomicU64,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks fire in registration order; removing one
    /// does not reorder the rest.
    pub fn on<F, Fut>(&self, event: HookEvent, object: &str, handler: F) -> HookId
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: HookFn = Arc::new(move |hc| Box::pin(handler(hc)));
        self.hooks
            .write()
            .expect("hook lock poisoned")
            .entry((event, object.to_string()))
            .or_default()
            .push((id, handler));
        debug!(event = event.as_str(), object, "hook registered");
        HookId(id)
    }

    pub fn off(&self, event: HookEvent, object: &str, id: HookId) {
        if let Some(handlers) = self
            .hooks
            .write()
            .expect("hook lock poisoned")
            .get_mut(&(event, object.to_string()))
        {
            handlers.retain(|(hid, _)| *hid != id.0);
        }
    }

    /// Register the single handler of a named action. Re-registration
    /// replaces the previous handler.
    pub fn register_action<F, Fut>(&self, object: &str, action: &str, handler: F)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ActionFn = Arc::new(move |ac| Box::pin(handler(ac)));
        self.actions
            .write()
            .expect("action lock poisoned")
            .insert((object.to_string(), action.to_string()), handler);
        debug!(object, action, "action registered");
    }

    pub fn unregister_action(&self, object: &str, action: &str) {
        self.actions
            .write()
            .expect("action lock poisoned")
            .remove(&(object.to_string(), action.to_string()));
    }

    pub(crate) fn action_handler(&self, object: &str, action: &str) -> Option<ActionFn> {
        self.actions
            .read()
            .expect("action lock poisoned")
            .get(&(object.to_string(), action.to_string()))
            .cloned()
    }

    /// Run the hook chain for the context's event and object.
    pub(crate) async fn dispatch(&self, mut hc: HookContext) -> Result<HookContext> {
        // Snapshot the handler list so no lock is held across awaits.
        let handlers: Vec<HookFn> = {
            let hooks = self.hooks.read().expect("hook lock poisoned");
            hooks
                .get(&(hc.event, hc.object.clone()))
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            hc = handler(hc).await?;
        }
        Ok(hc)
    }
}
