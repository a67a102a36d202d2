//! Runtime assembly: one value owning the registry, the hook
//! dispatcher, and the datasource table, handed to request handlers.
//!
//! Nothing here is a global — tests instantiate as many independent
//! runtimes as they like.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use objectql_data::{Driver, Error, Result};

use crate::config::RuntimeConfig;
use crate::context::{Context, UserContext};
use crate::hooks::{ActionContext, HookContext, HookDispatcher, HookEvent, HookId};
use crate::metadata::ObjectDefinition;
use crate::registry::{MetadataKind, MetadataRegistry, RegisterOptions};

pub(crate) struct RuntimeInner {
    pub(crate) registry: Arc<MetadataRegistry>,
    pub(crate) hooks: HookDispatcher,
    pub(crate) datasources: DashMap<String, Arc<dyn Driver>>,
    pub(crate) config: RuntimeConfig,
}

impl RuntimeInner {
    pub(crate) fn datasource(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.datasources
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::connection(format!("datasource '{name}' is not registered")))
    }

    pub(crate) fn driver_for(&self, object: &ObjectDefinition) -> Result<Arc<dyn Driver>> {
        self.datasource(&object.datasource)
    }
}

/// The ObjectQL runtime. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ObjectQL {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl ObjectQL {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// A context for a verified user.
    pub fn context(&self, user: UserContext) -> Context {
        Context::new(self.inner.clone(), user)
    }

    /// A context that bypasses permissions and row-level security.
    pub fn system_context(&self) -> Context {
        self.context(UserContext::system())
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.inner.registry
    }

    /// A shared handle to the registry, for drivers that inject
    /// metadata (the federation driver does at connect time).
    pub fn registry_handle(&self) -> Arc<MetadataRegistry> {
        self.inner.registry.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Register a hook; see [`HookDispatcher::on`].
    pub fn on<F, Fut>(&self, event: HookEvent, object: &str, handler: F) -> HookId
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext>> + Send + 'static,
    {
        self.inner.hooks.on(event, object, handler)
    }

    pub fn off(&self, event: HookEvent, object: &str, id: HookId) {
        self.inner.hooks.off(event, object, id)
    }

    /// Register the handler of a named action.
    pub fn register_action<F, Fut>(&self, object: &str, action: &str, handler: F)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.hooks.register_action(object, action, handler)
    }

    pub fn register_datasource(&self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        self.inner.datasources.insert(name.into(), driver);
    }

    pub fn datasource(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.inner.datasource(name)
    }

    /// Register an object definition at runtime (no package tag).
    pub fn register_object(&self, object: ObjectDefinition) -> Result<String> {
        let document = serde_json::to_value(&object)
            .map_err(|e| Error::internal(format!("object definition serialization: {e}")))?;
        self.inner
            .registry
            .register(MetadataKind::Object, document, RegisterOptions::default())
    }

    /// Remove every definition a package contributed.
    pub fn remove_package(&self, package: &str) {
        self.inner.registry.unregister_by_package(package)
    }

    /// Connect every datasource. Drivers that degrade gracefully (the
    /// federation driver on an unreachable remote) log and return Ok.
    pub async fn connect(&self) -> Result<()> {
        let drivers: Vec<(String, Arc<dyn Driver>)> = self
            .inner
            .datasources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (name, driver) in drivers {
            driver.connect().await?;
            info!(datasource = %name, "datasource connected");
        }
        Ok(())
    }

    pub async fn check_health(&self) -> Result<()> {
        let drivers: Vec<Arc<dyn Driver>> = self
            .inner
            .datasources
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for driver in drivers {
            driver.check_health().await?;
        }
        Ok(())
    }
}

/// Assembles a runtime: configuration, registry (own or externally
/// supplied), datasources, inline objects, metadata packages.
#[derive(Default)]
pub struct Builder {
    config: RuntimeConfig,
    registry: Option<Arc<MetadataRegistry>>,
    datasources: Vec<(String, Arc<dyn Driver>)>,
    objects: Vec<ObjectDefinition>,
    packages: Vec<(PathBuf, String)>,
}

impl Builder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally supplied registry instead of a fresh one.
    pub fn registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn datasource(mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        self.datasources.push((name.into(), driver));
        self
    }

    pub fn object(mut self, object: ObjectDefinition) -> Self {
        self.objects.push(object);
        self
    }

    pub fn load_package(mut self, dir: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        self.packages.push((dir.into(), package.into()));
        self
    }

    pub fn build(self) -> Result<ObjectQL> {
        let registry = self.registry.unwrap_or_default();

        for (name, document) in &self.config.objects {
            let mut document = document.clone();
            if document.get("name").is_none() {
                if let Some(map) = document.as_object_mut() {
                    map.insert("name".to_string(), Value::String(name.clone()));
                }
            }
            registry.register(MetadataKind::Object, document, RegisterOptions::default())?;
        }
        for object in self.objects {
            let document = serde_json::to_value(&object)
                .map_err(|e| Error::internal(format!("object definition serialization: {e}")))?;
            registry.register(MetadataKind::Object, document, RegisterOptions::default())?;
        }
        for package in &self.config.packages {
            registry.load_package_dir(&package.path, &package.id)?;
        }
        for (dir, package) in self.packages {
            registry.load_package_dir(&dir, &package)?;
        }

        let datasources = DashMap::new();
        for (name, driver) in self.datasources {
            datasources.insert(name, driver);
        }

        Ok(ObjectQL {
            inner: Arc::new(RuntimeInner {
                registry,
                hooks: HookDispatcher::new(),
                datasources,
                config: self.config,
            }),
        })
    }
}
