//! The metadata registry: the sole source of truth for schemas.
//!
//! Definitions are stored as raw JSON documents under `(kind, FQN)`,
//! with a contributor list per entry so multiple packages can own or
//! extend the same definition. Typed access (`get_object`)
//! deserializes the resolved document on demand.
//!
//! The store is read-mostly after boot: a `std::sync::RwLock` gives
//! the single-writer / many-reader discipline, and package add/remove
//! holds the write lock for the whole batch so readers always observe
//! whole packages.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use objectql_data::{Error, Result};

use crate::metadata::{fully_qualified_name, is_reserved_namespace, ObjectDefinition};

/// What a registry entry is. Objects additionally deserialize to
/// [`ObjectDefinition`]; the other kinds stay raw JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Object,
    View,
    Translation,
}

impl MetadataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKind::Object => "object",
            MetadataKind::View => "view",
            MetadataKind::Translation => "translation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    #[default]
    Own,
    Extend,
}

/// How a registration is tagged: contributing package, ownership, and
/// priority (lower wins).
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub package: Option<String>,
    pub ownership: Ownership,
    pub priority: i32,
}

impl RegisterOptions {
    pub fn package(package: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            ..Self::default()
        }
    }

    pub fn extend(mut self) -> Self {
        self.ownership = Ownership::Extend;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
struct Contributor {
    package: Option<String>,
    ownership: Ownership,
    priority: i32,
    document: Value,
}

#[derive(Default)]
struct Store {
    entries: HashMap<(MetadataKind, String), Vec<Contributor>>,
    /// Registration order per kind, for insertion-ordered listing.
    order: Vec<(MetadataKind, String)>,
}

/// Process-wide schema store. Cheap to share behind an `Arc`; tests
/// instantiate independent registries.
#[derive(Default)]
pub struct MetadataRegistry {
    store: RwLock<Store>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition document. The FQN is derived from the
    /// document's `name` and optional `namespace`; reserved namespaces
    /// are only open to system registrations (no package tag).
    pub fn register(&self, kind: MetadataKind, document: Value, opts: RegisterOptions) -> Result<String> {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("definition document requires a 'name'"))?;
        let namespace = document.get("namespace").and_then(Value::as_str);
        if let Some(ns) = namespace {
            if is_reserved_namespace(ns) && opts.package.is_some() {
                return Err(Error::forbidden(format!(
                    "namespace '{ns}' is reserved and cannot be claimed by a package"
                )));
            }
        }
        let fqn = fully_qualified_name(namespace, name);

        debug!(
            kind = kind.as_str(),
            fqn,
            package = opts.package.as_deref().unwrap_or("<system>"),
            "metadata registered"
        );
        let mut store = self.store.write().expect("registry lock poisoned");
        let key = (kind, fqn.clone());
        if !store.entries.contains_key(&key) {
            store.order.push(key.clone());
        }
        store.entries.entry(key).or_default().push(Contributor {
            package: opts.package,
            ownership: opts.ownership,
            priority: opts.priority,
            document,
        });
        Ok(fqn)
    }

    /// The resolved definition document, with the contributor envelope
    /// stripped: lowest-priority `own` contributor as the base,
    /// `extend` contributors deep-merged over it.
    pub fn get(&self, kind: MetadataKind, name: &str) -> Option<Value> {
        let store = self.store.read().expect("registry lock poisoned");
        store
            .entries
            .get(&(kind, name.to_string()))
            .map(|contributors| resolve(contributors))
    }

    /// All resolved definitions of a kind, in registration order.
    pub fn list(&self, kind: MetadataKind) -> Vec<Value> {
        let store = self.store.read().expect("registry lock poisoned");
        store
            .order
            .iter()
            .filter(|(k, _)| *k == kind)
            .filter_map(|key| store.entries.get(key).map(|c| resolve(c)))
            .collect()
    }

    /// FQNs of a kind, in registration order.
    pub fn names(&self, kind: MetadataKind) -> Vec<String> {
        let store = self.store.read().expect("registry lock poisoned");
        store
            .order
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Typed accessor for object definitions.
    pub fn get_object(&self, name: &str) -> Result<Option<ObjectDefinition>> {
        match self.get(MetadataKind::Object, name) {
            None => Ok(None),
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|e| Error::validation(format!("object '{name}' has a malformed definition: {e}"))),
        }
    }

    pub fn list_objects(&self) -> Result<Vec<ObjectDefinition>> {
        self.names(MetadataKind::Object)
            .iter()
            .filter_map(|name| self.get_object(name).transpose())
            .collect()
    }

    /// Remove every definition contributed by a package, atomically
    /// with respect to concurrent readers.
    pub fn unregister_by_package(&self, package: &str) {
        let mut store = self.store.write().expect("registry lock poisoned");
        for contributors in store.entries.values_mut() {
            contributors.retain(|c| c.package.as_deref() != Some(package));
        }
        store.entries.retain(|_, contributors| !contributors.is_empty());
        let entries = std::mem::take(&mut store.entries);
        store.order.retain(|key| entries.contains_key(key));
        store.entries = entries;
        info!(package, "metadata package removed");
    }

    /// Load a directory of `*.object.yml` / `*.object.yaml` files as
    /// one metadata package.
    pub fn load_package_dir(&self, dir: impl AsRef<Path>, package: &str) -> Result<usize> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| Error::internal(format!("cannot read package dir {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".object.yml") || name.ends_with(".object.yaml")
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| Error::internal(format!("cannot read {}: {e}", path.display())))?;
            let document: Value = serde_yaml::from_str(&text).map_err(|e| {
                Error::validation(format!("malformed object file {}: {e}", path.display()))
            })?;
            self.register(MetadataKind::Object, document, RegisterOptions::package(package))?;
            loaded += 1;
        }
        info!(package, count = loaded, dir = %dir.display(), "metadata package loaded");
        Ok(loaded)
    }
}

fn resolve(contributors: &[Contributor]) -> Value {
    let base = contributors
        .iter()
        .filter(|c| c.ownership == Ownership::Own)
        .min_by_key(|c| c.priority)
        .or_else(|| contributors.iter().min_by_key(|c| c.priority))
        .expect("entry has at least one contributor");

    let mut resolved = base.document.clone();
    // Extend contributors merge over the base; lower priority applies
    // later and therefore wins conflicting keys.
    let mut extends: Vec<&Contributor> = contributors
        .iter()
        .filter(|c| c.ownership == Ownership::Extend)
        .collect();
    extends.sort_by_key(|c| std::cmp::Reverse(c.priority));
    for extend in extends {
        deep_merge(&mut resolved, &extend.document);
    }
    resolved
}

/// Recursive JSON object merge; non-object values replace.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_and_get_object() {
        let registry = MetadataRegistry::new();
        let fqn = registry
            .register(
                MetadataKind::Object,
                json!({ "name": "lead", "namespace": "crm", "label": "Lead" }),
                RegisterOptions::package("crm-pkg"),
            )
            .unwrap();
        assert_eq!(fqn, "crm__lead");
        let def = registry.get_object("crm__lead").unwrap().unwrap();
        assert_eq!(def.label.as_deref(), Some("Lead"));
        assert!(registry.get_object("missing").unwrap().is_none());
    }

    #[test]
    fn reserved_namespace_rejects_packages() {
        let registry = MetadataRegistry::new();
        let err = registry
            .register(
                MetadataKind::Object,
                json!({ "name": "user", "namespace": "base" }),
                RegisterOptions::package("rogue"),
            )
            .unwrap_err();
        assert_eq!(err.code, objectql_data::ErrorCode::Forbidden);

        // System registrations may use reserved namespaces, and the
        // FQN stays short.
        let fqn = registry
            .register(
                MetadataKind::Object,
                json!({ "name": "user", "namespace": "base" }),
                RegisterOptions::default(),
            )
            .unwrap();
        assert_eq!(fqn, "user");
    }

    #[test]
    fn listing_preserves_registration_order() {
        let registry = MetadataRegistry::new();
        for name in ["zebra", "alpha", "mango"] {
            registry
                .register(
                    MetadataKind::Object,
                    json!({ "name": name }),
                    RegisterOptions::default(),
                )
                .unwrap();
        }
        let names = registry.names(MetadataKind::Object);
        assert_eq!(names, ["zebra", "alpha", "mango"]);
    }

    #[test]
    fn lowest_priority_owner_wins_and_extends_merge() {
        let registry = MetadataRegistry::new();
        registry
            .register(
                MetadataKind::Object,
                json!({ "name": "todo", "label": "High", "fields": { "a": { "type": "text" } } }),
                RegisterOptions::package("high").priority(10),
            )
            .unwrap();
        registry
            .register(
                MetadataKind::Object,
                json!({ "name": "todo", "label": "Low", "fields": { "b": { "type": "text" } } }),
                RegisterOptions::package("low").priority(1),
            )
            .unwrap();
        registry
            .register(
                MetadataKind::Object,
                json!({ "name": "todo", "fields": { "c": { "type": "number" } } }),
                RegisterOptions::package("ext").extend().priority(5),
            )
            .unwrap();

        let def = registry.get_object("todo").unwrap().unwrap();
        assert_eq!(def.label.as_deref(), Some("Low"));
        // The owner's fields plus the extension's, merged.
        assert!(def.fields.contains_key("b"));
        assert!(def.fields.contains_key("c"));
        assert!(!def.fields.contains_key("a"));
    }

    #[test]
    fn without_an_owner_the_lowest_priority_contributor_wins() {
        let registry = MetadataRegistry::new();
        for (label, priority) in [("first", 5), ("second", 2)] {
            registry
                .register(
                    MetadataKind::Object,
                    json!({ "name": "todo", "label": label }),
                    RegisterOptions::package(label).extend().priority(priority),
                )
                .unwrap();
        }
        let def = registry.get_object("todo").unwrap().unwrap();
        assert_eq!(def.label.as_deref(), Some("second"));
    }

    #[test]
    fn unregister_by_package_removes_contributions() {
        let registry = MetadataRegistry::new();
        registry
            .register(
                MetadataKind::Object,
                json!({ "name": "todo" }),
                RegisterOptions::package("pkg-a"),
            )
            .unwrap();
        registry
            .register(
                MetadataKind::Object,
                json!({ "name": "note" }),
                RegisterOptions::package("pkg-b"),
            )
            .unwrap();

        registry.unregister_by_package("pkg-a");
        assert!(registry.get_object("todo").unwrap().is_none());
        assert!(registry.get_object("note").unwrap().is_some());
        assert_eq!(registry.names(MetadataKind::Object), ["note"]);
    }

    #[test]
    fn load_package_dir_reads_yaml_objects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("todo.object.yml"),
            "name: todo\nlabel: Todo\nfields:\n  title:\n    type: text\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not metadata").unwrap();

        let registry = MetadataRegistry::new();
        let loaded = registry.load_package_dir(dir.path(), "demo").unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.get_object("todo").unwrap().is_some());

        registry.unregister_by_package("demo");
        assert!(registry.get_object("todo").unwrap().is_none());
    }
}
