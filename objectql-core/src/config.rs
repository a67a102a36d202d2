//! Runtime configuration.
//!
//! Loaded from a YAML file or built programmatically. `.env` files are
//! loaded into the process environment first (never overwriting
//! already-set variables); the file-storage settings honor the
//! `UPLOAD_DIR` and `BASE_URL` environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use objectql_data::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Datasource name → driver configuration. The builder decides
    /// which driver crate serves each entry.
    #[serde(default)]
    pub datasources: HashMap<String, DatasourceConfig>,
    /// Inline object definitions, keyed by name.
    #[serde(default)]
    pub objects: HashMap<String, Value>,
    /// Remote ObjectQL endpoints to mount at startup.
    #[serde(default)]
    pub remotes: Vec<String>,
    /// On-disk metadata packages to load at startup.
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    /// Driver kind, e.g. `memory` or `remote`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Connection pool bounds, where the driver has a pool to size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_min")]
    pub min: u32,
    #[serde(default = "default_pool_max")]
    pub max: u32,
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: default_pool_min(),
            max: default_pool_max(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: RuntimeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::validation(format!("malformed runtime config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a YAML file, after pulling `.env` into the process
    /// environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("UPLOAD_DIR") {
            self.storage.upload_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("BASE_URL") {
            self.storage.base_url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_config_parses() {
        let yaml = r#"
datasources:
  default:
    type: memory
  crm:
    type: remote
    url: http://crm.internal:8080
    pool:
      max: 4
remotes:
  - http://other.internal:9000
objects:
  todo:
    name: todo
    fields:
      title:
        type: text
"#;
        let config = RuntimeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.datasources["default"].kind, "memory");
        assert_eq!(config.datasources["crm"].pool.max, 4);
        assert_eq!(config.datasources["crm"].pool.min, 1);
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.objects["todo"]["name"], "todo");
    }

    #[test]
    fn malformed_config_is_a_validation_error() {
        let err = RuntimeConfig::from_yaml_str("datasources: [not, a, map]").unwrap_err();
        assert_eq!(err.code, objectql_data::ErrorCode::Validation);
    }
}
