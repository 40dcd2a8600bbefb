use std::path::Path;

use arbor_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PersistError, Result};

/// How per-bundle failures inside a batch are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandling {
    /// Abort the batch on the first failure.
    #[default]
    FailFast,
    /// Log the failure and skip the bundle.
    ///
    /// This trades durability for availability: the committed batch may be
    /// missing some of the bundles it was given.
    BestEffort,
}

/// Persistence manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Prepended to the bundle and reference class names.
    pub schema_prefix: String,
    /// Workspace name, part of the class names.
    pub name: String,
    /// Binary values of at least this many bytes are stored out of line.
    pub min_blob_size: u64,
    pub max_connections: usize,
    pub error_handling: ErrorHandling,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            url: store.url,
            user: store.user,
            password: store.password,
            schema_prefix: String::new(),
            name: "default".to_string(),
            min_blob_size: 0x1000,
            max_connections: store.max_connections,
            error_handling: ErrorHandling::FailFast,
        }
    }
}

impl PersistenceConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PersistError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PersistError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// The store connection settings.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            max_connections: self.max_connections,
        }
    }

    pub fn bundle_class(&self) -> String {
        format!("{}{}Bundle", self.schema_prefix, self.name)
    }

    pub fn refs_class(&self) -> String {
        format!("{}{}Refs", self.schema_prefix, self.name)
    }
}
