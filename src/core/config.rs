//! Store configuration.
//!
//! One immutable [`StoreConfig`] value is shared by readers and writers: file
//! extension, schema texts and the preloaded `$ref` documents.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::schema::{Schema, SchemaRegistry, DEFAULT_CATALOG_SCHEMA, DEFAULT_DATA_SCHEMA};
use crate::core::{Error, Result};

pub const DEFAULT_EXTENSION: &str = ".json";

/// Configuration for a store session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Extension appended to the catalog and data file names.
    /// Default: ".json"
    pub extension: String,

    /// Schema text for the catalog document.
    pub catalog_schema: String,

    /// Schema text for the data document (the whole record array).
    pub data_schema: String,

    /// Reference URI -> schema text, consulted for `$ref` instead of fetching.
    pub preload_schemas: BTreeMap<String, String>,

    /// Validate every record against the data schema before writing.
    /// Default: false
    pub validate_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            catalog_schema: DEFAULT_CATALOG_SCHEMA.to_string(),
            data_schema: DEFAULT_DATA_SCHEMA.to_string(),
            preload_schemas: BTreeMap::new(),
            validate_writes: false,
        }
    }
}

impl StoreConfig {
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_data_schema(mut self, schema: impl Into<String>) -> Self {
        self.data_schema = schema.into();
        self
    }

    pub fn with_catalog_schema(mut self, schema: impl Into<String>) -> Self {
        self.catalog_schema = schema.into();
        self
    }

    pub fn with_preloaded_schema(mut self, uri: impl Into<String>, schema: impl Into<String>) -> Self {
        self.preload_schemas.insert(uri.into(), schema.into());
        self
    }

    pub fn with_validate_writes(mut self, enabled: bool) -> Self {
        self.validate_writes = enabled;
        self
    }

    /// Load a configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|err| {
            Error::InvalidArgument(format!("store config {}: {err}", path.display()))
        })
    }

    /// Parse the schema texts.
    pub fn compile(&self) -> Result<SchemaSet> {
        let registry = SchemaRegistry::from_texts(&self.preload_schemas)
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        let registry = Arc::new(registry);
        let catalog = Schema::compile("catalog", &self.catalog_schema, Arc::clone(&registry))
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        let data = Schema::compile("data", &self.data_schema, registry)
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        let record = data
            .item_schema()
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        Ok(SchemaSet { catalog, record })
    }
}

/// Compiled schemas for one store session.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    pub catalog: Schema,
    /// Schema each `{Envelope, Data}` record is checked against.
    pub record: Schema,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.extension, ".json");
        assert!(config.preload_schemas.is_empty());
        assert!(!config.validate_writes);
        config.compile().expect("default schemas compile");
    }

    #[test]
    fn test_load_partial_config() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"extension": ".store", "validate_writes": true}"#)
            .expect("write config");

        let config = StoreConfig::load(&path).expect("load config");
        assert_eq!(config.extension, ".store");
        assert!(config.validate_writes);
        assert_eq!(config.data_schema, DEFAULT_DATA_SCHEMA);
    }

    #[test]
    fn test_bad_schema_text_is_invalid_argument() {
        let config = StoreConfig::default().with_data_schema("{ not json");
        assert!(matches!(config.compile(), Err(Error::InvalidArgument(_))));
    }
}
