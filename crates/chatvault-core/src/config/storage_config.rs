//! Declarative source configuration, loaded from TOML or YAML at startup.
//!
//! ```yaml
//! sources:
//!   primary: { location: data/bot.db }
//!   archive: { location: data/archive.db, readOnly: true, poolSize: 2 }
//! chatMapping: { 111: archive }
//! defaultSource: primary
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{StorageError, StorageResult};
use crate::sources::{
    RoutingTable, SourceDescriptor, SourceRegistry, DEFAULT_POOL_SIZE, DEFAULT_SOURCE_NAME,
    DEFAULT_TIMEOUT_SECONDS,
};

/// One entry under `sources:`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub location: PathBuf,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// Raw storage configuration. Validate with [`StorageConfig::into_registry`].
///
/// Chat-mapping keys are kept as strings so TOML (string keys only) and YAML
/// (integer keys) both deserialize; they are parsed during validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default, deserialize_with = "deserialize_chat_mapping")]
    pub chat_mapping: BTreeMap<String, String>,
    pub default_source: String,
}

/// A chat-mapping key as written: YAML yields integers, TOML yields strings.
#[derive(Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum RawChatKey {
    Int(i64),
    Str(String),
}

fn deserialize_chat_mapping<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<RawChatKey, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match k {
            RawChatKey::Int(id) => (id.to_string(), v),
            RawChatKey::Str(s) => (s, v),
        })
        .collect())
}

impl StorageConfig {
    /// The single-path shape: one writable source named `"default"`.
    pub fn single(location: impl AsRef<Path>) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            DEFAULT_SOURCE_NAME.to_string(),
            SourceConfig {
                location: location.as_ref().to_path_buf(),
                read_only: false,
                pool_size: DEFAULT_POOL_SIZE,
                timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            },
        );
        Self {
            sources,
            chat_mapping: BTreeMap::new(),
            default_source: DEFAULT_SOURCE_NAME.to_string(),
        }
    }

    pub fn from_toml(s: &str) -> StorageResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_yaml(s: &str) -> StorageResult<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&raw),
            Some("yaml") | Some("yml") => Self::from_yaml(&raw),
            other => Err(StorageError::config(format!(
                "unsupported config extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Validate into a [`SourceRegistry`].
    pub fn into_registry(self) -> StorageResult<SourceRegistry> {
        let mut routing = RoutingTable::new(self.default_source);
        for (key, source) in self.chat_mapping {
            let chat_id: i64 = key.trim().parse().map_err(|_| {
                StorageError::config(format!("chatMapping key '{key}' is not an integer chat id"))
            })?;
            routing = routing.with_mapping(chat_id, source);
        }

        let sources = self
            .sources
            .into_iter()
            .map(|(name, s)| SourceDescriptor {
                name,
                location: s.location,
                read_only: s.read_only,
                pool_size: s.pool_size,
                timeout_seconds: s.timeout_seconds,
            })
            .collect();

        SourceRegistry::new(sources, routing)
    }
}
