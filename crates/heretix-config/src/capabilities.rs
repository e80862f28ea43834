//! Provider-capabilities file: YAML, loaded once per process and cached,
//! reloaded only on explicit request.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("failed to read provider capabilities file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse provider capabilities file {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },
    #[error("no capability record for provider {0:?}")]
    UnknownProvider(String),
}

/// One entry of the provider-capabilities YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityRecord {
    pub provider: String,
    pub default_model: String,
    #[serde(default)]
    pub api_model_map: HashMap<String, String>,
    #[serde(default)]
    pub supports_json_schema: bool,
    #[serde(default)]
    pub supports_json_mode: bool,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_seed: bool,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub default_temperature: Option<f64>,
}

impl CapabilityRecord {
    /// Resolves a logical model name to the concrete API model id, falling
    /// back to the logical name itself when it isn't in `api_model_map`.
    pub fn resolve_model(&self, logical_model: &str) -> String {
        self.api_model_map.get(logical_model).cloned().unwrap_or_else(|| logical_model.to_string())
    }
}

fn parse(path: &str, text: &str) -> Result<Vec<CapabilityRecord>, CapabilityError> {
    serde_yaml::from_str(text).map_err(|source| CapabilityError::Parse { path: path.to_string(), source })
}

/// A process-wide, mutex-guarded capability cache. Construct one per
/// process via [`CapabilityStore::load`]; `reload` re-reads the file.
pub struct CapabilityStore {
    path: String,
    records: Mutex<Vec<CapabilityRecord>>,
}

impl CapabilityStore {
    pub fn load(path: impl Into<String>) -> Result<Self, CapabilityError> {
        let path = path.into();
        let records = Self::read(&path)?;
        Ok(Self { path, records: Mutex::new(records) })
    }

    fn read(path: &str) -> Result<Vec<CapabilityRecord>, CapabilityError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| CapabilityError::Read { path: path.to_string(), source })?;
        parse(path, &text)
    }

    pub fn reload(&self) -> Result<(), CapabilityError> {
        let fresh = Self::read(&self.path)?;
        *self.records.lock().expect("capability store mutex poisoned") = fresh;
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Result<CapabilityRecord, CapabilityError> {
        self.records
            .lock()
            .expect("capability store mutex poisoned")
            .iter()
            .find(|r| r.provider == provider)
            .cloned()
            .ok_or_else(|| CapabilityError::UnknownProvider(provider.to_string()))
    }
}

static GLOBAL: OnceLock<CapabilityStore> = OnceLock::new();

/// Initializes the process-wide capability store. Later calls are no-ops;
/// use [`CapabilityStore::reload`] on the returned handle to refresh.
pub fn init_global(path: impl Into<String>) -> Result<(), CapabilityError> {
    let store = CapabilityStore::load(path)?;
    let _ = GLOBAL.set(store);
    Ok(())
}

pub fn global() -> Option<&'static CapabilityStore> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
- provider: anthropic
  default_model: claude-3-5-sonnet
  api_model_map:
    fast: claude-3-5-haiku
  supports_json_schema: true
  supports_json_mode: true
  supports_tools: true
  supports_seed: false
  max_output_tokens: 8192
  default_temperature: 0.0
"#;

    #[test]
    fn resolves_logical_model_through_the_map() {
        let records = parse("test", YAML).unwrap();
        let record = &records[0];
        assert_eq!(record.resolve_model("fast"), "claude-3-5-haiku");
        assert_eq!(record.resolve_model("unmapped"), "unmapped");
    }

    #[test]
    fn store_loads_from_disk_and_looks_up_by_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capabilities.yaml");
        std::fs::write(&path, YAML).unwrap();
        let store = CapabilityStore::load(path.to_str().unwrap()).unwrap();
        assert_eq!(store.get("anthropic").unwrap().default_model, "claude-3-5-sonnet");
        assert!(matches!(store.get("missing"), Err(CapabilityError::UnknownProvider(_))));
    }
}
