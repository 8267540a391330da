//! Crate configuration, loadable from TOML in the teacher's
//! `Cluster::load_toml` style: parse into a generic [`toml::Value`] first,
//! then pull out the fields we understand, defaulting anything absent.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};

/// The original source hardcodes `HG_MAX_PROCESSING_LIST_SIZE` to 1; this
/// is its tunable equivalent, plus a couple of other knobs a deployment may
/// want without touching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How many unexpected-receive slots the listen pump keeps posted at
    /// once. Spec §4.6 default is 1.
    pub processing_list_size: usize,
    /// `max_count` used by [`crate::Context::trigger_default`], for callers
    /// that don't want to pick a batch size for every call to
    /// [`crate::Context::trigger`] themselves.
    pub default_trigger_batch: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            processing_list_size: 1,
            default_trigger_batch: 1,
        }
    }
}

impl RpcConfig {
    /// Load configuration from a TOML file under an `[rpc]` table, e.g.:
    ///
    /// ```toml
    /// [rpc]
    /// processing_list_size = 4
    /// default_trigger_batch = 8
    /// ```
    ///
    /// Fields absent from the file keep their defaults.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(|_| RpcError::InvalidParam("could not open config file"))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|_| RpcError::InvalidParam("could not read config file"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(contents)
            .map_err(|_| RpcError::ProtocolError("malformed TOML configuration"))?;

        let mut config = Self::default();
        let Some(table) = value.get("rpc").and_then(toml::Value::as_table) else {
            return Ok(config);
        };

        if let Some(n) = table.get("processing_list_size").and_then(toml::Value::as_integer) {
            config.processing_list_size = n.max(1) as usize;
        }
        if let Some(n) = table.get("default_trigger_batch").and_then(toml::Value::as_integer) {
            config.default_trigger_batch = n.max(1) as u32;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_constants() {
        let config = RpcConfig::default();
        assert_eq!(config.processing_list_size, 1);
    }

    #[test]
    fn parses_overrides_from_toml() {
        let toml_str = "[rpc]\nprocessing_list_size = 4\ndefault_trigger_batch = 8\n";
        let config = RpcConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.processing_list_size, 4);
        assert_eq!(config.default_trigger_batch, 8);
    }

    #[test]
    fn missing_table_falls_back_to_defaults() {
        let config = RpcConfig::from_toml_str("").unwrap();
        assert_eq!(config, RpcConfig::default());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(RpcConfig::from_toml_str("not = [valid").is_err());
    }
}
