// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loader configuration
//!
//! ```json
//! {
//!     "streaming_pool_size": 4,
//!     "allow_file_upgrade": false,
//!     "verification": "strict",
//!     "streaming_group_textures_budget_bytes": 268435456
//! }
//! ```

use crate::error::{AssetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

const BUDGET_PREFIX: &str = "streaming_group_";
const BUDGET_SUFFIX: &str = "_budget_bytes";

/// Post-upgrade checks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Off,
    /// Id, type name and version are re-checked after write-back
    #[default]
    Basic,
    /// Basic plus a full chunk read and a dry-run `init`
    Strict,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConfig", into = "RawConfig")]
pub struct AssetConfig {
    pub streaming_pool_size: usize,
    /// Write upgraded containers back to disk; otherwise upgrade in memory
    pub allow_file_upgrade: bool,
    pub verification: Verification,
    /// Byte budget per streaming group name
    pub group_budgets: BTreeMap<String, u64>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            streaming_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            allow_file_upgrade: cfg!(debug_assertions),
            verification: Verification::default(),
            group_budgets: BTreeMap::new(),
        }
    }
}

impl AssetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AssetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AssetError::Config(e.to_string()))
    }

    pub fn with_pool_size(mut self, threads: usize) -> Self {
        self.streaming_pool_size = threads;
        self
    }

    pub fn with_file_upgrade(mut self, allow: bool) -> Self {
        self.allow_file_upgrade = allow;
        self
    }

    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_group_budget(mut self, group: impl Into<String>, bytes: u64) -> Self {
        self.group_budgets.insert(group.into(), bytes);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.streaming_pool_size == 0 {
            return Err(AssetError::Config("streaming_pool_size must be at least 1".into()));
        }
        if self.group_budgets.keys().any(String::is_empty) {
            return Err(AssetError::Config("streaming group name is empty".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    streaming_pool_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_file_upgrade: Option<bool>,
    #[serde(default)]
    verification: Verification,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TryFrom<RawConfig> for AssetConfig {
    type Error = AssetError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let defaults = AssetConfig::default();
        let mut group_budgets = BTreeMap::new();
        for (key, value) in raw.extra {
            let group = key
                .strip_prefix(BUDGET_PREFIX)
                .and_then(|rest| rest.strip_suffix(BUDGET_SUFFIX));
            match group {
                Some(group) => {
                    let bytes = value.as_u64().ok_or_else(|| {
                        AssetError::Config(format!("{key} must be a non-negative integer"))
                    })?;
                    group_budgets.insert(group.to_string(), bytes);
                }
                None => warn!(key = %key, "ignoring unknown config key"),
            }
        }
        Ok(Self {
            streaming_pool_size: raw.streaming_pool_size.unwrap_or(defaults.streaming_pool_size),
            allow_file_upgrade: raw.allow_file_upgrade.unwrap_or(defaults.allow_file_upgrade),
            verification: raw.verification,
            group_budgets,
        })
    }
}

impl From<AssetConfig> for RawConfig {
    fn from(config: AssetConfig) -> Self {
        let extra = config
            .group_budgets
            .into_iter()
            .map(|(group, bytes)| (format!("{BUDGET_PREFIX}{group}{BUDGET_SUFFIX}"), Value::from(bytes)))
            .collect();
        Self {
            streaming_pool_size: Some(config.streaming_pool_size),
            allow_file_upgrade: Some(config.allow_file_upgrade),
            verification: config.verification,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = AssetConfig::from_json_str(
            r#"{
                "streaming_pool_size": 3,
                "allow_file_upgrade": false,
                "verification": "strict",
                "streaming_group_textures_budget_bytes": 1024,
                "streaming_group_audio_budget_bytes": 512
            }"#,
        )
        .unwrap();
        assert_eq!(config.streaming_pool_size, 3);
        assert!(!config.allow_file_upgrade);
        assert_eq!(config.verification, Verification::Strict);
        assert_eq!(config.group_budgets.get("textures"), Some(&1024));
        assert_eq!(config.group_budgets.get("audio"), Some(&512));
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = AssetConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AssetConfig::default());
        assert!(config.streaming_pool_size >= 1);
        assert_eq!(config.allow_file_upgrade, cfg!(debug_assertions));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            AssetConfig::from_json_str(r#"{"streaming_pool_size": 0}"#),
            Err(AssetError::Config(_))
        ));
        assert!(matches!(
            AssetConfig::from_json_str(r#"{"streaming_group_x_budget_bytes": -1}"#),
            Err(AssetError::Config(_))
        ));
        assert!(matches!(
            AssetConfig::from_json_str(r#"{"verification": "paranoid"}"#),
            Err(AssetError::Config(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = AssetConfig::default()
            .with_pool_size(2)
            .with_group_budget("textures", 4096);
        let json = config.to_json_string().unwrap();
        assert!(json.contains("streaming_group_textures_budget_bytes"));
        assert_eq!(AssetConfig::from_json_str(&json).unwrap(), config);
    }
}
