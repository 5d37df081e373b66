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

//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```
//! use bundle_cache::config::AssetConfig;
//!
//! let config = AssetConfig::from_json_str(r#"{ "cache": { "max_idle_assets": 32 } }"#).unwrap();
//! assert_eq!(config.cache.max_idle_assets, Some(32));
//! assert_eq!(config.scheduler.time_slice_ms, 200);
//! ```

use crate::error::{AssetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Resource cache settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Idle (zero-reference) assets kept warm before the oldest are evicted.
    /// `None` disables the trigger; eviction is then manual only.
    pub max_idle_assets: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_idle_assets: Some(256),
        }
    }
}

/// Async load scheduler settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest a scheduling pass runs before yielding, in milliseconds
    pub time_slice_ms: u64,
    /// Recycled pending-load records kept for reuse
    pub record_pool_size: usize,
}

impl SchedulerConfig {
    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_slice_ms: 200,
            record_pool_size: 64,
        }
    }
}

/// Object instance pool settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Parked instances kept per fingerprint when a release does not say otherwise.
    /// `None` keeps every released instance.
    pub max_pool_size: Option<usize>,
    /// Recycled free-list buffers kept for reuse
    pub record_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: None,
            record_pool_size: 128,
        }
    }
}

/// Complete runtime configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
}

impl AssetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AssetError::Config(format!("invalid config: {e}")))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| AssetError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AssetError::Config(format!("config serialization failed: {e}")))
    }
}
