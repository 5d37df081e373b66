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

//! Manifest index: where each asset lives and which containers it needs.

use crate::bundle::ContainerId;
use crate::error::{AssetError, Result};
use crate::fingerprint::Fingerprint;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// Dependency containers of one asset
pub type Dependencies = SmallVec<[ContainerId; 4]>;

/// Location of one asset, as emitted by the bundle build tooling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical path the fingerprint was computed from
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Container holding the asset
    pub container: ContainerId,
    /// Name of the asset inside its container
    pub asset_name: String,
    /// Every other container that must be loaded first
    #[serde(default)]
    pub dependencies: Dependencies,
}

impl ManifestEntry {
    /// Build an entry, fingerprinting `path`
    pub fn new(
        path: impl Into<String>,
        container: impl Into<ContainerId>,
        asset_name: impl Into<String>,
        dependencies: impl IntoIterator<Item = ContainerId>,
    ) -> Self {
        let path = path.into();
        Self {
            fingerprint: Fingerprint::of(&path),
            path,
            container: container.into(),
            asset_name: asset_name.into(),
            dependencies: dependencies.into_iter().collect(),
        }
    }
}

/// Supplier of manifest entries, read once at startup
pub trait ManifestSource {
    fn entries(&self) -> Result<Vec<ManifestEntry>>;
}

impl ManifestSource for Vec<ManifestEntry> {
    fn entries(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.clone())
    }
}

impl ManifestSource for [ManifestEntry] {
    fn entries(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.to_vec())
    }
}

/// Manifest persisted as a JSON array of [`ManifestEntry`]
pub struct JsonManifest {
    path: PathBuf,
}

impl JsonManifest {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ManifestSource for JsonManifest {
    fn entries(&self) -> Result<Vec<ManifestEntry>> {
        let file = File::open(&self.path).map_err(|e| {
            AssetError::Manifest(format!("failed to open {}: {e}", self.path.display()))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AssetError::Manifest(format!("failed to parse {}: {e}", self.path.display()))
        })
    }
}

/// Immutable fingerprint → entry map
#[derive(Clone, Debug, Default)]
pub struct ManifestIndex {
    entries: AHashMap<Fingerprint, ManifestEntry>,
}

impl ManifestIndex {
    /// Read every entry from a supplier. Supplier failure is fatal.
    pub fn load<S: ManifestSource + ?Sized>(source: &S) -> Result<Self> {
        let entries = source.entries().map_err(|err| {
            tracing::error!("manifest could not be loaded: {err}");
            err
        })?;
        Ok(Self::from_entries(entries))
    }

    /// Parse a JSON array of entries
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<ManifestEntry> = serde_json::from_str(json)
            .map_err(|e| AssetError::Manifest(format!("failed to parse manifest: {e}")))?;
        Ok(Self::from_entries(entries))
    }

    /// Index entries; on duplicate fingerprints the first entry wins
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut index: AHashMap<Fingerprint, ManifestEntry> = AHashMap::new();
        for entry in entries {
            if !entry.path.is_empty() && Fingerprint::of(&entry.path) != entry.fingerprint {
                tracing::warn!(
                    path = %entry.path,
                    fingerprint = %entry.fingerprint,
                    "manifest fingerprint does not match its path"
                );
            }
            match index.get(&entry.fingerprint) {
                Some(existing) => {
                    tracing::error!(
                        fingerprint = %entry.fingerprint,
                        kept = %existing.path,
                        dropped = %entry.path,
                        container = %entry.container,
                        "duplicate fingerprint in manifest"
                    );
                }
                None => {
                    index.insert(entry.fingerprint, entry);
                }
            }
        }
        Self { entries: index }
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<&ManifestEntry> {
        self.entries.get(&fingerprint)
    }

    pub fn get_path(&self, path: &str) -> Option<&ManifestEntry> {
        self.get(Fingerprint::of(path))
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.entries.contains_key(&fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }
}
