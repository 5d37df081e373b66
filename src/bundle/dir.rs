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

use crate::bundle::{BundleStore, ContainerFuture, ContainerHandle, ContainerId, Payload};
use crate::error::{AssetError, Result};
use ahash::AHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw bytes of one file inside a directory container
#[derive(Clone, Debug)]
pub struct DataBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Loaded directory container: every regular file, read eagerly
struct DirContainer {
    files: AHashMap<String, Arc<DataBlob>>,
}

/// Bundle store over a directory tree.
///
/// Each container is a sub-directory of `root`; each asset is a file in it.
pub struct DirBundleStore {
    root: PathBuf,
}

impl DirBundleStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if a container directory exists
    pub fn container_exists(&self, id: &ContainerId) -> bool {
        self.root.join(id.as_str()).is_dir()
    }

    fn read_container(&self, id: &ContainerId) -> Result<DirContainer> {
        let directory = self.root.join(id.as_str());
        let load_error = |reason: String| AssetError::ContainerLoad {
            container: id.clone(),
            reason,
        };

        let entries = fs::read_dir(&directory)
            .map_err(|e| load_error(format!("failed to read {}: {e}", directory.display())))?;

        let mut files = AHashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| load_error(format!("failed to read entry: {e}")))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let bytes = fs::read(&path)
                    .map_err(|e| load_error(format!("failed to read {}: {e}", path.display())))?;
                files.insert(
                    name.to_string(),
                    Arc::new(DataBlob {
                        name: name.to_string(),
                        bytes,
                    }),
                );
            }
        }

        Ok(DirContainer { files })
    }
}

impl BundleStore for DirBundleStore {
    fn load_sync(&self, id: &ContainerId) -> Result<ContainerHandle> {
        let container = self.read_container(id)?;
        tracing::debug!(container = %id, files = container.files.len(), "container read from disk");
        Ok(ContainerHandle::new(container))
    }

    fn load_async(&self, id: &ContainerId) -> ContainerFuture {
        // Reads are synchronous; the future is ready on first poll
        Box::pin(futures::future::ready(self.load_sync(id)))
    }

    fn extract(&self, container: &ContainerHandle, asset_name: &str) -> Option<Payload> {
        let blob = container.downcast_ref::<DirContainer>()?.files.get(asset_name)?;
        let payload: Payload = blob.clone();
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_files() -> (tempfile::TempDir, DirBundleStore) {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("sounds");
        fs::create_dir(&container).unwrap();
        fs::write(container.join("menusound.mp3"), [1u8, 2, 3]).unwrap();
        let store = DirBundleStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_container_exists() {
        let (_dir, store) = store_with_files();
        assert!(store.container_exists(&"sounds".into()));
        assert!(!store.container_exists(&"textures".into()));
    }

    #[test]
    fn test_extract_file() {
        let (_dir, store) = store_with_files();
        let container = store.load_sync(&"sounds".into()).unwrap();
        let payload = store.extract(&container, "menusound.mp3").unwrap();
        let blob = payload.downcast_ref::<DataBlob>().unwrap();
        assert_eq!(blob.bytes, vec![1, 2, 3]);
        assert!(store.extract(&container, "missing.mp3").is_none());
    }

    #[test]
    fn test_missing_directory() {
        let (_dir, store) = store_with_files();
        assert!(store.load_sync(&"textures".into()).is_err());
    }
}
