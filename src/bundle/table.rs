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

//! Reference counts of loaded containers.

use crate::bundle::{BundleStore, ContainerHandle, ContainerId};
use crate::error::{AssetError, RefCountError, Result};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Containers fetched ahead of time (by the async scheduler), waiting to be adopted
pub type Prefetched = AHashMap<ContainerId, ContainerHandle>;

/// Loaded container and its reference count
struct ContainerRef {
    handle: ContainerHandle,
    ref_count: usize,
}

/// Reference-counted table of loaded containers
pub struct BundleTable {
    store: Arc<dyn BundleStore>,
    containers: AHashMap<ContainerId, ContainerRef>,
}

impl BundleTable {
    pub fn new(store: Arc<dyn BundleStore>) -> Self {
        Self {
            store,
            containers: AHashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.store
    }

    /// Take one reference on a container, loading it on first demand
    pub fn load_container(&mut self, id: &ContainerId) -> Result<ContainerHandle> {
        self.acquire(id, None)
    }

    /// Load a primary container and each of its dependencies.
    ///
    /// Every dependency is referenced independently. On failure, all references
    /// taken by this call are released again.
    pub fn load_with_dependencies(
        &mut self,
        id: &ContainerId,
        dependencies: &[ContainerId],
    ) -> Result<ContainerHandle> {
        self.acquire_all(id, dependencies, None)
    }

    /// Same as [`load_with_dependencies`](Self::load_with_dependencies), adopting
    /// already fetched containers instead of asking the store again.
    ///
    /// Adopted entries are removed from `prefetched`; whatever is left was not
    /// needed and should be handed to [`discard`](Self::discard).
    pub fn load_prefetched(
        &mut self,
        id: &ContainerId,
        dependencies: &[ContainerId],
        prefetched: &mut Prefetched,
    ) -> Result<ContainerHandle> {
        self.acquire_all(id, dependencies, Some(prefetched))
    }

    fn acquire_all(
        &mut self,
        id: &ContainerId,
        dependencies: &[ContainerId],
        mut prefetched: Option<&mut Prefetched>,
    ) -> Result<ContainerHandle> {
        let primary = self.acquire(id, prefetched.as_deref_mut())?;

        let mut taken: SmallVec<[&ContainerId; 8]> = SmallVec::new();
        for dependency in dependencies {
            match self.acquire(dependency, prefetched.as_deref_mut()) {
                Ok(_) => taken.push(dependency),
                Err(err) => {
                    tracing::error!(
                        container = %id,
                        dependency = %dependency,
                        "dependency failed to load, rolling back: {err}"
                    );
                    for loaded in taken {
                        // Just acquired above, cannot fail
                        let _ = self.release_container(loaded);
                    }
                    let _ = self.release_container(id);
                    return Err(err);
                }
            }
        }

        Ok(primary)
    }

    fn acquire(
        &mut self,
        id: &ContainerId,
        prefetched: Option<&mut Prefetched>,
    ) -> Result<ContainerHandle> {
        if let Some(entry) = self.containers.get_mut(id) {
            entry.ref_count += 1;
            return Ok(entry.handle.clone());
        }

        let handle = match prefetched.and_then(|p| p.remove(id)) {
            Some(handle) => handle,
            None => self.store.load_sync(id).map_err(|err| {
                tracing::error!(container = %id, "container load failed: {err}");
                err
            })?,
        };

        tracing::trace!(container = %id, "container loaded");
        self.containers.insert(
            id.clone(),
            ContainerRef {
                handle: handle.clone(),
                ref_count: 1,
            },
        );
        Ok(handle)
    }

    /// Drop one reference; the store unloads the container at zero
    pub fn release_container(&mut self, id: &ContainerId) -> Result<()> {
        let Some(entry) = self.containers.get_mut(id) else {
            let err = RefCountError::ContainerNotLoaded(id.clone());
            tracing::error!("{err}");
            return Err(err.into());
        };

        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            if let Some(entry) = self.containers.remove(id) {
                tracing::trace!(container = %id, "container unloaded");
                self.store.unload(id, entry.handle);
            }
        }
        Ok(())
    }

    /// Release a primary container and one reference per dependency.
    ///
    /// Every release is attempted; the first error is returned.
    pub fn release_with_dependencies(
        &mut self,
        id: &ContainerId,
        dependencies: &[ContainerId],
    ) -> Result<()> {
        let mut first_error = None;
        for container in std::iter::once(id).chain(dependencies) {
            if let Err(err) = self.release_container(container) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Containers from `ids` that are not loaded yet, without duplicates
    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a ContainerId>) -> Vec<ContainerId> {
        let mut missing: Vec<ContainerId> = Vec::new();
        for id in ids {
            if !self.containers.contains_key(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        missing
    }

    /// Return unused prefetched containers to the store
    pub fn discard(&self, prefetched: Prefetched) {
        for (id, handle) in prefetched {
            tracing::trace!(container = %id, "discarding unused prefetched container");
            self.store.unload(&id, handle);
        }
    }

    pub fn ref_count(&self, id: &ContainerId) -> usize {
        self.containers.get(id).map_or(0, |entry| entry.ref_count)
    }

    pub fn is_loaded(&self, id: &ContainerId) -> bool {
        self.containers.contains_key(id)
    }

    pub fn loaded_count(&self) -> usize {
        self.containers.len()
    }

    /// Unload everything regardless of counts; returns how many containers were still referenced
    pub fn clear(&mut self) -> usize {
        let mut leaked = 0;
        for (id, entry) in self.containers.drain() {
            if entry.ref_count > 0 {
                leaked += 1;
                tracing::warn!(container = %id, refs = entry.ref_count, "container still referenced at teardown");
            }
            self.store.unload(&id, entry.handle);
        }
        leaked
    }
}

impl Drop for BundleTable {
    fn drop(&mut self) {
        if !self.containers.is_empty() {
            self.clear();
        }
    }
}
