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
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Container held by [`MemoryBundleStore`]
struct MemoryContainer {
    assets: AHashMap<String, Payload>,
}

/// Per-container call counts
#[derive(Clone, Debug, Default)]
pub struct StoreCounters {
    pub sync_loads: AHashMap<ContainerId, usize>,
    pub async_loads: AHashMap<ContainerId, usize>,
    pub unloads: AHashMap<ContainerId, usize>,
}

impl StoreCounters {
    /// Sync plus async loads of one container
    pub fn loads_of(&self, id: &ContainerId) -> usize {
        self.sync_loads.get(id).copied().unwrap_or(0) + self.async_loads.get(id).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.sync_loads.values().sum::<usize>() + self.async_loads.values().sum::<usize>()
    }

    pub fn unloads_of(&self, id: &ContainerId) -> usize {
        self.unloads.get(id).copied().unwrap_or(0)
    }
}

/// In-memory bundle store.
///
/// Containers are registered up front; every load hands out a fresh
/// container handle, so reference counting mistakes show up as extra
/// loads in [`StoreCounters`].
pub struct MemoryBundleStore {
    containers: AHashMap<ContainerId, Arc<MemoryContainer>>,
    counters: Mutex<StoreCounters>,
    /// Number of polls an async load stays pending
    async_latency: usize,
    latency_overrides: AHashMap<ContainerId, usize>,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self {
            containers: AHashMap::new(),
            counters: Mutex::new(StoreCounters::default()),
            async_latency: 0,
            latency_overrides: AHashMap::new(),
        }
    }

    /// Register an empty container
    pub fn with_container(mut self, id: impl Into<ContainerId>) -> Self {
        self.containers
            .entry(id.into())
            .or_insert_with(|| Arc::new(MemoryContainer { assets: AHashMap::new() }));
        self
    }

    /// Register an asset inside a container, creating the container if needed
    pub fn with_asset<T: Any + Send + Sync>(
        mut self,
        container: impl Into<ContainerId>,
        asset_name: impl Into<String>,
        asset: T,
    ) -> Self {
        let entry = self
            .containers
            .entry(container.into())
            .or_insert_with(|| Arc::new(MemoryContainer { assets: AHashMap::new() }));
        // Only reachable while building, before any handle has been cloned out
        if let Some(container) = Arc::get_mut(entry) {
            container.assets.insert(asset_name.into(), Arc::new(asset));
        }
        self
    }

    /// Keep async loads pending for `polls` polls before completing
    pub fn with_async_latency(mut self, polls: usize) -> Self {
        self.async_latency = polls;
        self
    }

    /// Override the async latency of one container
    pub fn with_container_latency(mut self, id: impl Into<ContainerId>, polls: usize) -> Self {
        self.latency_overrides.insert(id.into(), polls);
        self
    }

    pub fn counters(&self) -> StoreCounters {
        self.counters.lock().clone()
    }

    fn fetch(&self, id: &ContainerId) -> Result<ContainerHandle> {
        self.containers
            .get(id)
            .map(|container| ContainerHandle::new(container.clone()))
            .ok_or_else(|| AssetError::ContainerLoad {
                container: id.clone(),
                reason: "container is not registered".to_string(),
            })
    }
}

impl Default for MemoryBundleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleStore for MemoryBundleStore {
    fn load_sync(&self, id: &ContainerId) -> Result<ContainerHandle> {
        *self.counters.lock().sync_loads.entry(id.clone()).or_insert(0) += 1;
        self.fetch(id)
    }

    fn load_async(&self, id: &ContainerId) -> ContainerFuture {
        *self.counters.lock().async_loads.entry(id.clone()).or_insert(0) += 1;
        Box::pin(Delayed {
            remaining: self.latency_overrides.get(id).copied().unwrap_or(self.async_latency),
            result: Some(self.fetch(id)),
        })
    }

    fn extract(&self, container: &ContainerHandle, asset_name: &str) -> Option<Payload> {
        container
            .downcast_ref::<Arc<MemoryContainer>>()?
            .assets
            .get(asset_name)
            .cloned()
    }

    fn unload(&self, id: &ContainerId, _container: ContainerHandle) {
        *self.counters.lock().unloads.entry(id.clone()).or_insert(0) += 1;
    }
}

/// Future that stays pending for a fixed number of polls
struct Delayed {
    remaining: usize,
    result: Option<Result<ContainerHandle>>,
}

impl Future for Delayed {
    type Output = Result<ContainerHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.remaining > 0 {
            self.remaining -= 1;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        Poll::Ready(self.result.take().unwrap_or_else(|| {
            Err(AssetError::ContainerLoad {
                container: ContainerId::from("<polled after completion>"),
                reason: "future polled after completion".to_string(),
            })
        }))
    }
}
