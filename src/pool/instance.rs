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

//! Pool of live objects instantiated from cached assets.
//!
//! A live instance holds one cache reference on its asset. A parked
//! instance holds none: parking releases the reference, and reusing a
//! parked instance acquires it again.

use crate::bundle::Payload;
use crate::cache::{AssetRef, ReleaseOutcome, ResourceCache};
use crate::config::PoolConfig;
use crate::error::{AssetError, Result};
use crate::fingerprint::Fingerprint;
use crate::pool::record::RecordPool;
use ahash::AHashMap;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identifier of a spawned instance
    pub struct InstanceId;
}

/// Turns decoded payloads into live objects and manages their activity
pub trait Instantiator {
    type Object;

    /// Build a live object; `None` if the payload cannot be instantiated
    fn instantiate(&mut self, fingerprint: Fingerprint, payload: &Payload) -> Option<Self::Object>;

    /// Deactivate an object going back to the pool; `reparent` moves it under the pool's holding node
    fn park(&mut self, object: &mut Self::Object, reparent: bool);

    /// Reactivate a parked object
    fn activate(&mut self, object: &mut Self::Object);

    fn destroy(&mut self, object: Self::Object);
}

/// One spawned object
#[derive(Debug)]
pub struct PooledInstance<O> {
    pub fingerprint: Fingerprint,
    pub object: O,
    /// Parked in the free list
    pub recycled: bool,
    pub clear_on_scene_change: bool,
}

/// How an instance release behaves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Parked instances allowed for this fingerprint; `None` uses the pool default
    pub max_pool_size: Option<usize>,
    /// Destroy the instance and force the asset out of the cache at zero references
    pub force_destroy: bool,
    pub reparent: bool,
}

impl ReleaseOptions {
    pub fn destroy() -> Self {
        Self {
            force_destroy: true,
            ..Self::default()
        }
    }

    pub fn with_max_pool_size(max_pool_size: usize) -> Self {
        Self {
            max_pool_size: Some(max_pool_size),
            ..Self::default()
        }
    }
}

/// What happened to a released instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceRelease {
    Parked,
    Destroyed,
}

/// Pool statistics
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    /// Instances built by the instantiator
    pub instantiated: u64,
    /// Spawns served from the free list
    pub reused: u64,
    pub parked: u64,
    pub destroyed: u64,
}

/// Per-fingerprint free lists of parked instances
pub struct InstancePool<I: Instantiator> {
    instantiator: I,
    instances: SlotMap<InstanceId, PooledInstance<I::Object>>,
    /// Parked ids, most recently parked last
    free: AHashMap<Fingerprint, Vec<InstanceId>>,
    buffers: RecordPool<Vec<InstanceId>>,
    config: PoolConfig,
    stats: PoolStats,
}

impl<I: Instantiator> InstancePool<I> {
    pub fn new(instantiator: I, config: PoolConfig) -> Self {
        Self {
            instantiator,
            instances: SlotMap::with_key(),
            free: AHashMap::new(),
            buffers: RecordPool::new(config.record_pool_size),
            config,
            stats: PoolStats::default(),
        }
    }

    /// Spawn an instance of `path`, reusing a parked one when available
    pub fn spawn(&mut self, cache: &mut ResourceCache, path: &str, clear_on_scene_change: bool) -> Result<InstanceId> {
        let asset = cache.load(path)?;
        self.spawn_with(cache, asset, clear_on_scene_change)
    }

    /// Spawn from an already acquired asset reference, which the new instance takes over
    pub fn spawn_with(
        &mut self,
        cache: &mut ResourceCache,
        asset: AssetRef,
        clear_on_scene_change: bool,
    ) -> Result<InstanceId> {
        let fingerprint = asset.fingerprint();

        if let Some(id) = self.pop_free(fingerprint) {
            if let Some(instance) = self.instances.get_mut(id) {
                self.instantiator.activate(&mut instance.object);
                instance.recycled = false;
                instance.clear_on_scene_change = clear_on_scene_change;
                self.stats.reused += 1;
                return Ok(id);
            }
        }

        match self.instantiator.instantiate(fingerprint, asset.payload()) {
            Some(object) => {
                self.stats.instantiated += 1;
                Ok(self.instances.insert(PooledInstance {
                    fingerprint,
                    object,
                    recycled: false,
                    clear_on_scene_change,
                }))
            }
            None => {
                tracing::error!(fingerprint = %fingerprint, "instantiation failed");
                let _ = cache.release(fingerprint, false);
                Err(AssetError::Instantiate { fingerprint })
            }
        }
    }

    fn pop_free(&mut self, fingerprint: Fingerprint) -> Option<InstanceId> {
        let list = self.free.get_mut(&fingerprint)?;
        let id = list.pop();
        if list.is_empty() {
            if let Some(list) = self.free.remove(&fingerprint) {
                self.buffers.recycle(list);
            }
        }
        id
    }

    /// Return an instance to the pool, or destroy it if forced or the pool is full
    pub fn release(
        &mut self,
        cache: &mut ResourceCache,
        id: InstanceId,
        options: ReleaseOptions,
    ) -> Result<InstanceRelease> {
        let Some(instance) = self.instances.get_mut(id) else {
            return Err(Self::ownership_error(format!("instance {id:?} is not owned by this pool")));
        };
        if instance.recycled {
            return Err(Self::ownership_error(format!("instance {id:?} released twice")));
        }

        let fingerprint = instance.fingerprint;
        let limit = options.max_pool_size.or(self.config.max_pool_size);
        let parked = self.free.get(&fingerprint).map_or(0, Vec::len);
        let full = limit.map_or(false, |max| parked >= max);

        if options.force_destroy || full {
            if let Some(instance) = self.instances.remove(id) {
                self.instantiator.destroy(instance.object);
                self.stats.destroyed += 1;
            }
            let outcome = cache.release(fingerprint, options.force_destroy)?;
            // Idle-budget eviction leaves parked siblings alone; only a forced destroy takes them
            if options.force_destroy && outcome == ReleaseOutcome::Destroyed {
                self.clear_fingerprint(fingerprint);
            }
            return Ok(InstanceRelease::Destroyed);
        }

        self.instantiator.park(&mut instance.object, options.reparent);
        instance.recycled = true;
        self.free
            .entry(fingerprint)
            .or_insert_with(|| self.buffers.spawn())
            .push(id);
        self.stats.parked += 1;
        cache.release(fingerprint, false)?;
        Ok(InstanceRelease::Parked)
    }

    fn ownership_error(message: String) -> AssetError {
        tracing::error!("{message}");
        AssetError::PoolOwnership(message)
    }

    /// Spawn `count` instances and park them all; returns how many are parked
    pub fn preload(
        &mut self,
        cache: &mut ResourceCache,
        path: &str,
        count: usize,
        clear_on_scene_change: bool,
    ) -> Result<usize> {
        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            match self.spawn(cache, path, clear_on_scene_change) {
                Ok(id) => spawned.push(id),
                Err(err) => {
                    self.park_all(cache, spawned);
                    return Err(err);
                }
            }
        }
        if let Some(&id) = spawned.first() {
            if let Some(instance) = self.instances.get(id) {
                cache.set_clear_on_scene_change(instance.fingerprint, clear_on_scene_change);
            }
        }
        let parked = spawned.len();
        self.park_all(cache, spawned);
        Ok(parked)
    }

    fn park_all(&mut self, cache: &mut ResourceCache, ids: Vec<InstanceId>) {
        let options = ReleaseOptions::with_max_pool_size(usize::MAX);
        for id in ids {
            if let Err(err) = self.release(cache, id, options) {
                tracing::error!("preloaded instance could not be parked: {err}");
            }
        }
    }

    /// Destroy parked instances flagged for scene clears
    pub fn clear_scene_scoped(&mut self) -> usize {
        self.destroy_parked(|instance| instance.clear_on_scene_change)
    }

    /// Destroy every parked instance of one fingerprint
    pub fn clear_fingerprint(&mut self, fingerprint: Fingerprint) -> usize {
        let Some(mut list) = self.free.remove(&fingerprint) else {
            return 0;
        };
        let count = list.len();
        for id in list.drain(..) {
            self.destroy_instance(id);
        }
        self.buffers.recycle(list);
        count
    }

    /// Destroy every parked instance
    pub fn clear(&mut self) -> usize {
        self.destroy_parked(|_| true)
    }

    fn destroy_parked<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&PooledInstance<I::Object>) -> bool,
    {
        let mut doomed = Vec::new();
        let mut emptied = Vec::new();
        for (&fingerprint, list) in self.free.iter_mut() {
            list.retain(|id| match self.instances.get(*id) {
                Some(instance) if predicate(instance) => {
                    doomed.push(*id);
                    false
                }
                _ => true,
            });
            if list.is_empty() {
                emptied.push(fingerprint);
            }
        }
        for fingerprint in emptied {
            if let Some(list) = self.free.remove(&fingerprint) {
                self.buffers.recycle(list);
            }
        }
        let count = doomed.len();
        for id in doomed {
            self.destroy_instance(id);
        }
        count
    }

    fn destroy_instance(&mut self, id: InstanceId) {
        if let Some(instance) = self.instances.remove(id) {
            self.instantiator.destroy(instance.object);
            self.stats.destroyed += 1;
        }
    }

    /// Destroy everything; live instances give their cache reference back.
    /// Returns how many instances were still live.
    pub fn shutdown(&mut self, cache: &mut ResourceCache) -> usize {
        self.clear();
        let live: Vec<(InstanceId, Fingerprint)> = self
            .instances
            .iter()
            .map(|(id, instance)| (id, instance.fingerprint))
            .collect();
        for &(id, fingerprint) in &live {
            tracing::warn!(fingerprint = %fingerprint, "instance still live at shutdown");
            self.destroy_instance(id);
            let _ = cache.release(fingerprint, false);
        }
        self.buffers.clear();
        live.len()
    }

    pub fn get(&self, id: InstanceId) -> Option<&I::Object> {
        self.instances.get(id).map(|instance| &instance.object)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut I::Object> {
        self.instances.get_mut(id).map(|instance| &mut instance.object)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&PooledInstance<I::Object>> {
        self.instances.get(id)
    }

    pub fn is_recycled(&self, id: InstanceId) -> bool {
        self.instances.get(id).map_or(false, |instance| instance.recycled)
    }

    /// Parked instances of one fingerprint
    pub fn pooled_count(&self, fingerprint: Fingerprint) -> usize {
        self.free.get(&fingerprint).map_or(0, Vec::len)
    }

    /// Instances currently spawned and not parked
    pub fn live_count(&self) -> usize {
        self.instances.values().filter(|instance| !instance.recycled).count()
    }

    /// Every instance, parked or live
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instantiator(&self) -> &I {
        &self.instantiator
    }

    pub fn instantiator_mut(&mut self) -> &mut I {
        &mut self.instantiator
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
