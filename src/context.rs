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

//! Application-facing entry point.
//!
//! [`AssetContext`] owns the cache, the load scheduler and the instance pool.
//! Resolution and load failures are logged and surface as `None`; reference
//! count and pool ownership errors are returned to the caller.

use crate::bundle::{BundleStore, Payload};
use crate::cache::{ReleaseOutcome, ResourceCache};
use crate::config::AssetConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::manifest::{ManifestIndex, ManifestSource};
use crate::pool::{InstanceId, InstancePool, InstanceRelease, Instantiator, ReleaseOptions};
use crate::scheduler::{AsyncLoadScheduler, LoadHandle, LoadOutcome, LoadPriority};
use ahash::AHashMap;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Completion callback of an asynchronous spawn
pub type SpawnCallback = Box<dyn FnOnce(Result<InstanceId>)>;

/// Ticket for a pending asynchronous spawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpawnTicket(u64);

struct SpawnRequest {
    load: LoadHandle,
    clear_on_scene_change: bool,
    callback: SpawnCallback,
}

struct SpawnCompletion {
    ticket: SpawnTicket,
    outcome: LoadOutcome,
}

/// What a scene clear removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneClear {
    pub instances: usize,
    pub assets: usize,
}

/// Objects still referenced when the context shut down
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub live_instances: usize,
    pub cancelled_loads: usize,
    pub referenced_assets: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.live_instances == 0 && self.cancelled_loads == 0 && self.referenced_assets == 0
    }
}

/// Owner of every runtime asset subsystem
pub struct AssetContext<I: Instantiator> {
    config: AssetConfig,
    cache: ResourceCache,
    scheduler: AsyncLoadScheduler,
    pool: InstancePool<I>,
    spawn_tx: Sender<SpawnCompletion>,
    spawn_rx: Receiver<SpawnCompletion>,
    spawns: AHashMap<SpawnTicket, SpawnRequest>,
    next_spawn: u64,
    shut_down: bool,
}

impl<I: Instantiator> AssetContext<I> {
    /// Read the manifest and build the subsystems. A manifest failure is fatal.
    pub fn init<S>(
        manifest: &S,
        store: Arc<dyn BundleStore>,
        instantiator: I,
        config: AssetConfig,
    ) -> Result<Self>
    where
        S: ManifestSource + ?Sized,
    {
        let manifest = Arc::new(ManifestIndex::load(manifest)?);
        tracing::info!(entries = manifest.len(), "asset context initialised");

        let (spawn_tx, spawn_rx) = unbounded();
        Ok(Self {
            cache: ResourceCache::new(manifest, store, config.cache.clone()),
            scheduler: AsyncLoadScheduler::new(config.scheduler.clone()),
            pool: InstancePool::new(instantiator, config.pool.clone()),
            config,
            spawn_tx,
            spawn_rx,
            spawns: AHashMap::new(),
            next_spawn: 0,
            shut_down: false,
        })
    }

    /// Load an asset synchronously, taking one reference
    pub fn load_sync(&mut self, path: &str) -> Option<Payload> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("context.load_sync", path).entered();

        self.cache.load(path).ok().map(|asset| asset.into_payload())
    }

    /// Queue an asynchronous load; the callback owns the reference it receives
    pub fn load_async<F>(&mut self, path: &str, priority: LoadPriority, callback: F) -> LoadHandle
    where
        F: FnOnce(LoadOutcome) + 'static,
    {
        self.scheduler
            .request_async(&mut self.cache, path, priority, callback)
    }

    pub fn cancel_load(&mut self, handle: LoadHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// Drop one reference on the asset at `path`.
    ///
    /// A forced destroy also takes down the parked instances of that asset.
    pub fn release(&mut self, path: &str, destroy: bool) -> Result<ReleaseOutcome> {
        self.release_fingerprint(Fingerprint::of(path), destroy)
    }

    pub fn release_payload(&mut self, payload: &Payload, destroy: bool) -> Result<ReleaseOutcome> {
        match self.cache.payload_fingerprint(payload) {
            Some(fingerprint) => self.release_fingerprint(fingerprint, destroy),
            None => self.cache.release_payload(payload, destroy),
        }
    }

    fn release_fingerprint(&mut self, fingerprint: Fingerprint, destroy: bool) -> Result<ReleaseOutcome> {
        let outcome = self.cache.release(fingerprint, destroy)?;
        if destroy && outcome == ReleaseOutcome::Destroyed {
            let parked = self.pool.clear_fingerprint(fingerprint);
            if parked > 0 {
                tracing::debug!(fingerprint = %fingerprint, parked, "parked instances destroyed with their asset");
            }
        }
        Ok(outcome)
    }

    /// Spawn an instance synchronously
    pub fn spawn_instance(&mut self, path: &str, clear_on_scene_change: bool) -> Option<InstanceId> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("context.spawn_instance", path).entered();

        self.pool
            .spawn(&mut self.cache, path, clear_on_scene_change)
            .ok()
    }

    /// Load through the scheduler, then spawn during [`update`](Self::update)
    pub fn spawn_instance_async<F>(
        &mut self,
        path: &str,
        priority: LoadPriority,
        clear_on_scene_change: bool,
        callback: F,
    ) -> SpawnTicket
    where
        F: FnOnce(Result<InstanceId>) + 'static,
    {
        self.next_spawn += 1;
        let ticket = SpawnTicket(self.next_spawn);
        let tx = self.spawn_tx.clone();
        let load = self
            .scheduler
            .request_async(&mut self.cache, path, priority, move |outcome| {
                // The receiver lives as long as the context
                let _ = tx.send(SpawnCompletion { ticket, outcome });
            });
        self.spawns.insert(
            ticket,
            SpawnRequest {
                load,
                clear_on_scene_change,
                callback: Box::new(callback),
            },
        );
        ticket
    }

    /// Cancel an asynchronous spawn whose callback has not run yet
    pub fn cancel_spawn(&mut self, ticket: SpawnTicket) -> bool {
        match self.spawns.remove(&ticket) {
            Some(request) => {
                self.scheduler.cancel(request.load);
                true
            }
            None => false,
        }
    }

    /// Release an instance. `max_pool_size` of `None` uses the configured default.
    pub fn release_instance(
        &mut self,
        id: InstanceId,
        max_pool_size: Option<usize>,
        destroy: bool,
    ) -> Result<InstanceRelease> {
        self.release_instance_with(
            id,
            ReleaseOptions {
                max_pool_size,
                force_destroy: destroy,
                reparent: true,
            },
        )
    }

    pub fn release_instance_with(&mut self, id: InstanceId, options: ReleaseOptions) -> Result<InstanceRelease> {
        self.pool.release(&mut self.cache, id, options)
    }

    /// Warm an asset into the idle list, exempt from scene clears
    pub fn preload(&mut self, path: &str) -> bool {
        self.cache.preload(path).is_ok()
    }

    /// Spawn and park `count` instances; `None` if the asset could not be loaded
    pub fn preload_instances(&mut self, path: &str, count: usize, clear_on_scene_change: bool) -> Option<usize> {
        self.pool
            .preload(&mut self.cache, path, count, clear_on_scene_change)
            .ok()
    }

    /// Drop scene-scoped parked instances, then scene-scoped idle assets
    pub fn clear_scene_scoped(&mut self) -> SceneClear {
        let instances = self.pool.clear_scene_scoped();
        let assets = self.cache.clear_scene_scoped();
        tracing::debug!(instances, assets, "scene-scoped assets cleared");
        SceneClear { instances, assets }
    }

    /// Run one scheduler pass and finish asynchronous spawns; returns loads finished
    pub fn update(&mut self) -> usize {
        #[cfg(feature = "profiling")]
        let _span = info_span!("context.update").entered();

        let finished = self.scheduler.tick(&mut self.cache);
        self.drain_spawns();
        finished
    }

    fn drain_spawns(&mut self) {
        while let Ok(SpawnCompletion { ticket, outcome }) = self.spawn_rx.try_recv() {
            match self.spawns.remove(&ticket) {
                Some(request) => {
                    let result = outcome.result.and_then(|asset| {
                        self.pool
                            .spawn_with(&mut self.cache, asset, request.clear_on_scene_change)
                    });
                    (request.callback)(result);
                }
                None => {
                    // Cancelled after the load had already completed
                    if let Ok(asset) = outcome.result {
                        let _ = self.cache.release(asset.fingerprint(), false);
                    }
                }
            }
        }
    }

    /// Tear down pool, scheduler and cache, in that order
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;

        let live_instances = self.pool.shutdown(&mut self.cache);
        let mut cancelled_loads = self.scheduler.shutdown(&self.cache);
        cancelled_loads += self.spawns.len();
        self.spawns.clear();
        self.drain_spawns();
        let referenced_assets = self.cache.shutdown();

        let report = ShutdownReport {
            live_instances,
            cancelled_loads,
            referenced_assets,
        };
        if report.is_clean() {
            tracing::info!("asset context shut down");
        } else {
            tracing::warn!(?report, "asset context shut down with outstanding references");
        }
        report
    }

    pub fn instance(&self, id: InstanceId) -> Option<&I::Object> {
        self.pool.get(id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut I::Object> {
        self.pool.get_mut(id)
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.cache.contains(Fingerprint::of(path))
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub fn scheduler(&self) -> &AsyncLoadScheduler {
        &self.scheduler
    }

    pub fn pool(&self) -> &InstancePool<I> {
        &self.pool
    }
}

impl<I: Instantiator> Drop for AssetContext<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ContainerId, MemoryBundleStore};
    use crate::manifest::ManifestEntry;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Boxes;

    impl Instantiator for Boxes {
        type Object = u32;

        fn instantiate(&mut self, _fingerprint: Fingerprint, payload: &Payload) -> Option<u32> {
            payload.downcast_ref::<u32>().copied()
        }

        fn park(&mut self, _object: &mut u32, _reparent: bool) {}

        fn activate(&mut self, _object: &mut u32) {}

        fn destroy(&mut self, _object: u32) {}
    }

    fn context() -> (Arc<MemoryBundleStore>, AssetContext<Boxes>) {
        let store = Arc::new(
            MemoryBundleStore::new()
                .with_asset("c1", "a", 1u32)
                .with_asset("c2", "b", 2u32)
                .with_async_latency(1),
        );
        let manifest = vec![
            ManifestEntry::new("a", "c1", "a", [ContainerId::from("c2")]),
            ManifestEntry::new("b", "c2", "b", []),
        ];
        let context = AssetContext::init(&manifest, store.clone(), Boxes, AssetConfig::default()).unwrap();
        (store, context)
    }

    #[test]
    fn test_load_sync_and_release() {
        let (_store, mut context) = context();
        let payload = context.load_sync("a").unwrap();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&1));
        assert!(context.load_sync("missing").is_none());
        assert_eq!(context.release_payload(&payload, false).unwrap(), ReleaseOutcome::Idle);
        assert!(context.release("a", false).is_err());
    }

    #[test]
    fn test_spawn_instance_async_completes_in_update() {
        let (_store, mut context) = context();
        let spawned = Rc::new(RefCell::new(None));
        let sink = spawned.clone();
        context.spawn_instance_async("b", LoadPriority::High, true, move |result| {
            *sink.borrow_mut() = result.ok();
        });
        for _ in 0..4 {
            context.update();
        }
        let id = spawned.borrow().expect("spawned");
        assert_eq!(context.instance(id), Some(&2));
        assert_eq!(context.cache().ref_count(Fingerprint::of("b")), Some(1));
    }

    #[test]
    fn test_cancelled_spawn_returns_reference() {
        let (_store, mut context) = context();
        context.load_sync("b");
        let called = Rc::new(RefCell::new(false));
        let flag = called.clone();
        let ticket = context.spawn_instance_async("b", LoadPriority::High, true, move |_| {
            *flag.borrow_mut() = true;
        });
        assert!(context.cancel_spawn(ticket));
        context.update();
        assert!(!*called.borrow());
        assert_eq!(context.cache().ref_count(Fingerprint::of("b")), Some(1));
    }

    #[test]
    fn test_scene_clear_and_shutdown() {
        let (_store, mut context) = context();
        assert!(context.preload("b"));
        assert_eq!(context.preload_instances("a", 2, true), Some(2));
        let cleared = context.clear_scene_scoped();
        assert_eq!(cleared, SceneClear { instances: 2, assets: 1 });
        assert!(context.is_loaded("b"));

        let id = context.spawn_instance("b", true).unwrap();
        let report = context.shutdown();
        assert_eq!(report.live_instances, 1);
        assert!(context.instance(id).is_none());
        assert!(context.shutdown().is_clean());
    }
}
