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

//! Reference-counted cache of decoded assets.
//!
//! An asset whose count drops to zero is not destroyed: it moves to the head
//! of the idle list and a later acquire takes it back for free. Assets leave
//! the idle list either through acquire or by eviction from the tail.
//! An asset is in the idle list exactly when its count is zero.

pub mod entry;

pub use entry::{AssetRef, CacheStats, CachedAsset, ReleaseOutcome};

use crate::bundle::{BundleStore, BundleTable, Payload, Prefetched};
use crate::config::CacheConfig;
use crate::error::{AssetError, RefCountError, Result};
use crate::fingerprint::Fingerprint;
use crate::lru_list::LruList;
use crate::manifest::ManifestIndex;
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Identity key of a payload allocation
fn payload_key(payload: &Payload) -> usize {
    Arc::as_ptr(payload) as *const () as usize
}

/// Reference-counted store of decoded assets keyed by fingerprint
pub struct ResourceCache {
    manifest: Arc<ManifestIndex>,
    bundles: BundleTable,
    entries: AHashMap<Fingerprint, CachedAsset>,
    /// Reverse lookup for release by payload. Paths aliasing one container
    /// asset share a payload, so a key can map to several fingerprints.
    payload_index: AHashMap<usize, SmallVec<[Fingerprint; 1]>>,
    /// Zero-reference assets, most recently idle first
    idle: LruList<Fingerprint>,
    config: CacheConfig,
    tick: u64,
    stats: CacheStats,
}

impl ResourceCache {
    pub fn new(
        manifest: Arc<ManifestIndex>,
        store: Arc<dyn BundleStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            manifest,
            bundles: BundleTable::new(store),
            entries: AHashMap::with_capacity(128),
            payload_index: AHashMap::with_capacity(128),
            idle: LruList::with_capacity(config.max_idle_assets.unwrap_or(0).min(1024)),
            config,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Load or re-acquire the asset at `path`
    pub fn load(&mut self, path: &str) -> Result<AssetRef> {
        self.acquire_inner(Fingerprint::of(path), Some(path), None)
    }

    /// Take one more reference on an asset.
    ///
    /// Idle assets leave the idle list in the same step. Assets that are not
    /// cached but known to the manifest are loaded.
    pub fn acquire(&mut self, fingerprint: Fingerprint) -> Result<AssetRef> {
        self.acquire_inner(fingerprint, None, None)
    }

    /// Acquire, adopting containers the scheduler already fetched
    pub(crate) fn load_prefetched(
        &mut self,
        fingerprint: Fingerprint,
        path: &str,
        prefetched: &mut Prefetched,
    ) -> Result<AssetRef> {
        self.acquire_inner(fingerprint, Some(path), Some(prefetched))
    }

    fn acquire_inner(
        &mut self,
        fingerprint: Fingerprint,
        path: Option<&str>,
        prefetched: Option<&mut Prefetched>,
    ) -> Result<AssetRef> {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(&fingerprint) {
            if entry.ref_count == 0 {
                self.idle.remove(&fingerprint);
            }
            entry.ref_count += 1;
            entry.last_use_tick = self.tick;
            self.stats.hits += 1;
            return Ok(entry.asset_ref());
        }

        self.stats.misses += 1;
        self.load_miss(fingerprint, path, prefetched).map_err(|err| {
            self.stats.failed_loads += 1;
            tracing::error!(
                fingerprint = %fingerprint,
                path = path.unwrap_or("<unknown>"),
                "asset load failed: {err}"
            );
            err
        })
    }

    fn load_miss(
        &mut self,
        fingerprint: Fingerprint,
        path: Option<&str>,
        prefetched: Option<&mut Prefetched>,
    ) -> Result<AssetRef> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("cache.load", fingerprint = %fingerprint).entered();

        let manifest = Arc::clone(&self.manifest);
        let Some(location) = manifest.get(fingerprint) else {
            return Err(AssetError::Resolution {
                fingerprint,
                path: path.unwrap_or_default().to_string(),
            });
        };

        let container = match prefetched {
            Some(prefetched) => self.bundles.load_prefetched(
                &location.container,
                &location.dependencies,
                prefetched,
            )?,
            None => self
                .bundles
                .load_with_dependencies(&location.container, &location.dependencies)?,
        };

        let Some(payload) = self.bundles.store().extract(&container, &location.asset_name) else {
            // Counts were taken for this asset only; give them back
            let _ = self
                .bundles
                .release_with_dependencies(&location.container, &location.dependencies);
            return Err(AssetError::Extract {
                fingerprint,
                container: location.container.clone(),
                asset_name: location.asset_name.clone(),
            });
        };

        let entry = CachedAsset {
            fingerprint,
            path: path.map_or_else(|| location.path.clone(), str::to_string),
            payload,
            container: location.container.clone(),
            dependencies: location.dependencies.clone(),
            ref_count: 1,
            last_use_tick: self.tick,
            clear_on_scene_change: true,
        };
        let asset = entry.asset_ref();
        self.payload_index
            .entry(payload_key(&entry.payload))
            .or_default()
            .push(fingerprint);
        self.entries.insert(fingerprint, entry);
        self.stats.loads += 1;
        tracing::debug!(fingerprint = %fingerprint, container = %location.container, "asset cached");
        Ok(asset)
    }

    /// Drop one reference.
    ///
    /// At zero the asset is destroyed if `force_destroy`, otherwise it becomes
    /// the most recently idle entry. Over-release is reported and the count
    /// stays at zero.
    pub fn release(&mut self, fingerprint: Fingerprint, force_destroy: bool) -> Result<ReleaseOutcome> {
        self.tick += 1;
        let Some(entry) = self.entries.get_mut(&fingerprint) else {
            return Err(Self::refcount_error(RefCountError::UnknownAsset(fingerprint)));
        };
        if entry.ref_count == 0 {
            // Idle entries only leave the idle list through acquire or eviction
            let err = RefCountError::AlreadyIdle(fingerprint);
            tracing::error!(path = %entry.path, "{err}");
            return Err(err.into());
        }

        entry.ref_count -= 1;
        entry.last_use_tick = self.tick;
        if entry.ref_count > 0 {
            return Ok(ReleaseOutcome::Referenced(entry.ref_count));
        }

        if force_destroy {
            self.destroy(fingerprint);
            return Ok(ReleaseOutcome::Destroyed);
        }

        self.idle.insert_at_head(fingerprint);
        self.enforce_idle_budget();
        if self.entries.contains_key(&fingerprint) {
            Ok(ReleaseOutcome::Idle)
        } else {
            Ok(ReleaseOutcome::Destroyed)
        }
    }

    /// Release by logical path
    pub fn release_path(&mut self, path: &str, force_destroy: bool) -> Result<ReleaseOutcome> {
        self.release(Fingerprint::of(path), force_destroy)
    }

    /// Release the entry owning `payload`
    pub fn release_payload(&mut self, payload: &Payload, force_destroy: bool) -> Result<ReleaseOutcome> {
        match self.payload_fingerprint(payload) {
            Some(fingerprint) => self.release(fingerprint, force_destroy),
            None => Err(Self::refcount_error(RefCountError::UnknownPayload)),
        }
    }

    /// Fingerprint of the entry owning `payload`.
    ///
    /// When several paths alias the payload, the earliest cached one still
    /// holding a reference wins.
    pub fn payload_fingerprint(&self, payload: &Payload) -> Option<Fingerprint> {
        let owners = self.payload_index.get(&payload_key(payload))?;
        owners
            .iter()
            .copied()
            .find(|fingerprint| self.ref_count(*fingerprint).map_or(false, |count| count > 0))
            .or_else(|| owners.first().copied())
    }

    fn refcount_error(err: RefCountError) -> AssetError {
        tracing::error!("{err}");
        err.into()
    }

    /// Load an asset and leave it idle, exempt from scene clears
    pub fn preload(&mut self, path: &str) -> Result<()> {
        let asset = self.load(path)?;
        if let Some(entry) = self.entries.get_mut(&asset.fingerprint()) {
            entry.clear_on_scene_change = false;
        }
        self.release(asset.fingerprint(), false).map(|_| ())
    }

    /// Mark whether an asset is dropped by [`clear_scene_scoped`](Self::clear_scene_scoped)
    pub fn set_clear_on_scene_change(&mut self, fingerprint: Fingerprint, clear: bool) -> bool {
        match self.entries.get_mut(&fingerprint) {
            Some(entry) => {
                entry.clear_on_scene_change = clear;
                true
            }
            None => false,
        }
    }

    /// Destroy up to `count` idle assets, least recently used first
    pub fn evict_least_recently_used(&mut self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some(fingerprint) = self.idle.remove_tail() else {
                break;
            };
            let referenced = self
                .entries
                .get(&fingerprint)
                .map_or(false, |entry| entry.ref_count > 0);
            if referenced {
                tracing::error!(fingerprint = %fingerprint, "referenced asset found in idle list");
                continue;
            }
            if self.destroy(fingerprint) {
                evicted += 1;
            }
        }
        evicted
    }

    fn enforce_idle_budget(&mut self) {
        if let Some(budget) = self.config.max_idle_assets {
            let excess = self.idle.len().saturating_sub(budget);
            if excess > 0 {
                self.evict_least_recently_used(excess);
            }
        }
    }

    /// Remove an entry, dropping its payload and container references
    fn destroy(&mut self, fingerprint: Fingerprint) -> bool {
        let Some(entry) = self.entries.remove(&fingerprint) else {
            return false;
        };
        self.idle.remove(&fingerprint);
        let key = payload_key(&entry.payload);
        if let Some(owners) = self.payload_index.get_mut(&key) {
            owners.retain(|owner| *owner != fingerprint);
            if owners.is_empty() {
                self.payload_index.remove(&key);
            }
        }
        if let Err(err) = self
            .bundles
            .release_with_dependencies(&entry.container, &entry.dependencies)
        {
            tracing::error!(fingerprint = %fingerprint, "container release failed: {err}");
        }
        self.stats.evictions += 1;
        tracing::debug!(fingerprint = %fingerprint, path = %entry.path, "asset destroyed");
        true
    }

    /// Destroy every idle asset flagged for scene clears
    pub fn clear_scene_scoped(&mut self) -> usize {
        let scoped: Vec<Fingerprint> = self
            .idle
            .iter()
            .copied()
            .filter(|fp| self.entries.get(fp).map_or(false, |e| e.clear_on_scene_change))
            .collect();
        scoped.into_iter().filter(|&fp| self.destroy(fp)).count()
    }

    /// Destroy every idle asset
    pub fn clear(&mut self) -> usize {
        let count = self.idle.len();
        self.evict_least_recently_used(count)
    }

    /// Destroy everything, including referenced assets; returns how many were still referenced
    pub fn shutdown(&mut self) -> usize {
        self.clear();
        let leaked: Vec<Fingerprint> = self.entries.keys().copied().collect();
        for &fingerprint in &leaked {
            if let Some(entry) = self.entries.get(&fingerprint) {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    path = %entry.path,
                    refs = entry.ref_count,
                    "asset still referenced at shutdown"
                );
            }
            self.destroy(fingerprint);
        }
        self.bundles.clear();
        leaked.len()
    }

    pub fn ref_count(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.entries.get(&fingerprint).map(CachedAsset::ref_count)
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.entries.contains_key(&fingerprint)
    }

    /// True if the asset is cached with no references
    pub fn is_idle(&self, fingerprint: Fingerprint) -> bool {
        self.idle.contains(&fingerprint)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Idle fingerprints, most recently idle first
    pub fn idle_fingerprints(&self) -> Vec<Fingerprint> {
        self.idle.iter().copied().collect()
    }

    pub fn entry(&self, fingerprint: Fingerprint) -> Option<&CachedAsset> {
        self.entries.get(&fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn manifest(&self) -> &Arc<ManifestIndex> {
        &self.manifest
    }

    pub fn bundles(&self) -> &BundleTable {
        &self.bundles
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ContainerId, MemoryBundleStore};
    use crate::manifest::ManifestEntry;

    fn cache_with(max_idle: Option<usize>) -> (Arc<MemoryBundleStore>, ResourceCache) {
        let store = Arc::new(
            MemoryBundleStore::new()
                .with_asset("c1", "a", String::from("alpha"))
                .with_asset("c1", "b", String::from("beta"))
                .with_asset("c2", "shared", 1u32)
                .with_asset("c3", "c", String::from("gamma")),
        );
        let manifest = ManifestIndex::from_entries(vec![
            ManifestEntry::new("a", "c1", "a", [ContainerId::from("c2")]),
            ManifestEntry::new("b", "c1", "b", []),
            ManifestEntry::new("c", "c3", "c", []),
            ManifestEntry::new("broken", "c1", "not-there", []),
        ]);
        let cache = ResourceCache::new(
            Arc::new(manifest),
            store.clone(),
            CacheConfig {
                max_idle_assets: max_idle,
            },
        );
        (store, cache)
    }

    #[test]
    fn test_load_creates_entry_with_one_reference() {
        let (_store, mut cache) = cache_with(None);
        let asset = cache.load("a").unwrap();
        assert_eq!(asset.downcast_ref::<String>().map(String::as_str), Some("alpha"));
        assert_eq!(cache.ref_count(Fingerprint::of("a")), Some(1));
        assert_eq!(cache.bundles().ref_count(&"c1".into()), 1);
        assert_eq!(cache.bundles().ref_count(&"c2".into()), 1);
    }

    #[test]
    fn test_release_moves_to_idle_and_reload_hits() {
        let (store, mut cache) = cache_with(None);
        let fp = Fingerprint::of("a");
        let first = cache.load("a").unwrap();
        assert_eq!(cache.release(fp, false).unwrap(), ReleaseOutcome::Idle);
        assert!(cache.is_idle(fp));

        let second = cache.load("a").unwrap();
        assert!(first.same_payload(&second));
        assert!(!cache.is_idle(fp));
        assert_eq!(store.counters().loads_of(&"c1".into()), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_over_release_is_clamped() {
        let (_store, mut cache) = cache_with(None);
        let fp = Fingerprint::of("a");
        cache.load("a").unwrap();
        cache.release(fp, false).unwrap();
        assert_eq!(
            cache.release(fp, false),
            Err(AssetError::RefCount(RefCountError::AlreadyIdle(fp)))
        );
        assert_eq!(cache.ref_count(fp), Some(0));
        assert!(cache.is_idle(fp));
    }

    #[test]
    fn test_release_unknown_is_reported() {
        let (_store, mut cache) = cache_with(None);
        let fp = Fingerprint::of("a");
        assert_eq!(
            cache.release(fp, false),
            Err(AssetError::RefCount(RefCountError::UnknownAsset(fp)))
        );
    }

    #[test]
    fn test_force_destroy_releases_containers() {
        let (store, mut cache) = cache_with(None);
        let fp = Fingerprint::of("a");
        cache.load("a").unwrap();
        assert_eq!(cache.release(fp, true).unwrap(), ReleaseOutcome::Destroyed);
        assert!(!cache.contains(fp));
        assert!(!cache.is_idle(fp));
        assert_eq!(cache.bundles().loaded_count(), 0);
        assert_eq!(store.counters().unloads_of(&"c2".into()), 1);
    }

    #[test]
    fn test_force_destroy_waits_for_last_reference() {
        let (_store, mut cache) = cache_with(None);
        let fp = Fingerprint::of("a");
        cache.load("a").unwrap();
        cache.load("a").unwrap();
        assert_eq!(cache.release(fp, true).unwrap(), ReleaseOutcome::Referenced(1));
        assert!(cache.contains(fp));
    }

    #[test]
    fn test_shared_container_survives_one_asset() {
        let (_store, mut cache) = cache_with(None);
        cache.load("a").unwrap();
        cache.load("b").unwrap();
        assert_eq!(cache.bundles().ref_count(&"c1".into()), 2);
        cache.release(Fingerprint::of("a"), true).unwrap();
        assert_eq!(cache.bundles().ref_count(&"c1".into()), 1);
        assert!(!cache.bundles().is_loaded(&"c2".into()));
    }

    #[test]
    fn test_unknown_path_is_resolution_error() {
        let (_store, mut cache) = cache_with(None);
        let err = cache.load("nowhere").unwrap_err();
        assert!(matches!(err, AssetError::Resolution { .. }));
        assert!(err.is_recoverable());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failed_loads, 1);
    }

    #[test]
    fn test_failed_extract_returns_container_refs() {
        let (_store, mut cache) = cache_with(None);
        cache.load("b").unwrap();
        let err = cache.load("broken").unwrap_err();
        assert!(matches!(err, AssetError::Extract { .. }));
        assert_eq!(cache.bundles().ref_count(&"c1".into()), 1);
        assert_eq!(cache.ref_count(Fingerprint::of("b")), Some(1));
    }

    #[test]
    fn test_acquire_loads_known_fingerprint() {
        let (_store, mut cache) = cache_with(None);
        let asset = cache.acquire(Fingerprint::of("c")).unwrap();
        assert_eq!(asset.downcast_ref::<String>().map(String::as_str), Some("gamma"));
        assert!(matches!(
            cache.acquire(Fingerprint::from_raw(1)),
            Err(AssetError::Resolution { .. })
        ));
    }

    #[test]
    fn test_evict_least_recently_used_order() {
        let (_store, mut cache) = cache_with(None);
        for path in ["a", "b", "c"] {
            cache.load(path).unwrap();
        }
        for path in ["b", "a", "c"] {
            cache.release_path(path, false).unwrap();
        }
        assert_eq!(
            cache.idle_fingerprints(),
            vec![Fingerprint::of("c"), Fingerprint::of("a"), Fingerprint::of("b")]
        );
        assert_eq!(cache.evict_least_recently_used(2), 2);
        assert!(!cache.contains(Fingerprint::of("b")));
        assert!(!cache.contains(Fingerprint::of("a")));
        assert!(cache.is_idle(Fingerprint::of("c")));
        assert_eq!(cache.evict_least_recently_used(5), 1);
        assert_eq!(cache.idle_count(), 0);
    }

    #[test]
    fn test_idle_budget_triggers_eviction() {
        let (_store, mut cache) = cache_with(Some(1));
        cache.load("a").unwrap();
        cache.load("c").unwrap();
        cache.release_path("a", false).unwrap();
        assert_eq!(cache.release_path("c", false).unwrap(), ReleaseOutcome::Idle);
        assert!(!cache.contains(Fingerprint::of("a")));
        assert!(cache.is_idle(Fingerprint::of("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_zero_budget_destroys_on_release() {
        let (_store, mut cache) = cache_with(Some(0));
        cache.load("a").unwrap();
        assert_eq!(cache.release_path("a", false).unwrap(), ReleaseOutcome::Destroyed);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_release_by_payload() {
        let (_store, mut cache) = cache_with(None);
        let asset = cache.load("c").unwrap();
        assert_eq!(
            cache.release_payload(asset.payload(), false).unwrap(),
            ReleaseOutcome::Idle
        );
        let stranger: Payload = Arc::new(5u8);
        assert_eq!(
            cache.release_payload(&stranger, false),
            Err(AssetError::RefCount(RefCountError::UnknownPayload))
        );
    }

    #[test]
    fn test_release_by_shared_payload_reaches_every_alias() {
        let store = Arc::new(MemoryBundleStore::new().with_asset("c1", "a", String::from("alpha")));
        let manifest = ManifestIndex::from_entries(vec![
            ManifestEntry::new("a", "c1", "a", []),
            ManifestEntry::new("alias", "c1", "a", []),
        ]);
        let mut cache = ResourceCache::new(Arc::new(manifest), store, CacheConfig::default());
        let first = cache.load("a").unwrap();
        let second = cache.load("alias").unwrap();
        assert!(Arc::ptr_eq(first.payload(), second.payload()));

        let payload = first.payload().clone();
        assert_eq!(cache.release_payload(&payload, false).unwrap(), ReleaseOutcome::Idle);
        assert_eq!(cache.release_payload(&payload, false).unwrap(), ReleaseOutcome::Idle);
        assert!(cache.is_idle(Fingerprint::of("a")));
        assert!(cache.is_idle(Fingerprint::of("alias")));

        cache.evict_least_recently_used(1);
        assert_eq!(cache.payload_fingerprint(&payload), Some(Fingerprint::of("alias")));
    }

    #[test]
    fn test_preload_and_scene_clear() {
        let (_store, mut cache) = cache_with(None);
        cache.preload("a").unwrap();
        cache.load("c").unwrap();
        cache.release_path("c", false).unwrap();
        cache.load("b").unwrap();

        assert_eq!(cache.clear_scene_scoped(), 1);
        assert!(cache.is_idle(Fingerprint::of("a")));
        assert!(!cache.contains(Fingerprint::of("c")));
        // Referenced assets survive scene clears
        assert_eq!(cache.ref_count(Fingerprint::of("b")), Some(1));
    }

    #[test]
    fn test_shutdown_reports_leaks() {
        let (store, mut cache) = cache_with(None);
        cache.load("a").unwrap();
        cache.load("c").unwrap();
        cache.release_path("c", false).unwrap();
        assert_eq!(cache.shutdown(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.bundles().loaded_count(), 0);
        assert_eq!(store.counters().unloads_of(&"c3".into()), 1);
    }
}
