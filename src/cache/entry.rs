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

use crate::bundle::{ContainerId, Payload};
use crate::fingerprint::Fingerprint;
use crate::manifest::Dependencies;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// One acquired reference to a cached asset.
///
/// Every `AssetRef` handed out by the cache must be matched by exactly one
/// release of its fingerprint.
#[derive(Clone)]
pub struct AssetRef {
    fingerprint: Fingerprint,
    payload: Payload,
}

impl AssetRef {
    pub(crate) fn new(fingerprint: Fingerprint, payload: Payload) -> Self {
        Self {
            fingerprint,
            payload,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// True if both refer to the same decoded payload instance
    pub fn same_payload(&self, other: &AssetRef) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRef")
            .field("fingerprint", &self.fingerprint)
            .field("payload", &Arc::as_ptr(&self.payload))
            .finish()
    }
}

/// Decoded asset owned by the cache
pub struct CachedAsset {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) path: String,
    pub(crate) payload: Payload,
    pub(crate) container: ContainerId,
    pub(crate) dependencies: Dependencies,
    pub(crate) ref_count: usize,
    pub(crate) last_use_tick: u64,
    pub(crate) clear_on_scene_change: bool,
}

impl CachedAsset {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn dependencies(&self) -> &[ContainerId] {
        &self.dependencies
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Cache tick of the last acquire or release
    pub fn last_use_tick(&self) -> u64 {
        self.last_use_tick
    }

    pub fn clear_on_scene_change(&self) -> bool {
        self.clear_on_scene_change
    }

    pub(crate) fn asset_ref(&self) -> AssetRef {
        AssetRef::new(self.fingerprint, self.payload.clone())
    }
}

/// What a release did to the asset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other references remain
    Referenced(usize),
    /// Count reached zero; the asset is kept warm in the idle list
    Idle,
    /// Count reached zero and the asset was destroyed
    Destroyed,
}

/// Cache statistics
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub failed_loads: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}
