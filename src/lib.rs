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

//! Bundle Cache - runtime asset loading and lifecycle management
//!
//! Resolves logical asset paths to loadable containers, caches decoded
//! assets by reference count with an LRU of idle entries, serializes
//! asynchronous loads through a cooperative priority scheduler, and
//! recycles instantiated objects through per-asset pools.

pub mod bundle;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod lru_list;
pub mod manifest;
pub mod pool;
pub mod prelude;
pub mod scheduler;

pub use bundle::{
    BundleStore, BundleTable, ContainerFuture, ContainerHandle, ContainerId, DirBundleStore,
    MemoryBundleStore, Payload,
};
pub use cache::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use fingerprint::*;
pub use lru_list::LruList;
pub use manifest::*;
pub use pool::{
    InstanceId, InstancePool, InstanceRelease, Instantiator, PooledInstance, ReleaseOptions,
    RecordPool, Recycle,
};
pub use scheduler::{
    AsyncLoadScheduler, LoadCallback, LoadHandle, LoadOutcome, LoadPriority, SchedulerStats,
};
