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

use crate::error::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Decoded asset extracted from a container
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Pending asynchronous container load
pub type ContainerFuture = BoxFuture<'static, Result<ContainerHandle>>;

/// Identifier of a loadable container (bundle name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to a container loaded by a [`BundleStore`].
///
/// The concrete container type belongs to the store; only the store
/// looks inside it.
#[derive(Clone)]
pub struct ContainerHandle(Arc<dyn Any + Send + Sync>);

impl ContainerHandle {
    pub fn new<T: Any + Send + Sync>(container: T) -> Self {
        Self(Arc::new(container))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True if both handles refer to the same loaded container
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContainerHandle")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Collaborator that loads containers and extracts assets from them.
///
/// Calls must be idempotent per container id: reference counting is the
/// job of [`BundleTable`](crate::bundle::BundleTable), not the store.
pub trait BundleStore: Send + Sync {
    /// Load a container, blocking until it is available
    fn load_sync(&self, id: &ContainerId) -> Result<ContainerHandle>;

    /// Begin loading a container; the future is polled cooperatively
    fn load_async(&self, id: &ContainerId) -> ContainerFuture;

    /// Extract a named asset from a loaded container
    fn extract(&self, container: &ContainerHandle, asset_name: &str) -> Option<Payload>;

    /// Called once a container's last reference is released
    fn unload(&self, _id: &ContainerId, _container: ContainerHandle) {}
}
