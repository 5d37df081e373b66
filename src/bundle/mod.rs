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

// Bundle Module
//
// Containers and their reference counts:
// - Bundle store collaborator contract
// - In-memory and directory backed stores
// - Reference table for loaded containers

pub mod dir;
pub mod memory;
pub mod store;
pub mod table;

pub use dir::{DataBlob, DirBundleStore};
pub use memory::{MemoryBundleStore, StoreCounters};
pub use store::{BundleStore, ContainerFuture, ContainerHandle, ContainerId, Payload};
pub use table::{BundleTable, Prefetched};
