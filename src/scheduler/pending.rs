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

use crate::cache::AssetRef;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::pool::record::Recycle;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Slot of a pending load record
    pub struct PendingId;
}

/// Scheduling tier. Higher tiers always drain first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoadPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl LoadPriority {
    /// All tiers, highest first
    pub const ALL: [LoadPriority; 3] = [LoadPriority::High, LoadPriority::Medium, LoadPriority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            LoadPriority::High => 0,
            LoadPriority::Medium => 1,
            LoadPriority::Low => 2,
        }
    }
}

/// Result handed to a load callback.
///
/// On success the callback owns one cache reference and must release it.
#[derive(Debug)]
pub struct LoadOutcome {
    pub fingerprint: Fingerprint,
    pub path: String,
    pub result: Result<AssetRef>,
}

/// Single-shot completion callback
pub type LoadCallback = Box<dyn FnOnce(LoadOutcome)>;

/// Ticket for one attached callback, used to cancel it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoadHandle {
    fingerprint: Fingerprint,
    waiter: u64,
}

impl LoadHandle {
    pub(crate) fn new(fingerprint: Fingerprint, waiter: u64) -> Self {
        Self { fingerprint, waiter }
    }

    /// Handle for a request that completed before returning
    pub(crate) fn inert(fingerprint: Fingerprint) -> Self {
        Self::new(fingerprint, 0)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// True if the callback already ran inside the request call
    pub fn is_inert(&self) -> bool {
        self.waiter == 0
    }

    pub(crate) fn waiter(&self) -> u64 {
        self.waiter
    }
}

pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) callback: LoadCallback,
}

/// Outstanding load shared by every requester of one fingerprint
pub struct PendingLoad {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) path: String,
    pub(crate) priority: LoadPriority,
    /// Callbacks in attachment order
    pub(crate) waiters: Vec<Waiter>,
}

impl PendingLoad {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn priority(&self) -> LoadPriority {
        self.priority
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Default for PendingLoad {
    fn default() -> Self {
        Self {
            fingerprint: Fingerprint::from_raw(0),
            path: String::new(),
            priority: LoadPriority::default(),
            waiters: Vec::new(),
        }
    }
}

impl Recycle for PendingLoad {
    fn reset(&mut self) {
        self.fingerprint = Fingerprint::from_raw(0);
        self.path.clear();
        self.priority = LoadPriority::default();
        self.waiters.clear();
    }
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("fingerprint", &self.fingerprint)
            .field("path", &self.path)
            .field("priority", &self.priority)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// Scheduler statistics
#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    pub requests: u64,
    /// Requests answered inside the request call
    pub immediate: u64,
    /// Requests attached to an existing pending load
    pub coalesced: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Loads that finished after every requester cancelled
    pub orphaned: u64,
    /// Passes cut short by the time slice
    pub yields: u64,
}
