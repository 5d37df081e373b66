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

//! Cooperative asynchronous load scheduler.
//!
//! Requests are queued per priority tier and coalesced per fingerprint: every
//! requester of the same asset attaches its callback to one [`PendingLoad`].
//! [`AsyncLoadScheduler::tick`] runs one scheduling pass. Only one load is in
//! flight at a time; while its container futures are pending the pass ends,
//! and the next tick polls them again.

pub mod pending;

pub use pending::{
    LoadCallback, LoadHandle, LoadOutcome, LoadPriority, PendingId, PendingLoad, SchedulerStats,
};

use crate::bundle::{ContainerFuture, ContainerId, Prefetched};
use crate::cache::{AssetRef, ResourceCache};
use crate::config::SchedulerConfig;
use crate::error::{AssetError, Result};
use crate::fingerprint::Fingerprint;
use crate::pool::record::RecordPool;
use ahash::AHashMap;
use futures::task::noop_waker_ref;
use pending::Waiter;
use slotmap::SlotMap;
use std::collections::VecDeque;
use std::future::Future;
use std::task::{Context, Poll};
use std::time::Instant;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// The load currently being fetched
struct InFlight {
    fingerprint: Fingerprint,
    path: String,
    /// `None` once every requester cancelled
    pending: Option<PendingId>,
    fetches: Vec<(ContainerId, ContainerFuture)>,
    fetched: Prefetched,
    error: Option<AssetError>,
}

impl InFlight {
    /// Poll every outstanding fetch once; true when none are left
    fn poll(&mut self) -> bool {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut index = 0;
        while index < self.fetches.len() {
            match self.fetches[index].1.as_mut().poll(&mut cx) {
                Poll::Pending => index += 1,
                Poll::Ready(result) => {
                    let (id, _) = self.fetches.swap_remove(index);
                    match result {
                        Ok(handle) => {
                            self.fetched.insert(id, handle);
                        }
                        Err(err) => {
                            tracing::error!(container = %id, path = %self.path, "async container load failed: {err}");
                            self.error = Some(err);
                            // Remaining fetches are dropped
                            self.fetches.clear();
                        }
                    }
                }
            }
        }
        self.fetches.is_empty()
    }
}

/// Priority queue of asynchronous asset loads
pub struct AsyncLoadScheduler {
    config: SchedulerConfig,
    pending: SlotMap<PendingId, PendingLoad>,
    by_fingerprint: AHashMap<Fingerprint, PendingId>,
    /// FIFO per tier; ids of cancelled records are skipped when popped
    tiers: [VecDeque<PendingId>; 3],
    in_flight: Option<InFlight>,
    records: RecordPool<PendingLoad>,
    next_waiter: u64,
    stats: SchedulerStats,
}

impl AsyncLoadScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            records: RecordPool::new(config.record_pool_size),
            config,
            pending: SlotMap::with_key(),
            by_fingerprint: AHashMap::new(),
            tiers: Default::default(),
            in_flight: None,
            next_waiter: 1,
            stats: SchedulerStats::default(),
        }
    }

    /// Request `path` without blocking.
    ///
    /// Cached or unresolvable assets are answered before this returns and the
    /// handle is inert. Otherwise the callback runs from a later [`tick`](Self::tick).
    pub fn request_async<F>(
        &mut self,
        cache: &mut ResourceCache,
        path: &str,
        priority: LoadPriority,
        callback: F,
    ) -> LoadHandle
    where
        F: FnOnce(LoadOutcome) + 'static,
    {
        let fingerprint = Fingerprint::of(path);
        self.stats.requests += 1;

        if cache.contains(fingerprint) || !cache.manifest().contains(fingerprint) {
            self.stats.immediate += 1;
            let result = cache.load(path);
            callback(LoadOutcome {
                fingerprint,
                path: path.to_string(),
                result,
            });
            return LoadHandle::inert(fingerprint);
        }

        let waiter = Waiter {
            id: self.next_waiter,
            callback: Box::new(callback),
        };
        self.next_waiter += 1;
        let handle = LoadHandle::new(fingerprint, waiter.id);

        if let Some(record) = self
            .by_fingerprint
            .get(&fingerprint)
            .and_then(|&id| self.pending.get_mut(id))
        {
            // Attaching never changes the tier of the existing record
            record.waiters.push(waiter);
            self.stats.coalesced += 1;
            return handle;
        }

        let mut record = self.records.spawn();
        record.fingerprint = fingerprint;
        record.path.push_str(path);
        record.priority = priority;
        record.waiters.push(waiter);
        let id = self.pending.insert(record);
        self.by_fingerprint.insert(fingerprint, id);

        match self.in_flight.as_mut() {
            // An abandoned load of the same asset is still running; adopt it
            Some(flight) if flight.fingerprint == fingerprint && flight.pending.is_none() => {
                flight.pending = Some(id);
            }
            _ => self.tiers[priority.index()].push_back(id),
        }
        tracing::trace!(path, ?priority, "async load queued");
        handle
    }

    /// Detach one callback. False if it already ran or was cancelled.
    ///
    /// The last detach removes the pending load; a load already in flight
    /// still finishes and returns its containers to the store.
    pub fn cancel(&mut self, handle: LoadHandle) -> bool {
        if handle.is_inert() {
            return false;
        }
        let Some(&id) = self.by_fingerprint.get(&handle.fingerprint()) else {
            return false;
        };
        let Some(record) = self.pending.get_mut(id) else {
            return false;
        };
        let Some(position) = record.waiters.iter().position(|w| w.id == handle.waiter()) else {
            return false;
        };

        record.waiters.remove(position);
        self.stats.cancelled += 1;
        if record.waiters.is_empty() {
            if let Some(record) = self.remove_record(id) {
                self.records.recycle(record);
            }
            if let Some(flight) = self.in_flight.as_mut() {
                if flight.pending == Some(id) {
                    flight.pending = None;
                }
            }
        }
        true
    }

    /// Drop every pending request without running its callback; returns how many callbacks were dropped
    pub fn cancel_all(&mut self) -> usize {
        let dropped: usize = self.pending.values().map(PendingLoad::waiter_count).sum();
        self.stats.cancelled += dropped as u64;
        for (_, record) in self.pending.drain() {
            self.records.recycle(record);
        }
        self.by_fingerprint.clear();
        for tier in &mut self.tiers {
            tier.clear();
        }
        if let Some(flight) = self.in_flight.as_mut() {
            flight.pending = None;
        }
        dropped
    }

    /// Cancel everything and abandon the load in flight, returning the
    /// containers it already fetched to the store
    pub fn shutdown(&mut self, cache: &ResourceCache) -> usize {
        let dropped = self.cancel_all();
        if let Some(flight) = self.in_flight.take() {
            tracing::debug!(
                path = %flight.path,
                fetched = flight.fetched.len(),
                "in-flight load abandoned at shutdown"
            );
            cache.bundles().discard(flight.fetched);
        }
        dropped
    }

    fn remove_record(&mut self, id: PendingId) -> Option<PendingLoad> {
        let record = self.pending.remove(id)?;
        self.by_fingerprint.remove(&record.fingerprint);
        Some(record)
    }

    /// Run one scheduling pass; returns how many loads finished
    pub fn tick(&mut self, cache: &mut ResourceCache) -> usize {
        #[cfg(feature = "profiling")]
        let _span = info_span!("scheduler.tick").entered();

        let started = Instant::now();
        let time_slice = self.config.time_slice();
        let mut finished = 0;

        loop {
            if self.in_flight.is_none() {
                match self.start_next(cache) {
                    Some(flight) => self.in_flight = Some(flight),
                    None => break,
                }
            }

            let ready = match self.in_flight.as_mut() {
                Some(flight) => flight.poll(),
                None => break,
            };
            if !ready {
                break;
            }
            if let Some(flight) = self.in_flight.take() {
                self.finish(cache, flight);
                finished += 1;
            }

            if started.elapsed() >= time_slice {
                if !self.is_idle() {
                    self.stats.yields += 1;
                }
                break;
            }
        }
        finished
    }

    /// Pop the next live record, highest tier first, and begin fetching what it needs
    fn start_next(&mut self, cache: &ResourceCache) -> Option<InFlight> {
        let id = self.pop_queued()?;
        let record = self.pending.get(id)?;
        let fingerprint = record.fingerprint;
        self.stats.started += 1;

        let mut flight = InFlight {
            fingerprint,
            path: record.path.clone(),
            pending: Some(id),
            fetches: Vec::new(),
            fetched: Prefetched::default(),
            error: None,
        };

        if cache.contains(fingerprint) {
            return Some(flight);
        }
        match cache.manifest().get(fingerprint) {
            Some(location) => {
                let needed = std::iter::once(&location.container).chain(location.dependencies.iter());
                let store = cache.bundles().store();
                for container in cache.bundles().missing(needed) {
                    let future = store.load_async(&container);
                    flight.fetches.push((container, future));
                }
                tracing::debug!(
                    path = %flight.path,
                    containers = flight.fetches.len(),
                    "async load started"
                );
            }
            None => {
                flight.error = Some(AssetError::Resolution {
                    fingerprint,
                    path: flight.path.clone(),
                });
            }
        }
        Some(flight)
    }

    fn pop_queued(&mut self) -> Option<PendingId> {
        for tier in &mut self.tiers {
            while let Some(id) = tier.pop_front() {
                if self.pending.contains_key(id) {
                    return Some(id);
                }
            }
        }
        None
    }

    fn finish(&mut self, cache: &mut ResourceCache, flight: InFlight) {
        let InFlight {
            fingerprint,
            path,
            pending,
            mut fetched,
            error,
            ..
        } = flight;

        let Some(mut record) = pending.and_then(|id| self.remove_record(id)) else {
            self.stats.orphaned += 1;
            tracing::debug!(path = %path, "async load finished without requesters");
            cache.bundles().discard(fetched);
            return;
        };

        let result = match error {
            Some(err) => {
                tracing::error!(fingerprint = %fingerprint, path = %path, "async load failed: {err}");
                Err(err)
            }
            None => cache.load_prefetched(fingerprint, &path, &mut fetched),
        };
        if !fetched.is_empty() {
            cache.bundles().discard(fetched);
        }

        if result.is_ok() {
            self.stats.completed += 1;
        } else {
            self.stats.failed += 1;
        }
        self.deliver(cache, &mut record, result);
        self.records.recycle(record);
    }

    /// Run callbacks in attachment order, each with its own reference
    fn deliver(&mut self, cache: &mut ResourceCache, record: &mut PendingLoad, result: Result<AssetRef>) {
        let fingerprint = record.fingerprint;
        let shared_error = result.as_ref().err().cloned();
        let mut first = Some(result);

        for waiter in record.waiters.drain(..) {
            let result = match (first.take(), &shared_error) {
                (Some(result), _) => result,
                (None, Some(err)) => Err(err.clone()),
                (None, None) => cache.acquire(fingerprint),
            };
            (waiter.callback)(LoadOutcome {
                fingerprint,
                path: record.path.clone(),
                result,
            });
        }

        // Nobody took the reference from the load
        if let Some(Ok(asset)) = first {
            let _ = cache.release(asset.fingerprint(), false);
        }
    }

    /// True while a load for `path` is queued or in flight with requesters
    pub fn is_pending(&self, path: &str) -> bool {
        self.by_fingerprint.contains_key(&Fingerprint::of(path))
    }

    /// Pending loads with at least one requester
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Live records waiting in one tier, excluding the load in flight
    pub fn queued_len(&self, priority: LoadPriority) -> usize {
        self.tiers[priority.index()]
            .iter()
            .filter(|&&id| self.pending.contains_key(id))
            .count()
    }

    pub fn pending_load(&self, path: &str) -> Option<&PendingLoad> {
        let id = self.by_fingerprint.get(&Fingerprint::of(path))?;
        self.pending.get(*id)
    }

    /// True once nothing is queued and nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn record_pool(&self) -> &RecordPool<PendingLoad> {
        &self.records
    }
}
