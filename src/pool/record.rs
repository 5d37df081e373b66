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

/// Bookkeeping record that can be cleared for reuse.
///
/// `reset` must leave the record indistinguishable from `Default::default()`
/// apart from retained allocations; stale callbacks must not survive it.
pub trait Recycle: Default {
    fn reset(&mut self);
}

impl<T> Recycle for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Record pool statistics
#[derive(Clone, Debug, Default)]
pub struct RecordPoolStats {
    /// Records handed out from the free list
    pub reused: u64,
    /// Records created because the free list was empty
    pub created: u64,
    /// Records dropped because the pool was full
    pub dropped: u64,
}

/// Free list of reusable bookkeeping records
pub struct RecordPool<T: Recycle> {
    free: Vec<T>,
    max_free: usize,
    stats: RecordPoolStats,
}

impl<T: Recycle> RecordPool<T> {
    /// Pool keeping at most `max_free` idle records
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_free.min(64)),
            max_free,
            stats: RecordPoolStats::default(),
        }
    }

    /// Take a cleared record
    pub fn spawn(&mut self) -> T {
        match self.free.pop() {
            Some(record) => {
                self.stats.reused += 1;
                record
            }
            None => {
                self.stats.created += 1;
                T::default()
            }
        }
    }

    /// Reset a record and keep it for reuse if there is room
    pub fn recycle(&mut self, mut record: T) {
        record.reset();
        if self.free.len() < self.max_free {
            self.free.push(record);
        } else {
            self.stats.dropped += 1;
        }
    }

    /// Idle records currently held
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn max_free(&self) -> usize {
        self.max_free
    }

    pub fn stats(&self) -> &RecordPoolStats {
        &self.stats
    }

    /// Drop all idle records
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

impl<T: Recycle> Default for RecordPool<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        id: u32,
        payload: Vec<u8>,
    }

    impl Recycle for Record {
        fn reset(&mut self) {
            self.id = 0;
            self.payload.clear();
        }
    }

    #[test]
    fn test_spawn_creates_when_empty() {
        let mut pool: RecordPool<Record> = RecordPool::new(4);
        let record = pool.spawn();
        assert_eq!(record.id, 0);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_recycled_records_are_reset() {
        let mut pool = RecordPool::new(4);
        let mut record: Record = pool.spawn();
        record.id = 7;
        record.payload.extend_from_slice(&[1, 2, 3]);
        pool.recycle(record);

        let reused = pool.spawn();
        assert_eq!(reused.id, 0);
        assert!(reused.payload.is_empty());
        assert!(reused.payload.capacity() >= 3);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_pool_capacity() {
        let mut pool: RecordPool<Vec<u32>> = RecordPool::new(2);
        for _ in 0..3 {
            pool.recycle(vec![1]);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.stats().dropped, 1);
        pool.clear();
        assert_eq!(pool.available(), 0);
    }
}
