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

//! Doubly linked recency list with a key index.
//!
//! Nodes live in a generational slot arena, so links are indices rather than
//! pointers and freed slots are reused without extra allocation. The key index
//! and the linked list always hold exactly the same keys.
//!
//! Head is the most recently inserted or promoted key, tail the least.

use ahash::AHashMap;
use slotmap::{new_key_type, SlotMap};
use std::hash::Hash;

new_key_type! {
    struct NodeKey;
}

struct Node<K> {
    key: K,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

/// O(1) insert, remove and promote by key
pub struct LruList<K> {
    nodes: SlotMap<NodeKey, Node<K>>,
    index: AHashMap<K, NodeKey>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
}

impl<K: Copy + Eq + Hash> LruList<K> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_capacity_and_key(capacity),
            index: AHashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Insert `key` at the head, or promote it there if already present.
    ///
    /// Returns true if the key was not in the list before.
    pub fn insert_at_head(&mut self, key: K) -> bool {
        if let Some(&node) = self.index.get(&key) {
            self.promote(node);
            return false;
        }

        let node = self.nodes.insert(Node {
            key,
            prev: None,
            next: None,
        });
        self.link_front(node);
        self.index.insert(key, node);
        true
    }

    /// Remove `key`; false if it was not present
    pub fn remove(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(node) => {
                self.unlink(node);
                self.nodes.remove(node);
                true
            }
            None => false,
        }
    }

    /// Promote `key` to the head; false if it was not present
    pub fn move_to_head(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&node) => {
                self.promote(node);
                true
            }
            None => false,
        }
    }

    /// Least recently used key
    pub fn peek_tail(&self) -> Option<&K> {
        self.tail.map(|node| &self.nodes[node].key)
    }

    /// Most recently used key
    pub fn peek_head(&self) -> Option<&K> {
        self.head.map(|node| &self.nodes[node].key)
    }

    /// Pop the least recently used key
    pub fn remove_tail(&mut self) -> Option<K> {
        let node = self.tail?;
        self.unlink(node);
        let removed = self.nodes.remove(node)?;
        self.index.remove(&removed.key);
        Some(removed.key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn promote(&mut self, node: NodeKey) {
        if self.head == Some(node) {
            return;
        }
        self.unlink(node);
        self.link_front(node);
    }

    fn link_front(&mut self, node: NodeKey) {
        let old_head = self.head;
        {
            let entry = &mut self.nodes[node];
            entry.prev = None;
            entry.next = old_head;
        }
        match old_head {
            Some(head) => self.nodes[head].prev = Some(node),
            None => self.tail = Some(node),
        }
        self.head = Some(node);
    }

    fn unlink(&mut self, node: NodeKey) {
        let (prev, next) = {
            let entry = &mut self.nodes[node];
            (entry.prev.take(), entry.next.take())
        };
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward: Vec<K> = self.iter().copied().collect();
        let mut backward = Vec::new();
        let mut cursor = self.tail;
        while let Some(node) = cursor {
            backward.push(self.nodes[node].key);
            cursor = self.nodes[node].prev;
        }
        backward.reverse();

        forward == backward
            && forward.len() == self.index.len()
            && self.nodes.len() == self.index.len()
            && forward.iter().all(|key| self.index.contains_key(key))
    }
}

impl<K: Copy + Eq + Hash> Default for LruList<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-to-tail iterator over an [`LruList`]
pub struct Iter<'a, K> {
    list: &'a LruList<K>,
    cursor: Option<NodeKey>,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let list: &'a LruList<K> = self.list;
        let node = &list.nodes[self.cursor?];
        self.cursor = node.next;
        Some(&node.key)
    }
}
