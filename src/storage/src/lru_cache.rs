// Copyright (c) 2025-present, the Vireo Authors.  All rights reserved.
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

//! Bounded, sharded-lock LRU map backing the statistics, scan-cursor and
//! SPOP progress stores.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    num::NonZeroUsize,
};

use lru::LruCache as InnerLru;
use parking_lot::Mutex;

const DEFAULT_SHARDS: usize = 16;

pub struct LRUCache<K, V> {
    shards: Vec<Mutex<InnerLru<K, V>>>,
}

impl<K: Hash + Eq, V: Clone> LRUCache<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_shards(capacity, DEFAULT_SHARDS)
    }

    pub fn with_capacity_and_shards(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new((capacity / shards).max(1)).unwrap();
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(InnerLru::new(per_shard)))
                .collect(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &Mutex<InnerLru<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.shard_for(key).lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.shard_for(&key).lock().put(key, value);
    }

    /// Read-modify-write under one shard lock.
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let shard = self.shard_for(&key);
        let mut guard = shard.lock();
        let next = f(guard.get(&key).map(|v| &*v));
        guard.put(key, next.clone());
        next
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard_for(key).lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let cache: LRUCache<String, u64> = LRUCache::with_capacity(64);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        assert_eq!(cache.lookup(&"a".to_string()), Some(1));
        assert_eq!(cache.lookup(&"missing".to_string()), None);
        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert_eq!(cache.lookup(&"a".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_read_modify_write() {
        let cache: LRUCache<String, u64> = LRUCache::with_capacity(64);
        let v = cache.update("k".to_string(), |old| old.copied().unwrap_or(0) + 1);
        assert_eq!(v, 1);
        let v = cache.update("k".to_string(), |old| old.copied().unwrap_or(0) + 1);
        assert_eq!(v, 2);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache: LRUCache<u64, u64> = LRUCache::with_capacity_and_shards(4, 1);
        for i in 0..100 {
            cache.insert(i, i);
        }
        assert!(cache.len() <= 4);
        // Most recent entry survives.
        assert_eq!(cache.lookup(&99), Some(99));
    }

    #[test]
    fn test_clear() {
        let cache: LRUCache<u64, u64> = LRUCache::with_capacity(16);
        cache.insert(1, 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
