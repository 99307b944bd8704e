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

//! Named mutexes keyed by record (user key) bytes.
//!
//! Every mutating storage operation serializes per user key through this
//! table; multi-key operations acquire their locks in sorted order, which
//! keeps any composition of them deadlock free.

use std::{
    collections::{HashSet, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{Arc, Condvar, Mutex},
};

use crate::status::Status;

struct LockMapShard {
    keys: Mutex<HashSet<String>>,
    condvar: Condvar,
}

impl LockMapShard {
    fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            condvar: Condvar::new(),
        }
    }
}

pub struct LockMgr {
    shards: Vec<Arc<LockMapShard>>,
}

impl LockMgr {
    pub fn new(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            shards: (0..num_shards)
                .map(|_| Arc::new(LockMapShard::new()))
                .collect(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Arc<LockMapShard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Blocks until the named mutex for `key` is acquired.
    pub fn lock(&self, key: &str) -> Status {
        let shard = self.shard_for(key);
        let mut keys = shard.keys.lock().expect("lock map mutex is poisoned");
        while keys.contains(key) {
            keys = shard.condvar.wait(keys).expect("lock map condvar is poisoned");
        }
        keys.insert(key.to_string());
        Status::ok()
    }

    pub fn try_lock(&self, key: &str) -> Status {
        let shard = self.shard_for(key);
        let mut keys = shard.keys.lock().expect("lock map mutex is poisoned");
        if keys.contains(key) {
            return Status::busy("lock already held");
        }
        keys.insert(key.to_string());
        Status::ok()
    }

    pub fn unlock(&self, key: &str) {
        let shard = self.shard_for(key);
        let mut keys = shard.keys.lock().expect("lock map mutex is poisoned");
        keys.remove(key);
        drop(keys);
        shard.condvar.notify_all();
    }
}

/// RAII guard over a single record lock.
pub struct ScopeRecordLock<'a> {
    mgr: &'a LockMgr,
    key: String,
    locked: bool,
}

impl<'a> ScopeRecordLock<'a> {
    pub fn new(mgr: &'a LockMgr, key: &str) -> Self {
        let key = key.to_string();
        let locked = mgr.lock(&key).is_ok();
        Self { mgr, key, locked }
    }

    pub fn try_new(mgr: &'a LockMgr, key: &str) -> Option<Self> {
        let key = key.to_string();
        mgr.try_lock(&key).is_ok().then_some(Self {
            mgr,
            key,
            locked: true,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for ScopeRecordLock<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.mgr.unlock(&self.key);
        }
    }
}

/// RAII guard over several record locks.
///
/// Keys are deduplicated and acquired in sorted order; release happens in
/// reverse order on drop.
pub struct MultiScopeRecordLock<'a> {
    mgr: &'a LockMgr,
    keys: Vec<String>,
}

impl<'a> MultiScopeRecordLock<'a> {
    pub fn new(mgr: &'a LockMgr, keys: &[String]) -> Self {
        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        for key in &sorted {
            mgr.lock(key);
        }
        Self { mgr, keys: sorted }
    }

    pub fn try_new(mgr: &'a LockMgr, keys: &[String]) -> Option<Self> {
        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        for (idx, key) in sorted.iter().enumerate() {
            if !mgr.try_lock(key).is_ok() {
                for locked in sorted[..idx].iter().rev() {
                    mgr.unlock(locked);
                }
                return None;
            }
        }
        Some(Self { mgr, keys: sorted })
    }

    pub fn is_locked(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl Drop for MultiScopeRecordLock<'_> {
    fn drop(&mut self) {
        for key in self.keys.iter().rev() {
            self.mgr.unlock(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicI64, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_basic_lock_unlock() {
        let mgr = LockMgr::new(4);
        assert!(mgr.lock("test_key").is_ok());
        assert!(!mgr.try_lock("test_key").is_ok());
        mgr.unlock("test_key");
        assert!(mgr.try_lock("test_key").is_ok());
        mgr.unlock("test_key");
    }

    #[test]
    fn test_scope_record_lock() {
        let mgr = LockMgr::new(4);
        {
            let lock = ScopeRecordLock::new(&mgr, "test_key");
            assert!(lock.is_locked());
            assert!(ScopeRecordLock::try_new(&mgr, "test_key").is_none());
        }
        assert!(ScopeRecordLock::try_new(&mgr, "test_key").is_some());
    }

    #[test]
    fn test_lock_serializes_same_key() {
        let mgr = Arc::new(LockMgr::new(4));
        let counter = Arc::new(AtomicI64::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let _lock = ScopeRecordLock::new(&mgr, "shared_key");
                    let current = counter.load(Ordering::Acquire);
                    thread::sleep(Duration::from_millis(1));
                    counter.store(current + 1, Ordering::Release);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Acquire), 10);
    }

    #[test]
    fn test_lock_released_on_panic() {
        let mgr = Arc::new(LockMgr::new(4));
        let mgr_clone = Arc::clone(&mgr);

        let handle = thread::spawn(move || {
            let _lock = ScopeRecordLock::new(&mgr_clone, "panic_key");
            panic!("simulated panic while holding lock");
        });
        assert!(handle.join().is_err());

        assert!(mgr.try_lock("panic_key").is_ok());
        mgr.unlock("panic_key");
    }

    #[test]
    fn test_multi_lock_dedup_and_release() {
        let mgr = LockMgr::new(4);
        let keys = vec![
            "key2".to_string(),
            "key1".to_string(),
            "key2".to_string(),
        ];
        {
            let lock = MultiScopeRecordLock::new(&mgr, &keys);
            assert!(lock.is_locked());
            assert!(!mgr.try_lock("key1").is_ok());
            assert!(!mgr.try_lock("key2").is_ok());
        }
        assert!(mgr.try_lock("key1").is_ok());
        assert!(mgr.try_lock("key2").is_ok());
        mgr.unlock("key1");
        mgr.unlock("key2");
    }

    #[test]
    fn test_multi_lock_opposite_orders_no_deadlock() {
        let mgr = Arc::new(LockMgr::new(4));
        let rounds = 100;

        let a = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for _ in 0..rounds {
                    let keys = vec!["src".to_string(), "dst".to_string()];
                    let _lock = MultiScopeRecordLock::new(&mgr, &keys);
                }
            })
        };
        let b = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for _ in 0..rounds {
                    let keys = vec!["dst".to_string(), "src".to_string()];
                    let _lock = MultiScopeRecordLock::new(&mgr, &keys);
                }
            })
        };

        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn test_multi_lock_try_new_rolls_back() {
        let mgr = LockMgr::new(4);
        assert!(mgr.try_lock("key2").is_ok());

        let keys = vec!["key1".to_string(), "key2".to_string(), "key3".to_string()];
        assert!(MultiScopeRecordLock::try_new(&mgr, &keys).is_none());

        // key1 must have been rolled back.
        assert!(mgr.try_lock("key1").is_ok());
        mgr.unlock("key1");
        mgr.unlock("key2");
    }

    #[test]
    fn test_multi_lock_empty_keys() {
        let mgr = LockMgr::new(4);
        let keys: Vec<String> = Vec::new();
        let _lock = MultiScopeRecordLock::new(&mgr, &keys);
    }
}
