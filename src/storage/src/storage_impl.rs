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

//! Slot-routed delegation of the Set command surface.

use crate::error::{InvalidArgumentSnafu, Result};
use crate::storage::Storage;
use crate::types::KeyInfo;

impl Storage {
    /// All keys of a multi-key operation must land on one instance.
    fn single_instance_for(&self, keys: &[&[u8]]) -> Result<usize> {
        let instance_id = self.instance_id(keys[0]);
        for key in &keys[1..] {
            if self.instance_id(key) != instance_id {
                return InvalidArgumentSnafu {
                    message: "CROSSSLOT Keys in request don't hash to the same slot".to_string(),
                }
                .fail();
            }
        }
        Ok(instance_id)
    }

    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> Result<i32> {
        self.get_instance(key).sadd(key, members)
    }

    pub fn scard(&self, key: &[u8]) -> Result<i32> {
        self.get_instance(key).scard(key)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.get_instance(key).sismember(key, member)
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.get_instance(key).smembers(key)
    }

    pub fn smembers_with_ttl(&self, key: &[u8]) -> Result<(Vec<Vec<u8>>, i64)> {
        self.get_instance(key).smembers_with_ttl(key)
    }

    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> Result<i32> {
        self.get_instance(key).srem(key, members)
    }

    pub fn spop(&self, key: &[u8], count: i64) -> Result<Vec<Vec<u8>>> {
        self.get_instance(key).spop(key, count)
    }

    pub fn srandmember(&self, key: &[u8], count: i32) -> Result<Vec<Vec<u8>>> {
        self.get_instance(key).srandmember(key, count)
    }

    pub fn smove(&self, source: &[u8], destination: &[u8], member: &[u8]) -> Result<bool> {
        let instance_id = self.single_instance_for(&[source, destination])?;
        self.insts[instance_id].smove(source, destination, member)
    }

    pub fn sdiff(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return self.insts[0].sdiff(keys);
        }
        let instance_id = self.single_instance_for(keys)?;
        self.insts[instance_id].sdiff(keys)
    }

    pub fn sinter(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return self.insts[0].sinter(keys);
        }
        let instance_id = self.single_instance_for(keys)?;
        self.insts[instance_id].sinter(keys)
    }

    pub fn sunion(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return self.insts[0].sunion(keys);
        }
        let instance_id = self.single_instance_for(keys)?;
        self.insts[instance_id].sunion(keys)
    }

    pub fn sdiffstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return self.insts[0].sdiffstore(destination, keys);
        }
        let mut all_keys = vec![destination];
        all_keys.extend_from_slice(keys);
        let instance_id = self.single_instance_for(&all_keys)?;
        self.insts[instance_id].sdiffstore(destination, keys)
    }

    pub fn sinterstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return self.insts[0].sinterstore(destination, keys);
        }
        let mut all_keys = vec![destination];
        all_keys.extend_from_slice(keys);
        let instance_id = self.single_instance_for(&all_keys)?;
        self.insts[instance_id].sinterstore(destination, keys)
    }

    pub fn sunionstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return self.insts[0].sunionstore(destination, keys);
        }
        let mut all_keys = vec![destination];
        all_keys.extend_from_slice(keys);
        let instance_id = self.single_instance_for(&all_keys)?;
        self.insts[instance_id].sunionstore(destination, keys)
    }

    pub fn sscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<Vec<u8>>, i64)> {
        self.get_instance(key).sscan(key, cursor, pattern, count)
    }

    pub fn rename(&self, key: &[u8], newkey: &[u8]) -> Result<()> {
        let source = self.get_instance(key);
        let destination = self.get_instance(newkey);
        source.sets_rename(key, destination.as_ref(), newkey)
    }

    pub fn renamenx(&self, key: &[u8], newkey: &[u8]) -> Result<()> {
        let source = self.get_instance(key);
        let destination = self.get_instance(newkey);
        source.sets_renamenx(key, destination.as_ref(), newkey)
    }

    pub fn sets_expire(&self, key: &[u8], ttl: i64) -> Result<bool> {
        self.get_instance(key).sets_expire(key, ttl)
    }

    pub fn sets_ttl(&self, key: &[u8]) -> Result<i64> {
        self.get_instance(key).sets_ttl(key)
    }

    pub fn sets_persist(&self, key: &[u8]) -> Result<bool> {
        self.get_instance(key).sets_persist(key)
    }

    pub fn sets_del(&self, key: &[u8]) -> Result<bool> {
        self.get_instance(key).sets_del(key)
    }

    pub fn scan_sets_key_num(&self) -> Result<KeyInfo> {
        let mut info = KeyInfo::default();
        for inst in &self.insts {
            info = info.add(&inst.scan_sets_key_num()?);
        }
        Ok(info)
    }

    pub fn scan_sets(&self) -> Result<()> {
        for inst in &self.insts {
            inst.scan_sets()?;
        }
        Ok(())
    }

    pub fn compact(&self) -> Result<()> {
        for inst in &self.insts {
            inst.compact_range(None, None)?;
        }
        Ok(())
    }
}
