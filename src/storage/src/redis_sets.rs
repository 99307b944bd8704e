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

//! Set operations.
//!
//! Mutators serialize on the record lock for their key and point-read
//! without a snapshot (the lock keeps the meta stable); cross-key reads open
//! one snapshot for the whole operation. Every mutation commits as a single
//! write batch.

use std::collections::HashSet;

use bytes::Bytes;
use rand::{Rng, seq::SliceRandom};
use rocksdb::{DB, Direction, IteratorMode, ReadOptions, SnapshotWithThreadMode, WriteBatch};
use snafu::ResultExt;
use vstd::lock_mgr::{MultiScopeRecordLock, ScopeRecordLock};

use crate::{
    ColumnFamilyIndex, Redis,
    base_data_value_format::BaseDataValue,
    base_key_format::{BaseMetaKey, ParsedBaseMetaKey},
    base_meta_value_format::{ParsedSetsMetaValue, SetsMetaValue},
    base_value_format::{DataType, expected_meta_value, is_stale_meta_value, now_seconds},
    error::{CorruptionSnafu, InvalidArgumentSnafu, Result, RocksSnafu},
    member_data_key_format::{MemberDataKey, ParsedMemberDataKey},
    statistics::KeyStatisticsDurationGuard,
    types::{KeyInfo, KeyVersion},
    util::{is_tail_wildcard, string_match},
};

fn count_payload(count: i32) -> Bytes {
    Bytes::copy_from_slice(&count.to_le_bytes())
}

fn overflow_error<T>() -> Result<T> {
    InvalidArgumentSnafu {
        message: "set size overflow".to_string(),
    }
    .fail()
}

impl Redis {
    /// Add members to the set at `key`, creating it when absent or stale.
    /// Returns the number of newly inserted members.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> Result<i32> {
        // Deduplicate, preserving first-seen order.
        let mut unique = HashSet::new();
        let mut filtered: Vec<&[u8]> = Vec::with_capacity(members.len());
        for &member in members {
            if unique.insert(member) {
                filtered.push(member);
            }
        }
        if filtered.is_empty() {
            return Ok(0);
        }

        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let mut batch = WriteBatch::default();

        let meta = match db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? {
            Some(value) => self.parse_set_meta(key, &value)?,
            None => None,
        };

        let added = match meta {
            Some(mut parsed) if parsed.is_valid() => {
                let version = parsed.version();
                let mut cnt: i32 = 0;
                for &member in &filtered {
                    let member_key = MemberDataKey::new(key, version, member).encode();
                    if db
                        .get_cf(&data_cf, &member_key)
                        .context(RocksSnafu)?
                        .is_none()
                    {
                        cnt += 1;
                        batch.put_cf(
                            &data_cf,
                            &member_key,
                            BaseDataValue::new(Bytes::new()).encode().as_ref(),
                        );
                    }
                }
                if cnt == 0 {
                    return Ok(0);
                }
                if !parsed.check_modify_count(cnt) {
                    return overflow_error();
                }
                parsed.modify_count(cnt);
                batch.put_cf(&meta_cf, &base_meta_key, parsed.encoded());
                cnt
            }
            Some(mut parsed) => {
                // Stale or emptied slot: recycle it under a fresh version.
                if !parsed.check_set_count(filtered.len()) {
                    return overflow_error();
                }
                let version = parsed.initial_meta_value();
                parsed.set_count(filtered.len() as i32);
                batch.put_cf(&meta_cf, &base_meta_key, parsed.encoded());
                self.stage_members(&mut batch, key, version, &filtered)?;
                filtered.len() as i32
            }
            None => {
                if filtered.len() > i32::MAX as usize {
                    return overflow_error();
                }
                let mut sets_meta_value =
                    SetsMetaValue::new(DataType::Set, count_payload(filtered.len() as i32));
                let version = sets_meta_value.update_version();
                batch.put_cf(&meta_cf, &base_meta_key, sets_meta_value.encode().as_ref());
                self.stage_members(&mut batch, key, version, &filtered)?;
                filtered.len() as i32
            }
        };

        db.write_opt(batch, &self.write_options).context(RocksSnafu)?;
        Ok(added)
    }

    fn stage_members(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        version: u64,
        members: &[&[u8]],
    ) -> Result<()> {
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;
        for &member in members {
            let member_key = MemberDataKey::new(key, version, member).encode();
            batch.put_cf(
                &data_cf,
                &member_key,
                BaseDataValue::new(Bytes::new()).encode().as_ref(),
            );
        }
        Ok(())
    }

    /// Cardinality of the set. Absent, stale and emptied keys are NotFound.
    pub fn scard(&self, key: &[u8]) -> Result<i32> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let base_meta_key = BaseMetaKey::new(key).encode();

        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Err(Self::key_not_found(key));
        };
        let Some(parsed) = self.parse_set_meta(key, &value)? else {
            return Err(Self::key_not_found(key));
        };
        if !parsed.is_valid() {
            return Err(Self::key_not_found(key));
        }
        Ok(parsed.count())
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let snapshot = db.snapshot();
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db
            .get_cf_opt(&meta_cf, &base_meta_key, &read_opts)
            .context(RocksSnafu)?
        else {
            return Ok(false);
        };
        let Some(parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(false);
        };
        if !parsed.is_valid() {
            return Ok(false);
        }

        let member_key = MemberDataKey::new(key, parsed.version(), member).encode();
        Ok(db
            .get_cf_opt(&data_cf, &member_key, &read_opts)
            .context(RocksSnafu)?
            .is_some())
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let snapshot = db.snapshot();
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db
            .get_cf_opt(&meta_cf, &base_meta_key, &read_opts)
            .context(RocksSnafu)?
        else {
            return Ok(Vec::new());
        };
        let Some(parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(Vec::new());
        };
        if !parsed.is_valid() {
            return Ok(Vec::new());
        }

        self.collect_members(key, parsed.version(), &snapshot)
    }

    /// SMEMBERS plus the key's remaining TTL in seconds (-1 when the key
    /// never expires). Absent and stale keys are NotFound.
    pub fn smembers_with_ttl(&self, key: &[u8]) -> Result<(Vec<Vec<u8>>, i64)> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let snapshot = db.snapshot();
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db
            .get_cf_opt(&meta_cf, &base_meta_key, &read_opts)
            .context(RocksSnafu)?
        else {
            return Err(Self::key_not_found(key));
        };
        let Some(parsed) = self.parse_set_meta(key, &value)? else {
            return Err(Self::key_not_found(key));
        };
        if !parsed.is_valid() {
            return Err(Self::key_not_found(key));
        }

        let ttl = if parsed.etime() == 0 {
            -1
        } else {
            let remaining = parsed.etime() as i64 - now_seconds() as i64;
            if remaining >= 0 { remaining } else { -2 }
        };

        let members = self.collect_members(key, parsed.version(), &snapshot)?;
        Ok((members, ttl))
    }

    fn collect_members(
        &self,
        key: &[u8],
        version: u64,
        snapshot: &SnapshotWithThreadMode<'_, DB>,
    ) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let prefix = MemberDataKey::encode_seek_key(key, version);
        let mut iter_opts = ReadOptions::default();
        iter_opts.set_snapshot(snapshot);

        let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, key);
        let iter = db.iterator_cf_opt(
            &data_cf,
            iter_opts,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut members = Vec::new();
        for item in iter {
            let (raw_key, _) = item.context(RocksSnafu)?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            members.push(ParsedMemberDataKey::new(&raw_key)?.member().to_vec());
        }
        Ok(members)
    }

    /// Remove members. Returns how many were actually removed; the meta
    /// record stays behind at count zero until compaction reclaims it.
    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> Result<i32> {
        if members.is_empty() {
            return Ok(0);
        }

        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(0);
        };
        let Some(mut parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(0);
        };
        if !parsed.is_valid() {
            return Ok(0);
        }

        let version = parsed.version();
        let mut batch = WriteBatch::default();
        let mut cnt: i32 = 0;
        let mut seen = HashSet::new();
        for &member in members {
            if !seen.insert(member) {
                continue;
            }
            let member_key = MemberDataKey::new(key, version, member).encode();
            if db
                .get_cf(&data_cf, &member_key)
                .context(RocksSnafu)?
                .is_some()
            {
                cnt += 1;
                batch.delete_cf(&data_cf, &member_key);
            }
        }
        if cnt == 0 {
            return Ok(0);
        }

        if !parsed.check_modify_count(-cnt) {
            return overflow_error();
        }
        parsed.modify_count(-cnt);
        batch.put_cf(&meta_cf, &base_meta_key, parsed.encoded());

        db.write_opt(batch, &self.write_options).context(RocksSnafu)?;
        self.update_specific_key_statistics(DataType::Set, key, cnt as u64);
        Ok(cnt)
    }

    /// Remove and return up to `cnt` members chosen uniformly at random.
    /// Popping the whole set deletes its meta record outright.
    pub fn spop(&self, key: &[u8], cnt: i64) -> Result<Vec<Vec<u8>>> {
        if cnt <= 0 {
            return Ok(Vec::new());
        }

        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(Vec::new());
        };
        let Some(mut parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(Vec::new());
        };
        if !parsed.is_valid() {
            return Ok(Vec::new());
        }

        let size = parsed.count() as i64;
        let version = parsed.version();
        let prefix = MemberDataKey::encode_seek_key(key, version);
        let mut batch = WriteBatch::default();
        let mut members = Vec::new();

        if size <= cnt {
            // Popping everything: logical destroy.
            let iter = db.iterator_cf_opt(
                &data_cf,
                ReadOptions::default(),
                IteratorMode::From(&prefix, Direction::Forward),
            );
            for item in iter {
                let (raw_key, _) = item.context(RocksSnafu)?;
                if !raw_key.starts_with(&prefix) {
                    break;
                }
                batch.delete_cf(&data_cf, &raw_key);
                members.push(ParsedMemberDataKey::new(&raw_key)?.member().to_vec());
            }
            batch.delete_cf(&meta_cf, &base_meta_key);
        } else {
            let mut rng = rand::thread_rng();
            let mut targets = HashSet::with_capacity(cnt as usize);
            while (targets.len() as i64) < cnt {
                targets.insert(rng.gen_range(0..size));
            }

            let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, key);
            let iter = db.iterator_cf_opt(
                &data_cf,
                ReadOptions::default(),
                IteratorMode::From(&prefix, Direction::Forward),
            );
            let mut cur_index: i64 = 0;
            let mut del_count: i64 = 0;
            for item in iter {
                if del_count == cnt {
                    break;
                }
                let (raw_key, _) = item.context(RocksSnafu)?;
                if !raw_key.starts_with(&prefix) {
                    break;
                }
                if targets.contains(&cur_index) {
                    del_count += 1;
                    batch.delete_cf(&data_cf, &raw_key);
                    members.push(ParsedMemberDataKey::new(&raw_key)?.member().to_vec());
                }
                cur_index += 1;
            }

            if !parsed.check_modify_count(-(cnt as i32)) {
                return overflow_error();
            }
            parsed.modify_count(-(cnt as i32));
            batch.put_cf(&meta_cf, &base_meta_key, parsed.encoded());
        }

        db.write_opt(batch, &self.write_options).context(RocksSnafu)?;
        self.note_spop(key);
        self.update_specific_key_statistics(DataType::Set, key, members.len() as u64);
        Ok(members)
    }

    /// Return random members without mutating the set. Positive `count`
    /// yields distinct members, negative allows duplicates.
    pub fn srandmember(&self, key: &[u8], count: i32) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(Vec::new());
        };
        let Some(parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(Vec::new());
        };
        if !parsed.is_valid() {
            return Ok(Vec::new());
        }

        let size = parsed.count() as i64;
        let version = parsed.version();
        let mut rng = rand::thread_rng();

        let mut targets: Vec<i64> = Vec::new();
        if count > 0 {
            let want = (count as i64).min(size) as usize;
            let mut unique = HashSet::with_capacity(want);
            while unique.len() < want {
                unique.insert(rng.gen_range(0..size));
            }
            targets.extend(unique);
        } else {
            let want = (count as i64).unsigned_abs() as usize;
            while targets.len() < want {
                targets.push(rng.gen_range(0..size));
            }
        }
        targets.sort_unstable();

        // One ordered scan picks every sorted position; a position drawn
        // more than once emits the member once per draw.
        let prefix = MemberDataKey::encode_seek_key(key, version);
        let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, key);
        let iter = db.iterator_cf_opt(
            &data_cf,
            ReadOptions::default(),
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut members = Vec::with_capacity(targets.len());
        let mut cur_index: i64 = 0;
        let mut idx = 0;
        for item in iter {
            if idx >= targets.len() {
                break;
            }
            let (raw_key, _) = item.context(RocksSnafu)?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            if cur_index == targets[idx] {
                let member = ParsedMemberDataKey::new(&raw_key)?.member().to_vec();
                while idx < targets.len() && cur_index == targets[idx] {
                    idx += 1;
                    members.push(member.clone());
                }
            }
            cur_index += 1;
        }

        members.shuffle(&mut rng);
        Ok(members)
    }

    /// Move `member` from `source` to `destination`; both keys lock for the
    /// whole operation and the two mutations commit as one batch.
    pub fn smove(&self, source: &[u8], destination: &[u8], member: &[u8]) -> Result<bool> {
        if source == destination {
            // Degenerates to a membership test; no mutation, no count drift.
            return self.sismember(source, member);
        }

        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let lock_keys = vec![
            String::from_utf8_lossy(source).to_string(),
            String::from_utf8_lossy(destination).to_string(),
        ];
        let _locks = MultiScopeRecordLock::new(self.lock_mgr.as_ref(), &lock_keys);

        let base_source = BaseMetaKey::new(source).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_source).context(RocksSnafu)? else {
            return Ok(false);
        };
        let Some(mut source_meta) = self.parse_set_meta(source, &value)? else {
            return Ok(false);
        };
        if !source_meta.is_valid() {
            return Ok(false);
        }

        let source_version = source_meta.version();
        let source_member_key = MemberDataKey::new(source, source_version, member).encode();
        if db
            .get_cf(&data_cf, &source_member_key)
            .context(RocksSnafu)?
            .is_none()
        {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        if !source_meta.check_modify_count(-1) {
            return overflow_error();
        }
        source_meta.modify_count(-1);
        batch.put_cf(&meta_cf, &base_source, source_meta.encoded());
        batch.delete_cf(&data_cf, &source_member_key);

        let base_destination = BaseMetaKey::new(destination).encode();
        let dest_meta = match db.get_cf(&meta_cf, &base_destination).context(RocksSnafu)? {
            Some(value) => self.parse_set_meta(destination, &value)?,
            None => None,
        };
        match dest_meta {
            Some(mut parsed) if parsed.is_valid() => {
                let version = parsed.version();
                let dest_member_key = MemberDataKey::new(destination, version, member).encode();
                if db
                    .get_cf(&data_cf, &dest_member_key)
                    .context(RocksSnafu)?
                    .is_none()
                {
                    if !parsed.check_modify_count(1) {
                        return overflow_error();
                    }
                    parsed.modify_count(1);
                    batch.put_cf(&meta_cf, &base_destination, parsed.encoded());
                    batch.put_cf(
                        &data_cf,
                        &dest_member_key,
                        BaseDataValue::new(Bytes::new()).encode().as_ref(),
                    );
                }
            }
            Some(mut parsed) => {
                let version = parsed.initial_meta_value();
                parsed.set_count(1);
                batch.put_cf(&meta_cf, &base_destination, parsed.encoded());
                let dest_member_key = MemberDataKey::new(destination, version, member).encode();
                batch.put_cf(
                    &data_cf,
                    &dest_member_key,
                    BaseDataValue::new(Bytes::new()).encode().as_ref(),
                );
            }
            None => {
                let mut sets_meta_value = SetsMetaValue::new(DataType::Set, count_payload(1));
                let version = sets_meta_value.update_version();
                batch.put_cf(&meta_cf, &base_destination, sets_meta_value.encode().as_ref());
                let dest_member_key = MemberDataKey::new(destination, version, member).encode();
                batch.put_cf(
                    &data_cf,
                    &dest_member_key,
                    BaseDataValue::new(Bytes::new()).encode().as_ref(),
                );
            }
        }

        db.write_opt(batch, &self.write_options).context(RocksSnafu)?;
        self.update_specific_key_statistics(DataType::Set, source, 1);
        Ok(true)
    }

    // --- multi-set reads --------------------------------------------------

    pub fn sdiff(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SDiff invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        let db = self.db()?;
        let snapshot = db.snapshot();
        self.sdiff_under_snapshot(keys, &snapshot)
    }

    pub fn sinter(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SInter invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        let db = self.db()?;
        let snapshot = db.snapshot();
        self.sinter_under_snapshot(keys, &snapshot)
    }

    pub fn sunion(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SUnion invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        let db = self.db()?;
        let snapshot = db.snapshot();
        self.sunion_under_snapshot(keys, &snapshot)
    }

    /// Read one key's meta under the snapshot. `Ok(Some)` only for a live
    /// Set; stale or absent keys come back as `Ok(None)`.
    fn live_set_meta(
        &self,
        key: &[u8],
        read_opts: &ReadOptions,
    ) -> Result<Option<ParsedSetsMetaValue>> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db
            .get_cf_opt(&meta_cf, &base_meta_key, read_opts)
            .context(RocksSnafu)?
        else {
            return Ok(None);
        };
        match self.parse_set_meta(key, &value)? {
            Some(parsed) if parsed.is_valid() => Ok(Some(parsed)),
            _ => Ok(None),
        }
    }

    fn sdiff_under_snapshot(
        &self,
        keys: &[&[u8]],
        snapshot: &SnapshotWithThreadMode<'_, DB>,
    ) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(snapshot);

        let mut valid_sets: Vec<KeyVersion> = Vec::new();
        for &key in &keys[1..] {
            if let Some(parsed) = self.live_set_meta(key, &read_opts)? {
                valid_sets.push(KeyVersion::new(key.to_vec(), parsed.version()));
            }
        }

        let Some(first) = self.live_set_meta(keys[0], &read_opts)? else {
            return Ok(Vec::new());
        };

        let prefix = MemberDataKey::encode_seek_key(keys[0], first.version());
        let mut iter_opts = ReadOptions::default();
        iter_opts.set_snapshot(snapshot);

        let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, keys[0]);
        let iter = db.iterator_cf_opt(
            &data_cf,
            iter_opts,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut members = Vec::new();
        for item in iter {
            let (raw_key, _) = item.context(RocksSnafu)?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let member = ParsedMemberDataKey::new(&raw_key)?.member().to_vec();

            let mut found = false;
            for key_version in &valid_sets {
                let member_key =
                    MemberDataKey::new(&key_version.key, key_version.version, &member).encode();
                if db
                    .get_cf_opt(&data_cf, &member_key, &read_opts)
                    .context(RocksSnafu)?
                    .is_some()
                {
                    found = true;
                    break;
                }
            }
            if !found {
                members.push(member);
            }
        }
        Ok(members)
    }

    fn sinter_under_snapshot(
        &self,
        keys: &[&[u8]],
        snapshot: &SnapshotWithThreadMode<'_, DB>,
    ) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(snapshot);

        // Any absent or stale operand empties the intersection.
        let mut valid_sets: Vec<KeyVersion> = Vec::new();
        for &key in &keys[1..] {
            match self.live_set_meta(key, &read_opts)? {
                Some(parsed) => valid_sets.push(KeyVersion::new(key.to_vec(), parsed.version())),
                None => return Ok(Vec::new()),
            }
        }
        let Some(first) = self.live_set_meta(keys[0], &read_opts)? else {
            return Ok(Vec::new());
        };

        let prefix = MemberDataKey::encode_seek_key(keys[0], first.version());
        let mut iter_opts = ReadOptions::default();
        iter_opts.set_snapshot(snapshot);

        let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, keys[0]);
        let iter = db.iterator_cf_opt(
            &data_cf,
            iter_opts,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut members = Vec::new();
        for item in iter {
            let (raw_key, _) = item.context(RocksSnafu)?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let member = ParsedMemberDataKey::new(&raw_key)?.member().to_vec();

            let mut reliable = true;
            for key_version in &valid_sets {
                let member_key =
                    MemberDataKey::new(&key_version.key, key_version.version, &member).encode();
                if db
                    .get_cf_opt(&data_cf, &member_key, &read_opts)
                    .context(RocksSnafu)?
                    .is_none()
                {
                    reliable = false;
                    break;
                }
            }
            if reliable {
                members.push(member);
            }
        }
        Ok(members)
    }

    fn sunion_under_snapshot(
        &self,
        keys: &[&[u8]],
        snapshot: &SnapshotWithThreadMode<'_, DB>,
    ) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(snapshot);

        let mut valid_sets: Vec<KeyVersion> = Vec::new();
        for &key in keys {
            if let Some(parsed) = self.live_set_meta(key, &read_opts)? {
                valid_sets.push(KeyVersion::new(key.to_vec(), parsed.version()));
            }
        }

        // First occurrence wins the output position.
        let mut members = Vec::new();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for key_version in &valid_sets {
            let prefix = MemberDataKey::encode_seek_key(&key_version.key, key_version.version);
            let mut iter_opts = ReadOptions::default();
            iter_opts.set_snapshot(snapshot);

            let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, &key_version.key);
            let iter = db.iterator_cf_opt(
                &data_cf,
                iter_opts,
                IteratorMode::From(&prefix, Direction::Forward),
            );
            for item in iter {
                let (raw_key, _) = item.context(RocksSnafu)?;
                if !raw_key.starts_with(&prefix) {
                    break;
                }
                let member = ParsedMemberDataKey::new(&raw_key)?.member().to_vec();
                if seen.insert(member.clone()) {
                    members.push(member);
                }
            }
        }
        Ok(members)
    }

    // --- multi-set stores -------------------------------------------------

    pub fn sdiffstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SDiffstore invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        self.store_set_operation(destination, keys, Self::sdiff_under_snapshot)
    }

    pub fn sinterstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SInterstore invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        self.store_set_operation(destination, keys, Self::sinter_under_snapshot)
    }

    pub fn sunionstore(&self, destination: &[u8], keys: &[&[u8]]) -> Result<i32> {
        if keys.is_empty() {
            return CorruptionSnafu {
                message: "SUnionstore invalid parameter, no keys".to_string(),
            }
            .fail();
        }
        self.store_set_operation(destination, keys, Self::sunion_under_snapshot)
    }

    fn store_set_operation(
        &self,
        destination: &[u8],
        keys: &[&[u8]],
        compute: fn(&Redis, &[&[u8]], &SnapshotWithThreadMode<'_, DB>) -> Result<Vec<Vec<u8>>>,
    ) -> Result<i32> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let dest_str = String::from_utf8_lossy(destination).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &dest_str);

        let snapshot = db.snapshot();
        let members = compute(self, keys, &snapshot)?;

        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let mut batch = WriteBatch::default();
        let base_destination = BaseMetaKey::new(destination).encode();
        let mut statistic: u64 = 0;

        // An existing Set meta keeps its slot and jumps to a fresh version,
        // which strands every old member record for the compaction filter.
        let dest_meta = db
            .get_cf_opt(&meta_cf, &base_destination, &read_opts)
            .context(RocksSnafu)?;
        let version = match dest_meta {
            Some(value) if expected_meta_value(DataType::Set, &value) => {
                let mut parsed = ParsedSetsMetaValue::new(&value[..])?;
                statistic = parsed.count().max(0) as u64;
                let version = parsed.initial_meta_value();
                if !parsed.check_set_count(members.len()) {
                    return overflow_error();
                }
                parsed.set_count(members.len() as i32);
                batch.put_cf(&meta_cf, &base_destination, parsed.encoded());
                version
            }
            _ => {
                if members.len() > i32::MAX as usize {
                    return overflow_error();
                }
                let mut sets_meta_value =
                    SetsMetaValue::new(DataType::Set, count_payload(members.len() as i32));
                let version = sets_meta_value.update_version();
                batch.put_cf(&meta_cf, &base_destination, sets_meta_value.encode().as_ref());
                version
            }
        };

        for member in &members {
            let member_key = MemberDataKey::new(destination, version, member).encode();
            batch.put_cf(
                &data_cf,
                &member_key,
                BaseDataValue::new(Bytes::new()).encode().as_ref(),
            );
        }

        db.write_opt(batch, &self.write_options).context(RocksSnafu)?;
        self.update_specific_key_statistics(DataType::Set, destination, statistic);
        Ok(members.len() as i32)
    }

    // --- incremental scan -------------------------------------------------

    pub fn sscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<Vec<u8>>, i64)> {
        if cursor < 0 {
            return Ok((Vec::new(), 0));
        }
        let count = if count <= 0 { 10 } else { count };

        let db = self.db()?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let snapshot = db.snapshot();
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let Some(parsed) = self.live_set_meta(key, &read_opts)? else {
            return Ok((Vec::new(), 0));
        };
        let version = parsed.version();

        let mut cursor = cursor;
        let start_point = match self.get_scan_start_point(DataType::Set, key, pattern, cursor) {
            Ok(point) => point,
            Err(_) => {
                // Unknown continuation: restart. Tail-wildcard patterns can
                // seek straight to their literal prefix.
                cursor = 0;
                if is_tail_wildcard(pattern) {
                    pattern[..pattern.len() - 1].to_vec()
                } else {
                    Vec::new()
                }
            }
        };
        let sub_member: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            b""
        };

        let prefix = MemberDataKey::new(key, version, sub_member).encode();
        let seek_key = MemberDataKey::new(key, version, &start_point).encode();

        let mut iter_opts = ReadOptions::default();
        iter_opts.set_snapshot(&snapshot);

        let _guard = KeyStatisticsDurationGuard::new(self, DataType::Set, key);
        let mut iter = db.raw_iterator_cf_opt(&data_cf, iter_opts);
        iter.seek(&seek_key);

        let mut members = Vec::new();
        let mut rest = count;
        while rest > 0 && iter.valid() {
            let Some(raw_key) = iter.key() else {
                break;
            };
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let member = ParsedMemberDataKey::new(raw_key)?.member().to_vec();
            if string_match(pattern, &member) {
                members.push(member);
            }
            rest -= 1;
            iter.next();
        }
        iter.status().context(RocksSnafu)?;

        let mut next_cursor = 0;
        if iter.valid() {
            if let Some(raw_key) = iter.key() {
                if raw_key.starts_with(&prefix) {
                    next_cursor = cursor + count;
                    let next_member = ParsedMemberDataKey::new(raw_key)?.member().to_vec();
                    self.store_scan_next_point(
                        DataType::Set,
                        key,
                        pattern,
                        next_cursor,
                        &next_member,
                    );
                }
            }
        }
        Ok((members, next_cursor))
    }

    // --- rename -----------------------------------------------------------

    pub fn sets_rename(&self, key: &[u8], new_inst: &Redis, newkey: &[u8]) -> Result<()> {
        self.sets_rename_impl(key, new_inst, newkey, false)
    }

    pub fn sets_renamenx(&self, key: &[u8], new_inst: &Redis, newkey: &[u8]) -> Result<()> {
        self.sets_rename_impl(key, new_inst, newkey, true)
    }

    /// Member keys embed the user-key bytes, so a rename must rewrite every
    /// member under the new key: the destination gets a fresh version with
    /// the source's count and TTL, and the source meta is logically deleted.
    fn sets_rename_impl(
        &self,
        key: &[u8],
        new_inst: &Redis,
        newkey: &[u8],
        fail_if_newkey_exists: bool,
    ) -> Result<()> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        // The lock manager is shared by every instance, so this covers the
        // destination even when it lives elsewhere.
        let lock_keys = vec![
            String::from_utf8_lossy(key).to_string(),
            String::from_utf8_lossy(newkey).to_string(),
        ];
        let _locks = MultiScopeRecordLock::new(self.lock_mgr.as_ref(), &lock_keys);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Err(Self::key_not_found(key));
        };
        let Some(mut source_meta) = self.parse_set_meta(key, &value)? else {
            return Err(Self::key_not_found(key));
        };
        if !source_meta.is_valid() {
            return Err(Self::key_not_found(key));
        }
        let statistic = source_meta.count() as u64;

        if key == newkey {
            // Renaming a key onto itself keeps it untouched; the NX form
            // reports the occupied target.
            if fail_if_newkey_exists {
                return CorruptionSnafu {
                    message: format!(
                        "target key already exists: {}",
                        String::from_utf8_lossy(newkey)
                    ),
                }
                .fail();
            }
            return Ok(());
        }

        let new_db = new_inst.db()?;
        let new_meta_cf = new_inst.handle(ColumnFamilyIndex::MetaCF)?;
        let new_data_cf = new_inst.handle(ColumnFamilyIndex::SetsDataCF)?;
        let base_meta_newkey = BaseMetaKey::new(newkey).encode();

        if fail_if_newkey_exists {
            if let Some(new_value) = new_db
                .get_cf(&new_meta_cf, &base_meta_newkey)
                .context(RocksSnafu)?
            {
                if !is_stale_meta_value(&new_value)? {
                    let live = if expected_meta_value(DataType::Set, &new_value) {
                        ParsedSetsMetaValue::new(&new_value[..])?.count() != 0
                    } else {
                        true
                    };
                    if live {
                        return CorruptionSnafu {
                            message: format!(
                                "target key already exists: {}",
                                String::from_utf8_lossy(newkey)
                            ),
                        }
                        .fail();
                    }
                }
            }
        }

        let mut new_meta = SetsMetaValue::new(DataType::Set, count_payload(source_meta.count()));
        new_meta.set_etime(source_meta.etime());
        let new_version = new_meta.update_version();

        let mut dest_batch = WriteBatch::default();
        dest_batch.put_cf(&new_meta_cf, &base_meta_newkey, new_meta.encode().as_ref());

        let prefix = MemberDataKey::encode_seek_key(key, source_meta.version());
        let iter = db.iterator_cf_opt(
            &data_cf,
            ReadOptions::default(),
            IteratorMode::From(&prefix, Direction::Forward),
        );
        for item in iter {
            let (raw_key, _) = item.context(RocksSnafu)?;
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let member = ParsedMemberDataKey::new(&raw_key)?.member().to_vec();
            let member_key = MemberDataKey::new(newkey, new_version, &member).encode();
            dest_batch.put_cf(
                &new_data_cf,
                &member_key,
                BaseDataValue::new(Bytes::new()).encode().as_ref(),
            );
        }

        source_meta.initial_meta_value();
        if std::ptr::eq(self, new_inst) {
            dest_batch.put_cf(&meta_cf, &base_meta_key, source_meta.encoded());
            db.write_opt(dest_batch, &self.write_options).context(RocksSnafu)?;
        } else {
            new_db
                .write_opt(dest_batch, &new_inst.write_options)
                .context(RocksSnafu)?;
            let mut source_batch = WriteBatch::default();
            source_batch.put_cf(&meta_cf, &base_meta_key, source_meta.encoded());
            db.write_opt(source_batch, &self.write_options)
                .context(RocksSnafu)?;
        }

        new_inst.update_specific_key_statistics(DataType::Set, newkey, statistic);
        self.update_specific_key_statistics(DataType::Set, key, statistic);
        Ok(())
    }

    // --- TTL family -------------------------------------------------------

    /// EXPIRE for Set keys. A non-positive ttl logically deletes the key.
    pub fn sets_expire(&self, key: &[u8], ttl: i64) -> Result<bool> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(false);
        };
        let Some(mut parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(false);
        };
        if !parsed.is_valid() {
            return Ok(false);
        }

        if ttl > 0 {
            parsed.set_etime(now_seconds() + ttl as u64);
        } else {
            parsed.initial_meta_value();
        }
        db.put_cf_opt(&meta_cf, &base_meta_key, parsed.encoded(), &self.write_options)
            .context(RocksSnafu)?;
        Ok(true)
    }

    /// Remaining TTL in seconds: -2 when absent or stale, -1 when the key
    /// never expires.
    pub fn sets_ttl(&self, key: &[u8]) -> Result<i64> {
        let db = self.db()?;

        let snapshot = db.snapshot();
        let mut read_opts = ReadOptions::default();
        read_opts.set_snapshot(&snapshot);

        let Some(parsed) = self.live_set_meta(key, &read_opts)? else {
            return Ok(-2);
        };
        if parsed.etime() == 0 {
            return Ok(-1);
        }
        Ok((parsed.etime() as i64 - now_seconds() as i64).max(0))
    }

    pub fn sets_persist(&self, key: &[u8]) -> Result<bool> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(false);
        };
        let Some(mut parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(false);
        };
        if !parsed.is_valid() || parsed.etime() == 0 {
            return Ok(false);
        }

        parsed.set_etime(0);
        db.put_cf_opt(&meta_cf, &base_meta_key, parsed.encoded(), &self.write_options)
            .context(RocksSnafu)?;
        Ok(true)
    }

    /// Logical delete: bump the version, zero the count, and leave the
    /// member records to the compaction filter.
    pub fn sets_del(&self, key: &[u8]) -> Result<bool> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let key_str = String::from_utf8_lossy(key).to_string();
        let _lock = ScopeRecordLock::new(self.lock_mgr.as_ref(), &key_str);

        let base_meta_key = BaseMetaKey::new(key).encode();
        let Some(value) = db.get_cf(&meta_cf, &base_meta_key).context(RocksSnafu)? else {
            return Ok(false);
        };
        let Some(mut parsed) = self.parse_set_meta(key, &value)? else {
            return Ok(false);
        };
        if !parsed.is_valid() {
            return Ok(false);
        }

        let statistic = parsed.count() as u64;
        parsed.initial_meta_value();
        db.put_cf_opt(&meta_cf, &base_meta_key, parsed.encoded(), &self.write_options)
            .context(RocksSnafu)?;
        self.update_specific_key_statistics(DataType::Set, key, statistic);
        Ok(true)
    }

    // --- introspection ----------------------------------------------------

    pub fn scan_sets_key_num(&self) -> Result<KeyInfo> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;

        let snapshot = db.snapshot();
        let mut iter_opts = ReadOptions::default();
        iter_opts.set_snapshot(&snapshot);
        iter_opts.fill_cache(false);

        let now = now_seconds();
        let mut info = KeyInfo::default();
        let mut ttl_sum: u64 = 0;

        let iter = db.iterator_cf_opt(&meta_cf, iter_opts, IteratorMode::Start);
        for item in iter {
            let (_, value) = item.context(RocksSnafu)?;
            if !expected_meta_value(DataType::Set, &value) {
                continue;
            }
            let parsed = ParsedSetsMetaValue::new(&value[..])?;
            if parsed.is_stale() || parsed.count() == 0 {
                info.invalid_keys += 1;
            } else {
                info.keys += 1;
                if !parsed.is_permanent_survival() {
                    info.expires += 1;
                    ttl_sum += parsed.etime().saturating_sub(now);
                }
            }
        }

        info.avg_ttl = if info.expires != 0 {
            ttl_sum / info.expires
        } else {
            0
        };
        Ok(info)
    }

    /// Dump every Set meta and member record to the log, for operators.
    pub fn scan_sets(&self) -> Result<()> {
        let db = self.db()?;
        let meta_cf = self.handle(ColumnFamilyIndex::MetaCF)?;
        let data_cf = self.handle(ColumnFamilyIndex::SetsDataCF)?;

        let snapshot = db.snapshot();
        let now = now_seconds();

        log::info!("***************Sets Meta Data***************");
        let mut meta_opts = ReadOptions::default();
        meta_opts.set_snapshot(&snapshot);
        meta_opts.fill_cache(false);
        let meta_iter = db.iterator_cf_opt(&meta_cf, meta_opts, IteratorMode::Start);
        for item in meta_iter {
            let (raw_key, value) = item.context(RocksSnafu)?;
            if !expected_meta_value(DataType::Set, &value) {
                continue;
            }
            let parsed = ParsedSetsMetaValue::new(&value[..])?;
            let parsed_key = ParsedBaseMetaKey::new(&raw_key)?;
            let survival_time = if parsed.etime() != 0 {
                parsed.etime() as i64 - now as i64
            } else {
                0
            };
            log::info!(
                "[key: {}] [count: {}] [etime: {}] [version: {}] [survival_time: {}]",
                String::from_utf8_lossy(parsed_key.key()),
                parsed.count(),
                parsed.etime(),
                parsed.version(),
                survival_time,
            );
        }

        log::info!("***************Sets Member Data***************");
        let mut data_opts = ReadOptions::default();
        data_opts.set_snapshot(&snapshot);
        data_opts.fill_cache(false);
        let member_iter = db.iterator_cf_opt(&data_cf, data_opts, IteratorMode::Start);
        for item in member_iter {
            let (raw_key, _) = item.context(RocksSnafu)?;
            let parsed = ParsedMemberDataKey::new(&raw_key)?;
            log::info!(
                "[key: {}] [member: {}] [version: {}]",
                String::from_utf8_lossy(parsed.key()),
                String::from_utf8_lossy(parsed.member()),
                parsed.version(),
            );
        }
        Ok(())
    }
}
