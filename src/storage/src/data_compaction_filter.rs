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

use std::sync::Arc;

use bytes::BytesMut;
use once_cell::sync::OnceCell;
use rocksdb::{
    CompactionDecision, DB, DEFAULT_COLUMN_FAMILY_NAME, ReadOptions,
    compaction_filter::CompactionFilter, compaction_filter_factory::CompactionFilterFactory,
};

use crate::{
    base_meta_value_format::ParsedSetsMetaValue,
    base_value_format::{DataType, now_seconds},
    storage_define::{RESERVE_LENGTH, VERSION_LENGTH, seek_userkey_delim},
};

const DATA_FILTER_NAME: &std::ffi::CStr = c"DataCompactionFilter";
const DATA_FILTER_FACTORY_NAME: &std::ffi::CStr = c"DataCompactionFilterFactory";

enum MetaLookup {
    Valid,
    NotFound,
    Unavailable,
}

/// Reclaims member records whose owning meta no longer covers them: meta
/// absent, re-typed, expired, emptied, or advanced to a newer version.
///
/// Member keys arrive sorted, so the meta lookup for one user key is
/// memoized until the key changes. The filter only reads the meta family
/// and never writes.
pub struct DataCompactionFilter {
    db: Option<Arc<DB>>,
    read_opts: ReadOptions,
    data_type: DataType,
    cur_key: BytesMut,
    meta_not_found: bool,
    cur_meta_version: u64,
    cur_meta_etime: u64,
    cur_meta_count: i32,
}

impl DataCompactionFilter {
    pub fn new(db: Option<Arc<DB>>, data_type: DataType) -> Self {
        Self {
            db,
            read_opts: ReadOptions::default(),
            data_type,
            cur_key: BytesMut::new(),
            meta_not_found: false,
            cur_meta_version: 0,
            cur_meta_etime: 0,
            cur_meta_count: 0,
        }
    }

    /// Derive the owning meta key from a member data key.
    ///
    /// member key: | encoded key | version | member |
    /// meta key:   | encoded key | reserve |
    fn build_meta_key(key: &[u8]) -> Option<Vec<u8>> {
        let delim_end = seek_userkey_delim(key);
        if delim_end == key.len() || delim_end + VERSION_LENGTH > key.len() {
            return None;
        }
        let mut meta_key = Vec::with_capacity(delim_end + RESERVE_LENGTH);
        meta_key.extend_from_slice(&key[..delim_end]);
        meta_key.resize(delim_end + RESERVE_LENGTH, 0);
        Some(meta_key)
    }

    fn extract_data_version(key: &[u8]) -> Option<u64> {
        let delim_end = seek_userkey_delim(key);
        if delim_end + VERSION_LENGTH > key.len() {
            return None;
        }
        let mut version_bytes = [0u8; VERSION_LENGTH];
        version_bytes.copy_from_slice(&key[delim_end..delim_end + VERSION_LENGTH]);
        Some(u64::from_be_bytes(version_bytes))
    }

    fn parse_meta_value(&self, value: &[u8]) -> Option<(u64, u64, i32)> {
        if value.first().copied() != Some(self.data_type as u8) {
            return None;
        }
        ParsedSetsMetaValue::new(value)
            .ok()
            .map(|m| (m.version(), m.etime(), m.count()))
    }

    fn ensure_meta_state(&mut self, meta_key: &[u8]) -> MetaLookup {
        if self.cur_key.as_ref() != meta_key {
            self.cur_key = BytesMut::from(meta_key);
            self.meta_not_found = false;
            self.cur_meta_version = 0;
            self.cur_meta_etime = 0;
            self.cur_meta_count = 0;

            let Some(db) = &self.db else {
                return MetaLookup::Unavailable;
            };
            let Some(cf) = db.cf_handle(DEFAULT_COLUMN_FAMILY_NAME) else {
                return MetaLookup::Unavailable;
            };

            match db.get_cf_opt(&cf, meta_key, &self.read_opts) {
                Ok(Some(value)) => match self.parse_meta_value(&value) {
                    Some((version, etime, count)) => {
                        self.cur_meta_version = version;
                        self.cur_meta_etime = etime;
                        self.cur_meta_count = count;
                    }
                    None => self.meta_not_found = true,
                },
                Ok(None) => self.meta_not_found = true,
                Err(e) => {
                    log::warn!("data filter failed to read meta key {meta_key:?}: {e}");
                    return MetaLookup::Unavailable;
                }
            }
        }

        if self.meta_not_found {
            MetaLookup::NotFound
        } else {
            MetaLookup::Valid
        }
    }
}

impl CompactionFilter for DataCompactionFilter {
    fn name(&self) -> &std::ffi::CStr {
        DATA_FILTER_NAME
    }

    fn filter(&mut self, _level: u32, key: &[u8], _value: &[u8]) -> CompactionDecision {
        let Some(meta_key) = Self::build_meta_key(key) else {
            return CompactionDecision::Keep;
        };

        match self.ensure_meta_state(&meta_key) {
            MetaLookup::Unavailable => CompactionDecision::Keep,
            MetaLookup::NotFound => CompactionDecision::Remove,
            MetaLookup::Valid => {
                if self.cur_meta_etime != 0 && self.cur_meta_etime <= now_seconds() {
                    return CompactionDecision::Remove;
                }
                if self.cur_meta_count == 0 {
                    return CompactionDecision::Remove;
                }
                match Self::extract_data_version(key) {
                    Some(version) if self.cur_meta_version > version => CompactionDecision::Remove,
                    _ => CompactionDecision::Keep,
                }
            }
        }
    }
}

pub struct DataCompactionFilterFactory {
    db: Arc<OnceCell<Arc<DB>>>,
    data_type: DataType,
}

impl DataCompactionFilterFactory {
    pub fn new(db: Arc<OnceCell<Arc<DB>>>, data_type: DataType) -> Self {
        Self { db, data_type }
    }
}

impl CompactionFilterFactory for DataCompactionFilterFactory {
    type Filter = DataCompactionFilter;

    fn create(
        &mut self,
        _context: rocksdb::compaction_filter_factory::CompactionFilterContext,
    ) -> Self::Filter {
        DataCompactionFilter::new(self.db.get().cloned(), self.data_type)
    }

    fn name(&self) -> &std::ffi::CStr {
        DATA_FILTER_FACTORY_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member_data_key_format::MemberDataKey;

    #[test]
    fn test_build_meta_key_strips_version_and_member() {
        let member_key = MemberDataKey::new(b"user\x00key", 42, b"m").encode();
        let meta_key = DataCompactionFilter::build_meta_key(&member_key).unwrap();
        assert_eq!(
            meta_key,
            crate::base_key_format::BaseMetaKey::new(b"user\x00key")
                .encode()
                .to_vec()
        );
    }

    #[test]
    fn test_extract_data_version() {
        let member_key = MemberDataKey::new(b"k", 0x0102_0304_0506_0708, b"m").encode();
        assert_eq!(
            DataCompactionFilter::extract_data_version(&member_key),
            Some(0x0102_0304_0506_0708)
        );
    }

    #[test]
    fn test_malformed_keys_are_kept() {
        let mut filter = DataCompactionFilter::new(None, DataType::Set);
        assert!(matches!(
            filter.filter(0, b"garbage-without-delim", b""),
            CompactionDecision::Keep
        ));
    }
}
