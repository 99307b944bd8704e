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

use rocksdb::{
    CompactionDecision, compaction_filter::CompactionFilter,
    compaction_filter_factory::CompactionFilterFactory,
};

use crate::base_meta_value_format::ParsedSetsMetaValue;
use crate::base_value_format::{DataType, now_micros, now_seconds};

const META_FILTER_NAME: &std::ffi::CStr = c"MetaCompactionFilter";
const META_FILTER_FACTORY_NAME: &std::ffi::CStr = c"MetaCompactionFilterFactory";

/// Reclaims dead meta records during compaction of the meta column family.
///
/// A Set meta goes when it has expired, or when it sits at count zero and
/// its version microsecond-timestamp is already in the past (so no write
/// racing the compaction can still be using that version). Unrecognized
/// type tags are kept untouched.
#[derive(Debug, Default)]
pub struct MetaCompactionFilter;

impl CompactionFilter for MetaCompactionFilter {
    fn name(&self) -> &std::ffi::CStr {
        META_FILTER_NAME
    }

    fn filter(&mut self, _level: u32, key: &[u8], value: &[u8]) -> CompactionDecision {
        if value.is_empty() {
            log::warn!("empty meta value for key {key:?}, remove");
            return CompactionDecision::Remove;
        }
        if value[0] != DataType::Set as u8 {
            return CompactionDecision::Keep;
        }

        let parsed = match ParsedSetsMetaValue::new(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("unparsable set meta for key {key:?}: {e}, remove");
                return CompactionDecision::Remove;
            }
        };

        let expired = parsed.etime() != 0 && parsed.etime() <= now_seconds();
        let emptied = parsed.count() == 0 && parsed.version() < now_micros();
        if expired || emptied {
            CompactionDecision::Remove
        } else {
            CompactionDecision::Keep
        }
    }
}

#[derive(Debug, Default)]
pub struct MetaCompactionFilterFactory;

impl CompactionFilterFactory for MetaCompactionFilterFactory {
    type Filter = MetaCompactionFilter;

    fn create(
        &mut self,
        _context: rocksdb::compaction_filter_factory::CompactionFilterContext,
    ) -> Self::Filter {
        MetaCompactionFilter
    }

    fn name(&self) -> &std::ffi::CStr {
        META_FILTER_FACTORY_NAME
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::base_meta_value_format::SetsMetaValue;

    fn set_meta(count: i32, version: u64, etime: u64) -> Vec<u8> {
        let mut meta = SetsMetaValue::new(DataType::Set, Bytes::copy_from_slice(&count.to_le_bytes()));
        meta.set_version(version);
        meta.set_etime(etime);
        meta.encode().to_vec()
    }

    #[test]
    fn test_keeps_live_meta() {
        let mut filter = MetaCompactionFilter;
        let value = set_meta(3, now_micros(), 0);
        assert!(matches!(
            filter.filter(0, b"k", &value),
            CompactionDecision::Keep
        ));
    }

    #[test]
    fn test_removes_expired_meta() {
        let mut filter = MetaCompactionFilter;
        let value = set_meta(3, now_micros(), now_seconds() - 5);
        assert!(matches!(
            filter.filter(0, b"k", &value),
            CompactionDecision::Remove
        ));
    }

    #[test]
    fn test_removes_emptied_meta_after_grace() {
        let mut filter = MetaCompactionFilter;
        let value = set_meta(0, now_micros() - 1_000_000, 0);
        assert!(matches!(
            filter.filter(0, b"k", &value),
            CompactionDecision::Remove
        ));
    }

    #[test]
    fn test_keeps_emptied_meta_with_future_version() {
        let mut filter = MetaCompactionFilter;
        let value = set_meta(0, now_micros() + 10_000_000, 0);
        assert!(matches!(
            filter.filter(0, b"k", &value),
            CompactionDecision::Keep
        ));
    }

    #[test]
    fn test_keeps_other_types() {
        let mut filter = MetaCompactionFilter;
        let value = [DataType::String as u8, 1, 2, 3];
        assert!(matches!(
            filter.filter(0, b"k", &value),
            CompactionDecision::Keep
        ));
    }
}
