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

//! Vireo's persistent multi-data-type storage engine over RocksDB.
//!
//! Collections are stored as a meta record (type tag, count, TTL, and a
//! monotonically advancing version) plus one record per element tagged with
//! that version. Bumping the version logically destroys a collection in
//! O(1); background compaction filters reclaim the stranded records.

mod base_data_value_format;
mod base_key_format;
mod base_meta_value_format;
mod base_value_format;
mod data_compaction_filter;
mod error;
mod lru_cache;
mod member_data_key_format;
mod meta_compaction_filter;
mod options;
mod redis;
mod redis_sets;
mod slot_indexer;
mod statistics;
mod storage;
mod storage_define;
mod storage_impl;
mod types;
mod util;

pub use base_data_value_format::{BaseDataValue, ParsedBaseDataValue};
pub use base_key_format::{BaseMetaKey, ParsedBaseMetaKey};
pub use base_meta_value_format::{ParsedSetsMetaValue, SetsMetaValue};
pub use base_value_format::{DataType, data_type_to_string, data_type_to_tag};
pub use error::{Error, Result};
pub use lru_cache::LRUCache;
pub use member_data_key_format::{MemberDataKey, ParsedMemberDataKey};
pub use options::StorageOptions;
pub use redis::{ColumnFamilyIndex, Redis};
pub use statistics::KeyStatistics;
pub use storage::{BgTask, BgTaskHandler, Storage};
pub use types::{KeyInfo, KeyVersion};
