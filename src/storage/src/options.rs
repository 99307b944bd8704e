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

//! Storage engine options.

use rocksdb::Options;

pub struct StorageOptions {
    /// Base RocksDB options cloned into every column family.
    pub options: Options,
    /// Block cache size in bytes; zero disables the per-CF cache.
    pub block_cache_size: usize,
    /// Share one block cache across column families.
    pub share_block_cache: bool,
    /// Capacity of the per-key statistics store; zero disables statistics.
    pub statistics_max_size: usize,
    /// Modify-count threshold that queues a small compaction for a key.
    pub small_compaction_threshold: u64,
    /// Average scan duration (microseconds) that queues a small compaction.
    pub small_compaction_duration_threshold: u64,
    /// Number of RocksDB instances keys are sharded over.
    pub db_instance_num: usize,
    /// Logical database id (the server runs several logical DBs).
    pub db_id: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        options.set_max_open_files(10000);
        options.set_write_buffer_size(64 << 20);
        options.set_max_write_buffer_number(3);
        options.set_target_file_size_base(64 << 20);
        options.set_level_compaction_dynamic_level_bytes(true);

        Self {
            options,
            block_cache_size: 8 << 20,
            share_block_cache: true,
            statistics_max_size: 10000,
            small_compaction_threshold: 5000,
            small_compaction_duration_threshold: 10000,
            db_instance_num: 1,
            db_id: 0,
        }
    }
}

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_statistics_max_size(&mut self, size: usize) -> &mut Self {
        self.statistics_max_size = size;
        self
    }

    pub fn set_small_compaction_threshold(&mut self, threshold: u64) -> &mut Self {
        self.small_compaction_threshold = threshold;
        self
    }

    pub fn set_small_compaction_duration_threshold(&mut self, threshold: u64) -> &mut Self {
        self.small_compaction_duration_threshold = threshold;
        self
    }

    pub fn set_db_instance_num(&mut self, num: usize) -> &mut Self {
        self.db_instance_num = num;
        self
    }

    pub fn set_db_id(&mut self, id: usize) -> &mut Self {
        self.db_id = id;
        self
    }
}
