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

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;
use rocksdb::{
    BlockBasedOptions, ColumnFamilyDescriptor, DB, Options, WriteOptions,
};
use snafu::{OptionExt, ResultExt};
use vstd::lock_mgr::LockMgr;

use crate::{
    base_meta_value_format::ParsedSetsMetaValue,
    base_value_format::{
        DataType, data_type_to_string, data_type_to_tag, expected_meta_value, get_meta_value_type,
        is_stale_meta_value,
    },
    data_compaction_filter::DataCompactionFilterFactory,
    error::{InvalidArgumentSnafu, KeyNotFoundSnafu, OptionNoneSnafu, Result, RocksSnafu},
    lru_cache::LRUCache,
    meta_compaction_filter::MetaCompactionFilterFactory,
    options::StorageOptions,
    statistics::KeyStatistics,
    storage::{BgTask, BgTaskHandler},
};

/// SPOPs on one key before a small compaction is queued for it.
const SPOP_COMPACT_THRESHOLD_COUNT: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFamilyIndex {
    MetaCF = 0,
    SetsDataCF = 1,
}

impl ColumnFamilyIndex {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamilyIndex::MetaCF => "default",
            ColumnFamilyIndex::SetsDataCF => "set_data_cf",
        }
    }
}

unsafe impl Send for Redis {}
unsafe impl Sync for Redis {}

/// One RocksDB instance plus the per-instance bookkeeping stores.
pub struct Redis {
    index: i32,
    need_close: AtomicBool,
    pub(crate) lock_mgr: Arc<LockMgr>,

    pub db: Option<Arc<DB>>,
    handles: Vec<String>,
    pub(crate) write_options: WriteOptions,

    storage_options: Arc<StorageOptions>,
    bg_task_handler: Arc<BgTaskHandler>,

    statistics_store: LRUCache<String, KeyStatistics>,
    scan_cursors_store: LRUCache<String, Vec<u8>>,
    spop_counts_store: LRUCache<String, u64>,
}

impl Redis {
    pub fn new(
        storage_options: Arc<StorageOptions>,
        index: i32,
        bg_task_handler: Arc<BgTaskHandler>,
        lock_mgr: Arc<LockMgr>,
    ) -> Self {
        Self {
            index,
            need_close: AtomicBool::new(false),
            lock_mgr,
            db: None,
            handles: Vec::new(),
            write_options: WriteOptions::default(),
            statistics_store: LRUCache::with_capacity(
                storage_options.statistics_max_size.max(1),
            ),
            scan_cursors_store: LRUCache::with_capacity(5000),
            spop_counts_store: LRUCache::with_capacity(1000),
            storage_options,
            bg_task_handler,
        }
    }

    pub fn open(&mut self, db_path: &str) -> Result<()> {
        let db_cell: Arc<OnceCell<Arc<DB>>> = Arc::new(OnceCell::new());

        let column_families = vec![
            self.create_cf_options(
                ColumnFamilyIndex::MetaCF,
                true,
                CompactionFilterChoice::Meta,
                &db_cell,
            ),
            // Set member lookups are dominated by prefix scans; skip the
            // bloom filter for the data family.
            self.create_cf_options(
                ColumnFamilyIndex::SetsDataCF,
                false,
                CompactionFilterChoice::SetsData,
                &db_cell,
            ),
        ];

        let db = DB::open_cf_descriptors(
            &self.storage_options.options,
            db_path,
            column_families,
        )
        .context(RocksSnafu)?;
        let db = Arc::new(db);

        // Hand the opened handle to the data compaction filter factory.
        let _ = db_cell.set(db.clone());

        self.handles = vec![
            ColumnFamilyIndex::MetaCF.name().to_string(),
            ColumnFamilyIndex::SetsDataCF.name().to_string(),
        ];
        self.db = Some(db);
        Ok(())
    }

    fn create_cf_options(
        &self,
        cf: ColumnFamilyIndex,
        use_bloom_filter: bool,
        filter: CompactionFilterChoice,
        db_cell: &Arc<OnceCell<Arc<DB>>>,
    ) -> ColumnFamilyDescriptor {
        let mut cf_opts: Options = self.storage_options.options.clone();
        let mut table_opts = BlockBasedOptions::default();

        if use_bloom_filter {
            table_opts.set_bloom_filter(10.0, true);
        }
        if !self.storage_options.share_block_cache && self.storage_options.block_cache_size > 0 {
            let cache = rocksdb::Cache::new_lru_cache(self.storage_options.block_cache_size);
            table_opts.set_block_cache(&cache);
        }
        cf_opts.set_block_based_table_factory(&table_opts);

        match filter {
            CompactionFilterChoice::Meta => {
                cf_opts.set_compaction_filter_factory(MetaCompactionFilterFactory);
            }
            CompactionFilterChoice::SetsData => {
                cf_opts.set_compaction_filter_factory(DataCompactionFilterFactory::new(
                    db_cell.clone(),
                    DataType::Set,
                ));
            }
        }

        ColumnFamilyDescriptor::new(cf.name(), cf_opts)
    }

    pub fn get_index(&self) -> i32 {
        self.index
    }

    pub fn set_need_close(&self, need_close: bool) {
        self.need_close.store(need_close, Ordering::SeqCst);
    }

    pub(crate) fn db(&self) -> Result<&Arc<DB>> {
        self.db.as_ref().context(OptionNoneSnafu {
            message: "db is not initialized".to_string(),
        })
    }

    pub fn handle(
        &self,
        cf_index: ColumnFamilyIndex,
    ) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>> {
        let db = self.db()?;
        let name = self
            .handles
            .get(cf_index as usize)
            .context(OptionNoneSnafu {
                message: format!("column family {cf_index:?} is not initialized"),
            })?;
        db.cf_handle(name).context(OptionNoneSnafu {
            message: format!("column family {name} is missing"),
        })
    }

    /// Interpret a raw meta value for a Set operation on `key`.
    ///
    /// `Ok(Some(_))` — the key holds a Set meta (possibly stale or empty,
    /// callers check `is_valid`). `Ok(None)` — the key holds another type
    /// that is already stale, which every operation treats as absent.
    /// A live non-Set meta is the WRONGTYPE error.
    pub(crate) fn parse_set_meta(
        &self,
        key: &[u8],
        meta_value: &[u8],
    ) -> Result<Option<ParsedSetsMetaValue>> {
        if !expected_meta_value(DataType::Set, meta_value) {
            if is_stale_meta_value(meta_value)? {
                return Ok(None);
            }
            return InvalidArgumentSnafu {
                message: format!(
                    "WRONGTYPE, key: {}, expect type: {}, get type: {}",
                    String::from_utf8_lossy(key),
                    data_type_to_string(DataType::Set),
                    data_type_to_string(get_meta_value_type(meta_value)?),
                ),
            }
            .fail();
        }
        ParsedSetsMetaValue::new(meta_value).map(Some)
    }

    pub(crate) fn key_not_found(key: &[u8]) -> crate::error::Error {
        KeyNotFoundSnafu {
            key: String::from_utf8_lossy(key).to_string(),
        }
        .build()
    }

    // --- scan-cursor store ------------------------------------------------

    fn scan_index_key(dtype: DataType, key: &[u8], pattern: &[u8], cursor: i64) -> String {
        format!(
            "{}_{}_{}_{}",
            data_type_to_tag(dtype),
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(pattern),
            cursor
        )
    }

    pub fn get_scan_start_point(
        &self,
        dtype: DataType,
        key: &[u8],
        pattern: &[u8],
        cursor: i64,
    ) -> Result<Vec<u8>> {
        let index_key = Self::scan_index_key(dtype, key, pattern, cursor);
        self.scan_cursors_store
            .lookup(&index_key)
            .ok_or_else(|| Self::key_not_found(key))
    }

    pub fn store_scan_next_point(
        &self,
        dtype: DataType,
        key: &[u8],
        pattern: &[u8],
        cursor: i64,
        next_point: &[u8],
    ) {
        let index_key = Self::scan_index_key(dtype, key, pattern, cursor);
        self.scan_cursors_store.insert(index_key, next_point.to_vec());
    }

    // --- SPOP progress ----------------------------------------------------

    pub fn reset_spop_count(&self, key: &[u8]) {
        self.spop_counts_store
            .remove(&String::from_utf8_lossy(key).to_string());
    }

    pub fn add_and_get_spop_count(&self, key: &[u8]) -> u64 {
        let key = String::from_utf8_lossy(key).to_string();
        self.spop_counts_store
            .update(key, |old| old.copied().unwrap_or(0) + 1)
    }

    /// Repeated pops shred a key's member range; nudge a compaction once
    /// enough of them have accumulated.
    pub(crate) fn note_spop(&self, key: &[u8]) {
        if self.add_and_get_spop_count(key) >= SPOP_COMPACT_THRESHOLD_COUNT {
            self.reset_spop_count(key);
            self.add_compact_key_task(DataType::Set, key);
        }
    }

    // --- statistics -------------------------------------------------------

    pub fn update_specific_key_statistics(&self, dtype: DataType, key: &[u8], count: u64) {
        if self.storage_options.statistics_max_size == 0 || count == 0 {
            return;
        }
        let key_str = String::from_utf8_lossy(key).to_string();
        let stats = self.statistics_store.update(key_str.clone(), |old| {
            let mut stats = old.cloned().unwrap_or_default();
            stats.add_modify_count(count);
            stats
        });
        if stats.modify_count() >= self.storage_options.small_compaction_threshold {
            self.statistics_store.update(key_str, |old| {
                let mut stats = old.cloned().unwrap_or_default();
                stats.reset_modify_count();
                stats
            });
            self.add_compact_key_task(dtype, key);
        }
    }

    pub(crate) fn update_key_duration(&self, dtype: DataType, key: &[u8], duration_us: u64) {
        if self.storage_options.statistics_max_size == 0 {
            return;
        }
        let key_str = String::from_utf8_lossy(key).to_string();
        let stats = self.statistics_store.update(key_str, |old| {
            let mut stats = old.cloned().unwrap_or_default();
            stats.add_duration(duration_us);
            stats
        });
        if stats.avg_duration() >= self.storage_options.small_compaction_duration_threshold {
            self.add_compact_key_task(dtype, key);
        }
    }

    fn add_compact_key_task(&self, dtype: DataType, key: &[u8]) {
        let task = BgTask::CompactRange {
            dtype,
            start: key.to_vec(),
            end: key.to_vec(),
        };
        if let Err(e) = self.bg_task_handler.try_send(task) {
            log::debug!("drop small-compaction task for instance {}: {e}", self.index);
        }
    }

    // --- maintenance ------------------------------------------------------

    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let db = self.db()?;
        for cf_index in [ColumnFamilyIndex::MetaCF, ColumnFamilyIndex::SetsDataCF] {
            let cf = self.handle(cf_index)?;
            db.compact_range_cf(&cf, begin, end);
        }
        Ok(())
    }

    pub fn get_property(&self, property: &str) -> Result<u64> {
        let db = self.db()?;
        db.property_int_value(property)
            .context(RocksSnafu)?
            .context(OptionNoneSnafu {
                message: format!("property {property} not found"),
            })
    }
}

enum CompactionFilterChoice {
    Meta,
    SetsData,
}

impl Drop for Redis {
    fn drop(&mut self) {
        if self.need_close.load(Ordering::SeqCst) {
            if let Some(db) = &self.db {
                db.cancel_all_background_work(true);
            }
            self.handles.clear();
            self.db = None;
        }
    }
}
