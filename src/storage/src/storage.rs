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

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::BytesMut;
use snafu::{OptionExt, ResultExt};
use tokio::sync::mpsc;
use vstd::lock_mgr::LockMgr;

use crate::{
    Redis,
    base_value_format::DataType,
    error::{MpscSnafu, OptionNoneSnafu, Result},
    options::StorageOptions,
    slot_indexer::SlotIndexer,
    storage_define::encode_user_key,
};

#[derive(Debug)]
pub enum BgTask {
    /// Compact every record belonging to user keys in `[start, end]`.
    CompactRange {
        dtype: DataType,
        start: Vec<u8>,
        end: Vec<u8>,
    },
    Shutdown,
}

pub struct BgTaskHandler {
    sender: mpsc::Sender<BgTask>,
}

impl BgTaskHandler {
    pub fn new() -> (Self, mpsc::Receiver<BgTask>) {
        let (sender, receiver) = mpsc::channel(1000);
        (Self { sender }, receiver)
    }

    pub fn try_send(&self, task: BgTask) -> Result<()> {
        self.sender.try_send(task).context(MpscSnafu)?;
        Ok(())
    }
}

/// The engine façade: a pool of RocksDB instances sharing one lock manager,
/// with user keys sharded across instances.
pub struct Storage {
    pub insts: Vec<Arc<Redis>>,
    slot_indexer: SlotIndexer,
    pub lock_mgr: Arc<LockMgr>,

    bg_task_handler: Arc<BgTaskHandler>,
    bg_receiver: std::sync::Mutex<Option<mpsc::Receiver<BgTask>>>,
    bg_task: Option<tokio::task::JoinHandle<()>>,

    db_instance_num: usize,
    db_id: usize,
    is_opened: AtomicBool,
}

impl Storage {
    pub fn new(db_instance_num: usize, db_id: usize) -> Self {
        let (bg_task_handler, receiver) = BgTaskHandler::new();
        Self {
            insts: Vec::with_capacity(db_instance_num),
            slot_indexer: SlotIndexer::new(db_instance_num),
            lock_mgr: Arc::new(LockMgr::new(1000)),
            bg_task_handler: Arc::new(bg_task_handler),
            bg_receiver: std::sync::Mutex::new(Some(receiver)),
            bg_task: None,
            db_instance_num: db_instance_num.max(1),
            db_id,
            is_opened: AtomicBool::new(false),
        }
    }

    pub fn open(&mut self, options: Arc<StorageOptions>, db_path: impl AsRef<Path>) -> Result<()> {
        let db_path = db_path.as_ref();
        self.db_id = options.db_id;

        let mut new_insts = Vec::with_capacity(self.db_instance_num);
        for i in 0..self.db_instance_num {
            let sub_path = db_path.join(i.to_string());
            let sub_path = sub_path.to_str().context(OptionNoneSnafu {
                message: format!("invalid db path: {sub_path:?}"),
            })?;

            let mut inst = Redis::new(
                options.clone(),
                i as i32,
                self.bg_task_handler.clone(),
                self.lock_mgr.clone(),
            );
            inst.open(sub_path)?;
            log::info!("open RocksDB instance {i} at {sub_path}");
            new_insts.push(Arc::new(inst));
        }
        self.insts = new_insts;

        // The worker needs an ambient runtime; without one (plain unit
        // tests) compaction nudges are simply dropped.
        let receiver = self.bg_receiver.lock().expect("bg receiver poisoned").take();
        if let Some(receiver) = receiver {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let insts = self.insts.clone();
                    self.bg_task = Some(handle.spawn(Self::bg_task_worker(receiver, insts)));
                }
                Err(_) => {
                    log::warn!("no tokio runtime, background compaction worker disabled");
                    *self.bg_receiver.lock().expect("bg receiver poisoned") = Some(receiver);
                }
            }
        }

        self.is_opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_opened(&self) -> bool {
        self.is_opened.load(Ordering::SeqCst)
    }

    pub fn db_id(&self) -> usize {
        self.db_id
    }

    pub(crate) fn get_instance(&self, key: &[u8]) -> &Arc<Redis> {
        &self.insts[self.slot_indexer.get_instance(key)]
    }

    pub(crate) fn instance_id(&self, key: &[u8]) -> usize {
        self.slot_indexer.get_instance(key)
    }

    pub async fn shutdown(&mut self) {
        let _ = self.bg_task_handler.try_send(BgTask::Shutdown);
        if let Some(handle) = self.bg_task.take() {
            let _ = handle.await;
        }
    }

    async fn bg_task_worker(mut receiver: mpsc::Receiver<BgTask>, insts: Vec<Arc<Redis>>) {
        while let Some(task) = receiver.recv().await {
            match task {
                BgTask::CompactRange { dtype, start, end } => {
                    let (begin, finish) = Self::compact_bounds(&start, &end);
                    for inst in &insts {
                        if let Err(e) = inst.compact_range(Some(&begin), Some(&finish)) {
                            log::warn!(
                                "small compaction for {dtype:?} range failed on instance {}: {e}",
                                inst.get_index()
                            );
                        }
                    }
                }
                BgTask::Shutdown => {
                    log::info!("background task worker shutting down");
                    break;
                }
            }
        }
    }

    /// Bounds covering every record of the user keys in `[start, end]`:
    /// meta and member keys both begin with the encoded user key, so the
    /// upper bound pads past any version/member suffix.
    fn compact_bounds(start: &[u8], end: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut begin = BytesMut::new();
        encode_user_key(start, &mut begin);

        let mut finish = BytesMut::new();
        encode_user_key(end, &mut finish);
        finish.extend_from_slice(&[0xff; 16]);

        (begin.to_vec(), finish.to_vec())
    }
}
