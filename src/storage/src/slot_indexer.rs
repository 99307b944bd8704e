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

/// Maps user keys onto RocksDB instances.
pub struct SlotIndexer {
    instance_num: usize,
}

impl SlotIndexer {
    pub fn new(instance_num: usize) -> Self {
        Self {
            instance_num: instance_num.max(1),
        }
    }

    pub fn get_instance(&self, key: &[u8]) -> usize {
        if self.instance_num <= 1 {
            return 0;
        }
        (Self::hash(key) % self.instance_num as u64) as usize
    }

    // djb2
    fn hash(key: &[u8]) -> u64 {
        let mut hash: u64 = 5381;
        for &byte in key {
            hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
        }
        hash
    }
}
