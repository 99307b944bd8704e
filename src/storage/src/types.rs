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

//! Shared value types for the storage engine API.

/// A user key pinned to one logical incarnation of its collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersion {
    pub key: Vec<u8>,
    pub version: u64,
}

impl KeyVersion {
    pub fn new(key: Vec<u8>, version: u64) -> Self {
        Self { key, version }
    }
}

/// Aggregate key statistics reported by the introspection scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub keys: u64,
    pub expires: u64,
    pub avg_ttl: u64,
    pub invalid_keys: u64,
}

impl KeyInfo {
    pub fn add(&self, other: &Self) -> Self {
        Self {
            keys: self.keys + other.keys,
            expires: self.expires + other.expires,
            avg_ttl: self.avg_ttl + other.avg_ttl,
            invalid_keys: self.invalid_keys + other.invalid_keys,
        }
    }
}
