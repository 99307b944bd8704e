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

use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::{
    base_value_format::{DataType, InternalValue, ParsedInternalValue, now_micros},
    delegate_internal_value, delegate_parsed_value,
    error::{InvalidFormatSnafu, Result},
    storage_define::{
        COUNT_LENGTH, META_VALUE_ETIME_OFFSET, RESERVE_LENGTH, SETS_META_VALUE_LENGTH,
        TIMESTAMP_LENGTH, TYPE_LENGTH,
    },
};

pub type SetsMetaValue = BaseMetaValue;
pub type ParsedSetsMetaValue = ParsedBaseMetaValue;

const VERSION_OFFSET: usize = TYPE_LENGTH + RESERVE_LENGTH;
const ETIME_OFFSET: usize = META_VALUE_ETIME_OFFSET;
const COUNT_OFFSET: usize = ETIME_OFFSET + TIMESTAMP_LENGTH;

/*
 * collection meta value format:
 * | type | reserve | version | etime | payload |
 * |  1B  |   1B    |  8B BE  | 8B BE |         |
 *
 * For Sets the payload is the member count, 4B little-endian.
 */
pub struct BaseMetaValue {
    pub inner: InternalValue,
}

delegate_internal_value!(BaseMetaValue);

impl BaseMetaValue {
    pub fn new<T>(data_type: DataType, user_value: T) -> Self
    where
        T: Into<Bytes>,
    {
        Self {
            inner: InternalValue::new(data_type, user_value),
        }
    }

    /// Advance the version: wall-clock microseconds, bumped past the previous
    /// value when the clock has not moved (or moved backwards).
    pub fn update_version(&mut self) -> u64 {
        let now = now_micros();
        self.inner.version = if self.inner.version >= now {
            self.inner.version + 1
        } else {
            now
        };
        self.inner.version
    }

    pub fn encode(&self) -> BytesMut {
        let needed = SETS_META_VALUE_LENGTH + self.inner.user_value.len() - COUNT_LENGTH;
        let mut buf = BytesMut::with_capacity(needed.max(SETS_META_VALUE_LENGTH));

        buf.put_u8(self.inner.data_type as u8);
        buf.put_slice(&self.inner.reserve);
        buf.put_u64(self.inner.version);
        buf.put_u64(self.inner.etime);
        buf.put_slice(&self.inner.user_value);
        buf
    }
}

pub struct ParsedBaseMetaValue {
    inner: ParsedInternalValue,
    count: i32,
}

delegate_parsed_value!(ParsedBaseMetaValue);

impl ParsedBaseMetaValue {
    pub fn new<T>(meta_value: T) -> Result<Self>
    where
        T: Into<BytesMut>,
    {
        let value: BytesMut = meta_value.into();
        ensure!(
            value.len() >= SETS_META_VALUE_LENGTH,
            InvalidFormatSnafu {
                message: format!(
                    "invalid meta value length: {} < {}",
                    value.len(),
                    SETS_META_VALUE_LENGTH
                ),
            }
        );

        let mut reader = Cursor::new(&value[..]);
        let data_type: DataType = reader.get_u8().try_into()?;
        reader.advance(RESERVE_LENGTH);
        let version = reader.get_u64();
        let etime = reader.get_u64();
        let count = reader.get_i32_le();

        Ok(Self {
            inner: ParsedInternalValue::new(
                value,
                data_type,
                COUNT_OFFSET..COUNT_OFFSET + COUNT_LENGTH,
                version,
                etime,
            ),
            count,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.inner.data_type
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn encoded(&self) -> &[u8] {
        &self.inner.value
    }

    /// A Set is addressable only while unexpired and non-empty.
    pub fn is_valid(&self) -> bool {
        !self.inner.is_stale() && self.count != 0
    }

    pub fn check_set_count(&self, count: usize) -> bool {
        count <= i32::MAX as usize
    }

    pub fn check_modify_count(&self, delta: i32) -> bool {
        self.count.checked_add(delta).is_some_and(|c| c >= 0)
    }

    pub fn modify_count(&mut self, delta: i32) {
        self.set_count(self.count.saturating_add(delta));
    }

    pub fn set_count(&mut self, count: i32) {
        self.count = count;
        let dst = &mut self.inner.value[COUNT_OFFSET..COUNT_OFFSET + COUNT_LENGTH];
        dst.copy_from_slice(&count.to_le_bytes());
    }

    pub fn set_etime(&mut self, etime: u64) {
        self.inner.etime = etime;
        let dst = &mut self.inner.value[ETIME_OFFSET..ETIME_OFFSET + TIMESTAMP_LENGTH];
        dst.copy_from_slice(&etime.to_be_bytes());
    }

    pub fn update_version(&mut self) -> u64 {
        let now = now_micros();
        self.inner.version = if self.inner.version >= now {
            self.inner.version + 1
        } else {
            now
        };
        let version = self.inner.version;
        let dst = &mut self.inner.value[VERSION_OFFSET..VERSION_OFFSET + TIMESTAMP_LENGTH];
        dst.copy_from_slice(&version.to_be_bytes());
        version
    }

    /// Reset to an empty, unexpired slot under a fresh version. Used both to
    /// recycle stale metas and to logically destroy a live Set: every member
    /// record under a prior version becomes invisible at once.
    pub fn initial_meta_value(&mut self) -> u64 {
        self.set_count(0);
        self.set_etime(0);
        self.update_version()
    }
}
