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

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use snafu::ensure;

use crate::{
    error::{Error, InvalidFormatSnafu, Result},
    storage_define::{META_VALUE_ETIME_OFFSET, TIMESTAMP_LENGTH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String = 0,
    Hash = 1,
    Set = 2,
    List = 3,
    ZSet = 4,
    None = 5,
    All = 6,
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DataType::String),
            1 => Ok(DataType::Hash),
            2 => Ok(DataType::Set),
            3 => Ok(DataType::List),
            4 => Ok(DataType::ZSet),
            5 => Ok(DataType::None),
            6 => Ok(DataType::All),
            _ => InvalidFormatSnafu {
                message: format!("invalid data type byte: {value}"),
            }
            .fail(),
        }
    }
}

pub const DATA_TYPE_STRINGS: [&str; 7] = ["string", "hash", "set", "list", "zset", "none", "all"];
pub const DATA_TYPE_TAG: [char; 7] = ['k', 'h', 's', 'l', 'z', 'n', 'a'];

pub fn data_type_to_string(data_type: DataType) -> &'static str {
    DATA_TYPE_STRINGS[data_type as usize]
}

pub fn data_type_to_tag(data_type: DataType) -> char {
    DATA_TYPE_TAG[data_type as usize]
}

pub fn now_seconds() -> u64 {
    Utc::now().timestamp() as u64
}

pub fn now_micros() -> u64 {
    Utc::now().timestamp_micros() as u64
}

/// Cheap freshness probe over an encoded meta value: decodes only the
/// fixed-offset etime field, never the payload.
pub fn is_stale_meta_value(meta_value: &[u8]) -> Result<bool> {
    ensure!(
        meta_value.len() >= META_VALUE_ETIME_OFFSET + TIMESTAMP_LENGTH,
        InvalidFormatSnafu {
            message: format!("meta value too short: {}", meta_value.len()),
        }
    );
    let mut etime_bytes = [0u8; TIMESTAMP_LENGTH];
    etime_bytes.copy_from_slice(
        &meta_value[META_VALUE_ETIME_OFFSET..META_VALUE_ETIME_OFFSET + TIMESTAMP_LENGTH],
    );
    let etime = u64::from_be_bytes(etime_bytes);
    Ok(etime != 0 && etime <= now_seconds())
}

/// Type probe: examines only the tag byte, never parses the payload.
pub fn expected_meta_value(expected: DataType, meta_value: &[u8]) -> bool {
    meta_value.first().copied() == Some(expected as u8)
}

pub fn get_meta_value_type(meta_value: &[u8]) -> Result<DataType> {
    ensure!(
        !meta_value.is_empty(),
        InvalidFormatSnafu {
            message: "empty meta value".to_string(),
        }
    );
    DataType::try_from(meta_value[0])
}

#[derive(Debug, Clone)]
pub struct InternalValue {
    pub data_type: DataType,
    pub user_value: Bytes,
    pub version: u64,
    pub etime: u64,
    pub reserve: [u8; 1],
}

impl InternalValue {
    pub fn new<T>(data_type: DataType, user_value: T) -> Self
    where
        T: Into<Bytes>,
    {
        Self {
            data_type,
            user_value: user_value.into(),
            version: 0,
            etime: 0,
            reserve: [0; 1],
        }
    }

    pub fn set_etime(&mut self, etime: u64) {
        self.etime = etime;
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Expire `ttl` seconds from now.
    pub fn set_relative_etime(&mut self, ttl: u64) {
        self.etime = now_seconds().saturating_add(ttl);
    }
}

/// Forwards the shared `InternalValue` setters so wrapper types can be used
/// without reaching through `.inner`.
#[macro_export]
macro_rules! delegate_internal_value {
    ($struct_name:ident) => {
        impl $struct_name {
            #[allow(dead_code)]
            pub fn set_etime(&mut self, etime: u64) {
                self.inner.set_etime(etime);
            }

            #[allow(dead_code)]
            pub fn set_version(&mut self, version: u64) {
                self.inner.set_version(version);
            }

            #[allow(dead_code)]
            pub fn set_relative_etime(&mut self, ttl: u64) {
                self.inner.set_relative_etime(ttl);
            }
        }
    };
}

pub struct ParsedInternalValue {
    pub value: BytesMut,
    pub data_type: DataType,
    /// For meta values this range holds the encoded count.
    pub user_value_range: Range<usize>,
    pub version: u64,
    pub etime: u64,
}

impl ParsedInternalValue {
    pub fn new(
        value: BytesMut,
        data_type: DataType,
        user_value_range: Range<usize>,
        version: u64,
        etime: u64,
    ) -> Self {
        Self {
            value,
            data_type,
            user_value_range,
            version,
            etime,
        }
    }

    pub fn user_value(&self) -> BytesMut {
        let slice = &self.value[self.user_value_range.clone()];
        let mut out = BytesMut::with_capacity(slice.len());
        out.put_slice(slice);
        out
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn etime(&self) -> u64 {
        self.etime
    }

    pub fn is_permanent_survival(&self) -> bool {
        self.etime == 0
    }

    pub fn is_stale(&self) -> bool {
        self.etime != 0 && self.etime <= now_seconds()
    }
}

/// Forwards the shared `ParsedInternalValue` accessors.
#[macro_export]
macro_rules! delegate_parsed_value {
    ($struct_name:ident) => {
        impl $struct_name {
            #[allow(dead_code)]
            pub fn etime(&self) -> u64 {
                self.inner.etime()
            }

            #[allow(dead_code)]
            pub fn is_stale(&self) -> bool {
                self.inner.is_stale()
            }

            #[allow(dead_code)]
            pub fn is_permanent_survival(&self) -> bool {
                self.inner.is_permanent_survival()
            }

            #[allow(dead_code)]
            pub fn user_value(&self) -> bytes::BytesMut {
                self.inner.user_value()
            }

            #[allow(dead_code)]
            pub fn version(&self) -> u64 {
                self.inner.version()
            }
        }
    };
}
