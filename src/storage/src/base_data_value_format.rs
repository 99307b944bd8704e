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

use bytes::{BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::{
    base_value_format::{DataType, InternalValue},
    error::{InvalidFormatSnafu, Result},
    storage_define::RESERVE_LENGTH,
};

/*
 * member data value format:
 * | value | reserve |
 * |       |   1B    |
 *
 * Set membership is carried entirely by the key; the stored value is an
 * empty placeholder plus one reserved byte.
 */
pub struct BaseDataValue {
    inner: InternalValue,
}

impl BaseDataValue {
    pub fn new<T>(user_value: T) -> Self
    where
        T: Into<Bytes>,
    {
        Self {
            inner: InternalValue::new(DataType::None, user_value),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.inner.user_value.len() + RESERVE_LENGTH);
        buf.put_slice(&self.inner.user_value);
        buf.put_slice(&self.inner.reserve);
        buf
    }
}

pub struct ParsedBaseDataValue {
    user_value: BytesMut,
}

impl ParsedBaseDataValue {
    pub fn new(value: &[u8]) -> Result<Self> {
        ensure!(
            value.len() >= RESERVE_LENGTH,
            InvalidFormatSnafu {
                message: "data value too short".to_string(),
            }
        );
        Ok(Self {
            user_value: BytesMut::from(&value[..value.len() - RESERVE_LENGTH]),
        })
    }

    pub fn user_value(&self) -> &[u8] {
        self.user_value.as_ref()
    }
}
