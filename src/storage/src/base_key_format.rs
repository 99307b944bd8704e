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
    error::{InvalidFormatSnafu, Result},
    storage_define::{
        RESERVE_LENGTH, decode_user_key, encode_user_key, encoded_user_key_len,
    },
};

// Meta key for every data type. format:
// | encoded key | reserve |
// |   N B + 2B  |   1B    |
//
// The trailing byte is reserved as a type discriminant for future layout
// revisions; it is always zero today.
pub struct BaseMetaKey {
    key: Bytes,
    reserve: [u8; RESERVE_LENGTH],
}

impl BaseMetaKey {
    pub fn new(key: &[u8]) -> Self {
        BaseMetaKey {
            key: Bytes::copy_from_slice(key),
            reserve: [0; RESERVE_LENGTH],
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(encoded_user_key_len(&self.key) + RESERVE_LENGTH);
        encode_user_key(&self.key, &mut dst);
        dst.put_slice(&self.reserve);
        dst
    }
}

pub struct ParsedBaseMetaKey {
    key_str: BytesMut,
}

impl ParsedBaseMetaKey {
    pub fn new(encoded_key: &[u8]) -> Result<Self> {
        ensure!(
            encoded_key.len() > RESERVE_LENGTH,
            InvalidFormatSnafu {
                message: "encoded meta key too short".to_string(),
            }
        );
        let mut key_str = BytesMut::new();
        decode_user_key(&encoded_key[..encoded_key.len() - RESERVE_LENGTH], &mut key_str)?;
        Ok(ParsedBaseMetaKey { key_str })
    }

    pub fn key(&self) -> &[u8] {
        self.key_str.as_ref()
    }
}
