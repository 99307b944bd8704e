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

//! Keyspace layout constants and the order-preserving user-key codec.
//!
//! User keys may contain any byte. To embed them in composite keys while
//! keeping lexicographic ordering, `0x00` is escaped to `0x00 0x01` and the
//! sequence `0x00 0x00` terminates the encoded key. The terminator doubles
//! as the separator between the user key and the fields that follow it.

use bytes::{BufMut, BytesMut};
use snafu::ensure;

use crate::error::{InvalidFormatSnafu, Result};

pub const TYPE_LENGTH: usize = 1;
pub const RESERVE_LENGTH: usize = 1;
pub const VERSION_LENGTH: usize = 8;
pub const TIMESTAMP_LENGTH: usize = 8;
pub const COUNT_LENGTH: usize = 4;

pub const NEED_TRANSFORM_CHARACTER: u8 = 0x00;
const ENCODED_TRANSFORM_CHARACTER: &[u8] = b"\x00\x01";
const ENCODED_KEY_DELIM: &[u8] = b"\x00\x00";
pub const ENCODED_KEY_DELIM_SIZE: usize = 2;

/// type(1B) + reserve(1B) + version(8B) + etime(8B) + count(4B)
pub const SETS_META_VALUE_LENGTH: usize =
    TYPE_LENGTH + RESERVE_LENGTH + VERSION_LENGTH + TIMESTAMP_LENGTH + COUNT_LENGTH;

/// Offset of the etime field inside an encoded meta value.
pub const META_VALUE_ETIME_OFFSET: usize = TYPE_LENGTH + RESERVE_LENGTH + VERSION_LENGTH;

pub fn encode_user_key(user_key: &[u8], dst: &mut BytesMut) {
    let mut start_pos = 0;
    for (i, &byte) in user_key.iter().enumerate() {
        if byte == NEED_TRANSFORM_CHARACTER {
            if i > start_pos {
                dst.put_slice(&user_key[start_pos..i]);
            }
            dst.put_slice(ENCODED_TRANSFORM_CHARACTER);
            start_pos = i + 1;
        }
    }
    if start_pos < user_key.len() {
        dst.put_slice(&user_key[start_pos..]);
    }
    dst.put_slice(ENCODED_KEY_DELIM);
}

/// Length `encode_user_key` will produce for `user_key`.
pub fn encoded_user_key_len(user_key: &[u8]) -> usize {
    let zeros = user_key
        .iter()
        .filter(|&&b| b == NEED_TRANSFORM_CHARACTER)
        .count();
    user_key.len() + zeros + ENCODED_KEY_DELIM_SIZE
}

/// Decodes an escaped user key. `encoded` must start at the key and contain
/// the delimiter; bytes past the delimiter are ignored.
pub fn decode_user_key(encoded: &[u8], user_key: &mut BytesMut) -> Result<()> {
    ensure!(
        encoded.len() >= ENCODED_KEY_DELIM_SIZE,
        InvalidFormatSnafu {
            message: "encoded key part too short".to_string(),
        }
    );

    let mut zero_ahead = false;
    let mut delim_found = false;
    for &byte in encoded {
        match byte {
            0x00 => {
                if zero_ahead {
                    delim_found = true;
                    break;
                }
                zero_ahead = true;
            }
            0x01 if zero_ahead => {
                user_key.put_u8(0x00);
                zero_ahead = false;
            }
            _ => {
                ensure!(
                    !zero_ahead,
                    InvalidFormatSnafu {
                        message: "invalid escape sequence in encoded key".to_string(),
                    }
                );
                user_key.put_u8(byte);
            }
        }
    }

    ensure!(
        delim_found,
        InvalidFormatSnafu {
            message: "encoded key delimiter not found".to_string(),
        }
    );
    Ok(())
}

/// Index one past the `0x00 0x00` delimiter, or `data.len()` when absent.
pub fn seek_userkey_delim(data: &[u8]) -> usize {
    let mut zero_ahead = false;
    for (i, &byte) in data.iter().enumerate() {
        if byte == 0x00 && zero_ahead {
            return i + 1;
        }
        zero_ahead = byte == 0x00;
    }
    data.len()
}
