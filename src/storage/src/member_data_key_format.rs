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
        VERSION_LENGTH, decode_user_key, encode_user_key, encoded_user_key_len,
        seek_userkey_delim,
    },
};

// Member data key for Set members. format:
// | encoded key | version | member |
// |   N B + 2B  |  8B BE  |        |
//
// The big-endian version keeps all members of one logical incarnation
// contiguous in key order; the same encoding with an empty member is the
// seek prefix for iterating that incarnation.
#[derive(Debug, Clone)]
pub struct MemberDataKey {
    key: Bytes,
    version: u64,
    member: Bytes,
}

impl MemberDataKey {
    pub fn new(key: &[u8], version: u64, member: &[u8]) -> Self {
        MemberDataKey {
            key: Bytes::copy_from_slice(key),
            version,
            member: Bytes::copy_from_slice(member),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let needed = encoded_user_key_len(&self.key) + VERSION_LENGTH + self.member.len();
        let mut dst = BytesMut::with_capacity(needed);
        encode_user_key(&self.key, &mut dst);
        dst.put_u64(self.version);
        dst.put_slice(&self.member);
        dst
    }

    /// Prefix under which every member of `(key, version)` sorts.
    pub fn encode_seek_key(key: &[u8], version: u64) -> BytesMut {
        MemberDataKey::new(key, version, b"").encode()
    }
}

pub struct ParsedMemberDataKey {
    key_str: BytesMut,
    version: u64,
    member: Bytes,
}

impl ParsedMemberDataKey {
    pub fn new(encoded_key: &[u8]) -> Result<Self> {
        let delim_end = seek_userkey_delim(encoded_key);
        ensure!(
            delim_end + VERSION_LENGTH <= encoded_key.len(),
            InvalidFormatSnafu {
                message: format!("member data key too short: {}", encoded_key.len()),
            }
        );

        let mut key_str = BytesMut::new();
        decode_user_key(&encoded_key[..delim_end], &mut key_str)?;

        let mut version_bytes = [0u8; VERSION_LENGTH];
        version_bytes.copy_from_slice(&encoded_key[delim_end..delim_end + VERSION_LENGTH]);
        let version = u64::from_be_bytes(version_bytes);

        let member = Bytes::copy_from_slice(&encoded_key[delim_end + VERSION_LENGTH..]);

        Ok(ParsedMemberDataKey {
            key_str,
            version,
            member,
        })
    }

    pub fn key(&self) -> &[u8] {
        self.key_str.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn member(&self) -> &[u8] {
        self.member.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_data_key_encode_and_decode() {
        let test_key = b"set_key\x00with_zero";
        let test_version: u64 = 42;
        let test_member = b"member_bytes";

        let encoded = MemberDataKey::new(test_key, test_version, test_member).encode();
        let expected_len = encoded_user_key_len(test_key) + VERSION_LENGTH + test_member.len();
        assert_eq!(encoded.len(), expected_len);

        let parsed = ParsedMemberDataKey::new(&encoded).unwrap();
        assert_eq!(parsed.key(), test_key);
        assert_eq!(parsed.version(), test_version);
        assert_eq!(parsed.member(), test_member);
    }

    #[test]
    fn test_member_data_key_empty_member() {
        let encoded = MemberDataKey::new(b"k", 7, b"").encode();
        let parsed = ParsedMemberDataKey::new(&encoded).unwrap();
        assert_eq!(parsed.key(), b"k");
        assert_eq!(parsed.version(), 7);
        assert_eq!(parsed.member(), b"");
    }

    #[test]
    fn test_seek_key_is_prefix_of_members() {
        let prefix = MemberDataKey::encode_seek_key(b"key", 9);
        for member in [&b"a"[..], b"bb", b"\x00zero"] {
            let encoded = MemberDataKey::new(b"key", 9, member).encode();
            assert!(encoded.starts_with(&prefix));
        }

        // Another version of the same key must not share the prefix.
        let other = MemberDataKey::new(b"key", 10, b"a").encode();
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_versions_sort_numerically() {
        // Big-endian versions keep incarnations ordered even across the
        // byte-boundary where little-endian would interleave.
        let low = MemberDataKey::encode_seek_key(b"key", 255);
        let high = MemberDataKey::encode_seek_key(b"key", 256);
        assert!(low < high);
    }
}
