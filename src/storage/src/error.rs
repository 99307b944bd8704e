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

//! Error types for the storage engine.

use snafu::{Location, Snafu};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("RocksDB error"))]
    Rocks {
        #[snafu(source)]
        error: rocksdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Key not found: {}", key))]
    KeyNotFound {
        key: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid format: {}", message))]
    InvalidFormat {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid argument: {}", message))]
    InvalidArgument {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Corruption: {}", message))]
    Corruption {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Value unexpectedly missing: {}", message))]
    OptionNone {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Background channel closed"))]
    Mpsc {
        #[snafu(source)]
        error: tokio::sync::mpsc::error::TrySendError<crate::storage::BgTask>,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Error {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound { .. })
    }
}
