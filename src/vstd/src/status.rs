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

use std::fmt;

/// Lightweight status code for lock-manager style APIs that are not
/// worth a full error enum.
#[derive(Debug)]
pub struct Status {
    code: Code,
    message: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Code {
    Ok,
    Busy,
}

impl Status {
    pub fn ok() -> Self {
        Status {
            code: Code::Ok,
            message: String::new(),
        }
    }

    pub fn busy(msg: &str) -> Self {
        Status {
            code: Code::Busy,
            message: msg.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert_eq!(status.message, "");
    }

    #[test]
    fn test_status_busy() {
        let status = Status::busy("lock already held");
        assert!(!status.is_ok());
        assert_eq!(status.to_string(), "Busy: lock already held");
    }
}
