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

//! Per-key hotness counters feeding the small-compaction heuristics.

use std::{collections::VecDeque, time::Instant};

use crate::base_value_format::DataType;
use crate::redis::Redis;

/// Modification count plus a trimmed-mean window of scan durations for one
/// user key. The window drops its minimum and maximum before averaging so a
/// single outlier cannot trigger a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatistics {
    window_size: usize,
    durations: VecDeque<u64>,
    modify_count: u64,
}

impl KeyStatistics {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size + 2,
            durations: VecDeque::new(),
            modify_count: 0,
        }
    }

    pub fn add_duration(&mut self, duration_us: u64) {
        self.durations.push_back(duration_us);
        while self.durations.len() > self.window_size {
            self.durations.pop_front();
        }
    }

    /// Trimmed mean over a full window; zero until the window fills.
    pub fn avg_duration(&self) -> u64 {
        if self.durations.len() < self.window_size || self.durations.len() <= 2 {
            return 0;
        }
        let min = self.durations.iter().min().copied().unwrap_or(0);
        let max = self.durations.iter().max().copied().unwrap_or(0);
        let sum: u64 = self.durations.iter().sum();
        (sum - min - max) / (self.durations.len() as u64 - 2)
    }

    pub fn add_modify_count(&mut self, count: u64) {
        self.modify_count += count;
    }

    pub fn modify_count(&self) -> u64 {
        self.modify_count
    }

    pub fn reset_modify_count(&mut self) {
        self.modify_count = 0;
    }
}

impl Default for KeyStatistics {
    fn default() -> Self {
        Self::new(10)
    }
}

/// RAII timer around scan-heavy read paths; reports the elapsed time into
/// the owning instance's statistics store on drop.
pub struct KeyStatisticsDurationGuard<'a> {
    redis: &'a Redis,
    dtype: DataType,
    key: Vec<u8>,
    start: Instant,
}

impl<'a> KeyStatisticsDurationGuard<'a> {
    pub fn new(redis: &'a Redis, dtype: DataType, key: &[u8]) -> Self {
        Self {
            redis,
            dtype,
            key: key.to_vec(),
            start: Instant::now(),
        }
    }
}

impl Drop for KeyStatisticsDurationGuard<'_> {
    fn drop(&mut self) {
        let micros = self.start.elapsed().as_micros() as u64;
        self.redis.update_key_duration(self.dtype, &self.key, micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_duration_needs_full_window() {
        let mut stats = KeyStatistics::new(3);
        stats.add_duration(100);
        stats.add_duration(200);
        assert_eq!(stats.avg_duration(), 0);

        stats.add_duration(300);
        stats.add_duration(400);
        stats.add_duration(1_000_000);
        // Window is full (5 samples): drop min 100 and max 1_000_000.
        assert_eq!(stats.avg_duration(), (200 + 300 + 400) / 3);
    }

    #[test]
    fn test_window_slides() {
        let mut stats = KeyStatistics::new(1);
        for d in [10, 20, 30, 40, 50] {
            stats.add_duration(d);
        }
        // Only the last 3 samples remain: 30, 40, 50 -> trimmed mean = 40.
        assert_eq!(stats.avg_duration(), 40);
    }

    #[test]
    fn test_modify_count() {
        let mut stats = KeyStatistics::default();
        stats.add_modify_count(3);
        stats.add_modify_count(4);
        assert_eq!(stats.modify_count(), 7);
        stats.reset_modify_count();
        assert_eq!(stats.modify_count(), 0);
    }
}
