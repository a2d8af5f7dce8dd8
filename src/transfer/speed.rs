// Transfer Core - Resumable HTTP transfer engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Quantized average-throughput calculation
//!
//! The average is recomputed at most once per sampling quantum; between quanta the
//! previous value is reported unchanged, which smooths the number shown in the UI.

use std::time::{Duration, Instant};

/// Default sampling quantum
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Speed tracker with a fixed sampling quantum
#[derive(Debug, Clone)]
pub struct SpeedTracker {
    /// Timestamp of the last recomputation
    last_sample: Instant,

    /// Bytes received at the last recomputation
    bytes_at_last_sample: u64,

    /// Average bytes per second over the last quantum
    average: u64,

    /// Minimum time between recomputations
    interval: Duration,
}

impl SpeedTracker {
    /// Create new speed tracker with the default one second quantum
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SAMPLE_INTERVAL)
    }

    /// Create new speed tracker with a custom quantum
    pub fn with_interval(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub(crate) fn starting_at(now: Instant, interval: Duration) -> Self {
        Self {
            last_sample: now,
            bytes_at_last_sample: 0,
            average: 0,
            interval,
        }
    }

    /// Sample the byte counter now and return the current average
    pub fn sample(&mut self, bytes_received: u64, completed: bool) -> u64 {
        self.sample_at(Instant::now(), bytes_received, completed)
    }

    /// Sample the byte counter at `now`
    ///
    /// A completed transfer resets every counter so it reports zero throughput.
    pub fn sample_at(&mut self, now: Instant, bytes_received: u64, completed: bool) -> u64 {
        if completed {
            self.last_sample = now;
            self.bytes_at_last_sample = 0;
            self.average = 0;
            return 0;
        }

        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed >= self.interval {
            let elapsed_ms = elapsed.as_millis().max(1) as u64;
            let delta = bytes_received.saturating_sub(self.bytes_at_last_sample);
            self.average = delta.saturating_mul(1000) / elapsed_ms;
            self.last_sample = now;
            self.bytes_at_last_sample = bytes_received;
        }

        self.average
    }

    /// Re-anchor the tracker at a byte offset (resume seeding)
    pub fn rebase(&mut self, bytes_received: u64) {
        self.rebase_at(Instant::now(), bytes_received);
    }

    pub(crate) fn rebase_at(&mut self, now: Instant, bytes_received: u64) {
        self.last_sample = now;
        self.bytes_at_last_sample = bytes_received;
        self.average = 0;
    }

    /// Last computed average in bytes per second
    pub fn average(&self) -> u64 {
        self.average
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
