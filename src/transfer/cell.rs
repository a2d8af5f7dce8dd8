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


//! Single-writer state cell of an HTTP transfer
//!
//! Every mutation takes the cell's lock and goes through the transition table.
//! The values the UI polls (state, size, bytes, speed) are mirrored into atomics
//! and read without locking.
//!
//! Events from a fetch attempt carry the attempt's generation. Once a newer
//! attempt has started, events of older ones are dropped, so a cancelled attempt
//! can never move the byte counter or the state again.

use crate::transfer::http::{CancelToken, ResponseHeaders};
use crate::transfer::speed::SpeedTracker;
use crate::transfer::state::{transition, TransferEvent, TransferState, Transition};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Handle of one fetch attempt
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub generation: u64,
    pub cancel: CancelToken,
}

struct Guarded {
    generation: u64,
    in_flight: bool,
    cancel: CancelToken,
    removed: bool,
    resumable: bool,
    /// The server refused a ranged request; headers no longer turn resume back on
    ranges_rejected: bool,
    speed: SpeedTracker,
}

pub(crate) struct TransferCell {
    id: Uuid,
    state: AtomicU8,
    size: AtomicI64,
    bytes: AtomicU64,
    speed: AtomicU64,
    check_progress: AtomicU8,
    guarded: Mutex<Guarded>,
}

impl TransferCell {
    pub fn new(id: Uuid, size: i64, sample_interval: Duration) -> Self {
        Self {
            id,
            state: AtomicU8::new(TransferState::Waiting as u8),
            size: AtomicI64::new(size),
            bytes: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            check_progress: AtomicU8::new(0),
            guarded: Mutex::new(Guarded {
                generation: 0,
                in_flight: false,
                cancel: CancelToken::new(),
                removed: false,
                resumable: true,
                ranges_rejected: false,
                speed: SpeedTracker::with_interval(sample_interval),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.guarded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Average bytes per second
    pub fn average_speed(&self) -> u64 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn check_progress(&self) -> u8 {
        self.check_progress.load(Ordering::Acquire)
    }

    pub fn set_check_progress(&self, percent: u8) {
        self.check_progress.store(percent.min(100), Ordering::Release);
    }

    pub fn set_size(&self, size: i64) {
        self.size.store(size, Ordering::Release);
    }

    pub fn resumable(&self) -> bool {
        self.lock().resumable
    }

    /// Stop resuming for the rest of this transfer's life
    pub fn reject_ranges(&self) {
        let mut guarded = self.lock();
        guarded.resumable = false;
        guarded.ranges_rejected = true;
    }

    pub fn is_removed(&self) -> bool {
        self.lock().removed
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// `bytes > 0 && (bytes == size || state == Finished)`
    pub fn is_completed(&self) -> bool {
        let bytes = self.bytes();
        bytes > 0 && (bytes as i64 == self.size() || self.state() == TransferState::Finished)
    }

    fn apply_locked(&self, guarded: &Guarded, event: TransferEvent) -> Option<TransferState> {
        if guarded.removed && event != TransferEvent::Cancelled {
            debug!(transfer_id = %self.id, ?event, "Transfer removed, event dropped");
            return None;
        }

        let from = self.state();
        match transition(from, event) {
            Ok(Transition::To(to)) => {
                if to != from {
                    debug!(transfer_id = %self.id, ?from, ?to, ?event, "State change");
                }
                self.state.store(to as u8, Ordering::Release);
                Some(to)
            }
            Ok(Transition::Ignore) => None,
            Err(e) => {
                error!(transfer_id = %self.id, error = %e, "Rejected state change");
                None
            }
        }
    }

    /// Apply an event that does not belong to a particular attempt
    #[cfg(test)]
    pub fn apply(&self, event: TransferEvent) -> Option<TransferState> {
        let guarded = self.lock();
        self.apply_locked(&guarded, event)
    }

    /// Apply an event of attempt `generation`; stale attempts are ignored
    pub fn apply_for(&self, generation: u64, event: TransferEvent) -> Option<TransferState> {
        let guarded = self.lock();
        if guarded.generation != generation {
            debug!(transfer_id = %self.id, generation, current = guarded.generation, ?event, "Stale event dropped");
            return None;
        }
        self.apply_locked(&guarded, event)
    }

    /// Start a new attempt, unless one is already running or the transfer was removed
    pub fn begin_attempt(&self) -> Option<Attempt> {
        let mut guarded = self.lock();
        let state = self.state();

        if guarded.removed || state == TransferState::Finished {
            return None;
        }
        if guarded.in_flight && state.is_active() {
            debug!(transfer_id = %self.id, ?state, "Attempt already running");
            return None;
        }

        self.apply_locked(&guarded, TransferEvent::Start)?;

        guarded.generation += 1;
        guarded.in_flight = true;
        guarded.cancel = CancelToken::new();
        guarded.speed.rebase(self.bytes());
        self.speed.store(0, Ordering::Release);

        Some(Attempt {
            generation: guarded.generation,
            cancel: guarded.cancel.clone(),
        })
    }

    /// The attempt `generation` returned
    ///
    /// A pause or cancel requested after the attempt had settled is resolved
    /// here; the resulting state is returned.
    pub fn end_attempt(&self, generation: u64) -> Option<TransferState> {
        let mut guarded = self.lock();
        if guarded.generation != generation {
            return None;
        }
        guarded.in_flight = false;

        match self.state() {
            TransferState::Pausing | TransferState::Canceling => {
                self.apply_locked(&guarded, TransferEvent::Cancelled)
            }
            _ => None,
        }
    }

    /// Ask the running attempt to stop with `Paused`
    ///
    /// Without a running attempt the pause resolves immediately.
    pub fn request_pause(&self) -> Option<TransferState> {
        let guarded = self.lock();
        let requested = self.apply_locked(&guarded, TransferEvent::PauseRequested)?;
        guarded.cancel.cancel();

        if guarded.in_flight {
            Some(requested)
        } else {
            self.apply_locked(&guarded, TransferEvent::Cancelled)
        }
    }

    /// Ask the running attempt to stop with `Canceled`, optionally sealing the cell
    ///
    /// Returns whether an attempt is still running and will resolve the cancel.
    pub fn request_cancel(&self, remove: bool) -> bool {
        let mut guarded = self.lock();
        self.apply_locked(&guarded, TransferEvent::CancelRequested);
        guarded.cancel.cancel();
        if remove {
            guarded.removed = true;
        }

        if guarded.in_flight {
            true
        } else {
            self.apply_locked(&guarded, TransferEvent::Cancelled);
            false
        }
    }

    /// Response headers of attempt `generation`
    pub fn on_headers(&self, generation: u64, headers: &ResponseHeaders, track_size: bool) {
        let mut guarded = self.lock();
        if guarded.generation != generation || guarded.removed {
            return;
        }

        guarded.resumable = !guarded.ranges_rejected && headers.supports_ranges();

        if track_size {
            if let Some(total) = headers.content_range_total() {
                self.set_size(total as i64);
            } else if headers.status == 200 {
                if let Some(length) = headers.content_length() {
                    self.set_size(length as i64);
                }
            }
        }
    }

    /// Bytes written by attempt `generation`
    ///
    /// Counted only while the transfer is (or becomes) `Downloading`.
    pub fn on_data(&self, generation: u64, len: usize) {
        let mut guarded = self.lock();
        if guarded.generation != generation {
            return;
        }

        if self.apply_locked(&guarded, TransferEvent::DataReceived) != Some(TransferState::Downloading) {
            return;
        }

        let bytes = self.bytes.fetch_add(len as u64, Ordering::AcqRel) + len as u64;
        let average = guarded.speed.sample(bytes, false);
        self.speed.store(average, Ordering::Release);
    }

    /// Set the byte counter of attempt `generation` (resume seeding, restart)
    pub fn seed_bytes(&self, generation: u64, bytes: u64) {
        let mut guarded = self.lock();
        if guarded.generation != generation {
            return;
        }
        self.bytes.store(bytes, Ordering::Release);
        guarded.speed.rebase(bytes);
        self.speed.store(0, Ordering::Release);
    }

    /// Zero the throughput of a finished transfer
    pub fn reset_speed(&self) {
        let mut guarded = self.lock();
        guarded.speed.sample(self.bytes(), true);
        self.speed.store(0, Ordering::Release);
    }
}
