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


//! Transfer lifecycle states and the transition table
//!
//! Every state change of an HTTP transfer goes through [`transition`]: the
//! current state and an event select the next state, an explicit "ignore"
//! (benign late events such as data arriving after a pause request), or an
//! illegal-transition error. The `match` is exhaustive over both enums, so adding
//! a state or event without deciding its transitions does not compile.
//!
//! # Lifecycle
//! ```text
//! Waiting -> Downloading -> [Checking] -> [Demuxing] -> Finished
//!    |           |                                  \-> Error*
//!    |           +-> Pausing  -> Paused  -> (Start) -> Waiting
//!    +-----------+-> Canceling -> Canceled
//! ```
//! `Seeding`, `ErrorNotEnoughPeers` and `Uncompressing` belong to the torrent
//! engine and are only passed through; HTTP transfers never enter them.

use crate::error::{FailureKind, Result, TransferError};
use serde::{Deserialize, Serialize};

/// Lifecycle state of any transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferState {
    Waiting,
    DownloadingMetadata,
    Downloading,
    Checking,
    Pausing,
    Paused,
    Canceling,
    Canceled,
    Finished,
    ErrorGeneric,
    ErrorHashMismatch,
    ErrorMovingIncomplete,
    ErrorDiskFull,
    ErrorNotEnoughPeers,
    Uncompressing,
    Demuxing,
    Redirecting,
    Seeding,
}

impl TransferState {
    pub const ALL: [TransferState; 18] = [
        TransferState::Waiting,
        TransferState::DownloadingMetadata,
        TransferState::Downloading,
        TransferState::Checking,
        TransferState::Pausing,
        TransferState::Paused,
        TransferState::Canceling,
        TransferState::Canceled,
        TransferState::Finished,
        TransferState::ErrorGeneric,
        TransferState::ErrorHashMismatch,
        TransferState::ErrorMovingIncomplete,
        TransferState::ErrorDiskFull,
        TransferState::ErrorNotEnoughPeers,
        TransferState::Uncompressing,
        TransferState::Demuxing,
        TransferState::Redirecting,
        TransferState::Seeding,
    ];

    /// Decode a value produced by `state as u8`
    pub(crate) fn from_u8(value: u8) -> TransferState {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(TransferState::ErrorGeneric)
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            TransferState::ErrorGeneric
                | TransferState::ErrorHashMismatch
                | TransferState::ErrorMovingIncomplete
                | TransferState::ErrorDiskFull
                | TransferState::ErrorNotEnoughPeers
        )
    }

    /// An attempt is running (or about to) for this transfer
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TransferState::Waiting
                | TransferState::DownloadingMetadata
                | TransferState::Downloading
                | TransferState::Checking
                | TransferState::Demuxing
                | TransferState::Redirecting
                | TransferState::Uncompressing
        )
    }

    /// No further transition happens without a new user action
    pub fn is_terminal(self) -> bool {
        self.is_error()
            || matches!(
                self,
                TransferState::Paused | TransferState::Canceled | TransferState::Finished
            )
    }

    /// Status text shown next to a transfer
    pub fn label(self) -> &'static str {
        match self {
            TransferState::Waiting => "Waiting",
            TransferState::DownloadingMetadata => "Downloading metadata",
            TransferState::Downloading => "Downloading",
            TransferState::Checking => "Checking",
            TransferState::Pausing => "Pausing",
            TransferState::Paused => "Paused",
            TransferState::Canceling => "Canceling",
            TransferState::Canceled => "Canceled",
            TransferState::Finished => "Finished",
            TransferState::ErrorGeneric => "Error",
            TransferState::ErrorHashMismatch => "Error: hash mismatch",
            TransferState::ErrorMovingIncomplete => "Error: could not move file",
            TransferState::ErrorDiskFull => "Error: disk full",
            TransferState::ErrorNotEnoughPeers => "Error: not enough peers",
            TransferState::Uncompressing => "Uncompressing",
            TransferState::Demuxing => "Demuxing",
            TransferState::Redirecting => "Redirecting",
            TransferState::Seeding => "Seeding",
        }
    }
}

/// Something that happened to a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferEvent {
    /// A new fetch attempt is scheduled
    Start,
    /// Metadata (e.g. a .torrent file) is being retrieved
    MetadataRequested,
    /// Bytes arrived from the current attempt
    DataReceived,
    /// The server redirected the request
    Redirected,
    /// Digest verification started
    VerifyStarted,
    /// Container post-processing started
    PostProcessStarted,
    /// The final file is in place
    Finished,
    /// The attempt failed
    Failed(FailureKind),
    /// The user asked to pause
    PauseRequested,
    /// The user asked to cancel or remove
    CancelRequested,
    /// The HTTP layer confirmed the abort
    Cancelled,
}

impl TransferEvent {
    /// Every event, with each failure kind expanded
    pub fn all() -> Vec<TransferEvent> {
        let mut events = vec![
            TransferEvent::Start,
            TransferEvent::MetadataRequested,
            TransferEvent::DataReceived,
            TransferEvent::Redirected,
            TransferEvent::VerifyStarted,
            TransferEvent::PostProcessStarted,
            TransferEvent::Finished,
            TransferEvent::PauseRequested,
            TransferEvent::CancelRequested,
            TransferEvent::Cancelled,
        ];
        events.extend(FailureKind::ALL.iter().map(|k| TransferEvent::Failed(*k)));
        events
    }
}

/// Outcome of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(TransferState),
    Ignore,
}

/// Look up the transition for `event` in state `from`
pub fn transition(from: TransferState, event: TransferEvent) -> Result<Transition> {
    use TransferState as S;
    use Transition::{Ignore, To};

    let torrent_only = matches!(from, S::Seeding | S::ErrorNotEnoughPeers | S::Uncompressing);
    let illegal = || TransferError::IllegalTransition {
        from,
        event: format!("{:?}", event),
    };

    if torrent_only {
        return Err(illegal());
    }

    let outcome = match event {
        TransferEvent::Start => match from {
            S::Canceling => Ignore,
            _ => To(S::Waiting),
        },
        TransferEvent::MetadataRequested => match from {
            S::Waiting => To(S::DownloadingMetadata),
            S::DownloadingMetadata => Ignore,
            _ => return Err(illegal()),
        },
        TransferEvent::DataReceived => match from {
            S::Waiting | S::DownloadingMetadata | S::Downloading | S::Redirecting => {
                To(S::Downloading)
            }
            _ => Ignore,
        },
        TransferEvent::Redirected => match from {
            S::Waiting | S::Downloading => To(S::Redirecting),
            S::Redirecting | S::Pausing | S::Canceling => Ignore,
            _ => return Err(illegal()),
        },
        TransferEvent::VerifyStarted => match from {
            S::Waiting | S::Downloading | S::Redirecting | S::Pausing => To(S::Checking),
            S::Checking | S::Canceling => Ignore,
            _ => return Err(illegal()),
        },
        TransferEvent::PostProcessStarted => match from {
            S::Waiting | S::Downloading | S::Checking | S::Redirecting | S::Pausing => {
                To(S::Demuxing)
            }
            S::Demuxing | S::Canceling => Ignore,
            _ => return Err(illegal()),
        },
        TransferEvent::Finished => match from {
            S::Waiting
            | S::DownloadingMetadata
            | S::Downloading
            | S::Checking
            | S::Demuxing
            | S::Redirecting
            | S::Pausing => To(S::Finished),
            S::Finished | S::Canceling => Ignore,
            _ => return Err(illegal()),
        },
        TransferEvent::Failed(kind) => match from {
            S::Waiting
            | S::DownloadingMetadata
            | S::Downloading
            | S::Checking
            | S::Demuxing
            | S::Redirecting
            | S::Pausing => To(kind.state()),
            S::Finished => return Err(illegal()),
            _ => Ignore,
        },
        TransferEvent::PauseRequested => match from {
            S::Waiting | S::Downloading | S::Redirecting => To(S::Pausing),
            _ => Ignore,
        },
        TransferEvent::CancelRequested => match from {
            S::Canceling | S::Canceled | S::Finished => Ignore,
            _ => To(S::Canceling),
        },
        TransferEvent::Cancelled => match from {
            S::Pausing => To(S::Paused),
            S::Canceling
            | S::Waiting
            | S::DownloadingMetadata
            | S::Downloading
            | S::Checking
            | S::Demuxing
            | S::Redirecting => To(S::Canceled),
            _ => Ignore,
        },
    };

    Ok(outcome)
}
