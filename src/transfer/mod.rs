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


//! Transfers and the engine driving them
//!
//! # Transfer kinds
//! - [`GenericHttpDownload`] - single resumable URL with optional MD5 check
//! - [`AudioStreamDownload`] - audio stream, tagged on completion
//! - [`AvStreamDownload`] - video and/or audio streams, stripped, demuxed or muxed
//! - [`UriFetchTransfer`] - fetches torrent metadata and hands it over
//!
//! Every kind is driven through the same [`Transfer`] interface. The UI polls the
//! read-only accessors; `pause`, `resume` and `remove` only request changes, the
//! running attempt applies them.

pub mod audio;
pub mod av;
pub(crate) mod cell;
pub mod context;
pub mod engine;
pub mod fetcher;
pub mod generic;
pub mod hooks;
pub mod http;
pub mod progress;
pub mod source;
pub mod speed;
pub mod state;

pub use audio::AudioStreamDownload;
pub use av::{AvMode, AvStreamDownload};
pub use context::{TransferContext, WorkerPool};
pub use engine::HttpTransfer;
pub use fetcher::UriFetchTransfer;
pub use generic::GenericHttpDownload;
pub use hooks::{CompletionHooks, NoopHooks, PlaybackMonitor, TorrentHandoff, TorrentSource};
pub use http::{
    CancelToken, HttpClient, ReqwestHttpClient, ResponseHeaders, SaveOutcome, SaveRequest,
    TransferListener,
};
pub use progress::TransferSnapshot;
pub use source::{AudioSearchResult, SourceDetails, StreamLink, StreamSearchResult};
pub use speed::SpeedTracker;
pub use state::{TransferEvent, TransferState};

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

/// Uniform interface of every transfer
pub trait Transfer: Send + Sync {
    fn id(&self) -> Uuid;

    /// File name of the result
    fn name(&self) -> String;

    fn display_name(&self) -> String;

    fn state(&self) -> TransferState;

    /// Expected total size in bytes, -1 if unknown
    fn size(&self) -> i64;

    fn bytes_received(&self) -> u64;

    fn date_created(&self) -> DateTime<Utc>;

    /// Where the finished file is (or will be) placed
    fn save_location(&self) -> PathBuf;

    /// File that can be opened right now: the final file once complete, otherwise
    /// the temporary file being written if it exists
    fn preview_file(&self) -> Option<PathBuf>;

    fn can_preview(&self) -> bool {
        self.preview_file().is_some()
    }

    /// Identity of the content (MD5, source URL or info-hash)
    fn hash(&self) -> String;

    /// `bytes > 0 && (bytes == size || state == Finished)`
    fn is_completed(&self) -> bool;

    /// Average throughput in bytes per second
    fn average_speed(&self) -> u64;

    /// Digest progress while `Checking`
    fn check_progress(&self) -> u8 {
        0
    }

    fn is_pausable(&self) -> bool;

    fn is_resumable(&self) -> bool;

    /// Request a pause; falls back to cancelling when the transfer cannot resume
    fn pause(&self);

    /// Start a new attempt; a no-op while one is running or once finished
    fn resume(&self);

    /// Cancel if unfinished and seal the transfer; `delete_data` also removes
    /// the final file
    fn remove(&self, delete_data: bool);

    /// Percentage 0-100, -1 if the size is unknown, 100 once completed
    fn progress(&self) -> i32 {
        progress_percent(self.is_completed(), self.size(), self.bytes_received())
    }

    /// Download speed in kB/s, zero unless downloading
    fn download_speed(&self) -> f64 {
        if self.state() == TransferState::Downloading {
            self.average_speed() as f64 / 1000.0
        } else {
            0.0
        }
    }

    /// Seconds remaining, -1 if unknown
    fn eta(&self) -> i64 {
        eta_seconds(self.size(), self.bytes_received(), self.average_speed())
    }

    fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id(),
            name: self.name(),
            display_name: self.display_name(),
            state: self.state(),
            size: self.size(),
            bytes_received: self.bytes_received(),
            progress: self.progress(),
            check_progress: self.check_progress(),
            download_speed: self.download_speed(),
            eta_seconds: self.eta(),
            date_created: self.date_created(),
            save_location: self.save_location(),
        }
    }
}

pub(crate) fn progress_percent(completed: bool, size: i64, bytes: u64) -> i32 {
    if completed {
        return 100;
    }
    if size <= 0 {
        return -1;
    }
    ((bytes as u128 * 100) / size as u128).min(100) as i32
}

pub(crate) fn eta_seconds(size: i64, bytes: u64, speed: u64) -> i64 {
    if size <= 0 || speed == 0 {
        return -1;
    }
    (size - bytes as i64).max(0) / speed as i64
}
