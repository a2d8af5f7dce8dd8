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


//! Progress snapshots for display
//!
//! # Progress Information
//! - Id, name and display name for identification
//! - Bytes received / total bytes (-1 if unknown)
//! - Speed (kB/s) and estimated time remaining
//! - Percentage complete (-1 if unknown), digest progress while checking
//! - Transfer state and its status text

use crate::transfer::state::TransferState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Point-in-time view of a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub id: Uuid,

    /// File name
    pub name: String,

    /// Title shown in the transfer list
    pub display_name: String,

    pub state: TransferState,

    /// Expected total size in bytes, -1 if unknown
    pub size: i64,

    pub bytes_received: u64,

    /// Percentage 0-100, -1 if unknown
    pub progress: i32,

    /// Digest verification progress 0-100
    pub check_progress: u8,

    /// Current download speed in kB/s
    pub download_speed: f64,

    /// Estimated seconds remaining, -1 if unknown
    pub eta_seconds: i64,

    pub date_created: DateTime<Utc>,

    pub save_location: PathBuf,
}

impl TransferSnapshot {
    /// Format download speed as human-readable string (e.g., "512.0 kB/s")
    pub fn speed_string(&self) -> String {
        if self.download_speed >= 1000.0 {
            format!("{:.1} MB/s", self.download_speed / 1000.0)
        } else {
            format!("{:.1} kB/s", self.download_speed)
        }
    }

    /// Format ETA as human-readable string (e.g., "5m 30s")
    pub fn eta_string(&self) -> String {
        if self.eta_seconds < 0 {
            return "calculating...".to_string();
        }

        let eta = self.eta_seconds as u64;
        let hours = eta / 3600;
        let minutes = (eta % 3600) / 60;
        let seconds = eta % 60;

        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        let mb = bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }

    /// Single status line for the transfer list
    pub fn display_string(&self) -> String {
        match self.state {
            TransferState::Downloading => {
                let total = if self.size >= 0 {
                    Self::bytes_string(self.size as u64)
                } else {
                    "?".to_string()
                };
                let percent = if self.progress >= 0 {
                    format!("{}%", self.progress)
                } else {
                    "--".to_string()
                };
                format!(
                    "{}: {} ({} / {}) - {} - {}",
                    self.display_name,
                    percent,
                    Self::bytes_string(self.bytes_received),
                    total,
                    self.speed_string(),
                    self.eta_string()
                )
            }
            TransferState::Checking => {
                format!("{}: Checking {}%", self.display_name, self.check_progress)
            }
            TransferState::Paused if self.progress >= 0 => {
                format!("{}: Paused at {}%", self.display_name, self.progress)
            }
            state => format!("{}: {}", self.display_name, state.label()),
        }
    }
}
