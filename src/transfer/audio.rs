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


//! Audio stream download with tagging
//!
//! The stream is fetched into `<incomplete dir>/<base>.mp3`. On completion a
//! tagged copy is written to the save directory; when tagging fails the
//! untagged file is moved there instead.

use crate::error::{Result, TransferError};
use crate::file::paths::{build_complete_file, temp_file};
use crate::transfer::context::TransferContext;
use crate::transfer::engine::{Blueprint, HttpTransfer, Leg, LegSpec, TransferKind};
use crate::transfer::source::AudioSearchResult;

/// Extension of the temporary audio file
const AUDIO_TEMP_EXTENSION: &str = "mp3";

/// A download created from an audio search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamDownload {
    pub result: AudioSearchResult,
}

impl AudioStreamDownload {
    pub fn new(result: AudioSearchResult) -> Self {
        Self { result }
    }

    /// Create the transfer and schedule it on the audio pool
    pub fn start(self, ctx: &TransferContext) -> Result<HttpTransfer> {
        let details = &self.result.details;
        if self.result.download_url.is_empty() {
            return Err(TransferError::InvalidDownloadUrl(
                "audio result has no download URL".to_string(),
            ));
        }
        if details.filename.trim().is_empty() {
            return Err(TransferError::invalid_input("audio result has no file name"));
        }

        let config = ctx.config();
        let blueprint = Blueprint {
            display_name: details.display_name.clone(),
            legs: vec![LegSpec {
                leg: Leg::Main,
                url: self.result.download_url.clone(),
                size: self.result.size,
                file: temp_file(&config.incomplete_dir(), &details.filename, AUDIO_TEMP_EXTENSION),
            }],
            complete_file: build_complete_file(&config.save_directory, &details.filename),
            delete_on_cancel: true,
            kind: TransferKind::Audio(self.result),
        };

        Ok(HttpTransfer::spawn(ctx, blueprint))
    }
}
