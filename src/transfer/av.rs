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


//! Video/audio stream download
//!
//! # Acquisition modes
//! Derived once from the streams a result offers:
//! - video only: fetch `<base>.m4v`, rewrite it without global metadata
//! - audio only: fetch `<base>.m4a`, demux its audio into the final file
//! - both: fetch the video leg, then the audio leg, then mux them
//!
//! The final container is written by the [`ContainerProcessor`] straight into
//! the save directory; the temporary legs are removed afterwards.
//!
//! [`ContainerProcessor`]: crate::media::ContainerProcessor

use crate::error::{Result, TransferError};
use crate::file::paths::{build_complete_file, temp_file};
use crate::transfer::context::TransferContext;
use crate::transfer::engine::{Blueprint, HttpTransfer, Leg, LegSpec, TransferKind};
use crate::transfer::source::{StreamLink, StreamSearchResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const VIDEO_TEMP_EXTENSION: &str = "m4v";
const AUDIO_TEMP_EXTENSION: &str = "m4a";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvMode {
    VideoOnly,
    DemuxedAudioOnly,
    SeparateVideoAndAudio,
}

impl AvMode {
    pub fn for_result(result: &StreamSearchResult) -> Result<Self> {
        match (&result.video, &result.audio) {
            (Some(_), None) => Ok(AvMode::VideoOnly),
            (None, Some(_)) => Ok(AvMode::DemuxedAudioOnly),
            (Some(_), Some(_)) => Ok(AvMode::SeparateVideoAndAudio),
            (None, None) => Err(TransferError::invalid_input(
                "stream result has neither a video nor an audio stream",
            )),
        }
    }
}

/// A download created from a video site result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvStreamDownload {
    pub result: StreamSearchResult,
}

impl AvStreamDownload {
    pub fn new(result: StreamSearchResult) -> Self {
        Self { result }
    }

    /// Create the transfer and schedule it on the AV pool
    pub fn start(self, ctx: &TransferContext) -> Result<HttpTransfer> {
        let mode = AvMode::for_result(&self.result)?;
        let filename = &self.result.details.filename;
        if filename.trim().is_empty() {
            return Err(TransferError::invalid_input("stream result has no file name"));
        }

        let config = ctx.config();
        let incomplete_dir = config.incomplete_dir();

        let mut legs = Vec::with_capacity(2);
        if let Some(video) = &self.result.video {
            legs.push(leg_spec(Leg::Video, video, &incomplete_dir, filename, VIDEO_TEMP_EXTENSION)?);
        }
        if let Some(audio) = &self.result.audio {
            legs.push(leg_spec(Leg::Audio, audio, &incomplete_dir, filename, AUDIO_TEMP_EXTENSION)?);
        }

        let blueprint = Blueprint {
            display_name: self.result.details.display_name.clone(),
            legs,
            complete_file: build_complete_file(&config.save_directory, filename),
            delete_on_cancel: true,
            kind: TransferKind::Av {
                result: self.result,
                mode,
            },
        };

        Ok(HttpTransfer::spawn(ctx, blueprint))
    }
}

fn leg_spec(leg: Leg, link: &StreamLink, dir: &Path, filename: &str, extension: &str) -> Result<LegSpec> {
    if link.url.is_empty() {
        return Err(TransferError::InvalidDownloadUrl(format!("{:?} stream has no URL", leg)));
    }
    Ok(LegSpec {
        leg,
        url: link.url.clone(),
        size: link.size,
        file: temp_file(dir, filename, extension),
    })
}
