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


//! ID3 tagging of downloaded audio through FFmpeg

use super::{arg, execute_ffmpeg, push_metadata, write_cover, AudioTagger, AudioTags};
use crate::error::{Result, TransferError};
use crate::file::manager::cleanup_file;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tagger backed by the FFmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTagger {
    ffmpeg: PathBuf,
}

impl FfmpegTagger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn build_command(
        &self,
        input: &Path,
        cover: Option<&Path>,
        output: &Path,
        tags: &AudioTags,
    ) -> Vec<String> {
        let mut cmd = vec![arg(&self.ffmpeg), "-y".to_string(), "-i".to_string(), arg(input)];

        if let Some(cover) = cover {
            cmd.extend([
                "-i".to_string(),
                arg(cover),
                "-map".to_string(),
                "0:a".to_string(),
                "-map".to_string(),
                "1:v".to_string(),
                "-disposition:v:0".to_string(),
                "attached_pic".to_string(),
                "-metadata:s:v".to_string(),
                "title=Album cover".to_string(),
                "-metadata:s:v".to_string(),
                "comment=Cover (front)".to_string(),
            ]);
        }

        cmd.extend(["-codec".to_string(), "copy".to_string()]);
        cmd.extend(["-id3v2_version".to_string(), "3".to_string()]);

        push_metadata(
            &mut cmd,
            &[
                ("title", tags.title.as_str()),
                ("artist", tags.artist.as_str()),
                ("album", tags.album.as_str()),
                ("url", tags.url.as_deref().unwrap_or("")),
            ],
        );

        cmd.push(arg(output));
        cmd
    }
}

#[async_trait]
impl AudioTagger for FfmpegTagger {
    async fn tag(&self, input: &Path, output: &Path, tags: &AudioTags) -> Result<()> {
        let cover = match &tags.cover {
            Some(bytes) if !bytes.is_empty() => Some(write_cover(output, bytes).await?),
            _ => None,
        };

        let cmd = self.build_command(input, cover.as_deref(), output, tags);
        debug!(input = %input.display(), output = %output.display(), "Tagging audio");
        let result = execute_ffmpeg(&cmd).await;

        if let Some(cover) = &cover {
            cleanup_file(cover).await;
        }

        result.map_err(|e| match e {
            TransferError::FfmpegNotFound => e,
            other => TransferError::TaggingFailed(other.to_string()),
        })
    }
}
