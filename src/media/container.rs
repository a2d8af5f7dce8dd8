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


//! MP4 container rewrites through FFmpeg
//!
//! All operations copy the elementary streams (`-codec copy`); nothing is
//! re-encoded. The output is verified to exist after FFmpeg returns.

use super::{arg, execute_ffmpeg, push_metadata, write_cover, ContainerMetadata, ContainerProcessor};
use crate::error::{Result, TransferError};
use crate::file::manager::{cleanup_file, file_exists};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FfmpegContainerProcessor {
    ffmpeg: PathBuf,
}

impl FfmpegContainerProcessor {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn build_strip_command(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            arg(&self.ffmpeg),
            "-y".to_string(),
            "-i".to_string(),
            arg(input),
            "-map".to_string(),
            "0".to_string(),
            "-codec".to_string(),
            "copy".to_string(),
            "-map_metadata".to_string(),
            "-1".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            arg(output),
        ]
    }

    fn build_demux_command(
        &self,
        input: &Path,
        cover: Option<&Path>,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> Vec<String> {
        let mut cmd = vec![arg(&self.ffmpeg), "-y".to_string(), "-i".to_string(), arg(input)];

        match cover {
            Some(cover) => cmd.extend([
                "-i".to_string(),
                arg(cover),
                "-map".to_string(),
                "0:a".to_string(),
                "-map".to_string(),
                "1:v".to_string(),
                "-disposition:v:0".to_string(),
                "attached_pic".to_string(),
            ]),
            None => cmd.extend(["-map".to_string(), "0:a".to_string(), "-vn".to_string()]),
        }

        cmd.extend([
            "-codec".to_string(),
            "copy".to_string(),
            "-map_metadata".to_string(),
            "-1".to_string(),
        ]);
        push_metadata(&mut cmd, &Self::metadata_pairs(metadata));
        cmd.push(arg(output));
        cmd
    }

    fn build_mux_command(
        &self,
        video: &Path,
        audio: &Path,
        cover: Option<&Path>,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> Vec<String> {
        let mut cmd = vec![
            arg(&self.ffmpeg),
            "-y".to_string(),
            "-i".to_string(),
            arg(video),
            "-i".to_string(),
            arg(audio),
        ];

        if let Some(cover) = cover {
            cmd.extend(["-i".to_string(), arg(cover)]);
        }

        cmd.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
        ]);

        if cover.is_some() {
            cmd.extend([
                "-map".to_string(),
                "2:v".to_string(),
                "-disposition:v:1".to_string(),
                "attached_pic".to_string(),
            ]);
        }

        cmd.extend([
            "-codec".to_string(),
            "copy".to_string(),
            "-map_metadata".to_string(),
            "-1".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
        push_metadata(&mut cmd, &Self::metadata_pairs(metadata));
        cmd.push(arg(output));
        cmd
    }

    fn metadata_pairs(metadata: &ContainerMetadata) -> [(&str, &str); 3] {
        [
            ("title", metadata.title.as_str()),
            ("artist", metadata.author.as_str()),
            ("comment", metadata.source.as_str()),
        ]
    }

    async fn run(&self, cmd: Vec<String>, output: &Path, cover: Option<PathBuf>) -> Result<()> {
        let result = execute_ffmpeg(&cmd).await;

        if let Some(cover) = &cover {
            cleanup_file(cover).await;
        }

        result.map_err(|e| match e {
            TransferError::FfmpegNotFound => e,
            other => TransferError::conversion(other.to_string()),
        })?;

        if !file_exists(output).await {
            return Err(TransferError::conversion(format!(
                "Output file was not created: {}",
                output.display()
            )));
        }

        Ok(())
    }

    async fn cover_for(output: &Path, metadata: &ContainerMetadata) -> Result<Option<PathBuf>> {
        match &metadata.thumbnail {
            Some(bytes) if !bytes.is_empty() => Ok(Some(write_cover(output, bytes).await?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ContainerProcessor for FfmpegContainerProcessor {
    async fn strip_metadata(&self, input: &Path, output: &Path) -> Result<()> {
        debug!(input = %input.display(), "Stripping container metadata");
        self.run(self.build_strip_command(input, output), output, None).await
    }

    async fn demux_audio(&self, input: &Path, output: &Path, metadata: &ContainerMetadata) -> Result<()> {
        debug!(input = %input.display(), output = %output.display(), "Demuxing audio");
        let cover = Self::cover_for(output, metadata).await?;
        let cmd = self.build_demux_command(input, cover.as_deref(), output, metadata);
        self.run(cmd, output, cover).await
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> Result<()> {
        debug!(video = %video.display(), audio = %audio.display(), "Muxing legs");
        let cover = Self::cover_for(output, metadata).await?;
        let cmd = self.build_mux_command(video, audio, cover.as_deref(), output, metadata);
        self.run(cmd, output, cover).await
    }
}
