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


//! Media post-processing collaborators
//!
//! Stream downloads finish with a media step: audio tagging, or a container
//! rewrite (strip, demux, mux). Both are traits so the engine can run against
//! fakes; the default implementations shell out to FFmpeg.
//!
//! # FFmpeg usage
//! - Tagging: `-codec copy` plus `-metadata key=value`, cover as `attached_pic`
//! - Strip: `-map 0 -codec copy -map_metadata -1`
//! - Demux: `-vn -codec:a copy`
//! - Mux: `-map 0:v -map 1:a -codec copy`

pub mod container;
pub mod tagger;

use crate::error::{Result, TransferError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub use container::FfmpegContainerProcessor;
pub use tagger::FfmpegTagger;

/// Tags written into a downloaded audio file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Page the audio was found on
    pub url: Option<String>,
    /// JPEG front cover
    #[serde(skip)]
    pub cover: Option<Vec<u8>>,
}

impl AudioTags {
    /// Tags for a track found on a streaming site: the album names the uploader,
    /// track and site ("<user>: <title> via <site>")
    pub fn for_stream(title: &str, username: &str, source: &str, url: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            artist: username.to_string(),
            album: format!("{}: {} via {}", username, title, source),
            url: url.map(str::to_string),
            cover: None,
        }
    }
}

/// Descriptive metadata for a rewritten container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub title: String,
    pub author: String,
    pub source: String,
    /// JPEG thumbnail embedded as cover art
    pub thumbnail: Option<Vec<u8>>,
}

/// Writes tags into an audio file
#[async_trait]
pub trait AudioTagger: Send + Sync {
    /// Write a tagged copy of `input` to `output`; `input` is left untouched
    async fn tag(&self, input: &Path, output: &Path, tags: &AudioTags) -> Result<()>;
}

/// Rewrites media containers
#[async_trait]
pub trait ContainerProcessor: Send + Sync {
    /// Copy `input` to `output` without its global metadata
    async fn strip_metadata(&self, input: &Path, output: &Path) -> Result<()>;

    /// Extract the audio stream of `input` into `output`
    async fn demux_audio(&self, input: &Path, output: &Path, metadata: &ContainerMetadata) -> Result<()>;

    /// Combine a video-only and an audio-only file into `output`
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> Result<()>;
}

/// Run an FFmpeg command line (`command[0]` is the binary)
pub(crate) async fn execute_ffmpeg(command: &[String]) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| TransferError::FfmpegError("empty command".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::FfmpegNotFound
            } else {
                TransferError::FfmpegError(format!("Failed to execute ffmpeg: {}", e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
        return Err(TransferError::FfmpegError(format!(
            "FFmpeg exited with {}: {}",
            output.status, tail
        )));
    }

    Ok(())
}

/// Write cover bytes next to `output` for use as an extra FFmpeg input
pub(crate) async fn write_cover(output: &Path, cover: &[u8]) -> Result<PathBuf> {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".cover.jpg");
    let path = output.with_file_name(name);
    tokio::fs::write(&path, cover).await?;
    Ok(path)
}

pub(crate) fn arg(value: impl AsRef<std::ffi::OsStr>) -> String {
    value.as_ref().to_string_lossy().to_string()
}

/// Push `-metadata key=value` pairs, skipping empty values
pub(crate) fn push_metadata(cmd: &mut Vec<String>, pairs: &[(&str, &str)]) {
    for (key, value) in pairs {
        if !value.is_empty() {
            cmd.push("-metadata".to_string());
            cmd.push(format!("{}={}", key, value));
        }
    }
}
