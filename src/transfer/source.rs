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


//! Search-result records stream downloads are created from

use serde::{Deserialize, Serialize};

/// Descriptive part of a search result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDetails {
    /// Title shown in the transfer list
    pub display_name: String,
    /// Suggested file name, extension included
    pub filename: String,
    /// Uploader / channel
    pub username: String,
    /// Page the result was found on
    pub details_url: String,
    /// Site name used in tags ("SoundCloud.com", "YouTube")
    pub source_name: String,
    pub thumbnail_url: Option<String>,
}

/// A single downloadable audio stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSearchResult {
    pub details: SourceDetails,
    pub download_url: String,
    /// Size in bytes, -1 when unknown
    pub size: i64,
}

/// One stream of a video site result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLink {
    pub url: String,
    /// Size in bytes, -1 when unknown
    pub size: i64,
    pub thumbnail_url: Option<String>,
}

/// A video site result with separately served video and/or audio streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSearchResult {
    pub details: SourceDetails,
    pub video: Option<StreamLink>,
    pub audio: Option<StreamLink>,
}

impl StreamSearchResult {
    /// Thumbnail of the video stream, falling back to the audio stream and the result itself
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.video
            .as_ref()
            .and_then(|v| v.thumbnail_url.as_deref())
            .or_else(|| self.audio.as_ref().and_then(|a| a.thumbnail_url.as_deref()))
            .or(self.details.thumbnail_url.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(thumb: Option<&str>) -> StreamLink {
        StreamLink {
            url: "https://cdn/x".to_string(),
            size: 10,
            thumbnail_url: thumb.map(str::to_string),
        }
    }

    #[test]
    fn test_thumbnail_prefers_video_leg() {
        let result = StreamSearchResult {
            details: SourceDetails::default(),
            video: Some(link(Some("v.jpg"))),
            audio: Some(link(Some("a.jpg"))),
        };
        assert_eq!(result.thumbnail_url(), Some("v.jpg"));

        let audio_only = StreamSearchResult {
            video: Some(link(None)),
            ..result
        };
        assert_eq!(audio_only.thumbnail_url(), Some("a.jpg"));
    }
}
