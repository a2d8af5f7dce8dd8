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


//! Transfer engine configuration
//!
//! Loaded from a JSON file; every field has a default so partial files are valid.

use crate::error::{Result, TransferError};
use crate::file::paths::default_incomplete_directory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transfer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory finished files are placed in
    pub save_directory: PathBuf,

    /// Directory for in-progress data (default: `Incomplete` beside the save directory)
    pub incomplete_directory: Option<PathBuf>,

    /// Concurrent fetch routines for generic HTTP downloads
    pub http_pool_size: usize,

    /// Concurrent fetch routines for audio-stream downloads
    pub audio_pool_size: usize,

    /// Concurrent fetch routines for video/audio-stream downloads
    pub av_pool_size: usize,

    /// Sampling quantum of the speed tracker
    pub speed_sample_interval_ms: u64,

    /// HTTP connect timeout
    pub connect_timeout_secs: u64,

    /// User-Agent sent with every request
    pub user_agent: String,

    /// FFmpeg binary used for tagging and container processing
    pub ffmpeg_path: PathBuf,

    /// Register finished files with the sharing engine
    pub seed_finished_transfers: bool,

    /// Ask the media library to scan finished files
    pub library_scan_enabled: bool,

    /// Default "delete data when cancelled" flag of generic downloads
    pub delete_data_on_cancel: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            save_directory: PathBuf::from("Downloads"),
            incomplete_directory: None,
            http_pool_size: 6,
            audio_pool_size: 6,
            av_pool_size: 6,
            speed_sample_interval_ms: 1000,
            connect_timeout_secs: 30,
            user_agent: format!("transfer-core/{}", env!("CARGO_PKG_VERSION")),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            seed_finished_transfers: false,
            library_scan_enabled: false,
            delete_data_on_cancel: true,
        }
    }
}

impl TransferConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            TransferError::ConfigurationError(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("http_pool_size", self.http_pool_size),
            ("audio_pool_size", self.audio_pool_size),
            ("av_pool_size", self.av_pool_size),
        ] {
            if size == 0 {
                return Err(TransferError::ConfigurationError(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }

        if self.speed_sample_interval_ms == 0 {
            return Err(TransferError::ConfigurationError(
                "speed_sample_interval_ms must be positive".to_string(),
            ));
        }

        if self.save_directory.as_os_str().is_empty() {
            return Err(TransferError::ConfigurationError(
                "save_directory must not be empty".to_string(),
            ));
        }

        if self.incomplete_dir() == self.save_directory {
            return Err(TransferError::ConfigurationError(
                "incomplete_directory must differ from save_directory".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective in-progress directory
    pub fn incomplete_dir(&self) -> PathBuf {
        self.incomplete_directory
            .clone()
            .unwrap_or_else(|| default_incomplete_directory(&self.save_directory))
    }

    pub fn speed_sample_interval(&self) -> Duration {
        Duration::from_millis(self.speed_sample_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Configuration rooted at a save directory, other fields default
    pub fn with_save_directory(save_directory: impl Into<PathBuf>) -> Self {
        Self {
            save_directory: save_directory.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransferConfig::default();
        config.validate().unwrap();
        assert_eq!(config.http_pool_size, 6);
        assert_eq!(config.speed_sample_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("transfer.json");
        std::fs::write(&path, r#"{ "save_directory": "/srv/dl", "av_pool_size": 2 }"#).unwrap();

        let config = TransferConfig::load(&path).unwrap();
        assert_eq!(config.save_directory, PathBuf::from("/srv/dl"));
        assert_eq!(config.av_pool_size, 2);
        assert_eq!(config.audio_pool_size, 6);
        assert_eq!(config.incomplete_dir(), PathBuf::from("/srv/Incomplete"));
    }

    #[test]
    fn test_zero_pool_is_rejected() {
        let config = TransferConfig {
            http_pool_size: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = TransferConfig::load_or_default(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
