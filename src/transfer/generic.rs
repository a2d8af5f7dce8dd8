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


//! Resumable single-URL download
//!
//! The data is written to `<incomplete dir>/<base>.incomplete.<ext>` and moved to
//! the save directory once complete (and verified, when an MD5 was given).
//! Starting a download whose identical file already exists in the save
//! directory finishes immediately without touching the network.

use crate::error::{Result, TransferError};
use crate::file::paths::{build_complete_file, clean_filename, incomplete_file};
use crate::transfer::context::TransferContext;
use crate::transfer::engine::{Blueprint, HttpTransfer, Leg, LegSpec, TransferKind};
use url::Url;

/// Parameters of a generic HTTP download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericHttpDownload {
    pub url: String,
    /// Title shown in the transfer list
    pub display_name: String,
    /// File name in the save directory
    pub save_as: String,
    /// Expected size in bytes, -1 if unknown
    pub size: i64,
    /// Hex MD5 the finished file must match
    pub md5: Option<String>,
    /// Continue an incomplete file left over from an earlier session
    pub resume: bool,
    /// Remove partial data on cancel (default from the configuration)
    pub delete_on_cancel: Option<bool>,
}

impl GenericHttpDownload {
    pub fn new(url: impl Into<String>, save_as: impl Into<String>) -> Self {
        let save_as = save_as.into();
        Self {
            url: url.into(),
            display_name: save_as.clone(),
            save_as,
            size: -1,
            md5: None,
            resume: true,
            delete_on_cancel: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_delete_on_cancel(mut self, delete: bool) -> Self {
        self.delete_on_cancel = Some(delete);
        self
    }

    /// Create the transfer and schedule it on the HTTP pool
    pub fn start(self, ctx: &TransferContext) -> Result<HttpTransfer> {
        Url::parse(&self.url)
            .map_err(|e| TransferError::InvalidDownloadUrl(format!("{}: {}", self.url, e)))?;
        if self.save_as.trim().is_empty() {
            return Err(TransferError::invalid_input("save_as must not be empty"));
        }

        let config = ctx.config();
        let expected_file = config.save_directory.join(clean_filename(&self.save_as));
        let complete_file = build_complete_file(&config.save_directory, &self.save_as);
        let complete_name = complete_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| clean_filename(&self.save_as));

        let blueprint = Blueprint {
            kind: TransferKind::Generic {
                md5: self.md5.filter(|m| !m.trim().is_empty()),
                resume_on_start: self.resume,
                expected_file,
            },
            display_name: self.display_name,
            legs: vec![LegSpec {
                leg: Leg::Main,
                url: self.url,
                size: self.size,
                file: incomplete_file(&config.incomplete_dir(), &complete_name),
            }],
            complete_file,
            delete_on_cancel: self.delete_on_cancel.unwrap_or(config.delete_data_on_cancel),
        };

        Ok(HttpTransfer::spawn(ctx, blueprint))
    }
}
