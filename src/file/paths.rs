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


//! File naming for finished and in-progress transfers
//!
//! # Layout
//! - Final files: `<save_dir>/<name>`, or `<stem> (n).<ext>` when the name is taken
//! - Generic downloads: `<incomplete_dir>/<stem>.incomplete.<ext>`
//! - Stream legs: `<incomplete_dir>/<stem>.<leg ext>` (`mp3`, `m4v`, `m4a`)
//!
//! Incomplete names are derived only from the final name, so a restarted process
//! finds the partial data of an interrupted transfer again.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Name of the in-progress directory created beside the save directory
pub const INCOMPLETE_DIR_NAME: &str = "Incomplete";

/// Marker inserted before the extension of generic in-progress files
const INCOMPLETE_MARKER: &str = "incomplete";

/// Longest file name (in bytes) produced by [`clean_filename`]
const MAX_NAME_BYTES: usize = 240;

fn illegal_chars() -> &'static Regex {
    static ILLEGAL: OnceLock<Regex> = OnceLock::new();
    ILLEGAL.get_or_init(|| {
        Regex::new(r#"[\\/:*?"<>|\[\]]+"#).unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Replace characters that are invalid or awkward in file names with `_`
pub fn clean_filename(name: &str) -> String {
    let replaced = illegal_chars().replace_all(name, "_");
    let mut result: String = replaced
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    // Trim leading/trailing whitespace and dots
    result = result.trim().trim_end_matches('.').to_string();

    if cfg!(target_os = "windows") {
        result = handle_windows_reserved_names(&result);
    }

    if result.is_empty() {
        result = "download".to_string();
    }

    truncate_name(&result, MAX_NAME_BYTES)
}

fn handle_windows_reserved_names(name: &str) -> String {
    let upper = name.to_uppercase();
    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    for reserved_name in &reserved {
        if upper == *reserved_name || upper.starts_with(&format!("{}.", reserved_name)) {
            return format!("_{}", name);
        }
    }

    name.to_string()
}

/// Shorten the stem of `name` so the whole name fits in `max_bytes`
fn truncate_name(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (stem, ext) = split_name(name);
    let suffix_len = ext.map(|e| e.len() + 1).unwrap_or(0);
    let mut index = max_bytes.saturating_sub(suffix_len);
    while index > 0 && !stem.is_char_boundary(index) {
        index -= 1;
    }

    match ext {
        Some(ext) => format!("{}.{}", &stem[..index], ext),
        None => stem[..index].to_string(),
    }
}

/// Split a file name into stem and extension
///
/// A leading dot does not start an extension (`.hidden` has none).
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Avoid filename collision by appending (1), (2), etc.
pub fn avoid_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let (stem, extension) = split_name(name);

    let mut counter = 1;
    loop {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };

        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return new_path;
        }

        counter += 1;
        if counter > 9999 {
            return new_path;
        }
    }
}

/// Final destination for `name` inside `save_dir`, avoiding existing files
pub fn build_complete_file(save_dir: &Path, name: &str) -> PathBuf {
    avoid_collision(&save_dir.join(clean_filename(name)))
}

/// Default in-progress directory for a save directory
pub fn default_incomplete_directory(save_dir: &Path) -> PathBuf {
    match save_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(INCOMPLETE_DIR_NAME),
        _ => save_dir.join(INCOMPLETE_DIR_NAME),
    }
}

/// In-progress file of a generic download: `<stem>.incomplete.<ext>`
pub fn incomplete_file(incomplete_dir: &Path, name: &str) -> PathBuf {
    let cleaned = clean_filename(name);
    let file_name = match split_name(&cleaned) {
        (stem, Some(ext)) => format!("{}.{}.{}", stem, INCOMPLETE_MARKER, ext),
        (stem, None) => format!("{}.{}", stem, INCOMPLETE_MARKER),
    };
    incomplete_dir.join(file_name)
}

/// Temporary leg file of a stream download: `<stem>.<extension>`
pub fn temp_file(incomplete_dir: &Path, name: &str, extension: &str) -> PathBuf {
    let cleaned = clean_filename(name);
    let (stem, _) = split_name(&cleaned);
    incomplete_dir.join(format!("{}.{}", stem, extension))
}
