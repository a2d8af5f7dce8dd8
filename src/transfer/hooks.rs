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


//! Outbound collaborators notified by transfers
//!
//! All of these are best-effort: they run after the transfer reached its own
//! final state and cannot change it.

use std::path::Path;

/// Notified once a final file exists
pub trait CompletionHooks: Send + Sync {
    /// Ask the media library to pick up `path`
    fn scan_into_library(&self, path: &Path);

    /// Register `path` with the sharing engine
    fn seed(&self, path: &Path);
}

/// Knows which files the media player has open
pub trait PlaybackMonitor: Send + Sync {
    fn is_being_played(&self, path: &Path) -> bool;

    /// Switch playback from `from` to `to`
    ///
    /// Called before `from` is deleted; the caller gives up `from` after this call.
    fn hand_off(&self, from: &Path, to: &Path);
}

/// What a URI fetch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    Magnet(String),
    TorrentFile(Vec<u8>),
}

/// Receives fetched torrent metadata; the real transfer replaces the fetch
pub trait TorrentHandoff: Send + Sync {
    fn hand_off(&self, display_name: &str, source: TorrentSource);
}

/// Collaborator that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl CompletionHooks for NoopHooks {
    fn scan_into_library(&self, _path: &Path) {}
    fn seed(&self, _path: &Path) {}
}

impl PlaybackMonitor for NoopHooks {
    fn is_being_played(&self, _path: &Path) -> bool {
        false
    }
    fn hand_off(&self, _from: &Path, _to: &Path) {}
}

impl TorrentHandoff for NoopHooks {
    fn hand_off(&self, _display_name: &str, _source: TorrentSource) {}
}
