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


//! Placeholder transfer while torrent metadata is retrieved
//!
//! A `.torrent` URL is fetched over HTTP; a magnet link is passed on as-is. The
//! result goes to the [`TorrentHandoff`] collaborator, which creates the real
//! transfer, and the fetch ends `Finished`.
//!
//! [`TorrentHandoff`]: crate::transfer::hooks::TorrentHandoff

use crate::error::{FailureKind, Result, TransferError};
use crate::transfer::cell::{Attempt, TransferCell};
use crate::transfer::context::TransferContext;
use crate::transfer::hooks::TorrentSource;
use crate::transfer::state::{TransferEvent, TransferState};
use crate::transfer::Transfer;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const MAGNET_PREFIX: &str = "magnet:";
const BTIH_PREFIX: &str = "urn:btih:";

/// In-flight retrieval of torrent metadata
#[derive(Clone)]
pub struct UriFetchTransfer {
    inner: Arc<FetchInner>,
}

struct FetchInner {
    id: Uuid,
    uri: String,
    display_name: String,
    info_hash: String,
    created: DateTime<Utc>,
    ctx: TransferContext,
    cell: TransferCell,
}

impl UriFetchTransfer {
    /// Start fetching `uri` (a magnet link or an http(s) URL of a .torrent file)
    pub fn start(uri: impl Into<String>, ctx: &TransferContext) -> Result<Self> {
        let uri = uri.into();
        if !is_magnet(&uri) {
            url::Url::parse(&uri)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .ok_or_else(|| TransferError::InvalidDownloadUrl(uri.clone()))?;
        }

        let id = Uuid::new_v4();
        let inner = Arc::new(FetchInner {
            id,
            display_name: display_name_from_uri(&uri),
            info_hash: info_hash_from_uri(&uri).unwrap_or_default(),
            created: Utc::now(),
            ctx: ctx.clone(),
            cell: TransferCell::new(id, -1, ctx.config().speed_sample_interval()),
            uri,
        });

        let attempt = inner
            .cell
            .begin_attempt()
            .ok_or_else(|| TransferError::InvalidState("fetch could not start".to_string()))?;
        inner
            .cell
            .apply_for(attempt.generation, TransferEvent::MetadataRequested);

        info!(transfer_id = %id, uri = %inner.uri, "Fetching torrent metadata");
        let task = Arc::clone(&inner);
        ctx.runtime().spawn(async move { task.run(attempt).await });

        Ok(Self { inner })
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }
}

impl FetchInner {
    async fn run(self: Arc<Self>, attempt: Attempt) {
        let fetched = if is_magnet(&self.uri) {
            Ok(TorrentSource::Magnet(self.uri.clone()))
        } else {
            tokio::select! {
                _ = attempt.cancel.cancelled() => Err(TransferError::Cancelled),
                bytes = self.ctx.client().get_bytes(&self.uri) => match bytes {
                    Ok(bytes) if bytes.is_empty() => Err(TransferError::file_io("empty torrent file")),
                    Ok(bytes) => Ok(TorrentSource::TorrentFile(bytes)),
                    Err(e) => Err(e),
                },
            }
        };

        let generation = attempt.generation;
        match fetched {
            Ok(_) | Err(TransferError::Cancelled) if attempt.cancel.is_cancelled() => {
                self.cell.apply_for(generation, TransferEvent::Cancelled);
            }
            Ok(source) => {
                self.ctx.torrents().hand_off(&self.display_name, source);
                self.cell.apply_for(generation, TransferEvent::Finished);
                info!(transfer_id = %self.id, "Torrent metadata handed off");
            }
            Err(e) => {
                error!(transfer_id = %self.id, uri = %self.uri, error = %e, "Torrent fetch failed");
                self.cell
                    .apply_for(generation, TransferEvent::Failed(FailureKind::Generic));
            }
        }

        self.cell.end_attempt(generation);
    }
}

impl Transfer for UriFetchTransfer {
    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn name(&self) -> String {
        self.inner.display_name.clone()
    }

    fn display_name(&self) -> String {
        self.inner.display_name.clone()
    }

    fn state(&self) -> TransferState {
        self.inner.cell.state()
    }

    fn size(&self) -> i64 {
        -1
    }

    fn bytes_received(&self) -> u64 {
        0
    }

    fn date_created(&self) -> DateTime<Utc> {
        self.inner.created
    }

    fn save_location(&self) -> PathBuf {
        self.inner.ctx.config().save_directory.clone()
    }

    fn preview_file(&self) -> Option<PathBuf> {
        None
    }

    fn hash(&self) -> String {
        self.inner.info_hash.clone()
    }

    fn is_completed(&self) -> bool {
        false
    }

    fn average_speed(&self) -> u64 {
        0
    }

    fn is_pausable(&self) -> bool {
        false
    }

    fn is_resumable(&self) -> bool {
        false
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn remove(&self, _delete_data: bool) {
        self.inner.cell.request_cancel(true);
    }

    fn progress(&self) -> i32 {
        if self.state() == TransferState::Finished {
            100
        } else {
            -1
        }
    }
}

fn is_magnet(uri: &str) -> bool {
    uri.len() >= MAGNET_PREFIX.len() && uri[..MAGNET_PREFIX.len()].eq_ignore_ascii_case(MAGNET_PREFIX)
}

fn magnet_params(uri: &str) -> impl Iterator<Item = (&str, &str)> {
    let query = uri.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
}

/// `dn=` of a magnet link (URL-decoded), otherwise the URI itself
fn display_name_from_uri(uri: &str) -> String {
    if !is_magnet(uri) {
        return uri.to_string();
    }

    magnet_params(uri)
        .find(|(key, value)| key.eq_ignore_ascii_case("dn") && !value.is_empty())
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|decoded| decoded.into_owned())
        })
        .unwrap_or_else(|| uri.to_string())
}

/// Lower-case info-hash from `xt=urn:btih:<hash>`
fn info_hash_from_uri(uri: &str) -> Option<String> {
    if !is_magnet(uri) {
        return None;
    }

    magnet_params(uri)
        .filter(|(key, _)| key.eq_ignore_ascii_case("xt"))
        .find_map(|(_, value)| {
            let prefix = value.get(..BTIH_PREFIX.len())?;
            if prefix.eq_ignore_ascii_case(BTIH_PREFIX) {
                Some(value[BTIH_PREFIX.len()..].to_ascii_lowercase())
            } else {
                None
            }
        })
}
