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


//! In-memory collaborators for unit tests

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::file::manager::file_len;
use crate::media::{AudioTagger, AudioTags, ContainerMetadata, ContainerProcessor};
use crate::transfer::context::TransferContext;
use crate::transfer::hooks::{CompletionHooks, PlaybackMonitor, TorrentHandoff, TorrentSource};
use crate::transfer::http::{
    CancelToken, HttpClient, ResponseHeaders, SaveOutcome, SaveRequest, TransferListener,
};
use crate::transfer::state::TransferState;
use crate::transfer::Transfer;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// Bytes written per `on_data` call
const CHUNK: usize = 100;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Scripted answer to one `save` call
pub(crate) enum Reply {
    /// Serve `body`; with `ranges` a resumed request gets a 206 for the rest
    Serve { body: Vec<u8>, ranges: bool },
    /// Refuse a ranged request
    RejectRange,
    /// Send `sent` bytes, then hang until cancelled. `leak` delays the
    /// cancellation and then reports the remaining bytes anyway.
    Stall {
        body: Vec<u8>,
        sent: usize,
        leak: Option<Arc<Notify>>,
    },
    /// Wait for `gate` (or cancellation) before serving `body`
    Gated { body: Vec<u8>, gate: Arc<Notify> },
    /// Connection error
    Fail,
    /// Report success without writing anything
    Vanish,
}

impl Reply {
    pub fn serve(body: Vec<u8>) -> Self {
        Reply::Serve { body, ranges: true }
    }
}

/// [`HttpClient`] answering from per-URL scripts
#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    /// (url, resume offset) per `save` call
    requests: Mutex<Vec<(String, u64)>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: Arc<Self>, url: &str, replies: Vec<Reply>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Body returned by `get_bytes(url)`
    pub fn blob(self: Arc<Self>, url: &str, bytes: Vec<u8>) -> Arc<Self> {
        self.blobs.lock().unwrap().insert(url.to_string(), bytes);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Resume offset of every `save` call, in order
    pub fn offsets(&self) -> Vec<u64> {
        self.requests.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|replies| replies.pop_front())
    }
}

fn full_headers(body: &[u8], ranges: bool) -> ResponseHeaders {
    let headers = ResponseHeaders::new(200).with("Content-Length", body.len().to_string());
    if ranges {
        headers.with("Accept-Ranges", "bytes")
    } else {
        headers
    }
}

/// Write `data` in chunks, reporting each one; stops early on cancel
async fn write_body(
    destination: &Path,
    data: &[u8],
    append: bool,
    listener: &dyn TransferListener,
    cancel: &CancelToken,
) -> Result<SaveOutcome> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut file = options.open(destination).await?;

    for chunk in data.chunks(CHUNK) {
        if cancel.is_cancelled() {
            file.flush().await?;
            return Ok(SaveOutcome::Cancelled);
        }
        file.write_all(chunk).await?;
        listener.on_data(chunk.len());
        tokio::task::yield_now().await;
    }

    file.flush().await?;
    Ok(SaveOutcome::Completed)
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn save(
        &self,
        request: &SaveRequest,
        listener: &dyn TransferListener,
        cancel: &CancelToken,
    ) -> Result<SaveOutcome> {
        let offset = if request.resume {
            file_len(&request.destination).await.unwrap_or(0)
        } else {
            0
        };
        self.requests
            .lock()
            .unwrap()
            .push((request.url.clone(), offset));

        let reply = self.next_reply(&request.url).ok_or_else(|| {
            TransferError::network_error(format!("nothing scripted for {}", request.url), false)
        })?;

        match reply {
            Reply::RejectRange => Err(TransferError::RangeNotSupported),
            Reply::Fail => Err(TransferError::network_error("connection reset", true)),
            Reply::Vanish => Ok(SaveOutcome::Completed),
            Reply::Serve { body, ranges } => {
                if offset == 0 {
                    listener.on_headers(&full_headers(&body, ranges));
                    return write_body(&request.destination, &body, false, listener, cancel).await;
                }
                if !ranges || offset as usize > body.len() {
                    return Err(TransferError::RangeNotSupported);
                }

                let rest = &body[offset as usize..];
                listener.on_headers(
                    &ResponseHeaders::new(206)
                        .with("Content-Length", rest.len().to_string())
                        .with(
                            "Content-Range",
                            format!("bytes {}-{}/{}", offset, body.len().saturating_sub(1), body.len()),
                        ),
                );
                write_body(&request.destination, rest, true, listener, cancel).await
            }
            Reply::Stall { body, sent, leak } => {
                listener.on_headers(&full_headers(&body, true));
                let sent = sent.min(body.len());
                write_body(&request.destination, &body[..sent], false, listener, cancel).await?;

                cancel.cancelled().await;
                if let Some(leak) = leak {
                    leak.notified().await;
                    listener.on_data(body.len() - sent);
                }
                Ok(SaveOutcome::Cancelled)
            }
            Reply::Gated { body, gate } => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(SaveOutcome::Cancelled),
                    _ = gate.notified() => {}
                }
                listener.on_headers(&full_headers(&body, false));
                write_body(&request.destination, &body, false, listener, cancel).await
            }
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransferError::UnexpectedStatusCode {
                status_code: 404,
                url: url.to_string(),
            })
    }
}

/// Tagger that copies the input and remembers the tags
#[derive(Default)]
pub(crate) struct FakeTagger {
    fail: bool,
    tagged: Mutex<Vec<AudioTags>>,
}

impl FakeTagger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn tagged(&self) -> Vec<AudioTags> {
        self.tagged.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioTagger for FakeTagger {
    async fn tag(&self, input: &Path, output: &Path, tags: &AudioTags) -> Result<()> {
        if self.fail {
            return Err(TransferError::TaggingFailed("scripted".to_string()));
        }
        self.tagged.lock().unwrap().push(tags.clone());
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Container processor that copies (strip, demux) or concatenates (mux)
#[derive(Default)]
pub(crate) struct FakeContainer {
    fail: bool,
    calls: Mutex<Vec<String>>,
    metadata: Mutex<Option<ContainerMetadata>>,
}

impl FakeContainer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_metadata(&self) -> Option<ContainerMetadata> {
        self.metadata.lock().unwrap().clone()
    }

    fn record(&self, call: &str, metadata: Option<&ContainerMetadata>) -> Result<()> {
        self.calls.lock().unwrap().push(call.to_string());
        if let Some(metadata) = metadata {
            *self.metadata.lock().unwrap() = Some(metadata.clone());
        }
        if self.fail {
            return Err(TransferError::conversion(format!("{} failed", call)));
        }
        Ok(())
    }

    async fn write(output: &Path, data: Vec<u8>) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, data).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerProcessor for FakeContainer {
    async fn strip_metadata(&self, input: &Path, output: &Path) -> Result<()> {
        self.record("strip", None)?;
        Self::write(output, tokio::fs::read(input).await?).await
    }

    async fn demux_audio(&self, input: &Path, output: &Path, metadata: &ContainerMetadata) -> Result<()> {
        self.record("demux", Some(metadata))?;
        Self::write(output, tokio::fs::read(input).await?).await
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> Result<()> {
        self.record("mux", Some(metadata))?;
        let mut data = tokio::fs::read(video).await?;
        data.extend(tokio::fs::read(audio).await?);
        Self::write(output, data).await
    }
}

/// Records every outbound notification
#[derive(Default)]
pub(crate) struct RecordingHooks {
    scanned: Mutex<Vec<PathBuf>>,
    seeded: Mutex<Vec<PathBuf>>,
    playing: Mutex<Vec<PathBuf>>,
    handoffs: Mutex<Vec<(PathBuf, PathBuf)>>,
    torrents: Mutex<Vec<(String, TorrentSource)>>,
}

impl RecordingHooks {
    pub fn scanned(&self) -> Vec<PathBuf> {
        self.scanned.lock().unwrap().clone()
    }

    pub fn seeded(&self) -> Vec<PathBuf> {
        self.seeded.lock().unwrap().clone()
    }

    pub fn set_playing(&self, path: &Path) {
        self.playing.lock().unwrap().push(path.to_path_buf());
    }

    pub fn handoffs(&self) -> Vec<(PathBuf, PathBuf)> {
        self.handoffs.lock().unwrap().clone()
    }

    pub fn torrents(&self) -> Vec<(String, TorrentSource)> {
        self.torrents.lock().unwrap().clone()
    }
}

impl CompletionHooks for RecordingHooks {
    fn scan_into_library(&self, path: &Path) {
        self.scanned.lock().unwrap().push(path.to_path_buf());
    }

    fn seed(&self, path: &Path) {
        self.seeded.lock().unwrap().push(path.to_path_buf());
    }
}

impl PlaybackMonitor for RecordingHooks {
    fn is_being_played(&self, path: &Path) -> bool {
        self.playing.lock().unwrap().iter().any(|p| p == path)
    }

    fn hand_off(&self, from: &Path, to: &Path) {
        self.handoffs
            .lock()
            .unwrap()
            .push((from.to_path_buf(), to.to_path_buf()));
    }
}

impl TorrentHandoff for RecordingHooks {
    fn hand_off(&self, display_name: &str, source: TorrentSource) {
        self.torrents
            .lock()
            .unwrap()
            .push((display_name.to_string(), source));
    }
}

/// Context rooted in `dir` (`dir/Downloads`, `dir/Incomplete`) with fake media tools
pub(crate) fn test_context(dir: &Path, client: Arc<ScriptedClient>) -> TransferContext {
    let config = TransferConfig {
        library_scan_enabled: true,
        seed_finished_transfers: true,
        ..TransferConfig::with_save_directory(dir.join("Downloads"))
    };
    TransferContext::new(config)
        .unwrap()
        .with_client(client)
        .with_tagger(Arc::new(FakeTagger::default()))
        .with_container(Arc::new(FakeContainer::default()))
}

/// Poll until `condition` holds
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    let started = tokio::time::Instant::now();
    while !condition() {
        assert!(started.elapsed() < WAIT_LIMIT, "condition not reached in time");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll until the transfer reaches `state`
pub(crate) async fn wait_for_state<T: Transfer + ?Sized>(transfer: &T, state: TransferState) {
    let started = tokio::time::Instant::now();
    while transfer.state() != state {
        assert!(
            started.elapsed() < WAIT_LIMIT,
            "expected {:?}, transfer is {:?}",
            state,
            transfer.state()
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
