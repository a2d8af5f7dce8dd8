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


//! Shared collaborators and worker pools
//!
//! A [`TransferContext`] is created once by the host and cloned into every
//! transfer. Clones share the same pools, so the concurrency limit of a transfer
//! kind holds across all transfers of that kind.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::media::{AudioTagger, ContainerProcessor, FfmpegContainerProcessor, FfmpegTagger};
use crate::transfer::hooks::{CompletionHooks, NoopHooks, PlaybackMonitor, TorrentHandoff};
use crate::transfer::http::{HttpClient, ReqwestHttpClient};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded set of concurrently running fetch routines
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free slot; the slot is released when the permit drops
    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::InvalidState(format!("{} pool is closed", self.name)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a running attempt
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Collaborators and pools shared by all transfers
#[derive(Clone)]
pub struct TransferContext {
    config: Arc<TransferConfig>,
    client: Arc<dyn HttpClient>,
    tagger: Arc<dyn AudioTagger>,
    container: Arc<dyn ContainerProcessor>,
    hooks: Arc<dyn CompletionHooks>,
    playback: Arc<dyn PlaybackMonitor>,
    torrents: Arc<dyn TorrentHandoff>,
    http_pool: WorkerPool,
    audio_pool: WorkerPool,
    av_pool: WorkerPool,
    runtime: Handle,
}

impl TransferContext {
    /// Build a context with the reqwest client, FFmpeg media tools and no-op hooks
    ///
    /// Must be called from within a tokio runtime; transfers spawn their fetch
    /// routines on it.
    pub fn new(config: TransferConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|_| {
            TransferError::InvalidState("transfer context requires a tokio runtime".to_string())
        })?;

        Ok(Self {
            client: Arc::new(ReqwestHttpClient::new(&config)?),
            tagger: Arc::new(FfmpegTagger::new(config.ffmpeg_path.clone())),
            container: Arc::new(FfmpegContainerProcessor::new(config.ffmpeg_path.clone())),
            hooks: Arc::new(NoopHooks),
            playback: Arc::new(NoopHooks),
            torrents: Arc::new(NoopHooks),
            http_pool: WorkerPool::new("http", config.http_pool_size),
            audio_pool: WorkerPool::new("audio", config.audio_pool_size),
            av_pool: WorkerPool::new("av", config.av_pool_size),
            config: Arc::new(config),
            runtime,
        })
    }

    pub fn with_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn AudioTagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_container(mut self, container: Arc<dyn ContainerProcessor>) -> Self {
        self.container = container;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CompletionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_playback(mut self, playback: Arc<dyn PlaybackMonitor>) -> Self {
        self.playback = playback;
        self
    }

    pub fn with_torrent_handoff(mut self, torrents: Arc<dyn TorrentHandoff>) -> Self {
        self.torrents = torrents;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }

    pub(crate) fn tagger(&self) -> &Arc<dyn AudioTagger> {
        &self.tagger
    }

    pub(crate) fn container(&self) -> &Arc<dyn ContainerProcessor> {
        &self.container
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn CompletionHooks> {
        &self.hooks
    }

    pub(crate) fn playback(&self) -> &Arc<dyn PlaybackMonitor> {
        &self.playback
    }

    pub(crate) fn torrents(&self) -> &Arc<dyn TorrentHandoff> {
        &self.torrents
    }

    pub fn http_pool(&self) -> &WorkerPool {
        &self.http_pool
    }

    pub fn audio_pool(&self) -> &WorkerPool {
        &self.audio_pool
    }

    pub fn av_pool(&self) -> &WorkerPool {
        &self.av_pool
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("config", &self.config)
            .field("http_pool", &self.http_pool)
            .field("audio_pool", &self.audio_pool)
            .field("av_pool", &self.av_pool)
            .finish_non_exhaustive()
    }
}
