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


//! Attempt driver shared by all HTTP transfer kinds
//!
//! # Pipelines
//! A transfer kind is a fixed list of steps, run in order by one attempt:
//!
//! | Kind                        | Steps                                   |
//! |-----------------------------|-----------------------------------------|
//! | Generic                     | fetch, verify MD5 (if given), promote   |
//! | Audio stream                | fetch, tag and promote                  |
//! | AV video only               | fetch video, strip metadata             |
//! | AV demuxed audio only       | fetch audio, demux                      |
//! | AV separate video and audio | fetch video, fetch audio, mux           |
//!
//! # Attempts
//! `start`/`resume` open a new attempt (a new generation in the state cell) and
//! spawn it. Attempts of one transfer run one after another: a resume issued
//! while the previous attempt is still winding down waits for it, and the old
//! attempt's late events are dropped as stale.
//!
//! # Failure classification
//! - Fetch and verify errors: `ErrorGeneric` / `ErrorHashMismatch` / `ErrorDiskFull`,
//!   transient files removed
//! - Placement and container errors: `ErrorMovingIncomplete` (or `ErrorDiskFull`);
//!   container errors also remove transient files
//! - A server rejecting a ranged request restarts the leg from byte zero, once

use crate::error::{FailureKind, Result, TransferError};
use crate::file::manager::{cleanup_file, file_exists, file_len, md5_digest, safe_copy, safe_move};
use crate::media::{AudioTags, ContainerMetadata};
use crate::transfer::av::AvMode;
use crate::transfer::cell::{Attempt, TransferCell};
use crate::transfer::context::{TransferContext, WorkerPool};
use crate::transfer::http::{ResponseHeaders, SaveOutcome, SaveRequest, TransferListener};
use crate::transfer::source::{AudioSearchResult, StreamSearchResult};
use crate::transfer::state::{TransferEvent, TransferState};
use crate::transfer::Transfer;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stream fetched by a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Leg {
    Main,
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Fetch(Leg),
    VerifyDigest,
    Promote,
    TagAndPromote,
    StripMetadata,
    DemuxAudio,
    Mux,
}

impl Step {
    /// Steps that only place an already complete file
    fn places_result(self) -> bool {
        matches!(self, Step::Promote | Step::TagAndPromote)
    }
}

/// One stream and the temporary file it is written to
#[derive(Debug, Clone)]
pub(crate) struct LegSpec {
    pub leg: Leg,
    pub url: String,
    /// -1 when unknown
    pub size: i64,
    pub file: PathBuf,
}

/// Kind-specific data
#[derive(Debug, Clone)]
pub(crate) enum TransferKind {
    Generic {
        md5: Option<String>,
        /// Continue an incomplete file left by an earlier session
        resume_on_start: bool,
        /// Un-suffixed final path checked for an earlier identical download
        expected_file: PathBuf,
    },
    Audio(AudioSearchResult),
    Av {
        result: StreamSearchResult,
        mode: AvMode,
    },
}

impl TransferKind {
    pub(crate) fn steps(&self) -> Vec<Step> {
        match self {
            TransferKind::Generic { md5, .. } => {
                let mut steps = vec![Step::Fetch(Leg::Main)];
                if md5.is_some() {
                    steps.push(Step::VerifyDigest);
                }
                steps.push(Step::Promote);
                steps
            }
            TransferKind::Audio(_) => vec![Step::Fetch(Leg::Main), Step::TagAndPromote],
            TransferKind::Av { mode, .. } => match mode {
                AvMode::VideoOnly => vec![Step::Fetch(Leg::Video), Step::StripMetadata],
                AvMode::DemuxedAudioOnly => vec![Step::Fetch(Leg::Audio), Step::DemuxAudio],
                AvMode::SeparateVideoAndAudio => vec![
                    Step::Fetch(Leg::Video),
                    Step::Fetch(Leg::Audio),
                    Step::Mux,
                ],
            },
        }
    }

    fn pool<'a>(&self, ctx: &'a TransferContext) -> &'a WorkerPool {
        match self {
            TransferKind::Generic { .. } => ctx.http_pool(),
            TransferKind::Audio(_) => ctx.audio_pool(),
            TransferKind::Av { .. } => ctx.av_pool(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TransferKind::Generic { .. } => "http",
            TransferKind::Audio(_) => "audio",
            TransferKind::Av { .. } => "av",
        }
    }
}

/// Everything needed to create an [`HttpTransfer`]
pub(crate) struct Blueprint {
    pub kind: TransferKind,
    pub display_name: String,
    /// In fetch order
    pub legs: Vec<LegSpec>,
    pub complete_file: PathBuf,
    pub delete_on_cancel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    Initial,
    Resume,
}

enum Drive {
    Finished,
    Cancelled,
}

/// A running or finished HTTP transfer of any kind
///
/// Cheap to clone; clones share the transfer.
#[derive(Clone)]
pub struct HttpTransfer {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    created: DateTime<Utc>,
    display_name: String,
    ctx: TransferContext,
    kind: TransferKind,
    legs: Vec<LegSpec>,
    steps: Vec<Step>,
    complete_file: Mutex<PathBuf>,
    cell: TransferCell,
    /// Serializes attempts of this transfer
    attempt_lock: tokio::sync::Mutex<()>,
    delete_on_cancel: bool,
    delete_data: AtomicBool,
}

impl HttpTransfer {
    /// Create the transfer and schedule its first attempt
    pub(crate) fn spawn(ctx: &TransferContext, blueprint: Blueprint) -> Self {
        let id = Uuid::new_v4();
        let size = if blueprint.legs.iter().any(|leg| leg.size < 0) {
            -1
        } else {
            blueprint.legs.iter().map(|leg| leg.size).sum()
        };

        let inner = Arc::new(Inner {
            id,
            created: Utc::now(),
            display_name: blueprint.display_name,
            ctx: ctx.clone(),
            steps: blueprint.kind.steps(),
            kind: blueprint.kind,
            legs: blueprint.legs,
            complete_file: Mutex::new(blueprint.complete_file),
            cell: TransferCell::new(id, size, ctx.config().speed_sample_interval()),
            attempt_lock: tokio::sync::Mutex::new(()),
            delete_on_cancel: blueprint.delete_on_cancel,
            delete_data: AtomicBool::new(false),
        });

        info!(
            transfer_id = %id,
            kind = inner.kind.label(),
            name = %inner.name(),
            size,
            "Transfer created"
        );

        inner.launch(Launch::Initial);
        Self { inner }
    }

    /// Acquisition mode of a video/audio stream transfer
    pub fn av_mode(&self) -> Option<AvMode> {
        match &self.inner.kind {
            TransferKind::Av { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    /// Temporary files this transfer writes to
    pub fn incomplete_files(&self) -> Vec<PathBuf> {
        self.inner.legs.iter().map(|leg| leg.file.clone()).collect()
    }
}

impl Inner {
    fn complete_file(&self) -> PathBuf {
        self.complete_file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_complete_file(&self, path: PathBuf) {
        *self
            .complete_file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = path;
    }

    fn name(&self) -> String {
        self.complete_file()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn leg(&self, leg: Leg) -> Result<&LegSpec> {
        self.legs
            .iter()
            .find(|spec| spec.leg == leg)
            .ok_or_else(|| TransferError::InvalidState(format!("{:?} leg is not part of this transfer", leg)))
    }

    fn fetch_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, Step::Fetch(_)))
            .count()
    }

    fn launch(self: &Arc<Self>, launch: Launch) {
        let attempt = match self.cell.begin_attempt() {
            Some(attempt) => attempt,
            None => return,
        };

        debug!(transfer_id = %self.id, generation = attempt.generation, ?launch, "Attempt scheduled");
        let inner = Arc::clone(self);
        self.ctx
            .runtime()
            .spawn(async move { inner.run_attempt(attempt, launch).await });
    }

    async fn run_attempt(self: Arc<Self>, attempt: Attempt, launch: Launch) {
        let _serial = self.attempt_lock.lock().await;

        let permit = tokio::select! {
            _ = attempt.cancel.cancelled() => None,
            permit = self.kind.pool(&self.ctx).acquire() => Some(permit),
        };

        let outcome = match permit {
            None => Ok(Drive::Cancelled),
            Some(Err(e)) => Err((self.steps[0], e)),
            Some(Ok(_permit)) => self.drive(&attempt, launch).await,
        };

        match outcome {
            Ok(Drive::Finished) => self.finish(&attempt).await,
            Ok(Drive::Cancelled) => self.resolve_cancel(&attempt).await,
            Err((step, e)) => self.fail(&attempt, step, e).await,
        }

        if self.cell.end_attempt(attempt.generation) == Some(TransferState::Canceled) && self.delete_on_cancel {
            self.cleanup_transient().await;
        }
        if self.cell.is_removed() && self.cell.is_current(attempt.generation) {
            self.finalize_removal().await;
        }
    }

    async fn drive(&self, attempt: &Attempt, launch: Launch) -> std::result::Result<Drive, (Step, TransferError)> {
        if attempt.cancel.is_cancelled() {
            return Ok(Drive::Cancelled);
        }

        if let TransferKind::Generic {
            md5: Some(md5),
            expected_file,
            ..
        } = &self.kind
        {
            if self.already_downloaded(attempt, md5, expected_file).await {
                return Ok(Drive::Finished);
            }
        }

        for step in self.steps.iter().copied() {
            if attempt.cancel.is_cancelled() {
                return Ok(Drive::Cancelled);
            }

            debug!(transfer_id = %self.id, generation = attempt.generation, ?step, "Running step");
            match self.run_step(attempt, step, launch).await {
                Ok(()) => {}
                Err(TransferError::Cancelled) => return Ok(Drive::Cancelled),
                Err(e) => return Err((step, e)),
            }
        }

        Ok(Drive::Finished)
    }

    async fn run_step(&self, attempt: &Attempt, step: Step, launch: Launch) -> Result<()> {
        match step {
            Step::Fetch(leg) => self.fetch(attempt, leg, launch).await,
            Step::VerifyDigest => self.verify_digest(attempt).await,
            Step::Promote => {
                let source = self.leg(Leg::Main)?.file.clone();
                self.place(&source, &self.complete_file()).await
            }
            Step::TagAndPromote => self.tag_and_promote().await,
            Step::StripMetadata | Step::DemuxAudio | Step::Mux => self.post_process(attempt, step).await,
        }
    }

    /// An identical earlier download already sits at the un-suffixed final path
    async fn already_downloaded(&self, attempt: &Attempt, md5: &str, expected: &Path) -> bool {
        let size = self.cell.size();
        if size <= 0 || file_len(expected).await != Some(size as u64) {
            return false;
        }

        self.cell.apply_for(attempt.generation, TransferEvent::VerifyStarted);
        let matches = match self.digest(attempt, expected).await {
            Ok(actual) => actual.eq_ignore_ascii_case(md5.trim()),
            Err(e) => {
                debug!(transfer_id = %self.id, error = %e, "Existing file not verified");
                false
            }
        };

        if !matches {
            self.cell.apply_for(attempt.generation, TransferEvent::Start);
            return false;
        }

        info!(transfer_id = %self.id, path = %expected.display(), "Already downloaded, skipping fetch");
        self.set_complete_file(expected.to_path_buf());
        self.cell.seed_bytes(attempt.generation, size as u64);
        true
    }

    /// Summed length of the legs fetched before `leg`
    async fn bytes_before(&self, leg: Leg) -> u64 {
        let mut total = 0;
        for spec in self.legs.iter().take_while(|spec| spec.leg != leg) {
            total += file_len(&spec.file).await.unwrap_or(0);
        }
        total
    }

    async fn fetch(&self, attempt: &Attempt, leg: Leg, launch: Launch) -> Result<()> {
        let spec = self.leg(leg)?;
        let base = self.bytes_before(leg).await;
        let existing = file_len(&spec.file).await.unwrap_or(0);

        let resume_allowed = match &self.kind {
            TransferKind::Generic { resume_on_start, .. } => launch == Launch::Resume || *resume_on_start,
            _ => launch == Launch::Resume,
        };
        let mut resume = resume_allowed && self.cell.resumable() && existing > 0;

        self.cell
            .seed_bytes(attempt.generation, base + if resume { existing } else { 0 });

        let listener = AttemptListener {
            inner: self,
            generation: attempt.generation,
            track_size: self.fetch_count() == 1,
        };

        loop {
            let request = SaveRequest {
                url: spec.url.clone(),
                destination: spec.file.clone(),
                resume,
            };

            match self.ctx.client().save(&request, &listener, &attempt.cancel).await {
                Ok(SaveOutcome::Completed) => {
                    debug!(transfer_id = %self.id, ?leg, bytes = self.cell.bytes(), "Leg fetched");
                    return Ok(());
                }
                Ok(SaveOutcome::Cancelled) => return Err(TransferError::Cancelled),
                Err(e) if e.is_range_not_supported() && resume => {
                    warn!(transfer_id = %self.id, ?leg, "Server rejected ranged request, restarting from zero");
                    self.cell.reject_ranges();
                    self.cell.seed_bytes(attempt.generation, base);
                    resume = false;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn digest(&self, attempt: &Attempt, path: &Path) -> Result<String> {
        let cell = &self.cell;
        cell.set_check_progress(0);
        md5_digest(
            path,
            |percent| cell.set_check_progress(percent),
            || attempt.cancel.is_cancelled(),
        )
        .await
    }

    async fn verify_digest(&self, attempt: &Attempt) -> Result<()> {
        let expected = match &self.kind {
            TransferKind::Generic { md5: Some(md5), .. } => md5,
            _ => return Ok(()),
        };
        let file = self.leg(Leg::Main)?.file.clone();

        self.cell.apply_for(attempt.generation, TransferEvent::VerifyStarted);
        let actual = self.digest(attempt, &file).await?;

        if actual.eq_ignore_ascii_case(expected.trim()) {
            debug!(transfer_id = %self.id, "MD5 verified");
            Ok(())
        } else {
            Err(TransferError::HashMismatch {
                expected: expected.clone(),
                actual,
            })
        }
    }

    /// Move `source` to `target`; copy instead when a failed move is caused by playback
    async fn place(&self, source: &Path, target: &Path) -> Result<()> {
        let moved = safe_move(source, target).await;
        self.recover_move(source, target, moved).await
    }

    /// A move that failed while `source` is playing becomes copy and hand-off
    async fn recover_move(&self, source: &Path, target: &Path, moved: Result<()>) -> Result<()> {
        let error = match moved {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !self.ctx.playback().is_being_played(source) {
            return Err(error);
        }

        warn!(
            transfer_id = %self.id,
            path = %source.display(),
            error = %error,
            "Move failed while the file is playing, copying instead"
        );
        safe_copy(source, target).await?;
        self.release_temp(source, target).await;
        Ok(())
    }

    /// Delete a temporary file whose content now lives at `target`
    async fn release_temp(&self, temp: &Path, target: &Path) {
        let playback = self.ctx.playback();
        if playback.is_being_played(temp) {
            playback.hand_off(temp, target);
        }
        cleanup_file(temp).await;
    }

    async fn fetch_cover(&self, url: Option<&str>) -> Option<Vec<u8>> {
        let url = url.filter(|u| !u.is_empty())?;
        match self.ctx.client().get_bytes(url).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                warn!(transfer_id = %self.id, url, error = %e, "Thumbnail not fetched");
                None
            }
        }
    }

    async fn tag_and_promote(&self) -> Result<()> {
        let details = match &self.kind {
            TransferKind::Audio(result) => &result.details,
            _ => return Err(TransferError::InvalidState("not an audio stream".to_string())),
        };
        let source = self.leg(Leg::Main)?.file.clone();
        let target = self.complete_file();

        let details_url = Some(details.details_url.as_str()).filter(|u| !u.is_empty());
        let mut tags = AudioTags::for_stream(
            &details.display_name,
            &details.username,
            &details.source_name,
            details_url,
        );
        tags.cover = self.fetch_cover(details.thumbnail_url.as_deref()).await;

        match self.ctx.tagger().tag(&source, &target, &tags).await {
            Ok(()) if file_exists(&target).await => {
                self.release_temp(&source, &target).await;
                Ok(())
            }
            Ok(()) => {
                warn!(transfer_id = %self.id, "Tagger produced no output, placing untagged file");
                self.place(&source, &target).await
            }
            Err(e) => {
                warn!(transfer_id = %self.id, error = %e, "Tagging failed, placing untagged file");
                self.place(&source, &target).await
            }
        }
    }

    async fn container_metadata(&self, result: &StreamSearchResult) -> ContainerMetadata {
        ContainerMetadata {
            title: result.details.display_name.clone(),
            author: result.details.username.clone(),
            source: result.details.source_name.clone(),
            thumbnail: self.fetch_cover(result.thumbnail_url()).await,
        }
    }

    async fn post_process(&self, attempt: &Attempt, step: Step) -> Result<()> {
        let source = match &self.kind {
            TransferKind::Av { result, .. } => result,
            _ => return Err(TransferError::InvalidState("not a stream download".to_string())),
        };
        let output = self.complete_file();
        let container = self.ctx.container();

        self.cell.apply_for(attempt.generation, TransferEvent::PostProcessStarted);

        let processed = match step {
            Step::StripMetadata => {
                let video = self.leg(Leg::Video)?;
                container.strip_metadata(&video.file, &output).await
            }
            Step::DemuxAudio => {
                let audio = self.leg(Leg::Audio)?;
                let metadata = self.container_metadata(source).await;
                container.demux_audio(&audio.file, &output, &metadata).await
            }
            Step::Mux => {
                let video = self.leg(Leg::Video)?;
                let audio = self.leg(Leg::Audio)?;
                for leg in [video, audio] {
                    if !file_exists(&leg.file).await {
                        return Err(TransferError::FileNotFound(leg.file.display().to_string()));
                    }
                }
                let metadata = self.container_metadata(source).await;
                container.mux(&video.file, &audio.file, &output, &metadata).await
            }
            other => Err(TransferError::InvalidState(format!("{:?} is not a container step", other))),
        };

        match processed {
            Ok(()) if file_exists(&output).await => {
                for leg in &self.legs {
                    self.release_temp(&leg.file, &output).await;
                }
                Ok(())
            }
            Ok(()) => Err(TransferError::conversion(format!(
                "Output file was not created: {}",
                output.display()
            ))),
            Err(e) => {
                cleanup_file(&output).await;
                Err(e)
            }
        }
    }

    async fn finish(&self, attempt: &Attempt) {
        match self.cell.apply_for(attempt.generation, TransferEvent::Finished) {
            Some(TransferState::Finished) => {
                self.cell.reset_speed();
                let file = self.complete_file();
                info!(transfer_id = %self.id, path = %file.display(), bytes = self.cell.bytes(), "Transfer finished");

                let config = self.ctx.config();
                if config.library_scan_enabled {
                    self.ctx.hooks().scan_into_library(&file);
                }
                if config.seed_finished_transfers {
                    self.ctx.hooks().seed(&file);
                }
            }
            _ if self.cell.state() == TransferState::Canceling => self.resolve_cancel(attempt).await,
            _ => {}
        }
    }

    async fn resolve_cancel(&self, attempt: &Attempt) {
        match self.cell.apply_for(attempt.generation, TransferEvent::Cancelled) {
            Some(TransferState::Paused) => {
                info!(transfer_id = %self.id, bytes = self.cell.bytes(), "Transfer paused");
            }
            Some(TransferState::Canceled) => {
                info!(transfer_id = %self.id, "Transfer canceled");
                if self.delete_on_cancel {
                    self.cleanup_transient().await;
                }
            }
            _ => {}
        }
    }

    async fn fail(&self, attempt: &Attempt, step: Step, error: TransferError) {
        let kind = match step {
            Step::Fetch(_) | Step::VerifyDigest => error.failure_kind(),
            _ if error.is_disk_full() => FailureKind::DiskFull,
            _ => FailureKind::MovingIncomplete,
        };

        match self.cell.apply_for(attempt.generation, TransferEvent::Failed(kind)) {
            Some(state) => {
                error!(transfer_id = %self.id, ?step, ?state, error = %error, "Transfer failed");
                if !step.places_result() {
                    self.cleanup_transient().await;
                }
            }
            None if self.cell.state() == TransferState::Canceling => self.resolve_cancel(attempt).await,
            None => {
                debug!(transfer_id = %self.id, generation = attempt.generation, error = %error, "Failure of superseded attempt ignored");
            }
        }
    }

    async fn cleanup_transient(&self) {
        for leg in &self.legs {
            cleanup_file(&leg.file).await;
        }
    }

    async fn finalize_removal(&self) {
        let delete_data = self.delete_data.load(Ordering::Acquire);
        if delete_data || self.delete_on_cancel {
            self.cleanup_transient().await;
        }
        if delete_data {
            cleanup_file(&self.complete_file()).await;
        }
        debug!(transfer_id = %self.id, delete_data, "Removal finalized");
    }
}

/// Forwards client callbacks of one attempt to the state cell
struct AttemptListener<'a> {
    inner: &'a Inner,
    generation: u64,
    /// Headers describe the whole transfer (single-leg pipelines)
    track_size: bool,
}

impl TransferListener for AttemptListener<'_> {
    fn on_headers(&self, headers: &ResponseHeaders) {
        self.inner.cell.on_headers(self.generation, headers, self.track_size);
    }

    fn on_data(&self, len: usize) {
        self.inner.cell.on_data(self.generation, len);
    }

    fn on_redirect(&self, location: &str) {
        debug!(transfer_id = %self.inner.id, location, "Redirected");
        self.inner.cell.apply_for(self.generation, TransferEvent::Redirected);
    }
}

impl Transfer for HttpTransfer {
    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn display_name(&self) -> String {
        self.inner.display_name.clone()
    }

    fn state(&self) -> TransferState {
        self.inner.cell.state()
    }

    fn size(&self) -> i64 {
        self.inner.cell.size()
    }

    fn bytes_received(&self) -> u64 {
        self.inner.cell.bytes()
    }

    fn date_created(&self) -> DateTime<Utc> {
        self.inner.created
    }

    fn save_location(&self) -> PathBuf {
        self.inner.complete_file()
    }

    fn preview_file(&self) -> Option<PathBuf> {
        let complete = self.inner.complete_file();
        if self.is_completed() && complete.exists() {
            return Some(complete);
        }
        self.inner
            .legs
            .iter()
            .map(|leg| leg.file.clone())
            .find(|file| file.exists())
    }

    fn hash(&self) -> String {
        match &self.inner.kind {
            TransferKind::Generic { md5, .. } => md5.clone().unwrap_or_default(),
            TransferKind::Audio(result) => result.download_url.clone(),
            TransferKind::Av { .. } => self
                .inner
                .legs
                .first()
                .map(|leg| leg.url.clone())
                .unwrap_or_default(),
        }
    }

    fn is_completed(&self) -> bool {
        self.inner.cell.is_completed()
    }

    fn average_speed(&self) -> u64 {
        self.inner.cell.average_speed()
    }

    fn check_progress(&self) -> u8 {
        self.inner.cell.check_progress()
    }

    /// Only generic downloads from range-capable servers with a known size pause;
    /// stream downloads are cancelled instead
    fn is_pausable(&self) -> bool {
        matches!(self.inner.kind, TransferKind::Generic { .. })
            && self.inner.cell.resumable()
            && self.state() == TransferState::Downloading
            && self.size() > 0
    }

    fn is_resumable(&self) -> bool {
        let state = self.state();
        !self.inner.cell.is_removed()
            && (matches!(state, TransferState::Paused | TransferState::Canceled) || state.is_error())
    }

    fn pause(&self) {
        if self.is_pausable() {
            self.inner.cell.request_pause();
            return;
        }

        if !self.state().is_active() {
            return;
        }

        let running = self.inner.cell.request_cancel(false);
        if !running && self.inner.delete_on_cancel {
            let inner = Arc::clone(&self.inner);
            self.inner
                .ctx
                .runtime()
                .spawn(async move { inner.cleanup_transient().await });
        }
    }

    fn resume(&self) {
        self.inner.launch(Launch::Resume);
    }

    fn remove(&self, delete_data: bool) {
        self.inner.delete_data.store(delete_data, Ordering::Release);
        let running = self.inner.cell.request_cancel(true);
        info!(transfer_id = %self.inner.id, delete_data, "Transfer removed");

        if !running {
            let inner = Arc::clone(&self.inner);
            self.inner
                .ctx
                .runtime()
                .spawn(async move { inner.finalize_removal().await });
        }
    }
}

impl std::fmt::Debug for HttpTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransfer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind.label())
            .field("state", &self.state())
            .field("bytes", &self.bytes_received())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, wait_for_state, wait_until, RecordingHooks, Reply, ScriptedClient};
    use crate::transfer::generic::GenericHttpDownload;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const URL: &str = "https://mirror.example.org/file.bin";

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_pipeline_steps() {
        let generic = TransferKind::Generic {
            md5: Some("abc".to_string()),
            resume_on_start: true,
            expected_file: PathBuf::from("x"),
        };
        assert_eq!(
            generic.steps(),
            vec![Step::Fetch(Leg::Main), Step::VerifyDigest, Step::Promote]
        );
        assert!(Step::Promote.places_result());
        assert!(!Step::Mux.places_result());
    }

    #[tokio::test]
    async fn test_download_completes() {
        let dir = TempDir::new().unwrap();
        let data = body(1000);
        let client = ScriptedClient::new().script(URL, vec![Reply::serve(data.clone())]);
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_for_state(&transfer, TransferState::Finished).await;

        assert_eq!(transfer.bytes_received(), 1000);
        assert_eq!(transfer.size(), 1000);
        assert!(transfer.is_completed());
        assert_eq!(transfer.progress(), 100);
        assert_eq!(transfer.download_speed(), 0.0);
        assert_eq!(std::fs::read(transfer.save_location()).unwrap(), data);
        assert!(!transfer.incomplete_files()[0].exists());
    }

    #[tokio::test]
    async fn test_unknown_size_reports_no_progress() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::new().script(
            URL,
            vec![Reply::Gated {
                body: body(300),
                gate: Arc::clone(&gate),
            }],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| client.request_count() == 1).await;
        assert_eq!(transfer.size(), -1);
        assert_eq!(transfer.progress(), -1);
        assert_eq!(transfer.eta(), -1);

        gate.notify_one();
        wait_for_state(&transfer, TransferState::Finished).await;
        assert_eq!(transfer.progress(), 100);
    }

    #[tokio::test]
    async fn test_existing_identical_file_skips_network() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new();
        let ctx = test_context(dir.path(), client.clone());

        let existing = ctx.config().save_directory.join("hello.txt");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"hello world").unwrap();

        let transfer = GenericHttpDownload::new(URL, "hello.txt")
            .with_size(11)
            .with_md5("5eb63bbbe01eeed093cb22bb8f5acdc3")
            .start(&ctx)
            .unwrap();
        wait_for_state(&transfer, TransferState::Finished).await;

        assert_eq!(client.request_count(), 0);
        assert_eq!(transfer.save_location(), existing);
        assert_eq!(transfer.progress(), 100);
        assert_eq!(transfer.check_progress(), 100);
    }

    #[tokio::test]
    async fn test_hash_mismatch_discards_data() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new().script(URL, vec![Reply::serve(b"hello world".to_vec())]);
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "hello.txt")
            .with_md5("00000000000000000000000000000000")
            .start(&ctx)
            .unwrap();
        wait_for_state(&transfer, TransferState::ErrorHashMismatch).await;

        let incomplete = &transfer.incomplete_files()[0];
        wait_until(|| !incomplete.exists()).await;
        assert!(!transfer.save_location().exists());
        assert!(transfer.is_resumable());
    }

    #[tokio::test]
    async fn test_range_rejection_restarts_once_from_zero() {
        let dir = TempDir::new().unwrap();
        let data = body(1000);
        let client = ScriptedClient::new().script(
            URL,
            vec![
                Reply::Stall {
                    body: data.clone(),
                    sent: 400,
                    leak: None,
                },
                Reply::RejectRange,
                Reply::Serve {
                    body: data.clone(),
                    ranges: false,
                },
            ],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| transfer.bytes_received() == 400).await;
        assert!(transfer.is_pausable());

        transfer.pause();
        wait_for_state(&transfer, TransferState::Paused).await;
        assert_eq!(transfer.bytes_received(), 400);

        transfer.resume();
        wait_for_state(&transfer, TransferState::Finished).await;

        assert_eq!(transfer.bytes_received(), 1000);
        assert_eq!(transfer.bytes_received() as i64, transfer.size());
        assert_eq!(client.offsets(), vec![0, 400, 0]);
        assert_eq!(std::fs::read(transfer.save_location()).unwrap(), data);
    }

    #[tokio::test]
    async fn test_rejected_ranges_disable_pause() {
        let dir = TempDir::new().unwrap();
        let data = body(1000);
        let client = ScriptedClient::new().script(
            URL,
            vec![
                Reply::Stall {
                    body: data.clone(),
                    sent: 400,
                    leak: None,
                },
                Reply::RejectRange,
                // Still advertises Accept-Ranges
                Reply::Stall {
                    body: data.clone(),
                    sent: 300,
                    leak: None,
                },
            ],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| transfer.bytes_received() == 400).await;
        transfer.pause();
        wait_for_state(&transfer, TransferState::Paused).await;

        transfer.resume();
        wait_until(|| client.request_count() == 3 && transfer.bytes_received() == 300).await;

        assert_eq!(transfer.state(), TransferState::Downloading);
        assert_eq!(client.offsets(), vec![0, 400, 0]);
        assert!(!transfer.inner.cell.resumable());
        assert!(!transfer.is_pausable());
    }

    #[tokio::test]
    async fn test_move_failure_while_playing_copies() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new().script(
            URL,
            vec![Reply::Gated {
                body: body(10),
                gate: Arc::new(Notify::new()),
            }],
        );
        let hooks = Arc::new(RecordingHooks::default());
        let ctx = test_context(dir.path(), client.clone()).with_playback(hooks.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        let temp = transfer.incomplete_files()[0].clone();
        let target = transfer.save_location();
        std::fs::create_dir_all(temp.parent().unwrap()).unwrap();
        std::fs::write(&temp, b"still playing").unwrap();
        hooks.set_playing(&temp);

        let moved = Err(TransferError::MoveFailed {
            from: temp.display().to_string(),
            to: target.display().to_string(),
            reason: "sharing violation".to_string(),
        });
        transfer.inner.recover_move(&temp, &target, moved).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"still playing");
        assert_eq!(hooks.handoffs(), vec![(temp.clone(), target.clone())]);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_move_failure_without_playback_is_terminal() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::new().script(
            URL,
            vec![Reply::Gated {
                body: body(10),
                gate: Arc::clone(&gate),
            }],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        // A non-empty directory now occupies the final path
        let target = transfer.save_location();
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("keep.txt"), b"x").unwrap();
        gate.notify_one();

        wait_for_state(&transfer, TransferState::ErrorMovingIncomplete).await;
        assert!(target.is_dir());
        assert_eq!(std::fs::read(&transfer.incomplete_files()[0]).unwrap(), body(10));
    }

    #[tokio::test]
    async fn test_stale_attempt_data_is_dropped() {
        let dir = TempDir::new().unwrap();
        let data = body(1000);
        let leak = Arc::new(Notify::new());
        let client = ScriptedClient::new().script(
            URL,
            vec![
                Reply::Stall {
                    body: data.clone(),
                    sent: 400,
                    leak: Some(Arc::clone(&leak)),
                },
                Reply::Serve {
                    body: data.clone(),
                    ranges: true,
                },
            ],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| transfer.bytes_received() == 400).await;

        transfer.pause();
        assert_eq!(transfer.state(), TransferState::Pausing);

        // New attempt before the old one reported its cancellation
        transfer.resume();
        assert_eq!(transfer.state(), TransferState::Waiting);
        leak.notify_one();

        wait_for_state(&transfer, TransferState::Finished).await;
        assert_eq!(transfer.bytes_received(), 1000);
        assert_eq!(client.offsets(), vec![0, 400]);
        assert_eq!(std::fs::read(transfer.save_location()).unwrap(), data);
    }

    #[tokio::test]
    async fn test_late_data_after_pause_keeps_counter() {
        let dir = TempDir::new().unwrap();
        let leak = Arc::new(Notify::new());
        leak.notify_one();
        let client = ScriptedClient::new().script(
            URL,
            vec![Reply::Stall {
                body: body(1000),
                sent: 400,
                leak: Some(leak),
            }],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| transfer.bytes_received() == 400).await;

        transfer.pause();
        wait_for_state(&transfer, TransferState::Paused).await;
        assert_eq!(transfer.bytes_received(), 400);
        assert!(transfer.incomplete_files()[0].exists());
    }

    #[tokio::test]
    async fn test_network_error_cleans_up() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new().script(URL, vec![Reply::Fail]);
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_for_state(&transfer, TransferState::ErrorGeneric).await;
        assert!(!transfer.incomplete_files()[0].exists());
    }

    #[tokio::test]
    async fn test_remove_seals_transfer() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::new().script(
            URL,
            vec![Reply::Gated {
                body: body(100),
                gate,
            }],
        );
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_until(|| client.request_count() == 1).await;

        transfer.remove(true);
        wait_for_state(&transfer, TransferState::Canceled).await;
        assert!(!transfer.is_resumable());

        transfer.resume();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(transfer.state(), TransferState::Canceled);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_finished_deletes_data() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new().script(URL, vec![Reply::serve(body(10))]);
        let ctx = test_context(dir.path(), client.clone());

        let transfer = GenericHttpDownload::new(URL, "file.bin").start(&ctx).unwrap();
        wait_for_state(&transfer, TransferState::Finished).await;
        let saved = transfer.save_location();
        assert!(saved.exists());

        transfer.remove(true);
        wait_until(|| !saved.exists()).await;
        assert_eq!(transfer.state(), TransferState::Finished);
    }
}
