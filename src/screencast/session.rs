//! Capture session lifecycle
//!
//! Owns the capture source and encoder for one recording at a time:
//! acquire, run, pause/resume, finalize, release.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::encoder::EncoderConfig;
use super::permission::CaptureAuthorization;
use super::state::{SessionState, SessionStateCell};
use crate::capture::{CapturePlatform, CaptureSource, DisplayMetrics, EncoderDevice};
use crate::config::RecordingSettings;
use crate::error::{RecorderError, Result};

/// Extension of every recording file
pub const RECORDING_EXTENSION: &str = "mp4";
/// Prefix of every recording file name
pub const RECORDING_PREFIX: &str = "recording_";

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingArtifact {
    /// File name without extension
    pub id: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Active recording time; 0 when unknown
    pub duration_seconds: f64,
}

impl RecordingArtifact {
    /// Describe a recording file from its filesystem metadata
    pub fn from_file(path: &Path, duration_seconds: f64) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            id,
            filename,
            file_path: path.to_path_buf(),
            size_bytes: metadata.len(),
            created_at,
            duration_seconds,
        })
    }
}

/// Everything needed to bring up the devices for one session
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub config: EncoderConfig,
    pub output_path: PathBuf,
}

/// Derive the encoder config and allocate the output file for a new session
pub fn plan(
    settings: &RecordingSettings,
    display: &DisplayMetrics,
    recordings_dir: &Path,
    now: DateTime<Utc>,
) -> StartRequest {
    let config = EncoderConfig::derive(settings, display);

    let mut millis = now.timestamp_millis();
    let output_path = loop {
        let candidate =
            recordings_dir.join(format!("{RECORDING_PREFIX}{millis}.{RECORDING_EXTENSION}"));
        if !candidate.exists() {
            break candidate;
        }
        millis += 1;
    };

    StartRequest {
        config,
        output_path,
    }
}

/// Active recording time, excluding paused spans
#[derive(Debug)]
struct RecordingClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl RecordingClock {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += at.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let paused = self.paused_total + self.paused_at.map(|at| at.elapsed()).unwrap_or_default();
        self.started.elapsed().saturating_sub(paused)
    }
}

/// Devices held by a running session
struct ActiveCapture {
    source: Box<dyn CaptureSource>,
    encoder: Box<dyn EncoderDevice>,
    linked: bool,
    output_path: PathBuf,
    clock: RecordingClock,
}

impl ActiveCapture {
    /// Release in reverse acquisition order: link, encoder, source
    fn teardown(&mut self) {
        if self.linked {
            self.encoder.unlink();
            self.linked = false;
        }
        self.encoder.release();
        self.source.release();
        log::info!("Capture devices released");
    }
}

pub struct CaptureSession {
    platform: Arc<dyn CapturePlatform>,
    state: SessionStateCell,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    pub fn new(platform: Arc<dyn CapturePlatform>, state: SessionStateCell) -> Self {
        Self {
            platform,
            state,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output_path.as_path())
    }

    /// Bring up the devices for a planned session
    pub fn begin(
        &mut self,
        authorization: CaptureAuthorization,
        request: StartRequest,
    ) -> Result<()> {
        self.state.claim()?;

        log::info!(
            "Starting recording: output={}, {}x{} @ {} fps, bitrate={}, audio={}",
            request.output_path.display(),
            request.config.width,
            request.config.height,
            request.config.frame_rate,
            request.config.video_bitrate,
            request.config.audio_enabled
        );

        match self.acquire(authorization, &request) {
            Ok(active) => {
                self.active = Some(active);
                self.state.set(SessionState::Running);
                log::info!("Recording started successfully");
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to start recording: {:#}", err);
                remove_partial_output(&request.output_path);
                self.state.set(SessionState::Idle);
                Err(RecorderError::StartFailed(format!("{err:#}")))
            }
        }
    }

    fn acquire(
        &self,
        authorization: CaptureAuthorization,
        request: &StartRequest,
    ) -> anyhow::Result<ActiveCapture> {
        if let Some(dir) = request.output_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| {
                    format!("Failed to create recordings directory: {}", dir.display())
                })?;
        }

        let mut source = self
            .platform
            .acquire_source(authorization, &request.config)
            .context("Failed to acquire capture source")?;
        log::info!("Acquired capture source: {}", source.descriptor().name);

        let mut encoder = match self
            .platform
            .open_encoder(&request.config, &request.output_path)
        {
            Ok(encoder) => encoder,
            Err(err) => {
                source.release();
                return Err(err.context("Failed to open encoder"));
            }
        };

        if let Err(err) = encoder.link(source.as_ref()) {
            encoder.release();
            source.release();
            return Err(err.context("Failed to link capture source to encoder"));
        }

        let mut active = ActiveCapture {
            source,
            encoder,
            linked: true,
            output_path: request.output_path.clone(),
            clock: RecordingClock::start(),
        };

        if let Err(err) = active.encoder.start() {
            active.teardown();
            return Err(err.context("Encoder failed to start"));
        }
        active.clock = RecordingClock::start();

        Ok(active)
    }

    /// Pause the encoder. No-op unless running on a platform that can pause.
    pub fn pause(&mut self) -> bool {
        if !self.platform.supports_pause() {
            log::debug!("Pause not supported on this platform, ignoring");
            return false;
        }
        if self.state.get() != SessionState::Running {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        match active.encoder.pause() {
            Ok(()) => {
                active.clock.pause();
                self.state
                    .transition(&[SessionState::Running], SessionState::Paused)
            }
            Err(err) => {
                log::warn!("Failed to pause encoder: {:#}", err);
                false
            }
        }
    }

    /// Resume a paused encoder. No-op unless paused on a platform that can pause.
    pub fn resume(&mut self) -> bool {
        if !self.platform.supports_pause() {
            log::debug!("Resume not supported on this platform, ignoring");
            return false;
        }
        if self.state.get() != SessionState::Paused {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        match active.encoder.resume() {
            Ok(()) => {
                active.clock.resume();
                self.state
                    .transition(&[SessionState::Paused], SessionState::Running)
            }
            Err(err) => {
                log::warn!("Failed to resume encoder: {:#}", err);
                false
            }
        }
    }

    /// Finalize the output and release the devices
    ///
    /// Returns `Ok(None)` when no session is active.
    pub fn stop(&mut self) -> Result<Option<RecordingArtifact>> {
        let Some(mut active) = self.active.take() else {
            if !self.state.get().is_idle() {
                self.state.set(SessionState::Idle);
            }
            return Ok(None);
        };

        self.state.set(SessionState::Stopping);
        log::info!("Stopping recording: {}", active.output_path.display());

        // a paused encoder flushes from where it was paused
        active.clock.resume();
        let finalize_error = match active.encoder.finalize() {
            Ok(()) => None,
            Err(err) => {
                log::warn!("Encoder finalize failed: {:#}", err);
                Some(err)
            }
        };
        let duration = active.clock.elapsed();

        active.teardown();
        self.state.set(SessionState::Idle);

        match RecordingArtifact::from_file(&active.output_path, duration.as_secs_f64()) {
            Ok(artifact) if artifact.size_bytes > 0 => {
                log::info!(
                    "Recording finished: {} ({} bytes, {:.1}s)",
                    artifact.file_path.display(),
                    artifact.size_bytes,
                    artifact.duration_seconds
                );
                Ok(Some(artifact))
            }
            outcome => {
                if let Err(err) = &outcome {
                    log::debug!("Output file unreadable: {}", err);
                }
                remove_partial_output(&active.output_path);
                let reason = finalize_error
                    .map(|err| format!("{err:#}"))
                    .unwrap_or_else(|| {
                        format!("no data was written to {}", active.output_path.display())
                    });
                log::error!("Recording failed: {}", reason);
                Err(RecorderError::StopFailed(reason))
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            log::warn!("Capture session dropped while active, stopping");
            if let Err(err) = self.stop() {
                log::error!("Failed to stop recording on drop: {}", err);
            }
        }
    }
}

/// Remove an empty or partial output file left by a failed session
fn remove_partial_output(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            log::warn!("Failed to remove partial output {}: {}", path.display(), err);
        }
    }
}
