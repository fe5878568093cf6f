//! Recorder entry point for the presentation layer
//!
//! A [`SessionManager`] is built once at startup and handed to whoever needs
//! it. It owns the capability gate, the pending callback slots, the session
//! host and the recordings catalog.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

use super::callbacks::PendingCallbacks;
use super::events::RecorderEvent;
use super::host::{HostCommand, SessionHost};
use super::permission::{CapabilityGate, ConsentHost, ConsentResponder};
use super::session::{CaptureSession, RecordingArtifact, plan};
use super::state::{SessionState, SessionStateCell};
use crate::capture::CapturePlatform;
use crate::catalog::RecordingsCatalog;
use crate::config::{AppConfig, RecordingSettings};
use crate::error::{RecorderError, Result};
use crate::tray::{Indicator, NoIndicator};

const EVENT_CAPACITY: usize = 64;

pub struct SessionManagerBuilder {
    platform: Arc<dyn CapturePlatform>,
    indicator: Box<dyn Indicator>,
    recordings_dir: PathBuf,
    settings: RecordingSettings,
    consent_timeout: Option<Duration>,
    start_timeout: Option<Duration>,
    countdown_tick: Duration,
}

impl SessionManagerBuilder {
    pub fn indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    pub fn settings(mut self, settings: RecordingSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn consent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.consent_timeout = timeout;
        self
    }

    pub fn start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Length of one countdown step (one second outside tests)
    pub fn countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick;
        self
    }

    /// Apply the persisted configuration
    pub fn config(self, config: &AppConfig) -> Self {
        self.recordings_dir(config.recordings_dir())
            .settings(config.settings)
            .consent_timeout(config.consent_timeout())
            .start_timeout(config.start_timeout())
    }

    /// Spawn the session host and assemble the manager
    pub fn build(self) -> Result<SessionManager> {
        let callbacks = Arc::new(PendingCallbacks::new());
        let state = SessionStateCell::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = CaptureSession::new(self.platform.clone(), state.clone());
        let host = SessionHost::spawn(session, self.indicator, callbacks.clone(), events.clone())?;

        log::info!(
            "Recorder ready, recordings in {}",
            self.recordings_dir.display()
        );

        Ok(SessionManager {
            platform: self.platform,
            gate: CapabilityGate::new(callbacks.clone(), self.consent_timeout),
            callbacks,
            host: Mutex::new(host),
            catalog: RecordingsCatalog::new(self.recordings_dir),
            state,
            events,
            settings: Mutex::new(self.settings),
            start_timeout: self.start_timeout,
            countdown_tick: self.countdown_tick,
        })
    }
}

pub struct SessionManager {
    platform: Arc<dyn CapturePlatform>,
    gate: CapabilityGate,
    callbacks: Arc<PendingCallbacks>,
    host: Mutex<SessionHost>,
    catalog: RecordingsCatalog,
    state: SessionStateCell,
    events: broadcast::Sender<RecorderEvent>,
    settings: Mutex<RecordingSettings>,
    start_timeout: Option<Duration>,
    countdown_tick: Duration,
}

impl SessionManager {
    pub fn builder(platform: Arc<dyn CapturePlatform>) -> SessionManagerBuilder {
        let config = AppConfig::default();
        SessionManagerBuilder {
            platform,
            indicator: Box::new(NoIndicator),
            recordings_dir: config.recordings_dir(),
            settings: config.settings,
            consent_timeout: config.consent_timeout(),
            start_timeout: config.start_timeout(),
            countdown_tick: Duration::from_secs(1),
        }
    }

    /// The foreground context came up; consent prompts can be shown
    pub fn attach_host(&self, host: Arc<dyn ConsentHost>) {
        self.gate.attach_host(host);
    }

    /// The foreground context went away
    pub fn detach_host(&self) {
        self.gate.detach_host();
    }

    /// Channel through which consent answers are delivered
    pub fn consent_responder(&self) -> ConsentResponder {
        self.gate.responder()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Settings the next session will use
    pub fn settings(&self) -> RecordingSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the settings for the next session; a running one is unaffected
    pub fn update_settings(
        &self,
        update: impl FnOnce(&mut RecordingSettings),
    ) -> RecordingSettings {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut settings);
        *settings
    }

    /// Ask for capture consent without starting a recording
    ///
    /// The grant is discarded; every start asks again.
    pub async fn request_permission(&self) -> Result<bool> {
        match self.gate.request_authorization().await {
            Ok(_authorization) => Ok(true),
            Err(RecorderError::PermissionDenied) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(command)
    }

    fn emit(&self, event: RecorderEvent) {
        let _ = self.events.send(event);
    }

    /// Start recording with `settings`
    ///
    /// Resolves once the encoder is running, or with the reason it is not.
    pub async fn start(&self, settings: RecordingSettings) -> Result<()> {
        if !self.state.get().is_idle() {
            return Err(RecorderError::SessionAlreadyActive);
        }
        let (request_id, rx) = self.callbacks.start.open()?;
        // a caller that stops waiting must not leave the slot occupied
        let _pending = self.callbacks.start.guard(request_id);

        if let Err(err) = self.prepare_start(settings).await {
            log::warn!("Start request #{} failed before reaching the host: {}", request_id, err);
            if !self.callbacks.start.resolve(Err(err)) {
                log::debug!("Start request #{} was already resolved", request_id);
            }
        }

        let received = match self.start_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => return self.abandon_start(request_id, limit),
            },
            None => rx.await,
        };
        received.unwrap_or(Err(RecorderError::HostUnavailable))
    }

    async fn prepare_start(&self, settings: RecordingSettings) -> Result<()> {
        if settings.show_countdown {
            self.countdown(settings.countdown_seconds.seconds()).await;
        }

        let authorization = self.gate.request_authorization().await?;

        let display = self
            .platform
            .display_metrics()
            .map_err(|err| RecorderError::StartFailed(format!("{err:#}")))?;
        let request = plan(&settings, &display, self.catalog.dir(), Utc::now());

        self.send(HostCommand::Start {
            authorization,
            request,
        })
    }

    async fn countdown(&self, seconds: u32) {
        for remaining in (1..=seconds).rev() {
            self.emit(RecorderEvent::Countdown { remaining });
            tokio::time::sleep(self.countdown_tick).await;
        }
    }

    /// The device did not come up in time. The host finishes whatever it is
    /// doing, then the queued stop tears the devices down again. The start
    /// slot is freed by the caller's guard.
    fn abandon_start(&self, request_id: u64, limit: Duration) -> Result<()> {
        log::error!("Start request #{} timed out after {:?}", request_id, limit);
        if let Err(err) = self.send(HostCommand::Stop) {
            log::warn!("Could not queue teardown after start timeout: {}", err);
        }
        Err(RecorderError::StartFailed(format!(
            "timed out after {}s waiting for the encoder to start",
            limit.as_secs_f32()
        )))
    }

    /// Stop recording and return the finished file
    ///
    /// Returns `None` when nothing is recording.
    pub async fn stop(&self) -> Result<Option<RecordingArtifact>> {
        if self.state.get().is_idle() {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        self.callbacks.stop.register(tx)?;

        if let Err(err) = self.send(HostCommand::Stop) {
            self.callbacks.stop.resolve(Err(err));
        }
        rx.await.unwrap_or(Err(RecorderError::HostUnavailable))
    }

    /// Pause the recording; ignored where the platform cannot pause
    pub fn pause(&self) {
        if let Err(err) = self.send(HostCommand::Pause) {
            log::warn!("Pause ignored: {}", err);
        }
    }

    /// Resume a paused recording; ignored where the platform cannot pause
    pub fn resume(&self) {
        if let Err(err) = self.send(HostCommand::Resume) {
            log::warn!("Resume ignored: {}", err);
        }
    }

    pub fn get_recordings(&self) -> Result<Vec<RecordingArtifact>> {
        self.catalog.list()
    }

    pub fn delete_recording(&self, id: &str) -> Result<()> {
        self.catalog.delete(id)
    }

    /// Force-stop any active session and stop the host
    pub fn shutdown(&self) {
        self.gate.detach_host();
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
