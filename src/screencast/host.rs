//! Background host for the capture session
//!
//! The session lives on its own thread so it keeps recording regardless of
//! what the UI does. Lifecycle commands arrive as messages and are handled one
//! at a time; terminal results go to the waiting caller through the pending
//! callback slots and to every subscriber as events.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;

use super::callbacks::PendingCallbacks;
use super::events::RecorderEvent;
use super::permission::CaptureAuthorization;
use super::session::{CaptureSession, StartRequest};
use super::state::SessionState;
use crate::error::{RecorderError, Result};
use crate::tray::{Indicator, IndicatorAction, IndicatorStatus};

/// Commands accepted by the session host
#[derive(Debug)]
pub enum HostCommand {
    Start {
        authorization: CaptureAuthorization,
        request: StartRequest,
    },
    Stop,
    Pause,
    Resume,
    Shutdown,
}

/// Handle to the host thread
pub struct SessionHost {
    tx: Sender<HostCommand>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHost {
    pub fn spawn(
        session: CaptureSession,
        indicator: Box<dyn Indicator>,
        callbacks: Arc<PendingCallbacks>,
        events: broadcast::Sender<RecorderEvent>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = HostWorker {
            session,
            actions: indicator.actions(),
            indicator,
            callbacks,
            events,
        };

        let thread = std::thread::Builder::new()
            .name("session-host".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|err| {
                log::error!("Failed to spawn session host: {}", err);
                RecorderError::HostUnavailable
            })?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn send(&self, command: HostCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| RecorderError::HostUnavailable)
    }

    /// Stop any active session and wait for the host thread to exit
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.tx.send(HostCommand::Shutdown).is_err() {
            log::debug!("Session host already gone");
        }
        if thread.join().is_err() {
            log::error!("Session host thread panicked");
        }
    }
}

impl Drop for SessionHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct HostWorker {
    session: CaptureSession,
    indicator: Box<dyn Indicator>,
    actions: Receiver<IndicatorAction>,
    callbacks: Arc<PendingCallbacks>,
    events: broadcast::Sender<RecorderEvent>,
}

impl HostWorker {
    fn run(mut self, commands: Receiver<HostCommand>) {
        log::info!("Session host started");

        loop {
            let actions = self.actions.clone();
            crossbeam_channel::select! {
                recv(commands) -> msg => match msg {
                    Ok(HostCommand::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle(command),
                },
                recv(actions) -> msg => match msg {
                    Ok(action) => self.handle_action(action),
                    Err(_) => {
                        log::debug!("Indicator action channel closed");
                        self.actions = crossbeam_channel::never();
                    }
                },
            }
        }

        self.teardown();
        log::info!("Session host stopped");
    }

    fn handle(&mut self, command: HostCommand) {
        match command {
            HostCommand::Start {
                authorization,
                request,
            } => self.start(authorization, request),
            HostCommand::Stop => self.stop(),
            HostCommand::Pause => self.pause(),
            HostCommand::Resume => self.resume(),
            HostCommand::Shutdown => {}
        }
    }

    fn handle_action(&mut self, action: IndicatorAction) {
        log::info!("Indicator action: {:?}", action);
        match action {
            IndicatorAction::StopRecording => self.stop(),
            IndicatorAction::TogglePause => match self.session.state() {
                SessionState::Running => self.pause(),
                SessionState::Paused => self.resume(),
                _ => {}
            },
        }
    }

    fn emit(&self, event: RecorderEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn start(&mut self, authorization: CaptureAuthorization, request: StartRequest) {
        let config = request.config;
        let output_path = request.output_path.clone();

        let result = self.session.begin(authorization, request);
        match &result {
            Ok(()) => {
                self.indicator.show(IndicatorStatus::Recording);
                self.emit(RecorderEvent::StateChanged(SessionState::Running));
                self.emit(RecorderEvent::Started {
                    config,
                    output_path,
                });
            }
            Err(RecorderError::SessionAlreadyActive) => {}
            Err(err) => {
                self.emit(RecorderEvent::StartFailed {
                    reason: err.to_string(),
                });
            }
        }
        self.callbacks.start.resolve(result);
    }

    fn stop(&mut self) {
        let was_active = !self.session.state().is_idle();
        let result = self.session.stop();
        self.indicator.hide();

        if was_active {
            match &result {
                Ok(Some(artifact)) => self.emit(RecorderEvent::Stopped(artifact.clone())),
                Ok(None) => {}
                Err(err) => self.emit(RecorderEvent::StopFailed {
                    reason: err.to_string(),
                }),
            }
            self.emit(RecorderEvent::StateChanged(SessionState::Idle));
        }
        self.callbacks.stop.resolve(result);
    }

    fn pause(&mut self) {
        if self.session.pause() {
            self.indicator.show(IndicatorStatus::Paused);
            self.emit(RecorderEvent::StateChanged(SessionState::Paused));
            self.emit(RecorderEvent::Paused);
        }
    }

    fn resume(&mut self) {
        if self.session.resume() {
            self.indicator.show(IndicatorStatus::Recording);
            self.emit(RecorderEvent::StateChanged(SessionState::Running));
            self.emit(RecorderEvent::Resumed);
        }
    }

    fn teardown(&mut self) {
        if !self.session.state().is_idle() {
            log::info!("Host shutting down with an active session, stopping it");
            self.stop();
        }
        self.indicator.hide();
        self.callbacks.fail_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturePlatform;
    use crate::config::{RecordingSettings, VideoQuality};
    use crate::screencast::session::plan;
    use crate::screencast::state::SessionStateCell;
    use crate::screencast::testing::FakePlatform;
    use crossbeam_channel::Sender;
    use std::sync::Mutex;

    /// Indicator recording what it was asked to show
    #[derive(Clone)]
    struct TestIndicator {
        shown: Arc<Mutex<Vec<Option<IndicatorStatus>>>>,
        tx: Sender<IndicatorAction>,
        rx: Receiver<IndicatorAction>,
    }

    impl TestIndicator {
        fn new() -> Self {
            let (tx, rx) = crossbeam_channel::unbounded();
            Self {
                shown: Arc::default(),
                tx,
                rx,
            }
        }
    }

    impl Indicator for TestIndicator {
        fn show(&mut self, status: IndicatorStatus) {
            self.shown.lock().unwrap().push(Some(status));
        }

        fn hide(&mut self) {
            self.shown.lock().unwrap().push(None);
        }

        fn actions(&self) -> Receiver<IndicatorAction> {
            self.rx.clone()
        }
    }

    struct Fixture {
        host: SessionHost,
        callbacks: Arc<PendingCallbacks>,
        events: broadcast::Receiver<RecorderEvent>,
        state: SessionStateCell,
        indicator: TestIndicator,
        platform: Arc<FakePlatform>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let platform = FakePlatform::new();
        let state = SessionStateCell::new();
        let callbacks = Arc::new(PendingCallbacks::new());
        let (events_tx, events) = broadcast::channel(32);
        let indicator = TestIndicator::new();
        let host = SessionHost::spawn(
            CaptureSession::new(platform.clone(), state.clone()),
            Box::new(indicator.clone()),
            callbacks.clone(),
            events_tx,
        )
        .unwrap();
        Fixture {
            host,
            callbacks,
            events,
            state,
            indicator,
            platform,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn start_command(fx: &Fixture, token: u64) -> HostCommand {
        let settings = RecordingSettings {
            video_quality: VideoQuality::Low,
            ..Default::default()
        };
        let display = fx.platform.display_metrics().unwrap();
        HostCommand::Start {
            authorization: CaptureAuthorization::for_tests(token),
            request: plan(&settings, &display, fx.dir.path(), chrono::Utc::now()),
        }
    }

    async fn next_terminal(events: &mut broadcast::Receiver<RecorderEvent>) -> RecorderEvent {
        loop {
            let event = events.recv().await.unwrap();
            if event.is_terminal() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_resolve_callers() {
        let fx = fixture();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 1)).unwrap();
        start_rx.await.unwrap().unwrap();
        assert_eq!(fx.state.get(), SessionState::Running);

        let (_, stop_rx) = fx.callbacks.stop.open().unwrap();
        fx.host.send(HostCommand::Stop).unwrap();
        let artifact = stop_rx.await.unwrap().unwrap().unwrap();
        assert!(artifact.size_bytes > 0);
        assert_eq!(fx.state.get(), SessionState::Idle);

        assert_eq!(
            *fx.indicator.shown.lock().unwrap(),
            vec![Some(IndicatorStatus::Recording), None]
        );
    }

    #[tokio::test]
    async fn test_indicator_stop_emits_event_without_caller() {
        let mut fx = fixture();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 1)).unwrap();
        start_rx.await.unwrap().unwrap();

        fx.indicator.tx.send(IndicatorAction::StopRecording).unwrap();
        match next_terminal(&mut fx.events).await {
            RecorderEvent::Stopped(artifact) => assert!(artifact.size_bytes > 0),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(fx.state.get(), SessionState::Idle);
        assert!(!fx.callbacks.stop.is_occupied());
    }

    #[tokio::test]
    async fn test_indicator_toggles_pause() {
        let mut fx = fixture();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 1)).unwrap();
        start_rx.await.unwrap().unwrap();

        fx.indicator.tx.send(IndicatorAction::TogglePause).unwrap();
        loop {
            if fx.events.recv().await.unwrap() == RecorderEvent::Paused {
                break;
            }
        }
        assert_eq!(fx.state.get(), SessionState::Paused);
        assert_eq!(
            fx.indicator.shown.lock().unwrap().last(),
            Some(&Some(IndicatorStatus::Paused))
        );
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let fx = fixture();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 1)).unwrap();
        start_rx.await.unwrap().unwrap();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 2)).unwrap();
        let err = start_rx.await.unwrap().unwrap_err();
        assert!(matches!(err, RecorderError::SessionAlreadyActive));
        assert_eq!(fx.state.get(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_session() {
        let mut fx = fixture();

        let (_, start_rx) = fx.callbacks.start.open().unwrap();
        fx.host.send(start_command(&fx, 1)).unwrap();
        start_rx.await.unwrap().unwrap();

        fx.host.shutdown();
        assert_eq!(fx.state.get(), SessionState::Idle);
        assert!(matches!(
            next_terminal(&mut fx.events).await,
            RecorderEvent::Stopped(_)
        ));
        assert!(fx.platform.events().ends_with(&["release source".to_string()]));
        assert!(matches!(
            fx.host.send(HostCommand::Stop),
            Err(RecorderError::HostUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_caller() {
        let mut fx = fixture();
        // a caller waiting on stop with no session to stop
        let (_, stop_rx) = fx.callbacks.stop.open().unwrap();
        fx.host.shutdown();
        assert!(matches!(
            stop_rx.await.unwrap(),
            Err(RecorderError::HostUnavailable)
        ));
    }
}
