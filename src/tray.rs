//! System tray icon for recording indicator using StatusNotifierItem (ksni)

use crossbeam_channel::{Receiver, Sender};
use ksni::{Icon, MenuItem, Tray, blocking::TrayMethods, menu::StandardItem};

/// Actions that can be triggered from the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorAction {
    /// Stop the current recording
    StopRecording,
    /// Pause a running recording or resume a paused one
    TogglePause,
}

/// What the indicator shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorStatus {
    Recording,
    Paused,
}

/// Persistent, user-visible sign that a recording is in progress
pub trait Indicator: Send {
    fn show(&mut self, status: IndicatorStatus);

    fn hide(&mut self);

    /// Actions the user triggered from the indicator
    fn actions(&self) -> Receiver<IndicatorAction>;
}

/// Indicator that shows nothing
pub struct NoIndicator;

impl Indicator for NoIndicator {
    fn show(&mut self, _status: IndicatorStatus) {}

    fn hide(&mut self) {}

    fn actions(&self) -> Receiver<IndicatorAction> {
        crossbeam_channel::never()
    }
}

/// The tray icon state for recording
struct RecorderTray {
    status: IndicatorStatus,
    tx: Sender<IndicatorAction>,
    icon: Vec<Icon>,
}

impl RecorderTray {
    fn new(status: IndicatorStatus, tx: Sender<IndicatorAction>) -> Self {
        Self {
            status,
            tx,
            icon: create_recording_icon(),
        }
    }

    fn send(&self, action: IndicatorAction) {
        if let Err(e) = self.tx.send(action) {
            log::error!("Failed to send {:?}: {}", action, e);
        }
    }
}

/// Create a simple red circle icon for recording indicator
fn create_recording_icon() -> Vec<Icon> {
    // Create icons at multiple sizes for proper DPI scaling
    [16, 22, 24, 32, 48, 64]
        .into_iter()
        .map(create_red_circle_icon)
        .collect()
}

/// Create a red circle icon at the specified size
fn create_red_circle_icon(size: i32) -> Icon {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    let center = size as f32 / 2.0;
    let radius = center - 1.0;

    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - center + 0.5;
            let dy = y as f32 - center + 0.5;
            let dist = (dx * dx + dy * dy).sqrt();

            // ARGB format (network byte order)
            if dist <= radius {
                let intensity = 1.0 - (dist / radius) * 0.2;
                data.extend_from_slice(&[
                    255,
                    (220.0 * intensity) as u8,
                    (50.0 * intensity) as u8,
                    (50.0 * intensity) as u8,
                ]);
            } else if dist <= radius + 1.0 {
                // Anti-aliased edge
                let alpha = ((radius + 1.0 - dist) * 255.0) as u8;
                data.extend_from_slice(&[alpha, 200, 40, 40]);
            } else {
                data.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    Icon {
        width: size,
        height: size,
        data,
    }
}

impl Tray for RecorderTray {
    fn id(&self) -> String {
        "dev.screenreel.recording".to_string()
    }

    fn title(&self) -> String {
        "Screen Recording".to_string()
    }

    fn icon_pixmap(&self) -> Vec<Icon> {
        self.icon.clone()
    }

    fn activate(&mut self, _x: i32, _y: i32) {
        // Left-click on tray icon stops recording
        log::info!("Tray icon clicked - stopping recording");
        self.send(IndicatorAction::StopRecording);
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        let title = match self.status {
            IndicatorStatus::Recording => "Recording Screen",
            IndicatorStatus::Paused => "Recording Paused",
        };
        ksni::ToolTip {
            title: title.to_string(),
            description: "Click to stop recording".to_string(),
            icon_name: String::new(),
            icon_pixmap: Vec::new(),
        }
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        let pause_label = match self.status {
            IndicatorStatus::Recording => "Pause",
            IndicatorStatus::Paused => "Resume",
        };

        vec![
            MenuItem::Standard(StandardItem {
                label: "Stop Recording".to_string(),
                activate: Box::new(|tray: &mut Self| {
                    log::info!("Menu: Stop Recording clicked");
                    tray.send(IndicatorAction::StopRecording);
                }),
                ..Default::default()
            }),
            MenuItem::Standard(StandardItem {
                label: pause_label.to_string(),
                activate: Box::new(|tray: &mut Self| {
                    log::info!("Menu: Pause/Resume clicked");
                    tray.send(IndicatorAction::TogglePause);
                }),
                ..Default::default()
            }),
        ]
    }
}

/// Tray icon shown while a recording runs
pub struct TrayIndicator {
    handle: Option<ksni::blocking::Handle<RecorderTray>>,
    tx: Sender<IndicatorAction>,
    rx: Receiver<IndicatorAction>,
}

impl Default for TrayIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrayIndicator {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            handle: None,
            tx,
            rx,
        }
    }
}

impl Indicator for TrayIndicator {
    fn show(&mut self, status: IndicatorStatus) {
        if let Some(handle) = &self.handle {
            handle.update(move |tray| tray.status = status);
            return;
        }

        match RecorderTray::new(status, self.tx.clone()).spawn() {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => log::warn!("Failed to spawn tray icon: {}", e),
        }
    }

    fn hide(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }

    fn actions(&self) -> Receiver<IndicatorAction> {
        self.rx.clone()
    }
}

impl Drop for TrayIndicator {
    fn drop(&mut self) {
        self.hide();
    }
}
