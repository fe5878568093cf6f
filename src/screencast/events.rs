//! Notifications published to subscribers of the recorder

use serde::Serialize;
use std::path::PathBuf;

use super::encoder::EncoderConfig;
use super::session::RecordingArtifact;
use super::state::SessionState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecorderEvent {
    StateChanged(SessionState),
    /// Seconds left before recording begins
    Countdown { remaining: u32 },
    Started {
        config: EncoderConfig,
        output_path: PathBuf,
    },
    StartFailed { reason: String },
    Paused,
    Resumed,
    Stopped(RecordingArtifact),
    StopFailed { reason: String },
}

impl RecorderEvent {
    /// Whether this ends a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecorderEvent::StartFailed { .. }
                | RecorderEvent::Stopped(_)
                | RecorderEvent::StopFailed { .. }
        )
    }
}
