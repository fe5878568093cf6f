//! Screen recording session lifecycle
//!
//! Consent, encoder policy, the capture session state machine and the
//! background host that keeps a recording alive independently of the UI.

mod callbacks;
pub mod encoder;
mod events;
mod host;
mod manager;
mod permission;
mod session;
mod state;
#[cfg(test)]
mod testing;

pub use callbacks::{Mailbox, PendingCallbacks};
pub use encoder::EncoderConfig;
pub use events::RecorderEvent;
pub use host::{HostCommand, SessionHost};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use permission::{
    CapabilityGate, CaptureAuthorization, ConsentHost, ConsentRequest, ConsentResponder,
    ConsentResponse,
};
pub use session::{
    CaptureSession, RECORDING_EXTENSION, RECORDING_PREFIX, RecordingArtifact, StartRequest, plan,
};
pub use state::{SessionState, SessionStateCell};
