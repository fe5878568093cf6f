//! Capture device abstraction
//!
//! The session drives three things it does not implement itself: the display
//! it mirrors, the capture source producing frames, and the encoder writing the
//! container. Backends implement these traits.

#[cfg(unix)]
pub mod ffmpeg;

use anyhow::Result;
use std::path::Path;

use crate::screencast::{CaptureAuthorization, EncoderConfig};

/// Native metrics of the display being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

/// What a capture source feeds into an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Human-readable name (e.g., "X11 :0")
    pub name: String,
    /// Backend-specific input arguments the encoder consumes
    pub input: Vec<String>,
}

/// Entry point into the platform's capture stack
pub trait CapturePlatform: Send + Sync {
    fn display_metrics(&self) -> Result<DisplayMetrics>;

    /// Whether an encoder can be paused mid-recording
    fn supports_pause(&self) -> bool;

    /// Acquire the capture source. Consumes the authorization.
    fn acquire_source(
        &self,
        authorization: CaptureAuthorization,
        config: &EncoderConfig,
    ) -> Result<Box<dyn CaptureSource>>;

    /// Prepare an encoder writing to `output`
    fn open_encoder(&self, config: &EncoderConfig, output: &Path) -> Result<Box<dyn EncoderDevice>>;
}

pub trait CaptureSource: Send {
    fn descriptor(&self) -> &SourceDescriptor;

    fn release(&mut self);
}

pub trait EncoderDevice: Send {
    /// Connect the capture source to the encoder's input
    fn link(&mut self, source: &dyn CaptureSource) -> Result<()>;

    fn unlink(&mut self);

    /// Begin writing; returns once the device has confirmed it is recording
    fn start(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Flush and close the output container
    fn finalize(&mut self) -> Result<()>;

    fn release(&mut self);
}
