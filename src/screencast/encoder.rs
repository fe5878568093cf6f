//! Encoder parameter policy
//!
//! Maps a quality preset and frame rate onto the output resolution and video
//! bitrate, sized against the native display.

use serde::Serialize;

use crate::capture::DisplayMetrics;
use crate::config::{AudioSource, RecordingSettings, VideoQuality};

/// AAC bitrate used whenever audio is recorded
pub const AUDIO_BITRATE: u32 = 128_000;
/// Audio sampling rate in Hz
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Encoder parameters for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub frame_rate: u32,
    pub video_bitrate: u32,
    pub audio_enabled: bool,
    pub audio_source: AudioSource,
    pub show_touches: bool,
}

impl EncoderConfig {
    pub fn derive(settings: &RecordingSettings, display: &DisplayMetrics) -> Self {
        let frame_rate = settings.frame_rate.fps();
        let (width, height, video_bitrate) = derive(
            settings.video_quality,
            frame_rate,
            display.width,
            display.height,
        );
        Self {
            width,
            height,
            density_dpi: display.density_dpi,
            frame_rate,
            video_bitrate,
            audio_enabled: settings.audio_enabled,
            audio_source: settings.audio_source,
            show_touches: settings.show_touches,
        }
    }
}

/// Output resolution for a preset
pub fn resolution(quality: VideoQuality, display_width: u32, display_height: u32) -> (u32, u32) {
    match quality {
        VideoQuality::Low => (640, 480),
        VideoQuality::Medium => (1280, 720),
        VideoQuality::High => (1920, 1080),
        VideoQuality::Ultra => (display_width, display_height),
    }
}

/// Video bitrate for a resolution and frame rate
pub fn bitrate(width: u32, height: u32, frame_rate: u32) -> u32 {
    let pixels = width as u64 * height as u64;
    let base: u64 = if pixels >= 3840 * 2160 {
        35_000_000
    } else if pixels >= 2560 * 1440 {
        16_000_000
    } else if pixels >= 1920 * 1080 {
        8_000_000
    } else if pixels >= 1280 * 720 {
        4_000_000
    } else {
        2_000_000
    };

    // factor as a fraction keeps the floor exact
    let (num, den) = if frame_rate >= 60 {
        (3, 2)
    } else if frame_rate >= 30 {
        (1, 1)
    } else {
        (7, 10)
    };

    (base * num / den) as u32
}

/// (width, height, bitrate) for a preset on a display
pub fn derive(
    quality: VideoQuality,
    frame_rate: u32,
    display_width: u32,
    display_height: u32,
) -> (u32, u32, u32) {
    let (width, height) = resolution(quality, display_width, display_height);
    (width, height, bitrate(width, height, frame_rate))
}
