//! Configuration persistence for screenreel settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Video quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum VideoQuality {
    Low,
    Medium,
    #[default]
    High,
    /// Native display resolution
    Ultra,
}

impl VideoQuality {
    pub fn name(self) -> &'static str {
        match self {
            VideoQuality::Low => "low",
            VideoQuality::Medium => "medium",
            VideoQuality::High => "high",
            VideoQuality::Ultra => "ultra",
        }
    }

    /// Parse a preset name; anything unrecognised falls back to `High`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => VideoQuality::Low,
            "medium" => VideoQuality::Medium,
            "high" => VideoQuality::High,
            "ultra" => VideoQuality::Ultra,
            other => {
                log::warn!("Unknown video quality '{}', using high", other);
                VideoQuality::High
            }
        }
    }
}

impl From<String> for VideoQuality {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

/// Supported capture frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    Fps15,
    Fps24,
    #[default]
    Fps30,
    Fps60,
}

impl FrameRate {
    pub fn fps(self) -> u32 {
        match self {
            FrameRate::Fps15 => 15,
            FrameRate::Fps24 => 24,
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
        }
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        match fps {
            15 => Ok(FrameRate::Fps15),
            24 => Ok(FrameRate::Fps24),
            30 => Ok(FrameRate::Fps30),
            60 => Ok(FrameRate::Fps60),
            other => Err(format!("unsupported frame rate {other} (expected 15, 24, 30 or 60)")),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> Self {
        rate.fps()
    }
}

/// Where audio is captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSource {
    #[default]
    Mic,
    Internal,
    Both,
}

/// Countdown shown before a recording begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CountdownSeconds {
    #[default]
    Three,
    Five,
    Ten,
}

impl CountdownSeconds {
    pub fn seconds(self) -> u32 {
        match self {
            CountdownSeconds::Three => 3,
            CountdownSeconds::Five => 5,
            CountdownSeconds::Ten => 10,
        }
    }
}

impl TryFrom<u32> for CountdownSeconds {
    type Error = String;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        match secs {
            3 => Ok(CountdownSeconds::Three),
            5 => Ok(CountdownSeconds::Five),
            10 => Ok(CountdownSeconds::Ten),
            other => Err(format!("unsupported countdown {other} (expected 3, 5 or 10)")),
        }
    }
}

impl From<CountdownSeconds> for u32 {
    fn from(countdown: CountdownSeconds) -> Self {
        countdown.seconds()
    }
}

/// Storage area for new recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    /// Application data directory
    #[default]
    Internal,
    /// User's Videos folder
    External,
}

impl StorageLocation {
    pub fn recordings_dir(self) -> Option<PathBuf> {
        match self {
            StorageLocation::Internal => {
                dirs::data_local_dir().map(|d| d.join("screenreel").join("recordings"))
            }
            StorageLocation::External => dirs::video_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
                .map(|d| d.join("screenreel")),
        }
    }
}

/// Per-session recording options
///
/// Copied into a session when it starts; later edits only affect the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub video_quality: VideoQuality,
    pub frame_rate: FrameRate,
    pub audio_enabled: bool,
    pub audio_source: AudioSource,
    pub show_touches: bool,
    pub show_countdown: bool,
    pub countdown_seconds: CountdownSeconds,
    pub storage_location: StorageLocation,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            video_quality: VideoQuality::High,
            frame_rate: FrameRate::Fps30,
            audio_enabled: true,
            audio_source: AudioSource::Mic,
            show_touches: false,
            show_countdown: true,
            countdown_seconds: CountdownSeconds::Three,
            storage_location: StorageLocation::Internal,
        }
    }
}

/// Application configuration persisted between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Defaults for the next recording
    #[serde(default)]
    pub settings: RecordingSettings,
    /// Overrides the directory derived from `settings.storage_location`
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,
    /// Give up on the consent prompt after this many seconds (None = wait forever)
    #[serde(default)]
    pub consent_timeout_secs: Option<u64>,
    /// Give up on device start after this many seconds (None = wait forever)
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: Option<u64>,
    /// Show the tray indicator while recording
    #[serde(default = "default_show_indicator")]
    pub show_indicator: bool,
    /// ffmpeg binary used for capture
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// X display to capture (None = $DISPLAY)
    #[serde(default)]
    pub x11_display: Option<String>,
}

fn default_start_timeout() -> Option<u64> {
    Some(30)
}

fn default_show_indicator() -> bool {
    true
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings: RecordingSettings::default(),
            recordings_dir: None,
            consent_timeout_secs: None,
            start_timeout_secs: default_start_timeout(),
            show_indicator: default_show_indicator(),
            ffmpeg_path: default_ffmpeg_path(),
            x11_display: None,
        }
    }
}

impl AppConfig {
    fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("No configuration directory on this system")?;
        Ok(dir.join("screenreel").join("config.json"))
    }

    /// Load configuration from disk, or return defaults if unavailable
    pub fn load() -> Self {
        match Self::config_path().and_then(|path| Self::load_from(&path)) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                log::warn!("Error loading config, using defaults: {:#}", err);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(Some(config))
    }

    /// Save configuration to disk
    pub fn save(&self) {
        if let Err(err) = Self::config_path().and_then(|path| self.save_to(&path)) {
            log::error!("Failed to save config: {:#}", err);
        }
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Directory new recordings are written to and listed from
    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .or_else(|| self.settings.storage_location.recordings_dir())
            .unwrap_or_else(|| std::env::temp_dir().join("screenreel-recordings"))
    }

    pub fn consent_timeout(&self) -> Option<std::time::Duration> {
        self.consent_timeout_secs.map(std::time::Duration::from_secs)
    }

    pub fn start_timeout(&self) -> Option<std::time::Duration> {
        self.start_timeout_secs.map(std::time::Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_app_defaults() {
        let settings = RecordingSettings::default();
        assert_eq!(settings.video_quality, VideoQuality::High);
        assert_eq!(settings.frame_rate.fps(), 30);
        assert!(settings.audio_enabled);
        assert_eq!(settings.audio_source, AudioSource::Mic);
        assert!(!settings.show_touches);
        assert!(settings.show_countdown);
        assert_eq!(settings.countdown_seconds.seconds(), 3);
    }

    #[test]
    fn test_unknown_quality_falls_back_to_high() {
        let settings: RecordingSettings =
            serde_json::from_str(r#"{"video_quality":"cinema"}"#).unwrap();
        assert_eq!(settings.video_quality, VideoQuality::High);
        assert_eq!(VideoQuality::parse("Medium"), VideoQuality::Medium);
    }

    #[test]
    fn test_frame_rate_rejects_unsupported_values() {
        assert!(serde_json::from_str::<RecordingSettings>(r#"{"frame_rate":25}"#).is_err());
        let settings: RecordingSettings =
            serde_json::from_str(r#"{"frame_rate":60,"countdown_seconds":10}"#).unwrap();
        assert_eq!(settings.frame_rate, FrameRate::Fps60);
        assert_eq!(settings.countdown_seconds, CountdownSeconds::Ten);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.settings.video_quality = VideoQuality::Ultra;
        config.recordings_dir = Some(dir.path().join("videos"));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.recordings_dir(), dir.path().join("videos"));
    }

    #[test]
    fn test_missing_config_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_from(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"show_indicator":false}"#).unwrap();
        assert!(!config.show_indicator);
        assert_eq!(config.start_timeout_secs, Some(30));
        assert!(config.settings.audio_enabled);
    }
}
