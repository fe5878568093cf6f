//! In-memory capture platform for tests

use anyhow::{Result, bail};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::encoder::EncoderConfig;
use super::permission::CaptureAuthorization;
use crate::capture::{
    CapturePlatform, CaptureSource, DisplayMetrics, EncoderDevice, SourceDescriptor,
};

/// Failure switches for the fake devices
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub fail_source: bool,
    pub fail_encoder_open: bool,
    pub fail_start: bool,
    pub fail_finalize: bool,
    /// Encoder creates the output file but never writes to it
    pub write_nothing: bool,
    pub no_pause: bool,
    pub start_delay: Option<Duration>,
}

type EventLog = Arc<Mutex<Vec<String>>>;

pub struct FakePlatform {
    events: EventLog,
    behavior: Mutex<FakeBehavior>,
    display: DisplayMetrics,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Self::with(FakeBehavior::default())
    }

    pub fn with(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            events: Arc::default(),
            behavior: Mutex::new(behavior),
            display: DisplayMetrics {
                width: 1080,
                height: 2400,
                density_dpi: 420,
            },
        })
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Device calls in the order they happened
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn behavior(&self) -> FakeBehavior {
        self.behavior.lock().unwrap().clone()
    }
}

fn record(events: &EventLog, event: &str) {
    events.lock().unwrap().push(event.to_string());
}

impl CapturePlatform for FakePlatform {
    fn display_metrics(&self) -> Result<DisplayMetrics> {
        Ok(self.display)
    }

    fn supports_pause(&self) -> bool {
        !self.behavior().no_pause
    }

    fn acquire_source(
        &self,
        _authorization: CaptureAuthorization,
        _config: &EncoderConfig,
    ) -> Result<Box<dyn CaptureSource>> {
        record(&self.events, "acquire source");
        if self.behavior().fail_source {
            bail!("projection refused");
        }
        Ok(Box::new(FakeSource {
            events: self.events.clone(),
            descriptor: SourceDescriptor {
                name: "fake display".to_string(),
                input: Vec::new(),
            },
        }))
    }

    fn open_encoder(
        &self,
        _config: &EncoderConfig,
        output: &Path,
    ) -> Result<Box<dyn EncoderDevice>> {
        record(&self.events, "open encoder");
        let behavior = self.behavior();
        if behavior.fail_encoder_open {
            bail!("encoder busy");
        }
        Ok(Box::new(FakeEncoder {
            events: self.events.clone(),
            behavior,
            output: output.to_path_buf(),
        }))
    }
}

struct FakeSource {
    events: EventLog,
    descriptor: SourceDescriptor,
}

impl CaptureSource for FakeSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn release(&mut self) {
        record(&self.events, "release source");
    }
}

struct FakeEncoder {
    events: EventLog,
    behavior: FakeBehavior,
    output: PathBuf,
}

impl FakeEncoder {
    fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)?;
        if !self.behavior.write_nothing {
            file.write_all(bytes)?;
        }
        Ok(())
    }
}

impl EncoderDevice for FakeEncoder {
    fn link(&mut self, _source: &dyn CaptureSource) -> Result<()> {
        record(&self.events, "link");
        Ok(())
    }

    fn unlink(&mut self) {
        record(&self.events, "unlink");
    }

    fn start(&mut self) -> Result<()> {
        record(&self.events, "start");
        if let Some(delay) = self.behavior.start_delay {
            std::thread::sleep(delay);
        }
        if self.behavior.fail_start {
            bail!("MediaRecorder start failed");
        }
        self.append(b"\0\0\0\x18ftypmp42")
    }

    fn pause(&mut self) -> Result<()> {
        record(&self.events, "pause");
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        record(&self.events, "resume");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        record(&self.events, "finalize");
        if self.behavior.fail_finalize {
            bail!("stop failed: no valid frames");
        }
        self.append(b"moov")
    }

    fn release(&mut self) {
        record(&self.events, "release encoder");
    }
}
