//! X11 screen capture through an ffmpeg subprocess
//!
//! The encoder is an `ffmpeg` child process grabbing the X display (and
//! optionally PulseAudio) into an H.264/AAC MP4. Each running span is its own
//! segment: pausing asks ffmpeg to quit, resuming starts a new process, and
//! finalizing joins the segments with the concat demuxer. A process that does
//! not exit in time is terminated.

use anyhow::{Context, Result, bail};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{CapturePlatform, CaptureSource, DisplayMetrics, EncoderDevice, SourceDescriptor};
use crate::config::{AppConfig, AudioSource};
use crate::screencast::encoder::{AUDIO_BITRATE, AUDIO_SAMPLE_RATE};
use crate::screencast::{CaptureAuthorization, EncoderConfig};

/// How long ffmpeg must stay alive before the recording counts as started
const START_PROBE: Duration = Duration::from_millis(500);
/// How long ffmpeg gets to write the trailer before it is killed
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long ffmpeg gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Screen capture backed by ffmpeg's x11grab
pub struct FfmpegPlatform {
    ffmpeg: PathBuf,
    display: String,
    metrics: Option<DisplayMetrics>,
}

impl FfmpegPlatform {
    pub fn new(ffmpeg: impl Into<PathBuf>, display: Option<String>) -> Self {
        let display = display
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_else(|| ":0".to_string());
        Self {
            ffmpeg: ffmpeg.into(),
            display,
            metrics: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.x11_display.clone())
    }

    /// Use fixed display metrics instead of querying the X server
    pub fn with_metrics(mut self, metrics: DisplayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl CapturePlatform for FfmpegPlatform {
    fn display_metrics(&self) -> Result<DisplayMetrics> {
        if let Some(metrics) = self.metrics {
            return Ok(metrics);
        }

        let output = Command::new("xdpyinfo")
            .args(["-display", &self.display])
            .output()
            .context("Failed to run xdpyinfo")?;
        if !output.status.success() {
            bail!(
                "xdpyinfo failed for display {}: {}",
                self.display,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_xdpyinfo(&String::from_utf8_lossy(&output.stdout))
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn acquire_source(
        &self,
        authorization: CaptureAuthorization,
        config: &EncoderConfig,
    ) -> Result<Box<dyn CaptureSource>> {
        log::debug!(
            "Capturing {} under consent token {} ({})",
            self.display,
            authorization.token(),
            authorization.payload()
        );
        let metrics = self.display_metrics()?;
        Ok(Box::new(X11Source {
            descriptor: SourceDescriptor {
                name: format!("X11 {}", self.display),
                input: grab_args(&self.display, &metrics, config),
            },
            authorization: Some(authorization),
        }))
    }

    fn open_encoder(
        &self,
        config: &EncoderConfig,
        output: &Path,
    ) -> Result<Box<dyn EncoderDevice>> {
        Ok(Box::new(FfmpegEncoder {
            ffmpeg: self.ffmpeg.clone(),
            config: *config,
            output: output.to_path_buf(),
            input: Vec::new(),
            process: None,
            segments: Vec::new(),
        }))
    }
}

/// Parse width, height and DPI out of `xdpyinfo` output
pub fn parse_xdpyinfo(text: &str) -> Result<DisplayMetrics> {
    let field = |name: &str| {
        text.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.split_once('x'))
            .and_then(|(a, b)| Some((a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)))
    };

    let (width, height) = field("dimensions:").context("No screen dimensions in xdpyinfo output")?;
    // DPI is informational; fall back to the X default
    let density_dpi = field("resolution:").map(|(x, _)| x).unwrap_or(96);

    Ok(DisplayMetrics {
        width,
        height,
        density_dpi,
    })
}

/// ffmpeg input arguments grabbing the whole display
fn grab_args(display: &str, metrics: &DisplayMetrics, config: &EncoderConfig) -> Vec<String> {
    let draw_mouse = if config.show_touches { "1" } else { "0" };
    vec![
        "-f".into(),
        "x11grab".into(),
        "-framerate".into(),
        config.frame_rate.to_string(),
        "-video_size".into(),
        format!("{}x{}", metrics.width, metrics.height),
        "-draw_mouse".into(),
        draw_mouse.into(),
        "-i".into(),
        display.into(),
    ]
}

/// ffmpeg input arguments for the configured audio source
fn audio_args(source: AudioSource) -> Vec<String> {
    let device = |name: &str| vec!["-f".to_string(), "pulse".into(), "-i".into(), name.into()];
    match source {
        AudioSource::Mic => device("default"),
        AudioSource::Internal => device("@DEFAULT_MONITOR@"),
        AudioSource::Both => {
            let mut args = device("default");
            args.extend(device("@DEFAULT_MONITOR@"));
            args
        }
    }
}

/// Full ffmpeg command line for one recording
pub fn build_args(config: &EncoderConfig, input: &[String], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
    ];
    args.extend(input.iter().cloned());

    if config.audio_enabled {
        args.extend(audio_args(config.audio_source));
        if config.audio_source == AudioSource::Both {
            args.extend([
                "-filter_complex".to_string(),
                "[1:a][2:a]amix=inputs=2:duration=longest[aout]".into(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[aout]".into(),
            ]);
        }
    }

    args.extend([
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-r".into(),
        config.frame_rate.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-b:v".into(),
        config.video_bitrate.to_string(),
    ]);

    if config.audio_enabled {
        args.extend([
            "-c:a".to_string(),
            "aac".into(),
            "-b:a".into(),
            AUDIO_BITRATE.to_string(),
            "-ar".into(),
            AUDIO_SAMPLE_RATE.to_string(),
        ]);
    } else {
        args.push("-an".into());
    }

    // segments carry a non-media extension
    args.extend(["-f".to_string(), "mp4".into()]);
    args.push(output.to_string_lossy().into_owned());
    args
}

/// The X display, held for the length of one session
struct X11Source {
    descriptor: SourceDescriptor,
    authorization: Option<CaptureAuthorization>,
}

impl CaptureSource for X11Source {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn release(&mut self) {
        if let Some(authorization) = self.authorization.take() {
            log::debug!("Released capture grant {}", authorization.token());
        }
    }
}

/// Lines of ffmpeg stderr kept for error messages
const STDERR_TAIL: usize = 20;

/// Log ffmpeg's stderr as it arrives and keep the last lines
fn drain_stderr(pipe: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        for line in BufReader::new(pipe).lines().map_while(|line| line.ok()) {
            log::warn!("ffmpeg: {}", line);
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

/// A running ffmpeg child, reaped when dropped
struct FfmpegProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    fn spawn(ffmpeg: &Path, args: &[String]) -> Result<Self> {
        log::debug!("Spawning {} {}", ffmpeg.display(), args.join(" "));
        let mut child = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", ffmpeg.display()))?;
        let stderr = child.stderr.take().map(drain_stderr);
        Ok(Self { child, stderr })
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Collected stderr; complete once the process has exited
    fn stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    /// Wait for the process to exit on its own, up to `timeout`
    fn wait_for_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait for a clean exit; anything else kills the process
    fn wait(mut self, timeout: Duration) -> Result<()> {
        match self.wait_for_exit(timeout) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => bail!("ffmpeg exited with {}: {}", status, self.stderr()),
            Ok(None) => {
                log::warn!("ffmpeg did not finish within {:?}, killing it", timeout);
                self.terminate();
                bail!("ffmpeg did not finish within {:?}", timeout)
            }
            Err(err) => {
                self.terminate();
                Err(err.context("Failed to wait for ffmpeg"))
            }
        }
    }

    /// Ask ffmpeg to quit so it writes the container trailer
    fn finish(mut self, timeout: Duration) -> Result<()> {
        if let Some(mut stdin) = self.child.stdin.take() {
            if let Err(err) = stdin.write_all(b"q") {
                log::warn!("Failed to ask ffmpeg to quit: {}", err);
            }
        }
        self.wait(timeout)
    }

    /// SIGTERM, a short grace period, then SIGKILL
    fn terminate(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(err) = signal::kill(self.pid(), Signal::SIGTERM) {
            log::debug!("Failed to send SIGTERM to ffmpeg: {}", err);
        }
        if matches!(self.wait_for_exit(TERMINATE_GRACE), Ok(Some(_))) {
            return;
        }
        log::warn!("ffmpeg (pid {}) ignored SIGTERM, force killing", self.child.id());
        if let Err(err) = self.child.kill() {
            log::debug!("ffmpeg already gone: {}", err);
        }
        let _ = self.child.wait();
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Concat demuxer list naming segments relative to the list file
fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| {
            let name = name.to_string_lossy().replace('\'', "'\\''");
            format!("file '{name}'\n")
        })
        .collect()
}

/// ffmpeg command line joining segments into the final file without re-encoding
fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "mp4".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Records each running span into its own segment; pausing closes the
/// current segment and resuming opens the next one
struct FfmpegEncoder {
    ffmpeg: PathBuf,
    config: EncoderConfig,
    output: PathBuf,
    input: Vec<String>,
    process: Option<FfmpegProcess>,
    segments: Vec<PathBuf>,
}

impl FfmpegEncoder {
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.output.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn start_segment(&mut self) -> Result<()> {
        let path = self.sibling(&format!(".part{}", self.segments.len()));
        let args = build_args(&self.config, &self.input, &path);
        let mut process = FfmpegProcess::spawn(&self.ffmpeg, &args)?;

        if let Some(status) = process.wait_for_exit(START_PROBE)? {
            bail!("ffmpeg exited during startup ({}): {}", status, process.stderr());
        }

        log::info!(
            "ffmpeg recording segment {} (pid {})",
            self.segments.len(),
            process.child.id()
        );
        self.segments.push(path);
        self.process = Some(process);
        Ok(())
    }

    fn finish_segment(&mut self) -> Result<()> {
        match self.process.take() {
            Some(process) => process.finish(FINALIZE_TIMEOUT),
            None => Ok(()),
        }
    }

    fn merge_segments(&mut self) -> Result<()> {
        match self.segments.as_slice() {
            [] => bail!("Nothing was recorded"),
            [only] => std::fs::rename(only, &self.output)
                .with_context(|| format!("Failed to move segment to {}", self.output.display()))?,
            segments => {
                let list = self.sibling(".segments.txt");
                std::fs::write(&list, concat_list(segments))
                    .with_context(|| format!("Failed to write {}", list.display()))?;
                log::info!("Joining {} segments into {}", segments.len(), self.output.display());

                let joined = FfmpegProcess::spawn(&self.ffmpeg, &concat_args(&list, &self.output))
                    .and_then(|process| process.wait(FINALIZE_TIMEOUT));
                let _ = std::fs::remove_file(&list);
                joined?;
            }
        }
        self.remove_segments();
        Ok(())
    }

    fn remove_segments(&mut self) {
        for segment in self.segments.drain(..) {
            match std::fs::remove_file(&segment) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => log::warn!("Failed to remove segment {}: {}", segment.display(), err),
            }
        }
    }
}

impl EncoderDevice for FfmpegEncoder {
    fn link(&mut self, source: &dyn CaptureSource) -> Result<()> {
        self.input = source.descriptor().input.clone();
        Ok(())
    }

    fn unlink(&mut self) {
        self.input.clear();
    }

    fn start(&mut self) -> Result<()> {
        if self.input.is_empty() {
            bail!("No capture source linked");
        }
        if self.process.is_some() || !self.segments.is_empty() {
            bail!("ffmpeg has already started");
        }
        self.start_segment()
    }

    fn pause(&mut self) -> Result<()> {
        if self.process.is_none() {
            bail!("ffmpeg is not running");
        }
        self.finish_segment()
    }

    fn resume(&mut self) -> Result<()> {
        if self.process.is_some() {
            bail!("ffmpeg is already running");
        }
        self.start_segment()
    }

    fn finalize(&mut self) -> Result<()> {
        self.finish_segment()?;
        self.merge_segments()
    }

    fn release(&mut self) {
        // dropping the process reaps it
        self.process = None;
        self.remove_segments();
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const XDPYINFO: &str = "\
name of display:    :0
screen #0:
  dimensions:    2560x1440 pixels (677x381 millimeters)
  resolution:    96x96 dots per inch
  depths (7):    24, 1, 4, 8, 15, 16, 32
";

    fn config(audio: bool, source: AudioSource) -> EncoderConfig {
        EncoderConfig {
            width: 1280,
            height: 720,
            density_dpi: 96,
            frame_rate: 30,
            video_bitrate: 4_000_000,
            audio_enabled: audio,
            audio_source: source,
            show_touches: false,
        }
    }

    fn metrics() -> DisplayMetrics {
        DisplayMetrics {
            width: 2560,
            height: 1440,
            density_dpi: 96,
        }
    }

    /// Stand-in for ffmpeg. Recording writes `A` to the last argument and `B`
    /// once stdin says quit; concat mode appends the listed files in order.
    const FAKE_FFMPEG: &str = r#"
for arg; do
  [ "$prev" = "-i" ] && input="$arg"
  [ "$arg" = concat ] && mode=concat
  prev="$arg"
  last="$arg"
done
if [ "$mode" = concat ]; then
  : > "$last"
  sed -n "s/^file '\(.*\)'\$/\1/p" "$input" | while read -r part; do
    cat "$(dirname "$input")/$part" >> "$last"
  done
  exit 0
fi
printf A > "$last"
read _ignored
printf B >> "$last"
"#;

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_parse_xdpyinfo() {
        assert_eq!(parse_xdpyinfo(XDPYINFO).unwrap(), metrics());
    }

    #[test]
    fn test_parse_xdpyinfo_without_dimensions_fails() {
        assert!(parse_xdpyinfo("name of display: :0\n").is_err());
    }

    #[test]
    fn test_args_with_mic() {
        let input = grab_args(":1", &metrics(), &config(true, AudioSource::Mic));
        let args = build_args(&config(true, AudioSource::Mic), &input, Path::new("/tmp/out.mp4"));

        assert!(has_pair(&args, "-f", "x11grab"));
        assert!(has_pair(&args, "-video_size", "2560x1440"));
        assert!(has_pair(&args, "-i", ":1"));
        assert!(has_pair(&args, "-i", "default"));
        assert!(has_pair(&args, "-vf", "scale=1280:720"));
        assert!(has_pair(&args, "-b:v", "4000000"));
        assert!(has_pair(&args, "-b:a", "128000"));
        assert!(has_pair(&args, "-ar", "44100"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_args_without_audio() {
        let cfg = config(false, AudioSource::Both);
        let args = build_args(&cfg, &grab_args(":0", &metrics(), &cfg), Path::new("out.mp4"));
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"pulse".to_string()));
    }

    #[test]
    fn test_args_mix_both_sources() {
        let cfg = config(true, AudioSource::Both);
        let args = build_args(&cfg, &grab_args(":0", &metrics(), &cfg), Path::new("out.mp4"));
        assert_eq!(args.iter().filter(|a| *a == "pulse").count(), 2);
        assert!(has_pair(&args, "-map", "[aout]"));
    }

    #[test]
    fn test_show_touches_draws_pointer() {
        let mut cfg = config(false, AudioSource::Mic);
        cfg.show_touches = true;
        assert!(has_pair(&grab_args(":0", &metrics(), &cfg), "-draw_mouse", "1"));
    }

    #[test]
    fn test_start_requires_link() {
        let platform = FfmpegPlatform::new("ffmpeg", Some(":0".into())).with_metrics(metrics());
        let cfg = config(false, AudioSource::Mic);
        let mut encoder = platform.open_encoder(&cfg, Path::new("out.mp4")).unwrap();
        assert!(encoder.start().is_err());
    }

    fn recording_encoder(
        dir: &Path,
        output: &Path,
    ) -> (Box<dyn CaptureSource>, Box<dyn EncoderDevice>) {
        let ffmpeg = fake_ffmpeg(dir, FAKE_FFMPEG);
        let platform = FfmpegPlatform::new(&ffmpeg, Some(":0".into())).with_metrics(metrics());
        let cfg = config(false, AudioSource::Mic);

        let source = platform
            .acquire_source(CaptureAuthorization::for_tests(1), &cfg)
            .unwrap();
        let mut encoder = platform.open_encoder(&cfg, output).unwrap();
        encoder.link(source.as_ref()).unwrap();
        (source, encoder)
    }

    #[test]
    fn test_segment_is_forced_to_mp4() {
        let cfg = config(false, AudioSource::Mic);
        let args = build_args(&cfg, &grab_args(":0", &metrics(), &cfg), Path::new("a.mp4.part0"));
        assert_eq!(&args[args.len() - 3..], ["-f", "mp4", "a.mp4.part0"]);
    }

    #[test]
    fn test_concat_list_quotes_names() {
        let list = concat_list(&[
            PathBuf::from("/tmp/rec.mp4.part0"),
            PathBuf::from("/tmp/it's.mp4.part1"),
        ]);
        assert_eq!(list, "file 'rec.mp4.part0'\nfile 'it'\\''s.mp4.part1'\n");
    }

    #[test]
    fn test_subprocess_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recording_1.mp4");
        let (mut source, mut encoder) = recording_encoder(dir.path(), &output);

        encoder.start().unwrap();
        encoder.finalize().unwrap();
        encoder.unlink();
        encoder.release();
        source.release();

        assert_eq!(std::fs::read(&output).unwrap(), b"AB");
        assert!(!dir.path().join("recording_1.mp4.part0").exists());
    }

    #[test]
    fn test_pause_leaves_gap_out_of_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recording_1.mp4");
        let (mut source, mut encoder) = recording_encoder(dir.path(), &output);

        encoder.start().unwrap();
        encoder.pause().unwrap();
        // the first span is closed while paused
        let first = dir.path().join("recording_1.mp4.part0");
        assert_eq!(std::fs::read(&first).unwrap(), b"AB");
        assert!(encoder.pause().is_err());

        encoder.resume().unwrap();
        assert!(dir.path().join("recording_1.mp4.part1").exists());
        encoder.finalize().unwrap();
        encoder.unlink();
        encoder.release();
        source.release();

        assert_eq!(std::fs::read(&output).unwrap(), b"ABAB");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("recording_1.mp4."))
            .collect();
        assert!(leftovers.is_empty(), "left behind {leftovers:?}");
    }

    #[test]
    fn test_release_removes_unfinished_segments() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recording_1.mp4");
        let (mut source, mut encoder) = recording_encoder(dir.path(), &output);

        encoder.start().unwrap();
        encoder.pause().unwrap();
        encoder.resume().unwrap();
        encoder.release();
        source.release();

        assert!(!output.exists());
        assert!(!dir.path().join("recording_1.mp4.part0").exists());
        assert!(!dir.path().join("recording_1.mp4.part1").exists());
    }

    #[test]
    fn test_failed_finalize_reaps_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        // quits on request but reports failure
        let body = "echo 'muxer: broken' >&2\n\
                    for last; do :; done\n\
                    printf A > \"$last\"\n\
                    read _x\n\
                    exit 3\n";
        let ffmpeg = fake_ffmpeg(dir.path(), body);
        let platform = FfmpegPlatform::new(&ffmpeg, Some(":0".into())).with_metrics(metrics());
        let cfg = config(false, AudioSource::Mic);
        let source = platform
            .acquire_source(CaptureAuthorization::for_tests(1), &cfg)
            .unwrap();
        let mut encoder = platform
            .open_encoder(&cfg, &dir.path().join("out.mp4"))
            .unwrap();
        encoder.link(source.as_ref()).unwrap();

        encoder.start().unwrap();
        let err = encoder.finalize().unwrap_err();
        assert!(format!("{err:#}").contains("muxer: broken"));
        encoder.release();
        assert!(!dir.path().join("out.mp4.part0").exists());
    }

    #[test]
    fn test_early_exit_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), "echo 'x11grab: cannot open display' >&2\nexit 1\n");
        let platform = FfmpegPlatform::new(&ffmpeg, Some(":9".into())).with_metrics(metrics());
        let cfg = config(false, AudioSource::Mic);

        let source = platform
            .acquire_source(CaptureAuthorization::for_tests(1), &cfg)
            .unwrap();
        let mut encoder = platform
            .open_encoder(&cfg, &dir.path().join("out.mp4"))
            .unwrap();
        encoder.link(source.as_ref()).unwrap();

        let err = encoder.start().unwrap_err();
        assert!(format!("{err:#}").contains("cannot open display"));
    }
}
