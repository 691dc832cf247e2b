//! Network and file sources decoded by an `ffmpeg` child process that writes
//! binary PPM frames to its stdout.
//!
//! A reader thread pulls frames off the pipe into a small bounded queue, so
//! `read` waits at most [`READ_POLL`] and a stalled camera never pins the
//! ingestion loop. Killing the child closes the pipe, which ends the thread.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::codecs::pnm::PnmDecoder;
use image::error::{LimitError, LimitErrorKind};
use image::{DynamicImage, ImageDecoder, ImageError, ImageResult, RgbImage};
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::SourceKind;
use crate::application::ports::{FrameSource, ReadError};

const MAX_DIMENSION: u32 = 16_384;
/// Longest a single `read` blocks before reporting `Pending`.
const READ_POLL: Duration = Duration::from_millis(200);
const QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    /// `-rtsp_transport` for rtsp URIs; empty lets ffmpeg pick.
    pub rtsp_transport: String,
    /// Socket timeout handed to ffmpeg for network inputs. Zero disables it.
    pub io_timeout: Duration,
    /// How long `open` waits for the first frame.
    pub open_timeout: Duration,
    /// Silence after which a running source is treated as ended and reopened.
    pub stall_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            rtsp_transport: "tcp".into(),
            io_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(10),
        }
    }
}

enum PipeEvent {
    Frame(RgbImage),
    End,
    Broken(String),
}

pub struct FfmpegSource {
    child: Option<Child>,
    frames: Receiver<PipeEvent>,
    primed: Option<RgbImage>,
    last_frame: Instant,
    stall_timeout: Duration,
}

impl FfmpegSource {
    /// Spawns ffmpeg and waits for the first frame, so a dead URI fails here.
    pub fn open(cfg: &FfmpegConfig, uri: &str) -> Result<Self> {
        let mut child = command(cfg, uri)
            .spawn()
            .with_context(|| format!("spawning {}", cfg.ffmpeg_path))?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr);
        }
        let frames = match child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdout not captured"))
            .and_then(spawn_reader)
        {
            Ok(frames) => frames,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let mut source = Self {
            child: Some(child),
            frames,
            primed: None,
            last_frame: Instant::now(),
            stall_timeout: cfg.stall_timeout,
        };
        let first = source.frames.recv_timeout(cfg.open_timeout);
        match first {
            Ok(PipeEvent::Frame(frame)) => {
                debug!(width = frame.width(), height = frame.height(), "ffmpeg delivered first frame");
                source.primed = Some(frame);
                source.last_frame = Instant::now();
                Ok(source)
            }
            Ok(PipeEvent::End) | Err(RecvTimeoutError::Disconnected) => {
                source.close();
                Err(anyhow!("ffmpeg exited before producing a frame"))
            }
            Ok(PipeEvent::Broken(reason)) => {
                source.close();
                Err(anyhow!("reading first frame: {reason}"))
            }
            Err(RecvTimeoutError::Timeout) => {
                source.close();
                Err(anyhow!("no frame within {} ms", cfg.open_timeout.as_millis()))
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<RgbImage, ReadError> {
        if let Some(frame) = self.primed.take() {
            return Ok(frame);
        }
        if self.child.is_none() {
            return Err(ReadError::EndOfStream);
        }
        match self.frames.recv_timeout(READ_POLL.min(self.stall_timeout)) {
            Ok(PipeEvent::Frame(frame)) => {
                self.last_frame = Instant::now();
                Ok(frame)
            }
            Ok(PipeEvent::End) | Err(RecvTimeoutError::Disconnected) => Err(ReadError::EndOfStream),
            // a torn or garbled pipe cannot resynchronise; reopen instead
            Ok(PipeEvent::Broken(reason)) => {
                warn!(%reason, "ffmpeg frame stream broken");
                Err(ReadError::EndOfStream)
            }
            Err(RecvTimeoutError::Timeout) if self.last_frame.elapsed() >= self.stall_timeout => {
                warn!(silent_ms = self.last_frame.elapsed().as_millis() as u64, "ffmpeg source stalled");
                Err(ReadError::EndOfStream)
            }
            Err(RecvTimeoutError::Timeout) => Err(ReadError::Pending),
        }
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn command(cfg: &FfmpegConfig, uri: &str) -> Command {
    let mut cmd = Command::new(&cfg.ffmpeg_path);
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);

    // microseconds for both options
    let timeout = cfg.io_timeout.as_micros().to_string();
    match SourceKind::from_uri(uri) {
        SourceKind::Rtsp => {
            if !cfg.rtsp_transport.is_empty() {
                cmd.args(["-rtsp_transport", cfg.rtsp_transport.as_str()]);
            }
            if !cfg.io_timeout.is_zero() {
                cmd.args(["-timeout", timeout.as_str()]);
            }
        }
        SourceKind::Network if !cfg.io_timeout.is_zero() => {
            cmd.args(["-rw_timeout", timeout.as_str()]);
        }
        _ => {}
    }

    cmd.args(["-i", uri, "-an", "-f", "image2pipe", "-vcodec", "ppm", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn spawn_reader(stdout: ChildStdout) -> Result<Receiver<PipeEvent>> {
    let (tx, rx) = bounded(QUEUE_DEPTH);
    thread::Builder::new()
        .name("ffmpeg-frames".into())
        .spawn(move || pump_frames(BufReader::new(stdout), &tx))
        .context("starting ffmpeg frame reader")?;
    Ok(rx)
}

fn pump_frames<R: BufRead>(mut reader: R, tx: &Sender<PipeEvent>) {
    loop {
        let event = match read_ppm(&mut reader) {
            Ok(Some(frame)) => PipeEvent::Frame(frame),
            Ok(None) => PipeEvent::End,
            Err(e) => PipeEvent::Broken(e.to_string()),
        };
        let last = !matches!(event, PipeEvent::Frame(_));
        // a send error means the source was dropped
        if tx.send(event).is_err() || last {
            return;
        }
    }
}

fn drain_stderr(stderr: std::process::ChildStderr) {
    let spawned = thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                warn!(target: "trash_watch::ffmpeg", "{line}");
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Could not start ffmpeg stderr reader");
    }
}

/// Decodes the next PNM frame on the pipe. `Ok(None)` on a clean end of stream.
fn read_ppm<R: BufRead>(reader: &mut R) -> ImageResult<Option<RgbImage>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let decoder = PnmDecoder::new(&mut *reader)?;
    let (width, height) = decoder.dimensions();
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImageError::Limits(LimitError::from_kind(LimitErrorKind::DimensionError)));
    }
    Ok(Some(DynamicImage::from_decoder(decoder)?.into_rgb8()))
}
