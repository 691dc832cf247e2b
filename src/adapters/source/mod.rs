pub mod ffmpeg;

use tracing::info;

#[cfg(feature = "v4l2")]
use crate::adapters::v4l2::capture::{CaptureConfig, V4l2Source};
use crate::application::ports::{FrameSource, FrameSourcePort};
use crate::domain::errors::{DomainError, DomainResult};
use ffmpeg::{FfmpegConfig, FfmpegSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Rtsp,
    /// http(s), udp, rtmp and similar network inputs.
    Network,
    /// Local V4L2 device such as `/dev/video0`.
    Device,
    File,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if ["http://", "https://", "udp://", "tcp://", "rtmp://", "srt://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            SourceKind::Network
        } else if lower.starts_with("/dev/video") || lower.starts_with("v4l2://") {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

/// Device settings requested when opening a V4L2 camera.
#[derive(Debug, Clone)]
pub struct DeviceDefaults {
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Opens a frame source for any supported URI.
pub struct UriFrameSources {
    ffmpeg: FfmpegConfig,
    #[cfg_attr(not(feature = "v4l2"), allow(dead_code))]
    device: DeviceDefaults,
}

impl UriFrameSources {
    pub fn new(ffmpeg: FfmpegConfig, device: DeviceDefaults) -> Self {
        Self { ffmpeg, device }
    }

    #[cfg(feature = "v4l2")]
    fn open_device(&self, uri: &str) -> DomainResult<Box<dyn FrameSource>> {
        let cfg = CaptureConfig {
            camera_path: uri.trim_start_matches("v4l2://").to_string(),
            fourcc: self.device.fourcc.clone(),
            width: self.device.width,
            height: self.device.height,
            fps: self.device.fps,
        };
        let source = V4l2Source::open(&cfg).map_err(|e| DomainError::SourceUnavailable(format!("{uri}: {e:#}")))?;
        Ok(Box::new(source))
    }

    #[cfg(not(feature = "v4l2"))]
    fn open_device(&self, uri: &str) -> DomainResult<Box<dyn FrameSource>> {
        Err(DomainError::SourceUnavailable(format!("{uri}: built without v4l2 support")))
    }
}

impl FrameSourcePort for UriFrameSources {
    fn open(&self, uri: &str) -> DomainResult<Box<dyn FrameSource>> {
        let kind = SourceKind::from_uri(uri);
        info!(?kind, "Opening source");
        match kind {
            SourceKind::Device => self.open_device(uri),
            SourceKind::Rtsp | SourceKind::Network | SourceKind::File => {
                let source = FfmpegSource::open(&self.ffmpeg, uri)
                    .map_err(|e| DomainError::SourceUnavailable(format!("{uri}: {e:#}")))?;
                Ok(Box::new(source))
            }
        }
    }
}
