use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::source::ffmpeg::FfmpegConfig;
use crate::domain::model::{ClassTable, DetectorParams, ModelId, StreamingParams};

/// Live trash detection over RTSP/camera streams with MJPEG re-streaming.
#[derive(Debug, Parser)]
#[command(name = "trash-watch", version)]
pub struct Cli {
    /// JSON config file; missing file means defaults
    #[arg(long, env = "TRASH_WATCH_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long `/start` waits for the source to open before answering.
    pub start_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 5001, start_grace_ms: 1_000 }
    }
}

impl ServerConfig {
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    #[serde(flatten)]
    pub detector: DetectorParams,
    /// Overrides the built-in COCO labels.
    pub class_names: Option<Vec<String>>,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/yolov8n.onnx".into(),
            detector: DetectorParams::default(),
            class_names: None,
            intra_threads: 4,
        }
    }
}

impl ModelConfig {
    pub fn model_id(&self) -> ModelId {
        let name = Path::new(&self.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        ModelId { name, onnx_path: self.path.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub ffmpeg_path: String,
    pub rtsp_transport: String,
    /// FourCC requested from local cameras.
    pub device_fourcc: String,
    /// Socket timeout passed to ffmpeg for network inputs; 0 disables it.
    pub io_timeout_ms: u64,
    /// How long opening a source may wait for its first frame.
    pub open_timeout_ms: u64,
    /// Silence after which a running source is reopened.
    pub stall_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            rtsp_transport: "tcp".into(),
            device_fourcc: "MJPG".into(),
            io_timeout_ms: 5_000,
            open_timeout_ms: 10_000,
            stall_timeout_ms: 10_000,
        }
    }
}

impl SourceConfig {
    pub fn ffmpeg(&self) -> FfmpegConfig {
        FfmpegConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            rtsp_transport: self.rtsp_transport.clone(),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            stall_timeout: Duration::from_millis(self.stall_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub font_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub streaming: StreamingParams,
    pub model: ModelConfig,
    pub classes: ClassTable,
    pub source: SourceConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// File (if present) then CLI/env overrides, validated.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = if cli.config.exists() {
            let raw = std::fs::read_to_string(&cli.config)
                .with_context(|| format!("reading {}", cli.config.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", cli.config.display()))?
        } else {
            tracing::info!(path = %cli.config.display(), "Config file not found; using defaults");
            AppConfig::default()
        };

        if let Some(host) = &cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.streaming;
        if s.fps == 0 {
            bail!("streaming.fps must be positive");
        }
        if s.max_width == 0 || s.max_height == 0 {
            bail!("streaming.max_width and streaming.max_height must be positive");
        }
        if !(1..=100).contains(&s.jpeg_quality) {
            bail!("streaming.jpeg_quality must be within 1..=100");
        }
        let d = &self.model.detector;
        for (name, value) in [("confidence_threshold", d.confidence_threshold), ("iou_threshold", d.iou_threshold)] {
            if !(0.0..=1.0).contains(&value) {
                bail!("model.{name} must be within [0, 1], got {value}");
            }
        }
        if d.input_size == 0 || d.max_detections == 0 {
            bail!("model.input_size and model.max_detections must be positive");
        }
        if self.source.open_timeout_ms == 0 || self.source.stall_timeout_ms == 0 {
            bail!("source.open_timeout_ms and source.stall_timeout_ms must be positive");
        }
        if self.server.host.trim().is_empty() {
            bail!("server.host must not be empty");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"server": {"port": 8080}, "model": {"path": "m.onnx", "confidence_threshold": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.path, "m.onnx");
        assert_eq!(config.model.detector.confidence_threshold, 0.5);
        assert_eq!(config.model.detector.iou_threshold, 0.45);
        assert_eq!(config.streaming.fps, 10);
        assert_eq!(config.classes.container.label, "Trash Bin");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.streaming.fps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.detector.iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streaming.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.source.stall_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_file_and_missing_file_uses_defaults() {
        let cli = Cli::parse_from(["trash-watch", "--config", "/nonexistent/config.json", "--port", "9000"]);
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.bind_addr().ends_with(":9000"));
    }

    #[test]
    fn source_section_maps_to_ffmpeg_timeouts() {
        let config: AppConfig =
            serde_json::from_str(r#"{"source": {"io_timeout_ms": 0, "stall_timeout_ms": 2500}}"#).unwrap();
        let ffmpeg = config.source.ffmpeg();
        assert!(ffmpeg.io_timeout.is_zero());
        assert_eq!(ffmpeg.open_timeout, Duration::from_secs(10));
        assert_eq!(ffmpeg.stall_timeout, Duration::from_millis(2500));
        assert_eq!(ffmpeg.rtsp_transport, "tcp");
    }

    #[test]
    fn model_id_uses_file_stem() {
        let model = ModelConfig { path: "models/yolov8s.onnx".into(), ..Default::default() };
        assert_eq!(model.model_id().name, "yolov8s");
    }
}
