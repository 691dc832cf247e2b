use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

use crate::domain::{
    detection::{ClassifiedDetection, Detection, TrashClass},
    errors::DomainResult,
    model::{DetectorParams, ModelId},
};

#[async_trait]
pub trait ModelCatalogPort: Send + Sync {
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()>;
    async fn load_model(&self, model: &ModelId) -> DomainResult<Vec<u8>>;
}

/// Object detector owned by a single ingestion loop. Calls block (CPU/GPU bound).
pub trait DetectorPort: Send {
    fn detect(&mut self, frame: &RgbImage, params: &DetectorParams) -> DomainResult<Vec<Detection>>;
    fn classify(&self, label: &str) -> Option<TrashClass>;
    fn annotate(&self, frame: &mut RgbImage, detections: &[ClassifiedDetection], overload: bool);
}

/// Builds one detector per ingestion loop.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> DomainResult<Box<dyn DetectorPort>>;
}

#[derive(Debug, Error)]
pub enum ReadError {
    /// The source will not produce more frames without being reopened.
    #[error("end of stream")]
    EndOfStream,
    #[error("frame read failed: {0}")]
    Failed(String),
    /// Nothing arrived within the source's poll window; the source is still open.
    #[error("no frame yet")]
    Pending,
}

/// An open video source. Reads block until a frame is available or the
/// source's poll window passes.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<RgbImage, ReadError>;
    fn close(&mut self);
}

pub trait FrameSourcePort: Send + Sync {
    fn open(&self, uri: &str) -> DomainResult<Box<dyn FrameSource>>;
}
