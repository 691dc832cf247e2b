use image::RgbImage;
use std::sync::Arc;

use crate::adapters::onnx::yolo_engine::OnnxYoloEngine;
use crate::adapters::render::annotator::Annotator;
use crate::application::ports::{DetectorFactory, DetectorPort};
use crate::domain::{
    detection::{ClassifiedDetection, Detection, TrashClass},
    errors::{DomainError, DomainResult},
    model::DetectorParams,
};

/// Builds one ONNX session per ingestion loop from model bytes loaded once at startup.
pub struct OnnxDetectorFactory {
    model_bytes: Arc<Vec<u8>>,
    intra_threads: usize,
    class_names: Arc<Vec<String>>,
    annotator: Arc<Annotator>,
}

impl OnnxDetectorFactory {
    pub fn new(
        model_bytes: Vec<u8>,
        intra_threads: usize,
        class_names: Vec<String>,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            model_bytes: Arc::new(model_bytes),
            intra_threads,
            class_names: Arc::new(class_names),
            annotator,
        }
    }
}

impl DetectorFactory for OnnxDetectorFactory {
    fn create(&self) -> DomainResult<Box<dyn DetectorPort>> {
        let engine = OnnxYoloEngine::from_bytes(&self.model_bytes, self.intra_threads, self.class_names.clone())
            .map_err(|e| DomainError::Detector(format!("creating ONNX session: {e:#}")))?;
        Ok(Box::new(OnnxDetector { engine, annotator: self.annotator.clone() }))
    }
}

pub struct OnnxDetector {
    engine: OnnxYoloEngine,
    annotator: Arc<Annotator>,
}

impl DetectorPort for OnnxDetector {
    fn detect(&mut self, frame: &RgbImage, params: &DetectorParams) -> DomainResult<Vec<Detection>> {
        self.engine
            .infer(frame, params)
            .map_err(|e| DomainError::Detector(format!("{e:#}")))
    }

    fn classify(&self, label: &str) -> Option<TrashClass> {
        self.annotator.classes().classify(label)
    }

    fn annotate(&self, frame: &mut RgbImage, detections: &[ClassifiedDetection], overload: bool) {
        self.annotator.draw(frame, detections, overload);
    }
}
