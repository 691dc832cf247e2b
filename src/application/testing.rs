//! In-memory sources and detectors for exercising the engine without video or models.

use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::ports::{DetectorFactory, DetectorPort, FrameSource, FrameSourcePort, ReadError};
use crate::domain::{
    detection::{ClassifiedDetection, Detection, TrashClass},
    errors::{DomainError, DomainResult},
    model::{ClassTable, DetectorParams, StreamingParams},
};

pub(crate) fn detection(label: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection { x1, y1, x2, y2, score: 0.9, class_id: 0, label: label.into() }
}

/// Fast cadence so tests finish quickly.
pub(crate) fn fast_streaming() -> StreamingParams {
    StreamingParams {
        fps: 200,
        max_width: 1280,
        max_height: 720,
        jpeg_quality: 70,
        viewer_poll_ms: 5,
        read_retry_ms: 5,
        reconnect_max_backoff_ms: 20,
    }
}

#[derive(Clone, Copy)]
enum AfterScript {
    Fail,
    End,
    Stall,
}

/// Hands out sources that yield `frames` solid frames, then fail, end or stall forever.
pub(crate) struct StubSources {
    frames: usize,
    width: u32,
    height: u32,
    after: AfterScript,
    fail_open: bool,
    opens: AtomicUsize,
}

impl StubSources {
    pub(crate) fn new(frames: usize) -> Self {
        Self {
            frames,
            width: 64,
            height: 48,
            after: AfterScript::Fail,
            fail_open: false,
            opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub(crate) fn sized(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub(crate) fn ending(mut self) -> Self {
        self.after = AfterScript::End;
        self
    }

    /// After the scripted frames, every read waits briefly and reports `Pending`.
    pub(crate) fn stalling(mut self) -> Self {
        self.after = AfterScript::Stall;
        self
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct StubSource {
    remaining: usize,
    width: u32,
    height: u32,
    after: AfterScript,
}

impl FrameSource for StubSource {
    fn read(&mut self) -> Result<RgbImage, ReadError> {
        if self.remaining == 0 {
            return Err(match self.after {
                AfterScript::Fail => ReadError::Failed("scripted failure".into()),
                AfterScript::End => ReadError::EndOfStream,
                AfterScript::Stall => {
                    std::thread::sleep(Duration::from_millis(20));
                    ReadError::Pending
                }
            });
        }
        self.remaining -= 1;
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb([40, 40, 40])))
    }

    fn close(&mut self) {}
}

impl FrameSourcePort for StubSources {
    fn open(&self, uri: &str) -> DomainResult<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(DomainError::SourceUnavailable(uri.to_string()));
        }
        Ok(Box::new(StubSource {
            remaining: self.frames,
            width: self.width,
            height: self.height,
            after: self.after,
        }))
    }
}

/// Returns the same scripted detections for every frame.
pub(crate) struct StubDetectors {
    detections: Vec<Detection>,
    classes: Arc<ClassTable>,
}

impl StubDetectors {
    pub(crate) fn new(detections: Vec<Detection>) -> Self {
        Self { detections, classes: Arc::new(ClassTable::default()) }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new())
    }
}

struct StubDetector {
    detections: Vec<Detection>,
    classes: Arc<ClassTable>,
}

impl DetectorPort for StubDetector {
    fn detect(&mut self, _frame: &RgbImage, _params: &DetectorParams) -> DomainResult<Vec<Detection>> {
        Ok(self.detections.clone())
    }

    fn classify(&self, label: &str) -> Option<TrashClass> {
        self.classes.classify(label)
    }

    fn annotate(&self, frame: &mut RgbImage, detections: &[ClassifiedDetection], overload: bool) {
        // mark the top-left pixel so tests can tell annotation ran
        let level = (detections.len() as u8).saturating_mul(10).saturating_add(u8::from(overload));
        frame.put_pixel(0, 0, Rgb([level, level, level]));
    }
}

impl DetectorFactory for StubDetectors {
    fn create(&self) -> DomainResult<Box<dyn DetectorPort>> {
        Ok(Box::new(StubDetector {
            detections: self.detections.clone(),
            classes: self.classes.clone(),
        }))
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Async flavour of [`wait_for`] for tests running on a tokio runtime.
pub(crate) async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
