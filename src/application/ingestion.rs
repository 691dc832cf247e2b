//! Per-stream ingestion loop.
//!
//! Each cycle reads one frame, downsizes it, runs the detector, keeps only
//! detections that map to a trash class, applies the overload heuristic,
//! draws the result, updates the stream's counters, publishes the frame and
//! sleeps off the rest of the frame interval. The loop runs on a blocking
//! thread and checks the session registry once per cycle.

use bytes::Bytes;
use chrono::Utc;
use image::RgbImage;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::application::{
    frame_cache::FrameCache,
    imaging,
    ports::{DetectorFactory, DetectorPort, FrameSource, FrameSourcePort, ReadError},
    registry::SessionRegistry,
    stats::StatsAggregator,
};
use crate::domain::{
    detection::{is_overloaded, ClassifiedDetection},
    errors::DomainResult,
    model::{DetectorParams, StreamingParams},
    session::{Epoch, StreamId, StreamSession},
    stream::{summarize_detections, FramePacket, FrameTally},
};

/// Longest uninterrupted sleep while backing off; bounds how late a stop is noticed.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

/// Shared per-stream state every loop, viewer and request handler goes through.
#[derive(Clone)]
pub struct StreamStores {
    pub registry: Arc<SessionRegistry>,
    pub frames: Arc<FrameCache>,
    pub stats: Arc<StatsAggregator>,
}

impl Default for StreamStores {
    fn default() -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            frames: Arc::new(FrameCache::new()),
            stats: Arc::new(StatsAggregator::new()),
        }
    }
}

impl StreamStores {
    /// Drops everything owned by `epoch`. Safe to call more than once.
    pub fn release(&self, id: &StreamId, epoch: Epoch) {
        self.registry.finish(id, epoch);
        self.frames.remove_epoch(id, epoch);
        self.stats.remove_epoch(id, epoch);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session was stopped or replaced.
    Stopped,
    /// The source could not be opened; the session was removed.
    SourceUnavailable,
}

pub struct IngestionLoop {
    id: StreamId,
    epoch: Epoch,
    source_uri: String,
    stores: StreamStores,
    sources: Arc<dyn FrameSourcePort>,
    detectors: Arc<dyn DetectorFactory>,
    detector_params: DetectorParams,
    streaming: StreamingParams,
}

impl IngestionLoop {
    pub fn new(
        session: &StreamSession,
        stores: StreamStores,
        sources: Arc<dyn FrameSourcePort>,
        detectors: Arc<dyn DetectorFactory>,
        detector_params: DetectorParams,
        streaming: StreamingParams,
    ) -> Self {
        Self {
            id: session.id.clone(),
            epoch: session.epoch,
            source_uri: session.source_uri.clone(),
            stores,
            sources,
            detectors,
            detector_params,
            streaming,
        }
    }

    /// Runs until the session stops. `opened` receives whether the source opened.
    pub fn run(self, opened: oneshot::Sender<bool>) -> DomainResult<LoopExit> {
        let mut detector = match self.detectors.create() {
            Ok(detector) => detector,
            Err(e) => {
                self.stores.release(&self.id, self.epoch);
                let _ = opened.send(false);
                return Err(e);
            }
        };

        let mut source = match self.sources.open(&self.source_uri) {
            Ok(source) => source,
            Err(e) => {
                error!(stream_id = %self.id, uri = %self.source_uri, error = %e, "Failed to open source; dropping session");
                self.stores.release(&self.id, self.epoch);
                let _ = opened.send(false);
                return Ok(LoopExit::SourceUnavailable);
            }
        };

        self.stores.frames.open(&self.id, self.epoch);
        if !self.stores.registry.mark_running(&self.id, self.epoch) {
            // stopped while the source was opening
            source.close();
            self.stores.release(&self.id, self.epoch);
            let _ = opened.send(true);
            return Ok(LoopExit::Stopped);
        }
        // counters only appear while the session is confirmed current
        self.stores.stats.begin(&self.id, self.epoch, || self.is_current());
        let _ = opened.send(true);
        info!(stream_id = %self.id, epoch = self.epoch, uri = %self.source_uri, "Ingestion started");

        let exit = self.cycle(source, detector.as_mut());
        self.stores.release(&self.id, self.epoch);
        info!(stream_id = %self.id, epoch = self.epoch, "Ingestion stopped");
        Ok(exit)
    }

    fn cycle(&self, source: Box<dyn FrameSource>, detector: &mut dyn DetectorPort) -> LoopExit {
        let interval = self.streaming.frame_interval();
        let mut source = Some(source);
        let mut backoff = self.streaming.read_retry();
        let mut sequence = 0u64;

        while self.is_current() {
            let started = Instant::now();

            if source.is_none() {
                source = self.reconnect(&mut backoff);
                continue;
            }
            let read = match source.as_mut() {
                Some(s) => s.read(),
                None => continue,
            };

            match read {
                Ok(frame) => {
                    sequence += 1;
                    if let Err(e) = self.process(frame, sequence, detector) {
                        warn!(stream_id = %self.id, error = %e, "Frame dropped");
                    }
                }
                Err(ReadError::Failed(reason)) => {
                    warn!(stream_id = %self.id, %reason, "Failed to read frame");
                    self.sleep_while_current(self.streaming.read_retry());
                    continue;
                }
                // loop around to re-check the registry
                Err(ReadError::Pending) => continue,
                Err(ReadError::EndOfStream) => {
                    warn!(stream_id = %self.id, "Source ended; reconnecting");
                    if let Some(mut ended) = source.take() {
                        ended.close();
                    }
                    continue;
                }
            }

            pace(started, interval);
        }

        if let Some(mut s) = source {
            s.close();
        }
        LoopExit::Stopped
    }

    fn process(&self, frame: RgbImage, sequence: u64, detector: &mut dyn DetectorPort) -> DomainResult<FrameTally> {
        let captured_at = Utc::now();
        let mut frame = imaging::downscale_to_fit(frame, self.streaming.max_width, self.streaming.max_height);

        let detections: Vec<ClassifiedDetection> = detector
            .detect(&frame, &self.detector_params)?
            .into_iter()
            .filter_map(|detection| {
                detector
                    .classify(&detection.label)
                    .map(|class| ClassifiedDetection { detection, class })
            })
            .collect();

        let overload = is_overloaded(&detections, frame.height());
        detector.annotate(&mut frame, &detections, overload);
        let tally = FrameTally::from_detections(&detections, overload);
        let jpeg = imaging::encode_jpeg(&frame, self.streaming.jpeg_quality)?;

        self.stores.stats.record(&self.id, self.epoch, &tally, Utc::now());
        if overload {
            debug!(stream_id = %self.id, sequence, "Overload detected");
        }
        if !detections.is_empty() {
            trace!(stream_id = %self.id, sequence, summary = %summarize_detections(&detections), "Detections");
        }

        self.stores.frames.publish(
            &self.id,
            self.epoch,
            FramePacket {
                epoch: self.epoch,
                sequence,
                captured_at,
                width: frame.width(),
                height: frame.height(),
                jpeg: Bytes::from(jpeg),
                tally,
                detections,
            },
        );
        Ok(tally)
    }

    fn reconnect(&self, backoff: &mut Duration) -> Option<Box<dyn FrameSource>> {
        self.sleep_while_current(*backoff);
        if !self.is_current() {
            return None;
        }
        match self.sources.open(&self.source_uri) {
            Ok(source) => {
                info!(stream_id = %self.id, "Source reconnected");
                *backoff = self.streaming.read_retry();
                Some(source)
            }
            Err(e) => {
                *backoff = (*backoff * 2).min(self.streaming.reconnect_max_backoff());
                warn!(stream_id = %self.id, error = %e, retry_in_ms = backoff.as_millis() as u64, "Reconnect failed");
                None
            }
        }
    }

    fn is_current(&self) -> bool {
        self.stores.registry.is_current(&self.id, self.epoch)
    }

    fn sleep_while_current(&self, total: Duration) {
        let deadline = Instant::now() + total;
        loop {
            let now = Instant::now();
            if now >= deadline || !self.is_current() {
                return;
            }
            thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
        }
    }
}

/// Sleeps off whatever is left of `interval` since `started`.
fn pace(started: Instant, interval: Duration) {
    if let Some(remaining) = interval.checked_sub(started.elapsed()) {
        thread::sleep(remaining);
    }
}
