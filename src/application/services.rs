use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    application::{
        ingestion::{IngestionLoop, LoopExit, StreamStores},
        multiplexer,
        ports::{DetectorFactory, FrameSourcePort},
    },
    domain::{
        errors::{DomainError, DomainResult},
        model::{DetectorParams, StreamingParams},
        session::{Epoch, StreamId, StreamSession},
        stream::{FramePacket, StreamStats},
    },
};

/// Session service: starts and stops ingestion loops and exposes the shared
/// state (frames, stats) to the HTTP layer.
#[derive(Clone)]
pub struct StreamService {
    stores: StreamStores,
    sources: Arc<dyn FrameSourcePort>,
    detectors: Arc<dyn DetectorFactory>,
    detector_params: DetectorParams,
    streaming: StreamingParams,
    start_grace: Duration,
}

impl StreamService {
    pub fn new(
        sources: Arc<dyn FrameSourcePort>,
        detectors: Arc<dyn DetectorFactory>,
        detector_params: DetectorParams,
        streaming: StreamingParams,
        start_grace: Duration,
    ) -> Self {
        Self {
            stores: StreamStores::default(),
            sources,
            detectors,
            detector_params,
            streaming,
            start_grace,
        }
    }

    /// Registers the session and spawns its loop. Waits at most the grace
    /// period for the source to open, then returns either way.
    pub async fn start(&self, stream_id: &str, source_uri: &str) -> DomainResult<StreamSession> {
        let id = StreamId::parse(stream_id)?;
        let source_uri = source_uri.trim();
        if source_uri.is_empty() {
            return Err(DomainError::InvalidInput("sourceURI must not be empty".into()));
        }

        let session = self.stores.registry.start(&id, source_uri)?;
        info!(stream_id = %id, epoch = session.epoch, uri = %source_uri, "Session registered");

        let (opened_tx, opened_rx) = oneshot::channel();
        let ingestion = IngestionLoop::new(
            &session,
            self.stores.clone(),
            self.sources.clone(),
            self.detectors.clone(),
            self.detector_params.clone(),
            self.streaming.clone(),
        );
        let handle = tokio::task::spawn_blocking(move || ingestion.run(opened_tx));
        tokio::spawn(supervise(id.clone(), session.epoch, self.stores.clone(), handle));

        match tokio::time::timeout(self.start_grace, opened_rx).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Ok(Err(_)) => {
                warn!(stream_id = %id, "Source did not open; session will not become active")
            }
            Err(_) => info!(stream_id = %id, "Source still opening after grace period"),
        }
        Ok(session)
    }

    /// Flags the session for teardown and drops its stats and frame right away.
    /// The loop exits on its next cycle.
    pub fn stop(&self, stream_id: &str) -> DomainResult<bool> {
        let id = StreamId::parse(stream_id)?;
        let Some(session) = self.stores.registry.stop(&id) else {
            return Ok(false);
        };
        self.stores.stats.remove_epoch(&id, session.epoch);
        self.stores.frames.remove_epoch(&id, session.epoch);
        let uptime_s = (Utc::now() - session.created_at).num_seconds();
        info!(stream_id = %id, epoch = session.epoch, uptime_s, "Session stopping");
        Ok(true)
    }

    pub fn list_active(&self) -> BTreeSet<StreamId> {
        self.stores.registry.list_active()
    }

    pub fn active_count(&self) -> usize {
        self.stores.registry.active_count()
    }

    pub fn stats(&self, stream_id: &str) -> DomainResult<StreamStats> {
        // a malformed id cannot name a stream, so it is simply not found
        StreamId::parse(stream_id)
            .ok()
            .and_then(|id| self.stores.stats.get(&id))
            .ok_or_else(|| DomainError::NotFound(format!("no stats for stream '{stream_id}'")))
    }

    pub fn all_stats(&self) -> BTreeMap<StreamId, StreamStats> {
        self.stores.stats.get_all()
    }

    /// Multipart parts for a new viewer of an active session.
    pub fn viewer(&self, stream_id: &str) -> DomainResult<impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static> {
        let session = self.active_session(stream_id)?;
        Ok(multiplexer::viewer_stream(
            session.id,
            session.epoch,
            self.stores.clone(),
            self.streaming.viewer_poll(),
        ))
    }

    /// Latest frame of an active session; `None` until the first one is published.
    pub fn snapshot(&self, stream_id: &str) -> DomainResult<Option<Arc<FramePacket>>> {
        let session = self.active_session(stream_id)?;
        Ok(self
            .stores
            .frames
            .read_latest(&session.id)
            .filter(|packet| packet.epoch == session.epoch))
    }

    /// Stops every active session.
    pub fn shutdown(&self) -> usize {
        let ids = self.stores.registry.list_active();
        let stopped = ids
            .iter()
            .filter(|id| self.stop(id.as_str()).unwrap_or(false))
            .count();
        info!(stopped, "All sessions stopped");
        stopped
    }

    fn active_session(&self, stream_id: &str) -> DomainResult<StreamSession> {
        // unknown and malformed ids are both simply not active streams
        StreamId::parse(stream_id)
            .ok()
            .and_then(|id| self.stores.registry.get(&id))
            .filter(StreamSession::is_active)
            .ok_or_else(|| DomainError::NotFound(format!("stream '{stream_id}' is not active")))
    }
}

/// Awaits a loop and cleans up after it however it ended.
async fn supervise(id: StreamId, epoch: Epoch, stores: StreamStores, handle: JoinHandle<DomainResult<LoopExit>>) {
    match handle.await {
        Ok(Ok(LoopExit::Stopped)) => info!(stream_id = %id, epoch, "Ingestion loop exited"),
        Ok(Ok(LoopExit::SourceUnavailable)) => {
            warn!(stream_id = %id, epoch, "Ingestion loop exited: source unavailable")
        }
        Ok(Err(e)) => error!(stream_id = %id, epoch, error = %e, "Ingestion loop failed"),
        Err(e) if e.is_panic() => error!(stream_id = %id, epoch, "Ingestion loop panicked"),
        Err(e) => error!(stream_id = %id, epoch, error = %e, "Ingestion loop cancelled"),
    }
    stores.release(&id, epoch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{fast_streaming, wait_until, StubDetectors, StubSources};
    use futures::StreamExt;

    const WAIT: Duration = Duration::from_secs(5);

    fn active(svc: &StreamService, id: &str) -> bool {
        svc.list_active().iter().any(|active| active.as_str() == id)
    }

    fn service(sources: StubSources) -> StreamService {
        StreamService::new(
            Arc::new(sources),
            Arc::new(StubDetectors::empty()),
            DetectorParams::default(),
            fast_streaming(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_start_is_rejected_and_one_session_remains() {
        let svc = service(StubSources::unlimited());
        svc.start("camA", "rtsp://x").await.unwrap();
        let err = svc.start("camA", "rtsp://x").await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyActive(_)));
        assert_eq!(svc.active_count(), 1);
        svc.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ten_frames_without_detections() {
        let svc = service(StubSources::new(10));
        svc.start("camA", "rtsp://x").await.unwrap();

        assert!(wait_until(WAIT, || svc.stats("camA").is_ok_and(|s| s.frames_processed == 10)).await);
        let stats = svc.stats("camA").unwrap();
        assert_eq!(stats.detections.container, 0);
        assert_eq!(stats.detections.scattered_trash, 0);
        assert_eq!(stats.detections.overload, 0);
        svc.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_visible_immediately() {
        let svc = service(StubSources::unlimited());
        svc.start("camA", "rtsp://x").await.unwrap();
        assert!(wait_until(WAIT, || svc.stats("camA").is_ok_and(|s| s.frames_processed > 0)).await);

        assert!(svc.stop("camA").unwrap());
        assert!(!active(&svc, "camA"));
        assert!(matches!(svc.stats("camA"), Err(DomainError::NotFound(_))));
        assert!(svc.all_stats().is_empty());
        assert!(!svc.stop("camA").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_of_unknown_stream_is_not_an_error() {
        let svc = service(StubSources::unlimited());
        assert!(!svc.stop("never-started").unwrap());
        assert!(matches!(svc.stop(""), Err(DomainError::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_ids_are_not_found_like_unknown_ones() {
        let svc = service(StubSources::unlimited());
        assert!(matches!(svc.stats("a/b"), Err(DomainError::NotFound(_))));
        assert!(matches!(svc.stats("camZ"), Err(DomainError::NotFound(_))));
        assert!(matches!(svc.snapshot("a/b"), Err(DomainError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_after_stop_gets_fresh_counters() {
        let svc = service(StubSources::unlimited());
        svc.start("camA", "rtsp://x").await.unwrap();
        assert!(wait_until(WAIT, || svc.stats("camA").is_ok_and(|s| s.frames_processed >= 5)).await);
        svc.stop("camA").unwrap();

        let second = svc.start("camA", "rtsp://x").await.unwrap();
        let fresh = svc.stats("camA").unwrap();
        assert!(fresh.frames_processed < 5);
        assert!(wait_until(WAIT, || svc.stats("camA").is_ok_and(|s| s.frames_processed >= 3)).await);
        // the old loop's teardown must not remove the new session
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(svc.stores.registry.get(&second.id).unwrap().epoch, second.epoch);
        assert!(active(&svc, "camA"));
        svc.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_source_never_becomes_active() {
        let svc = service(StubSources::new(0).failing_open());
        let session = svc.start("camB", "rtsp://nowhere").await.unwrap();
        assert_eq!(session.id.as_str(), "camB");
        assert!(wait_until(WAIT, || !active(&svc, "camB")).await);
        assert!(matches!(svc.stats("camB"), Err(DomainError::NotFound(_))));
        assert!(svc.viewer("camB").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn viewer_requires_active_session_and_streams_frames() {
        let svc = service(StubSources::unlimited());
        assert!(matches!(svc.viewer("unknownId"), Err(DomainError::NotFound(_))));
        assert!(svc.list_active().is_empty());

        svc.start("camA", "rtsp://x").await.unwrap();
        let mut viewer = Box::pin(svc.viewer("camA").unwrap());
        let part = tokio::time::timeout(WAIT, viewer.next()).await.unwrap().unwrap().unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));

        svc.stop("camA").unwrap();
        let end = tokio::time::timeout(WAIT, async {
            while viewer.next().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshot_returns_latest_frame() {
        let svc = service(StubSources::unlimited());
        assert!(svc.snapshot("camA").is_err());
        svc.start("camA", "rtsp://x").await.unwrap();
        assert!(wait_until(WAIT, || matches!(svc.snapshot("camA"), Ok(Some(_)))).await);
        let packet = svc.snapshot("camA").unwrap().unwrap();
        assert_eq!(&packet.jpeg[..2], &[0xFF, 0xD8]);
        svc.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streams_are_independent() {
        let svc = StreamService::new(
            Arc::new(StubSources::unlimited()),
            Arc::new(StubDetectors::empty()),
            DetectorParams::default(),
            fast_streaming(),
            Duration::from_millis(500),
        );
        svc.start("camA", "rtsp://a").await.unwrap();
        svc.start("camB", "rtsp://b").await.unwrap();
        assert_eq!(svc.list_active().len(), 2);

        svc.stop("camA").unwrap();
        let before = svc.stats("camB").map(|s| s.frames_processed).unwrap_or(0);
        assert!(wait_until(WAIT, || svc.stats("camB").is_ok_and(|s| s.frames_processed > before)).await);
        assert_eq!(svc.shutdown(), 1);
    }
}
