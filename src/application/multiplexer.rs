//! Fans one stream's latest frame out to any number of viewers as
//! `multipart/x-mixed-replace` parts. Each viewer polls the cache on its own
//! schedule; nothing is buffered per viewer, so slow viewers just skip frames.

use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

use crate::application::ingestion::StreamStores;
use crate::domain::{
    session::{Epoch, StreamId},
    stream::FramePacket,
};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part carrying a JPEG frame.
pub fn encode_part(packet: &FramePacket) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Sequence: {}\r\n\r\n",
        packet.jpeg.len(),
        packet.sequence
    );
    let mut part = BytesMut::with_capacity(header.len() + packet.jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&packet.jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct ViewerGuard {
    id: StreamId,
    sent: u64,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        debug!(stream_id = %self.id, frames_sent = self.sent, "Viewer detached");
    }
}

/// Parts for one viewer of session `(id, epoch)`. Ends once the session is no
/// longer current; dropping the stream (client gone) ends it too.
pub fn viewer_stream(
    id: StreamId,
    epoch: Epoch,
    stores: StreamStores,
    poll: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream! {
        let mut guard = ViewerGuard { id: id.clone(), sent: 0 };
        let mut last_sequence = 0u64;
        debug!(stream_id = %id, epoch, "Viewer attached");

        while stores.registry.is_current(&id, epoch) {
            if let Some(packet) = stores.frames.read_latest(&id) {
                if packet.epoch == epoch && packet.sequence > last_sequence {
                    last_sequence = packet.sequence;
                    guard.sent += 1;
                    yield Ok(encode_part(&packet));
                }
            }
            tokio::time::sleep(poll).await;
        }
        debug!(stream_id = %guard.id, "Session ended; closing viewer");
    }
}
