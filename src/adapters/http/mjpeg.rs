use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::adapters::http::{error::ApiError, state::HttpState};
use crate::application::multiplexer;
use crate::domain::stream::summarize_detections;

/// Continuous multipart stream of annotated frames. 404 unless the stream is active.
pub async fn stream_frames(
    State(st): State<HttpState>,
    Path(stream_id): Path<String>,
) -> Result<Response, ApiError> {
    let parts = st.streams.viewer(&stream_id)?;
    Ok((
        [
            (header::CONTENT_TYPE, multiplexer::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

/// Latest annotated frame as a single JPEG; 204 until the first frame exists.
pub async fn latest_frame(
    State(st): State<HttpState>,
    Path(stream_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(packet) = st.streams.snapshot(&stream_id)? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-sequence", HeaderValue::from(packet.sequence));
    headers.insert("x-detections", HeaderValue::from(packet.tally.total));
    headers.insert("x-frame-width", HeaderValue::from(packet.width));
    headers.insert("x-frame-height", HeaderValue::from(packet.height));
    if let Ok(captured_at) = HeaderValue::from_str(&packet.captured_at.to_rfc3339()) {
        headers.insert("x-captured-at", captured_at);
    }
    if !packet.detections.is_empty() {
        if let Ok(summary) = HeaderValue::from_str(&summarize_detections(&packet.detections)) {
            headers.insert("x-detection-summary", summary);
        }
    }
    Ok((headers, packet.jpeg.clone()).into_response())
}
