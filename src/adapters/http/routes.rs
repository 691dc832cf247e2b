use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

use crate::adapters::http::{error::ApiError, state::HttpState};
use crate::application::dto::{
    ActiveResponse, HealthResponse, StartRequest, StartResponse, StatsListResponse, StopRequest, StopResponse,
};
use crate::domain::stream::StreamStats;

pub async fn health(State(st): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        service: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_stream_count: st.streams.active_count(),
    })
}

pub async fn start_stream(
    State(st): State<HttpState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(req) = payload?;
    let (stream_id, source_uri) = req.into_parts()?;
    let session = st.streams.start(&stream_id, &source_uri).await?;
    Ok(Json(StartResponse::for_stream(session.id)))
}

pub async fn stop_stream(
    State(st): State<HttpState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> Result<Json<StopResponse>, ApiError> {
    let Json(req) = payload?;
    let stopped = st.streams.stop(&req.into_stream_id()?)?;
    Ok(Json(StopResponse { stopped }))
}

pub async fn stream_stats(
    State(st): State<HttpState>,
    Path(stream_id): Path<String>,
) -> Result<Json<StreamStats>, ApiError> {
    Ok(Json(st.streams.stats(&stream_id)?))
}

pub async fn all_stats(State(st): State<HttpState>) -> Json<StatsListResponse> {
    let data = st.streams.all_stats();
    Json(StatsListResponse { count: data.len(), data })
}

pub async fn active_streams(State(st): State<HttpState>) -> Json<ActiveResponse> {
    let streams: Vec<_> = st.streams.list_active().into_iter().collect();
    Json(ActiveResponse { count: streams.len(), streams })
}
