pub mod error;
pub mod mjpeg;
pub mod routes;
pub mod state;

use axum::{routing::{get, post}, Router};
use crate::adapters::http::state::HttpState;

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/start", post(routes::start_stream))
        .route("/stop", post(routes::stop_stream))
        .route("/stats", get(routes::all_stats))
        .route("/stats/:id", get(routes::stream_stats))
        .route("/active", get(routes::active_streams))
        .route("/stream/:id", get(mjpeg::stream_frames))
        .route("/frame/:id", get(mjpeg::latest_frame))
        .with_state(state)
}
