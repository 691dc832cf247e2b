use std::sync::Arc;

use crate::application::services::StreamService;

/// Shared state for the Axum handlers. Holds the application services, never
/// the adapters behind them.
#[derive(Clone)]
pub struct HttpState {
    /// Ingestion sessions: start, stop, stats and viewers.
    pub streams: Arc<StreamService>,
}
