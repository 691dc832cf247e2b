mod adapters;
mod application;
mod config;
mod domain;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::adapters::{
    http::{router, state::HttpState},
    source::{DeviceDefaults, UriFrameSources},
};
use crate::application::{
    ports::{DetectorFactory, FrameSourcePort},
    services::StreamService,
};
use crate::config::{AppConfig, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging (RUST_LOG, or trash_watch=info by default)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trash_watch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;
    tracing::info!("Starting trash-watch v{}", env!("CARGO_PKG_VERSION"));

    // 2. Adapters (infrastructure layer)
    let sources: Arc<dyn FrameSourcePort> = Arc::new(UriFrameSources::new(
        config.source.ffmpeg(),
        DeviceDefaults {
            fourcc: config.source.device_fourcc.clone(),
            width: config.streaming.max_width,
            height: config.streaming.max_height,
            fps: config.streaming.fps,
        },
    ));
    let detectors = build_detectors(&config).await?;

    // 3. Services (application layer)
    let streams = Arc::new(StreamService::new(
        sources,
        detectors,
        config.model.detector.clone(),
        config.streaming.clone(),
        config.server.start_grace(),
    ));

    // 4. Axum router
    let app = router(HttpState { streams: streams.clone() })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // 5. Serve
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Server listening on http://{}", addr);

    // viewer streams only end once their sessions stop, so stop them first
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            streams.shutdown();
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(feature = "onnx")]
async fn build_detectors(config: &AppConfig) -> anyhow::Result<Arc<dyn DetectorFactory>> {
    use crate::adapters::{
        onnx::{detector::OnnxDetectorFactory, model_catalog::OnnxModelCatalog, yolo_engine::coco_class_names},
        render::annotator::Annotator,
    };
    use crate::application::ports::ModelCatalogPort;

    let model = config.model.model_id();
    let model_bytes = OnnxModelCatalog::new()
        .load_model(&model)
        .await
        .with_context(|| format!("loading model {}", model.onnx_path))?;

    let annotator = Arc::new(Annotator::load(
        Arc::new(config.classes.clone()),
        config.render.font_path.as_deref(),
    ));
    let class_names = config.model.class_names.clone().unwrap_or_else(coco_class_names);

    // fail at startup rather than on the first stream
    let factory = OnnxDetectorFactory::new(model_bytes, config.model.intra_threads, class_names, annotator);
    factory.create().context("building ONNX session")?;
    tracing::info!(model = %model.name, "Detector ready");
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "onnx"))]
async fn build_detectors(_config: &AppConfig) -> anyhow::Result<Arc<dyn DetectorFactory>> {
    anyhow::bail!("no detector backend compiled in; rebuild with the `onnx` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
