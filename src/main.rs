//! VigilEye Plugin - Driver Drowsiness Detection
//!
//! Main entry point: wires the bus consumer, the session orchestrator, the
//! scorer boundary, the publisher and the HTTP surface together.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigileye_plugin::config::AppConfig;
use vigileye_plugin::messaging::{AmqpPublisher, EventConsumer, Handler};
use vigileye_plugin::orchestrator::SessionOrchestrator;
use vigileye_plugin::scorer::InferenceScorer;
use vigileye_plugin::web_api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigileye_plugin=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VigilEye plugin v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        bus = %format!("{}:{}", config.bus_host, config.bus_port),
        exchange = %config.exchange,
        queue = %config.queue,
        ear_threshold = config.ear_threshold,
        consecutive_frames = config.consecutive_frames,
        scorer_url = %config.scorer_url,
        "Configuration loaded"
    );

    // Scorer boundary (external landmark-inference service)
    let scorer = Arc::new(InferenceScorer::new(
        config.scorer_url.clone(),
        config.model_path.clone(),
    ));
    match scorer.health_check().await {
        Ok(true) => tracing::info!("Scorer service reachable"),
        _ => tracing::warn!(
            scorer_url = %config.scorer_url,
            "Scorer service not reachable yet, samples will be skipped until it is"
        ),
    }

    // Publisher: a failed connect at startup is fatal
    let publisher = Arc::new(AmqpPublisher::new(&config.exchange));
    publisher.connect(&config.bus_uri()).await?;

    let orchestrator = Arc::new(SessionOrchestrator::new(
        scorer,
        publisher,
        config.ear_threshold,
        config.consecutive_frames,
        config.sample_interval,
    ));

    // Read-only HTTP surface
    let api_orchestrator = orchestrator.clone();
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = web_api::serve(api_orchestrator, api_port).await {
            tracing::error!(error = %e, "HTTP surface failed");
        }
    });

    // Consumer: bind lifecycle handlers and block on the consume loop
    let mut consumer = EventConsumer::new(&config.exchange, &config.queue, &config.routing_keys);

    let add_orchestrator = orchestrator.clone();
    let on_added: Handler = Arc::new(move |data| {
        let orchestrator = add_orchestrator.clone();
        Box::pin(async move { orchestrator.handle_camera_added(data).await })
    });
    consumer.register_handler("camera.added", on_added);

    let remove_orchestrator = orchestrator.clone();
    let on_removed: Handler = Arc::new(move |data| {
        let orchestrator = remove_orchestrator.clone();
        Box::pin(async move { orchestrator.handle_camera_removed(data).await })
    });
    consumer.register_handler("camera.removed", on_removed);

    consumer.connect(&config.bus_uri()).await?;

    tracing::info!("Plugin ready, waiting for camera events");
    consumer.run().await?;

    Ok(())
}
