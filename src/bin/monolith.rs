//! Monolith Binary - Single-process chain orchestrator
//!
//! It wires up:
//! - Local adapters (filesystem, HTTP fetch, generation service client, ffmpeg)
//! - The chain services (frames, segment factory, merge, sink, orchestrator)
//! - HTTP inbound adapter and the task event pipeline

use reelchain::adapters::local::{
    events, http, EventHub, FfmpegToolkit, FsDocument, HttpFetcher, HttpGenerationQueue,
};
use reelchain::application::{frames::FrameExtractor, merge::MergeEngine, sink::ResultSink};
use reelchain::config::ChainConfig;
use reelchain::ChainOrchestrator;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Load .env first so RUST_LOG applies, and start tracing before the
    // config reports malformed values.
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ChainConfig::from_env();

    // 1. Adapters (Local implementations)
    let client = reqwest::Client::new();
    let fetcher = HttpFetcher::new(client.clone());
    let queue = HttpGenerationQueue::new(
        client,
        config.generation_url.clone(),
        config.generation_api_key.clone(),
    );
    let document = FsDocument::new(
        fetcher.clone(),
        config.document_dir.clone(),
        config.download_dir.clone(),
    );

    // 2. Application Services
    let frames = FrameExtractor::new(
        fetcher.clone(),
        FfmpegToolkit::new(),
        config.work_dir.clone(),
        config.frame_timeout,
    );
    let merger = MergeEngine::new(fetcher, FfmpegToolkit::new(), config.work_dir.clone());
    let orchestrator = Arc::new(ChainOrchestrator::new(
        queue,
        frames,
        merger,
        ResultSink::new(document),
    ));
    info!(
        started_at = %orchestrator.started_at(),
        "ignoring task completions from before startup"
    );

    // 3. Merge progress
    let mut progress = orchestrator.subscribe_progress();
    tokio::spawn(async move {
        while let Ok(update) = progress.recv().await {
            info!(
                batch_id = %update.batch_id,
                stage = ?update.progress.stage,
                percent = update.progress.overall_percent(),
                "merge progress"
            );
        }
    });

    // 4. Event System
    let event_hub = Arc::new(EventHub::new(config.event_capacity));
    events::listener::start(event_hub.clone(), orchestrator.clone());

    // 5. HTTP Layer
    let app = http::router(http::AppState {
        chain: orchestrator.clone(),
        event_hub,
    });

    // 6. Start Server
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .expect("Failed to bind TCP listener");
    info!("Listening at {}", config.bind_address());

    let shutdown = {
        let orchestrator = orchestrator.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            // Batches live in memory only; say what is being dropped.
            for batch in orchestrator.unfinished() {
                warn!(
                    batch_id = %batch.batch_id,
                    completed = batch.completed_segments,
                    total = batch.total_segments,
                    "abandoning unfinished batch"
                );
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server failed to start");
}
