use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use sightline_core::config::Config;
use sightline_core::consumer::BatchConsumer;
use sightline_core::extractor::FaceExtractor;
use sightline_core::lifecycle::{run_guarded, ModelLifecycleController};
use sightline_core::matcher::MatchEngine;
use sightline_core::pipeline::ImagePipeline;
use sightline_core::resolver::ImageResolver;
use sightline_core::services::{
    DocumentService, HttpDocumentService, HttpObjectStore, HttpRecognitionClient, HttpWorkQueue,
    ObjectStore, RecognitionService, WorkQueue,
};
use sightline_core::writer::ResultWriter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("sightlined starting");

    let config = Config::from_env()?;
    tracing::info!(?config, "configuration loaded");

    // Wire the HTTP collaborators up front (fail-fast).
    let recognition: Arc<dyn RecognitionService> = Arc::new(HttpRecognitionClient::from_config(&config)?);
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::from_config(&config)?);
    let documents = Arc::new(HttpDocumentService::from_config(&config)?);
    let queue_url = config
        .queue_endpoint
        .clone()
        .context("SIGHTLINE_QUEUE_ENDPOINT not set")?;
    let queue: Arc<dyn WorkQueue> = Arc::new(HttpWorkQueue::new(
        &queue_url,
        &config.recognition_api_key,
        config.http_timeout(),
    )?);

    let resolver = ImageResolver::new(
        Arc::clone(&documents) as Arc<dyn DocumentService>,
        Arc::clone(&store),
        &config.bucket,
        &config.key_prefix,
        &config.allowed_media_types,
        &config.hires_rendition,
    );
    let extractor = FaceExtractor::new(Arc::clone(&recognition));
    let matcher = MatchEngine::new(
        Arc::clone(&recognition),
        &config.collection_id,
        config.match_threshold,
        config.worker_pool_size,
    );
    let writer = ResultWriter::new(Arc::clone(&documents) as Arc<dyn DocumentService>);
    let pipeline = ImagePipeline::new(resolver, extractor, matcher, writer);

    let consumer = BatchConsumer::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        pipeline,
        &config.marker_tag,
        config.poll_wait(),
        config.receive_batch_size,
    );
    let controller = ModelLifecycleController::new(
        Arc::clone(&recognition),
        &config.model_id,
        config.model_start_timeout(),
        config.model_poll_interval(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mode = config.run_mode;
    tracing::info!(?mode, "starting batch run");
    let stats = run_guarded(&controller, async move { consumer.run(mode, shutdown_rx).await }).await?;
    tracing::info!(?stats, "batch run complete");

    if let Some(recipient) = &config.notify_email {
        let collection = config.source_collection.as_deref().unwrap_or("");
        if let Err(e) = documents.send_completion_notice(recipient, collection).await {
            tracing::warn!(error = %e, "completion notice failed");
        }
    }

    tracing::info!("sightlined shutting down");
    Ok(())
}
