use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sightline_core::config::Config;
use sightline_core::extractor::FaceExtractor;
use sightline_core::matcher::MatchEngine;
use sightline_core::pipeline::ImagePipeline;
use sightline_core::producer::BatchProducer;
use sightline_core::resolver::ImageResolver;
use sightline_core::services::{
    DocumentService, HttpDocumentService, HttpObjectStore, HttpRecognitionClient, HttpWorkQueue,
    ObjectStore, RecognitionService, WorkQueue,
};
use sightline_core::types::{MatchOutcome, ModelStatus};
use sightline_core::writer::ResultWriter;

#[derive(Parser)]
#[command(name = "sightline", about = "Sightline face recognition pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recognition pipeline for a single document
    Scan {
        /// Document id to process
        doc_id: String,
    },
    /// Enumerate the source collection and enqueue unprocessed objects
    Enqueue,
    /// Manage the billable recognition model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Request a model start unless it is already up
    Start,
    /// Request a model stop if it is running or starting
    Stop,
    /// Show the service-reported model status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Scan { doc_id } => scan(&config, &doc_id).await,
        Commands::Enqueue => enqueue(&config).await,
        Commands::Model { action } => model(&config, action).await,
    }
}

/// Interactive single-image path: the same chain the batch consumer runs,
/// minus the queue and the model bracket (detect and search are always-on).
async fn scan(config: &Config, doc_id: &str) -> Result<()> {
    let recognition: Arc<dyn RecognitionService> =
        Arc::new(HttpRecognitionClient::from_config(config)?);
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::from_config(config)?);
    let documents: Arc<dyn DocumentService> = Arc::new(HttpDocumentService::from_config(config)?);

    let pipeline = ImagePipeline::new(
        ImageResolver::new(
            Arc::clone(&documents),
            Arc::clone(&store),
            &config.bucket,
            &config.key_prefix,
            &config.allowed_media_types,
            &config.hires_rendition,
        ),
        FaceExtractor::new(Arc::clone(&recognition)),
        MatchEngine::new(
            Arc::clone(&recognition),
            &config.collection_id,
            config.match_threshold,
            config.worker_pool_size,
        ),
        ResultWriter::new(documents),
    );

    match pipeline.process(doc_id).await? {
        MatchOutcome::NoFace => println!("no face"),
        MatchOutcome::NotDetected => println!("not detected"),
        MatchOutcome::Detected { identities } => {
            println!("detected");
            for identity in identities {
                println!("  {identity}");
            }
        }
    }
    Ok(())
}

async fn enqueue(config: &Config) -> Result<()> {
    let documents: Arc<dyn DocumentService> = Arc::new(HttpDocumentService::from_config(config)?);
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::from_config(config)?);
    let queue_url = config
        .queue_endpoint
        .clone()
        .context("SIGHTLINE_QUEUE_ENDPOINT not set")?;
    let queue: Arc<dyn WorkQueue> = Arc::new(HttpWorkQueue::new(
        &queue_url,
        &config.recognition_api_key,
        config.http_timeout(),
    )?);
    let source_collection = config
        .source_collection
        .clone()
        .context("SIGHTLINE_SOURCE_COLLECTION not set")?;

    let producer = BatchProducer::new(
        documents,
        store,
        queue,
        &config.bucket,
        &config.key_prefix,
        &source_collection,
        &config.hires_rendition,
        &config.marker_tag,
    );
    let enqueued = producer.enumerate_and_enqueue().await?;
    println!("{enqueued} work items enqueued");
    Ok(())
}

async fn model(config: &Config, action: ModelAction) -> Result<()> {
    let recognition = HttpRecognitionClient::from_config(config)?;
    let status = recognition.describe_model(&config.model_id).await?;

    match action {
        ModelAction::Start => match status {
            ModelStatus::Running | ModelStatus::Starting => println!("model {status}"),
            _ => {
                recognition.start_model(&config.model_id).await?;
                println!("model start requested");
            }
        },
        ModelAction::Stop => match status {
            ModelStatus::Running | ModelStatus::Starting => {
                recognition.stop_model(&config.model_id).await?;
                println!("model stop requested");
            }
            _ => println!("model not running ({status})"),
        },
        ModelAction::Status => println!("model {status}"),
    }
    Ok(())
}
