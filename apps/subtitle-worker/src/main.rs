use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use subtitle_pipeline::audio::FfmpegExtractor;
use subtitle_pipeline::blob::{BlobStore, S3BlobStore};
use subtitle_pipeline::config::{Config, TranscriptionProvider};
use subtitle_pipeline::observability::{init_tracing, run_metrics_refresher, PipelineMetrics};
use subtitle_pipeline::pipeline::PipelineExecutor;
use subtitle_pipeline::retry::RetryController;
use subtitle_pipeline::semaphore::DistributedSemaphore;
use subtitle_pipeline::store::{RedisStateStore, StateStore};
use subtitle_pipeline::transcription::{AssemblyAiClient, MockTranscriber, TranscriptionClient};
use subtitle_pipeline::worker::WorkerLoop;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const REDIS_MAX_RETRIES: u32 = 5;
const REDIS_INITIAL_BACKOFF_MS: u64 = 500;
const SHUTDOWN_GRACE_PERIOD_MS: u64 = 200;
const QUEUE_DEPTH_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();

	let config = Config::parse();
	config.validate().map_err(anyhow::Error::msg)?;

	init_tracing();

	info!(worker_count = config.worker_count, provider = ?config.transcription_provider, "starting subtitle worker fleet");

	let store: Arc<dyn StateStore> = Arc::new(connect_with_retry(&config.redis_url).await?);
	let blob: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_env(&config.aws_region, config.s3_bucket_name.clone()).await);
	let transcriber: Arc<dyn TranscriptionClient> = build_transcriber(&config, Arc::clone(&blob));
	let metrics = Arc::new(PipelineMetrics::new().map_err(|error| anyhow::anyhow!(error.to_string()))?);

	let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
	let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");

	if config.init_semaphores {
		info!("initializing distributed semaphores (single-process bootstrap)");
		global_semaphore.init(config.max_global_concurrency).await?;
		ai_semaphore.init(config.max_ai_concurrency).await?;
	}

	let retry = RetryController::new(config.max_retries, config.initial_backoff_ms);
	let executor = Arc::new(PipelineExecutor::new(
		Arc::clone(&store),
		Arc::clone(&blob),
		Arc::new(FfmpegExtractor),
		transcriber,
		ai_semaphore,
		retry,
		std::path::PathBuf::from(&config.tmp_root),
		Duration::from_millis(config.transcription_poll_ms),
	));

	let shutdown = CancellationToken::new();

	let mut handles = Vec::with_capacity(config.worker_count);
	for id in 0..config.worker_count {
		let worker = WorkerLoop::new(id, Arc::clone(&store), global_semaphore.clone(), Arc::clone(&executor), Arc::clone(&metrics));
		let worker_shutdown = shutdown.clone();
		handles.push(tokio::spawn(async move { worker.run(worker_shutdown).await }));
	}

	let metrics_handle = tokio::spawn(run_metrics_refresher(Arc::clone(&metrics), Arc::clone(&store), QUEUE_DEPTH_REFRESH_INTERVAL, shutdown.clone()));

	wait_for_shutdown_signal().await;
	info!("shutdown signal received, cancelling worker loops");
	shutdown.cancel();

	tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_PERIOD_MS)).await;
	for handle in handles {
		let _ = handle.await;
	}
	let _ = metrics_handle.await;

	info!("exiting");
	Ok(())
}

fn build_transcriber(config: &Config, blob: Arc<dyn BlobStore>) -> Arc<dyn TranscriptionClient> {
	match config.transcription_provider {
		TranscriptionProvider::Assemblyai => {
			let api_key = config.assemblyai_api_key.clone().expect("validate() guarantees this is set");
			Arc::new(AssemblyAiClient::new(api_key, blob, Duration::from_secs(config.presigned_audio_url_expiry_secs)))
		}
		TranscriptionProvider::Mock => Arc::new(MockTranscriber::new(
			vec![subtitle_pipeline::transcription::Segment {
				text: "mock transcription output".to_string(),
				start_ms: 0,
				end_ms: 2_000,
			}],
			Duration::from_millis(config.transcription_poll_ms),
		)),
	}
}

async fn connect_with_retry(redis_url: &str) -> Result<RedisStateStore> {
	for attempt in 1..=REDIS_MAX_RETRIES {
		match RedisStateStore::connect(redis_url).await {
			Ok(store) => {
				info!(url = %redis_url, "connected to coordination store");
				return Ok(store);
			}
			Err(error) => {
				if attempt == REDIS_MAX_RETRIES {
					error!(%error, url = %redis_url, attempts = REDIS_MAX_RETRIES, "failed to connect to coordination store, giving up");
					return Err(error.into());
				}

				let backoff = REDIS_INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
				warn!(attempt, max_retries = REDIS_MAX_RETRIES, backoff_ms = backoff, %error, "coordination store connection failed, retrying");
				tokio::time::sleep(Duration::from_millis(backoff)).await;
			}
		}
	}

	unreachable!()
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}
