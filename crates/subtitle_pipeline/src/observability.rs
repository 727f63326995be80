use crate::store::StateStore;
use prometheus::{Counter, Gauge, Registry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading filter directives from
/// `RUST_LOG`, falling back to `info`. Call once, at process start.
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

/// Fleet-wide counters and gauges exposed for scraping, mirroring the
/// queue-depth and outcome metrics the teacher's worker pool tracks.
pub struct PipelineMetrics {
	pub registry: Registry,
	jobs_dequeued: Counter,
	jobs_completed: Counter,
	jobs_retried: Counter,
	jobs_dead_lettered: Counter,
	queue_high_depth: Gauge,
	queue_low_depth: Gauge,
	queue_dlq_depth: Gauge,
	jobs_processing: Gauge,
}

impl PipelineMetrics {
	/// # Errors
	/// Returns an error if a metric fails to register (e.g. a name clash).
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let jobs_dequeued = Counter::new("subtitle_pipeline_jobs_dequeued_total", "Jobs popped off a priority queue")?;
		let jobs_completed = Counter::new("subtitle_pipeline_jobs_completed_total", "Jobs that reached completed")?;
		let jobs_retried = Counter::new("subtitle_pipeline_jobs_retried_total", "Jobs requeued after a failed attempt")?;
		let jobs_dead_lettered = Counter::new("subtitle_pipeline_jobs_dead_lettered_total", "Jobs moved to queue:dlq")?;
		let queue_high_depth = Gauge::new("subtitle_pipeline_queue_high_depth", "Current length of queue:high")?;
		let queue_low_depth = Gauge::new("subtitle_pipeline_queue_low_depth", "Current length of queue:low")?;
		let queue_dlq_depth = Gauge::new("subtitle_pipeline_queue_dlq_depth", "Current length of queue:dlq")?;
		let jobs_processing = Gauge::new("subtitle_pipeline_jobs_processing", "Current size of jobs:processing")?;

		registry.register(Box::new(jobs_dequeued.clone()))?;
		registry.register(Box::new(jobs_completed.clone()))?;
		registry.register(Box::new(jobs_retried.clone()))?;
		registry.register(Box::new(jobs_dead_lettered.clone()))?;
		registry.register(Box::new(queue_high_depth.clone()))?;
		registry.register(Box::new(queue_low_depth.clone()))?;
		registry.register(Box::new(queue_dlq_depth.clone()))?;
		registry.register(Box::new(jobs_processing.clone()))?;

		Ok(Self {
			registry,
			jobs_dequeued,
			jobs_completed,
			jobs_retried,
			jobs_dead_lettered,
			queue_high_depth,
			queue_low_depth,
			queue_dlq_depth,
			jobs_processing,
		})
	}

	#[cfg(test)]
	#[must_use]
	pub fn new_for_test() -> Self {
		Self::new().expect("metric registration cannot fail with fixed names")
	}

	pub fn record_dequeue(&self) {
		self.jobs_dequeued.inc();
	}

	pub fn record_completed(&self) {
		self.jobs_completed.inc();
	}

	pub fn record_retried(&self) {
		self.jobs_retried.inc();
	}

	pub fn record_dead_lettered(&self) {
		self.jobs_dead_lettered.inc();
	}

	/// Refreshes the queue-depth gauges from the coordination store. Meant
	/// to be polled on an interval by a background task, not called per-job.
	///
	/// # Errors
	/// Returns an error if the underlying store read fails.
	pub async fn refresh_queue_depths(&self, store: &Arc<dyn StateStore>) -> Result<(), crate::error::StoreError> {
		let snapshot = store.dashboard_snapshot().await?;
		#[allow(clippy::cast_precision_loss)]
		{
			self.queue_high_depth.set(snapshot.queue_high_len as f64);
			self.queue_low_depth.set(snapshot.queue_low_len as f64);
			self.queue_dlq_depth.set(snapshot.queue_dlq_len as f64);
			self.jobs_processing.set(snapshot.processing_count as f64);
		}
		Ok(())
	}
}

/// Periodically refreshes queue-depth gauges until `shutdown` fires.
pub async fn run_metrics_refresher(metrics: Arc<PipelineMetrics>, store: Arc<dyn StateStore>, interval: Duration, shutdown: tokio_util::sync::CancellationToken) {
	let mut ticker = tokio::time::interval(interval);
	loop {
		tokio::select! {
			_ = ticker.tick() => {
				if let Err(error) = metrics.refresh_queue_depths(&store).await {
					tracing::warn!(%error, "failed to refresh queue depth metrics");
				}
			}
			() = shutdown.cancelled() => return,
		}
	}
}
