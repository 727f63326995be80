use std::time::Duration;

/// Outcome of a failed pipeline attempt, per spec §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
	/// Re-enqueue on `queue:low` after sleeping `delay` in-process.
	Retry { delay: Duration },
	/// Exceeded `max_retries`; move straight to `queue:dlq`.
	DeadLetter,
}

/// Computes the exponential-backoff retry/DLQ decision for a job.
///
/// Backoff for retry attempt `n` is `initial_backoff * 2^(n-1)`, always
/// landing the retried job on `queue:low` regardless of its original
/// priority (spec §4.7). This is a best-effort, in-process delay: if the
/// worker process dies mid-sleep the delay is lost and the job is retried
/// immediately on restart (§9 open question, accepted as-is).
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
	max_retries: u32,
	initial_backoff_ms: u64,
}

impl RetryController {
	#[must_use]
	pub fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
		Self { max_retries, initial_backoff_ms }
	}

	/// `retry_count` is the count *after* being incremented for this failure.
	#[must_use]
	pub fn decide(&self, retry_count: u32) -> RetryDecision {
		if retry_count > self.max_retries {
			return RetryDecision::DeadLetter;
		}

		let exponent = retry_count.saturating_sub(1);
		let multiplier = 2_u64.saturating_pow(exponent);
		RetryDecision::Retry {
			delay: Duration::from_millis(self.initial_backoff_ms.saturating_mul(multiplier)),
		}
	}
}
