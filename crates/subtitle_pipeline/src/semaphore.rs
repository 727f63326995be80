use crate::error::StoreError;
use crate::store::StateStore;
use std::sync::Arc;
use tracing::warn;

/// A counting semaphore implemented as a Redis list of placeholder tokens
/// (spec §4.5). `acquire` blocks popping a token off the right; `release`
/// pushes one back on the left. Capacity survives process restarts as long
/// as the list itself isn't reinitialized underneath a running fleet.
#[derive(Clone)]
pub struct DistributedSemaphore {
	store: Arc<dyn StateStore>,
	list_key: &'static str,
}

impl DistributedSemaphore {
	#[must_use]
	pub fn new(store: Arc<dyn StateStore>, list_key: &'static str) -> Self {
		Self { store, list_key }
	}

	/// Resets the token list to exactly `capacity` placeholder entries.
	///
	/// Must run at most once per fleet lifetime before any worker starts
	/// acquiring (see §9 open question on the bootstrap race); calling it
	/// while workers hold permits silently invalidates their count.
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn init(&self, capacity: usize) -> Result<(), StoreError> {
		let tokens: Vec<String> = (0..capacity).map(|i| i.to_string()).collect();
		self.store.list_replace(self.list_key, &tokens).await
	}

	/// Blocks until a token is available, then returns a guard that releases
	/// it back to the list on drop.
	///
	/// # Errors
	/// Returns an error if the underlying store read fails.
	pub async fn acquire(&self) -> Result<SemaphorePermit, StoreError> {
		let (_, token) = self.store.list_blocking_pop_right(&[self.list_key]).await?;
		Ok(SemaphorePermit {
			store: Arc::clone(&self.store),
			list_key: self.list_key,
			token: Some(token),
		})
	}
}

/// RAII guard pairing one `acquire` with exactly one `release`.
///
/// Dropping the guard on any exit path — success, error, panic-unwind,
/// cancellation — pushes the token back. This replaces the
/// try/finally-style release the original implementation used.
pub struct SemaphorePermit {
	store: Arc<dyn StateStore>,
	list_key: &'static str,
	token: Option<String>,
}

impl Drop for SemaphorePermit {
	fn drop(&mut self) {
		if let Some(token) = self.token.take() {
			let store = Arc::clone(&self.store);
			let list_key = self.list_key;
			tokio::spawn(async move {
				if let Err(error) = store.list_push_left(list_key, &token).await {
					warn!(%error, list_key, "failed to release semaphore token back to store");
				}
			});
		}
	}
}
