use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dashboard-facing snapshot of fleet queue depths, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardSnapshot {
	pub queue_high_len: usize,
	pub queue_low_len: usize,
	pub queue_dlq_len: usize,
	pub processing_count: usize,
}

/// Typed facade over the coordination store (C1), matching spec §4.1.
///
/// Every operation here maps onto a single Redis primitive except
/// `dashboard_snapshot`, which is the one multi-key atomic read the system
/// needs.
#[async_trait]
pub trait StateStore: Send + Sync {
	async fn hash_set_fields(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError>;
	async fn hash_get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
	async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
	async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

	async fn list_push_left(&self, list: &str, value: &str) -> Result<(), StoreError>;
	async fn list_push_right(&self, list: &str, value: &str) -> Result<(), StoreError>;
	/// Blocking pop from the right of the first non-empty list among `lists`,
	/// in the given priority order. No timeout (spec §5: "infinite wait").
	async fn list_blocking_pop_right(&self, lists: &[&str]) -> Result<(String, String), StoreError>;
	async fn list_len(&self, list: &str) -> Result<usize, StoreError>;
	async fn list_delete(&self, list: &str) -> Result<(), StoreError>;
	/// Atomically replaces `list`'s contents with exactly `values.len()` entries.
	async fn list_replace(&self, list: &str, values: &[String]) -> Result<(), StoreError>;

	async fn set_add(&self, set: &str, value: &str) -> Result<(), StoreError>;
	async fn set_remove(&self, set: &str, value: &str) -> Result<(), StoreError>;
	async fn set_card(&self, set: &str) -> Result<usize, StoreError>;

	async fn dashboard_snapshot(&self) -> Result<DashboardSnapshot, StoreError>;
}

/// Production `StateStore` backed by Redis.
#[derive(Clone)]
pub struct RedisStateStore {
	conn: ConnectionManager,
}

impl RedisStateStore {
	/// # Errors
	/// Returns an error if the connection cannot be established.
	pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
		let client = redis::Client::open(redis_url)?;
		let conn = client.get_connection_manager().await?;
		Ok(Self { conn })
	}
}

#[async_trait]
impl StateStore for RedisStateStore {
	async fn hash_set_fields(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let items: Vec<(&String, &String)> = fields.iter().collect();
		let _: () = conn.hset_multiple(key, &items).await?;
		Ok(())
	}

	async fn hash_get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
		let mut conn = self.conn.clone();
		let value: Option<String> = conn.hget(key, field).await?;
		Ok(value)
	}

	async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
		let mut conn = self.conn.clone();
		let fields: HashMap<String, String> = conn.hgetall(key).await?;
		Ok(fields)
	}

	async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
		let mut conn = self.conn.clone();
		let value: i64 = conn.hincr(key, field, delta).await?;
		Ok(value)
	}

	async fn list_push_left(&self, list: &str, value: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.lpush(list, value).await?;
		Ok(())
	}

	async fn list_push_right(&self, list: &str, value: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.rpush(list, value).await?;
		Ok(())
	}

	async fn list_blocking_pop_right(&self, lists: &[&str]) -> Result<(String, String), StoreError> {
		let mut conn = self.conn.clone();
		loop {
			let result: Option<(String, String)> = conn.brpop(lists, 0.0).await?;
			if let Some(popped) = result {
				return Ok(popped);
			}
			// A zero timeout blocks indefinitely server-side; a `None` here
			// means the connection briefly dropped the wait. Retry.
		}
	}

	async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
		let mut conn = self.conn.clone();
		let len: usize = conn.llen(list).await?;
		Ok(len)
	}

	async fn list_delete(&self, list: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.del(list).await?;
		Ok(())
	}

	async fn list_replace(&self, list: &str, values: &[String]) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		redis::pipe()
			.atomic()
			.del(list)
			.ignore()
			.rpush(list, values)
			.ignore()
			.query_async(&mut conn)
			.await?;
		Ok(())
	}

	async fn set_add(&self, set: &str, value: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.sadd(set, value).await?;
		Ok(())
	}

	async fn set_remove(&self, set: &str, value: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.srem(set, value).await?;
		Ok(())
	}

	async fn set_card(&self, set: &str) -> Result<usize, StoreError> {
		let mut conn = self.conn.clone();
		let card: usize = conn.scard(set).await?;
		Ok(card)
	}

	async fn dashboard_snapshot(&self) -> Result<DashboardSnapshot, StoreError> {
		let mut conn = self.conn.clone();
		let (queue_high_len, queue_low_len, queue_dlq_len, processing_count): (usize, usize, usize, usize) = redis::pipe()
			.atomic()
			.llen("queue:high")
			.llen("queue:low")
			.llen("queue:dlq")
			.scard("jobs:processing")
			.query_async(&mut conn)
			.await?;

		Ok(DashboardSnapshot {
			queue_high_len,
			queue_low_len,
			queue_dlq_len,
			processing_count,
		})
	}
}

/// In-memory `StateStore` used by unit/integration tests (§8) so pipeline
/// and worker-loop behavior can be asserted without a live Redis instance.
#[derive(Default)]
struct InMemoryInner {
	hashes: HashMap<String, HashMap<String, String>>,
	lists: HashMap<String, Vec<String>>,
	sets: HashMap<String, std::collections::HashSet<String>>,
}

#[derive(Clone)]
pub struct InMemoryStateStore {
	inner: Arc<Mutex<InMemoryInner>>,
	notify: Arc<tokio::sync::Notify>,
}

impl Default for InMemoryStateStore {
	fn default() -> Self {
		Self::new()
	}
}

impl InMemoryStateStore {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Mutex::new(InMemoryInner::default())),
			notify: Arc::new(tokio::sync::Notify::new()),
		}
	}
}

#[async_trait]
impl StateStore for InMemoryStateStore {
	async fn hash_set_fields(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.hashes.entry(key.to_string()).or_default().extend(fields.clone());
		Ok(())
	}

	async fn hash_get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
	}

	async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.hashes.get(key).cloned().unwrap_or_default())
	}

	async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
		let mut inner = self.inner.lock().await;
		let hash = inner.hashes.entry(key.to_string()).or_default();
		let current = hash.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
		let next = current + delta;
		hash.insert(field.to_string(), next.to_string());
		Ok(next)
	}

	async fn list_push_left(&self, list: &str, value: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.lists.entry(list.to_string()).or_default().insert(0, value.to_string());
		self.notify.notify_waiters();
		Ok(())
	}

	async fn list_push_right(&self, list: &str, value: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.lists.entry(list.to_string()).or_default().push(value.to_string());
		self.notify.notify_waiters();
		Ok(())
	}

	async fn list_blocking_pop_right(&self, lists: &[&str]) -> Result<(String, String), StoreError> {
		loop {
			{
				let mut inner = self.inner.lock().await;
				for list in lists {
					if let Some(list_values) = inner.lists.get_mut(*list) {
						if !list_values.is_empty() {
							let value = list_values.remove(0);
							return Ok(((*list).to_string(), value));
						}
					}
				}
			}
			self.notify.notified().await;
		}
	}

	async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.lists.get(list).map_or(0, Vec::len))
	}

	async fn list_delete(&self, list: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.lists.remove(list);
		Ok(())
	}

	async fn list_replace(&self, list: &str, values: &[String]) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.lists.insert(list.to_string(), values.to_vec());
		self.notify.notify_waiters();
		Ok(())
	}

	async fn set_add(&self, set: &str, value: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.sets.entry(set.to_string()).or_default().insert(value.to_string());
		Ok(())
	}

	async fn set_remove(&self, set: &str, value: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		if let Some(members) = inner.sets.get_mut(set) {
			members.remove(value);
		}
		Ok(())
	}

	async fn set_card(&self, set: &str) -> Result<usize, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.sets.get(set).map_or(0, std::collections::HashSet::len))
	}

	async fn dashboard_snapshot(&self) -> Result<DashboardSnapshot, StoreError> {
		Ok(DashboardSnapshot {
			queue_high_len: self.list_len("queue:high").await?,
			queue_low_len: self.list_len("queue:low").await?,
			queue_dlq_len: self.list_len("queue:dlq").await?,
			processing_count: self.set_card("jobs:processing").await?,
		})
	}
}
