use crate::error::BlobError;
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Blob storage client (C2), matching spec §4.2: `get` streams an object to
/// a local path, `put` buffers an in-memory payload up as one object, and
/// `presign_get` hands back a time-limited URL an external HTTP client
/// (the transcription provider) can fetch without AWS credentials.
#[async_trait]
pub trait BlobStore: Send + Sync {
	/// Streams `key` down to `local_path`, creating parent directories as
	/// needed.
	///
	/// # Errors
	/// Returns an error if the object doesn't exist or the write fails.
	async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobError>;

	/// Uploads `body` as `key` with the given content type.
	///
	/// # Errors
	/// Returns an error if the upload fails.
	async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), BlobError>;

	/// Produces a presigned GET URL for `key`, valid for `expiry`.
	///
	/// # Errors
	/// Returns an error if presigning fails.
	async fn presign_get(&self, key: &str, expiry: Duration) -> Result<String, BlobError>;
}

/// Production `BlobStore` backed by an S3-compatible bucket.
pub struct S3BlobStore {
	client: Client,
	bucket: String,
}

impl S3BlobStore {
	#[must_use]
	pub fn new(client: Client, bucket: String) -> Self {
		Self { client, bucket }
	}

	/// Builds a client from the standard AWS env/config chain, matching the
	/// teacher's transcoder worker's bootstrap sequence.
	pub async fn from_env(region: &str, bucket: String) -> Self {
		let region_provider = aws_config::Region::new(region.to_string());
		let config = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider).load().await;
		Self::new(Client::new(&config), bucket)
	}
}

#[async_trait]
impl BlobStore for S3BlobStore {
	async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobError> {
		if let Some(parent) = local_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let mut object = self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(key)
			.send()
			.await
			.map_err(|error| BlobError::Provider(error.to_string()))?;

		let mut file = tokio::fs::File::create(local_path).await?;
		while let Some(chunk) = object.body.try_next().await.map_err(|error| BlobError::Provider(error.to_string()))? {
			file.write_all(&chunk).await?;
		}
		file.flush().await?;
		Ok(())
	}

	async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), BlobError> {
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.body(ByteStream::from(body))
			.content_type(content_type)
			.send()
			.await
			.map_err(|error| BlobError::Provider(error.to_string()))?;
		Ok(())
	}

	async fn presign_get(&self, key: &str, expiry: Duration) -> Result<String, BlobError> {
		let presigning_config = PresigningConfig::expires_in(expiry).map_err(|error| BlobError::Provider(error.to_string()))?;
		let presigned = self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(key)
			.presigned(presigning_config)
			.await
			.map_err(|error| BlobError::Provider(error.to_string()))?;
		Ok(presigned.uri().to_string())
	}
}

/// In-memory `BlobStore` used by unit/integration tests (§8).
#[derive(Default, Clone)]
pub struct InMemoryBlobStore {
	objects: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl InMemoryBlobStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn seed(&self, key: &str, body: impl Into<Bytes>) {
		self.objects.lock().await.insert(key.to_string(), body.into());
	}
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
	async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobError> {
		let objects = self.objects.lock().await;
		let body = objects
			.get(key)
			.ok_or_else(|| BlobError::Provider(format!("no such object: {key}")))?;
		if let Some(parent) = local_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(local_path, body.as_ref()).await?;
		Ok(())
	}

	async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), BlobError> {
		self.objects.lock().await.insert(key.to_string(), body);
		Ok(())
	}

	async fn presign_get(&self, key: &str, expiry: Duration) -> Result<String, BlobError> {
		Ok(format!("https://fake-blob-store.test/{key}?expires_in={}", expiry.as_secs()))
	}
}
