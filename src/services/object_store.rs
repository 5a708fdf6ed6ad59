//! The narrow interface the gateway uses to reach the object-storage backend.
//!
//! Adapters only move opaque bytes. Encryption happens above this layer, and
//! backend-specific error details stay below it: callers see
//! [`StoreError::NotFound`] for a missing object no matter how the backend
//! reports it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

use crate::models::object::UploadInfo;

/// Body stream handed to or returned from an adapter.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{name}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, name: String },
    #[error("declared size {declared} but body had {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("reading request body: {0}")]
    Body(#[source] io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored object opened for reading.
///
/// Dropping `body` releases the underlying connection, whether or not it was
/// read to the end.
pub struct StoredObject {
    /// Stored length in bytes, when the backend reports it.
    pub size: Option<u64>,

    /// Lazily read object contents, positioned at the first byte.
    pub body: ByteStream<'static>,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` unless it already exists. Idempotent.
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Whether `bucket` exists and is reachable with our credentials.
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    /// Stream exactly `size` bytes from `body` into `bucket/name`,
    /// overwriting any existing object.
    async fn put<'a>(
        &self,
        bucket: &str,
        name: &str,
        body: ByteStream<'a>,
        size: u64,
    ) -> StoreResult<UploadInfo>;

    /// Open `bucket/name` for reading.
    async fn get(&self, bucket: &str, name: &str) -> StoreResult<StoredObject>;
}
