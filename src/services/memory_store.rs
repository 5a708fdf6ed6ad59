//! In-process [`ObjectStore`] used for local development and tests.
//!
//! Objects are committed only after the whole body has arrived and matched
//! its declared size, so a failed put never leaves a partial object behind.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;

use crate::{
    models::object::UploadInfo,
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult, StoredObject},
};

/// Size of the pieces `get` hands out, to mimic a network body.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Default)]
struct Inner {
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<(String, String), Bytes>>,
    fail_puts: AtomicBool,
}

/// Cheap to clone; clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `put` fail with a backend error.
    pub fn fail_puts(&self, fail: bool) {
        self.inner.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Raw stored bytes (ciphertext, when written by the gateway).
    pub fn raw_object(&self, bucket: &str, name: &str) -> Option<Bytes> {
        self.inner
            .objects
            .read()
            .ok()?
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }

    /// Replace the raw stored bytes of an object, bypassing the gateway.
    pub fn insert_raw(&self, bucket: &str, name: &str, bytes: impl Into<Bytes>) {
        if let Ok(mut objects) = self.inner.objects.write() {
            objects.insert((bucket.to_string(), name.to_string()), bytes.into());
        }
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.inner.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        let created = self
            .inner
            .buckets
            .write()
            .map_err(poisoned)?
            .insert(bucket.to_string());
        debug!(bucket, created, "ensured bucket");
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.inner.buckets.read().map_err(poisoned)?.contains(bucket))
    }

    async fn put<'a>(
        &self,
        bucket: &str,
        name: &str,
        mut body: ByteStream<'a>,
        size: u64,
    ) -> StoreResult<UploadInfo> {
        if self.inner.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected put failure".into()));
        }
        if !self.bucket_exists(bucket).await? {
            return Err(StoreError::Backend(format!("bucket `{bucket}` does not exist")));
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StoreError::Body)?;
            data.extend_from_slice(&chunk);
            if data.len() as u64 > size {
                return Err(StoreError::SizeMismatch {
                    declared: size,
                    actual: data.len() as u64,
                });
            }
        }
        if data.len() as u64 != size {
            return Err(StoreError::SizeMismatch {
                declared: size,
                actual: data.len() as u64,
            });
        }

        self.inner
            .objects
            .write()
            .map_err(poisoned)?
            .insert((bucket.to_string(), name.to_string()), data.freeze());

        Ok(UploadInfo {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size,
            etag: None,
        })
    }

    async fn get(&self, bucket: &str, name: &str) -> StoreResult<StoredObject> {
        let data = self
            .inner
            .objects
            .read()
            .map_err(poisoned)?
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })?;

        let size = data.len() as u64;
        let pieces: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK)
            .map(|start| Ok(data.slice(start..(start + READ_CHUNK).min(data.len()))))
            .collect();

        Ok(StoredObject {
            size: Some(size),
            body: stream::iter(pieces).boxed(),
        })
    }
}
