//! Encrypted storage and retrieval of objects over an [`ObjectStore`].
//!
//! Owns the immutable gateway configuration (bucket, chunk size, spool
//! directory), the key deriver, and the adapter. Holds no per-request state,
//! so one instance is shared by every handler.

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::{
    crypto::{
        CipherError, Decryptor, EncryptionKey, KeyDeriver, encrypt_stream, encrypted_size,
        plaintext_size,
    },
    errors::AppError,
    models::{identity::ObjectIdentity, object::UploadInfo},
    services::{
        object_store::{ByteStream, ObjectStore, StoreError},
        spool::Spooled,
    },
};

/// Immutable per-instance settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// The single bucket every object lives in.
    pub bucket: String,

    /// Plaintext bytes per encrypted frame.
    pub chunk_size: usize,

    /// Budget for non-file multipart fields, in bytes.
    pub form_limit: usize,

    /// Where uploads without a declared length are spooled.
    pub spool_dir: PathBuf,

    /// Maximum number of key derivations running at once.
    pub kdf_concurrency: usize,
}

/// A decrypted object ready to be sent to a client.
pub struct DecryptedObject {
    /// Plaintext length, when the backend reported the stored length.
    pub content_length: Option<u64>,

    /// Verified plaintext. Yields an error, and ends, if a later frame fails
    /// verification.
    pub body: ByteStream<'static>,
}

#[derive(Clone)]
pub struct GatewayService {
    store: Arc<dyn ObjectStore>,
    deriver: KeyDeriver,
    kdf_permits: Arc<Semaphore>,
    settings: Arc<GatewaySettings>,
}

impl GatewayService {
    pub fn new(store: Arc<dyn ObjectStore>, deriver: KeyDeriver, settings: GatewaySettings) -> Self {
        let kdf_permits = Arc::new(Semaphore::new(settings.kdf_concurrency.max(1)));
        Self {
            store,
            deriver,
            kdf_permits,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    fn identity(&self, name: &str) -> Result<ObjectIdentity, AppError> {
        ObjectIdentity::new(self.settings.bucket.as_str(), name)
            .map_err(|err| AppError::ClientInput(err.to_string()))
    }

    /// Derive the key for `identity` on the blocking pool.
    ///
    /// Each derivation holds 64 MiB for its duration, so the number running
    /// at once is bounded. The permit moves into the blocking job, so it is
    /// held until the computation ends even if the caller goes away.
    async fn derive_key(&self, identity: &ObjectIdentity) -> Result<EncryptionKey, AppError> {
        let permit = self
            .kdf_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| AppError::Internal(format!("kdf permits closed: {err}")))?;

        let deriver = self.deriver.clone();
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || {
            let key = deriver.derive(&identity);
            drop(permit);
            key
        })
        .await
        .map_err(|err| AppError::Internal(format!("kdf task failed: {err}")))?
        .map_err(|err| AppError::Internal(err.to_string()))
    }

    /// Encrypt `body` and store it as `name`.
    ///
    /// `declared_len` is the plaintext length announced by the client. When
    /// it is missing the body is spooled to disk first to measure it. Either
    /// way the plaintext is checked against the length the ciphertext size
    /// was computed from.
    ///
    /// Errors reading `body` are the client's fault (400). Spool file and
    /// backend failures are ours (500).
    pub async fn store_encrypted<'a, S>(
        &self,
        name: &str,
        declared_len: Option<u64>,
        body: S,
    ) -> Result<UploadInfo, AppError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        let identity = self.identity(name)?;
        let fault = BodyFault::default();
        let body = fault.watch(body);

        // Keep the spool guard alive until the put has finished.
        let spooled;
        let (plaintext, plaintext_len): (ByteStream<'a>, u64) = match declared_len {
            Some(len) => (body, len),
            None => {
                spooled = Spooled::write(&self.settings.spool_dir, body)
                    .await
                    .map_err(|err| {
                        if fault.occurred() {
                            AppError::ClientInput(format!("reading upload: {err}"))
                        } else {
                            AppError::Internal(format!("spooling upload: {err}"))
                        }
                    })?;
                (
                    spooled.reader().await.map_err(|err| {
                        AppError::Internal(format!("reopening spooled upload: {err}"))
                    })?,
                    spooled.len(),
                )
            }
        };

        let stored_len = encrypted_size(plaintext_len, self.settings.chunk_size)
            .map_err(|err| AppError::ClientInput(err.to_string()))?;
        let key = self.derive_key(&identity).await?;
        let ciphertext = encrypt_stream(
            exact_length(plaintext, plaintext_len),
            &key,
            self.settings.chunk_size,
        )
        .map_err(|err| AppError::Internal(err.to_string()))?;

        let info = self
            .store
            .put(identity.bucket(), identity.name(), ciphertext, stored_len)
            .await
            .map_err(|err| {
                if fault.occurred() {
                    AppError::ClientInput(format!("reading upload for `{identity}`: {err}"))
                } else {
                    AppError::Backend(format!("put object `{identity}`: {err}"))
                }
            })?;

        debug!(
            object = %identity,
            plaintext_len,
            stored_len = info.size,
            etag = info.etag.as_deref().unwrap_or(""),
            "stored encrypted object"
        );
        Ok(info)
    }

    /// Open `name` and start decrypting it.
    ///
    /// The first frame is verified before this returns, so a wrong key or a
    /// corrupt head of the object is reported as an error instead of a
    /// response that breaks off immediately.
    pub async fn fetch_decrypted(&self, name: &str) -> Result<DecryptedObject, AppError> {
        // A name that could never have been stored cannot exist.
        let identity = self.identity(name).map_err(|_| AppError::NotFound)?;

        let object = self
            .store
            .get(identity.bucket(), identity.name())
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => AppError::NotFound,
                other => AppError::Backend(format!("get object `{identity}`: {other}")),
            })?;

        let key = self.derive_key(&identity).await?;
        let mut decryptor = Decryptor::new(object.body, &key);
        let first = decryptor
            .next_frame()
            .await
            .map_err(|err| decrypt_failure(&identity, err))?
            .unwrap_or_default();

        let content_length = match object.size {
            Some(stored) => {
                let chunk_size = decryptor.chunk_size().unwrap_or_default();
                let len = plaintext_size(stored, chunk_size).ok_or_else(|| {
                    AppError::Integrity(format!(
                        "object `{identity}` has impossible stored length {stored}"
                    ))
                })?;
                Some(len)
            }
            None => None,
        };

        let progress = DownloadProgress::new(identity);
        let body = stream::unfold(
            Some((decryptor, progress, Some(first))),
            |state| async move {
                let (mut decryptor, mut progress, primed) = state?;
                let item = match primed {
                    Some(first) => Ok(Some(first)),
                    None => decryptor.next_frame().await,
                };
                match item {
                    Ok(Some(chunk)) => {
                        progress.bytes += chunk.len() as u64;
                        Some((Ok(chunk), Some((decryptor, progress, None))))
                    }
                    Ok(None) => {
                        progress.finish();
                        None
                    }
                    Err(err) => Some((Err(progress.abort(err)), None)),
                }
            },
        )
        .boxed();

        Ok(DecryptedObject {
            content_length,
            body,
        })
    }
}

/// Map a failure to produce the first plaintext frame.
fn decrypt_failure(identity: &ObjectIdentity, err: CipherError) -> AppError {
    match err {
        CipherError::Integrity(reason) => {
            AppError::Integrity(format!("decrypt object `{identity}`: {reason}"))
        }
        // Content-level not-found, for backends that only report a missing
        // object once its body is read.
        CipherError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => AppError::NotFound,
        other => AppError::Backend(format!("read object `{identity}`: {other}")),
    }
}

/// Logs how a streamed download ended.
///
/// Dropped without having seen the end of the stream means the client went
/// away (or the server is shutting down) mid-body.
struct DownloadProgress {
    identity: ObjectIdentity,
    bytes: u64,
    finished: bool,
}

impl DownloadProgress {
    fn new(identity: ObjectIdentity) -> Self {
        Self {
            identity,
            bytes: 0,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        debug!(object = %self.identity, sent = self.bytes, "download complete");
    }

    fn abort(&mut self, err: CipherError) -> io::Error {
        self.finished = true;
        error!(
            object = %self.identity,
            sent = self.bytes,
            "aborting download: {err}"
        );
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

impl Drop for DownloadProgress {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                object = %self.identity,
                sent = self.bytes,
                "download closed before the end of the object"
            );
        }
    }
}

/// Records whether the client's body stream failed.
///
/// Body errors travel through the cipher and the adapter before surfacing,
/// and an adapter may rewrap them beyond recognition.
#[derive(Clone, Default)]
struct BodyFault(Arc<AtomicBool>);

impl BodyFault {
    fn watch<'a, S>(&self, body: S) -> ByteStream<'a>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        let flag = self.0.clone();
        body.inspect_err(move |_| flag.store(true, Ordering::Relaxed))
            .boxed()
    }

    fn occurred(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pass `body` through, failing if it does not hold exactly `expected` bytes.
fn exact_length<'a>(body: ByteStream<'a>, expected: u64) -> ByteStream<'a> {
    stream::unfold(Some((body, 0u64)), move |state| async move {
        let (mut body, seen) = state?;
        match body.next().await {
            Some(Ok(chunk)) => {
                let seen = seen + chunk.len() as u64;
                if seen > expected {
                    warn!(expected, seen, "upload longer than declared");
                    return Some((Err(length_mismatch(expected, seen)), None));
                }
                Some((Ok(chunk), Some((body, seen))))
            }
            Some(Err(err)) => Some((Err(err), None)),
            None if seen != expected => {
                warn!(expected, seen, "upload shorter than declared");
                Some((Err(length_mismatch(expected, seen)), None))
            }
            None => None,
        }
    })
    .boxed()
}

fn length_mismatch(expected: u64, seen: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("declared {expected} bytes, received {seen}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::KdfParams, services::memory_store::MemoryStore};
    use secrecy::SecretString;
    use std::time::Duration;

    const BUCKET: &str = "filesrv";

    async fn service(chunk_size: usize) -> (GatewayService, MemoryStore, tempfile::TempDir) {
        let store = MemoryStore::new();
        store.ensure_bucket(BUCKET).await.unwrap();
        let spool = tempfile::tempdir().unwrap();
        let deriver = KeyDeriver::with_params(
            SecretString::from("test secret"),
            KdfParams {
                mem_cost_kib: 256,
                time_cost: 1,
                parallelism: 1,
            },
        )
        .unwrap();
        let settings = GatewaySettings {
            bucket: BUCKET.into(),
            chunk_size,
            form_limit: 1024,
            spool_dir: spool.path().to_path_buf(),
            kdf_concurrency: 2,
        };
        let svc = GatewayService::new(Arc::new(store.clone()), deriver, settings);
        (svc, store, spool)
    }

    fn body(data: &[u8]) -> ByteStream<'static> {
        let parts: Vec<io::Result<Bytes>> = data
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(parts).boxed()
    }

    fn failing_body() -> ByteStream<'static> {
        stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("multipart stream ended early")),
        ])
        .boxed()
    }

    async fn read(obj: DecryptedObject) -> io::Result<Vec<u8>> {
        let parts: Vec<Bytes> = obj.body.try_collect().await?;
        Ok(parts.concat())
    }

    #[tokio::test]
    async fn store_then_fetch_with_declared_length() {
        let (svc, store, _spool) = service(16).await;
        let data = b"hello world, with a few frames of text".to_vec();

        let info = svc
            .store_encrypted("hello.txt", Some(data.len() as u64), body(&data))
            .await
            .unwrap();
        assert_eq!(info.size, encrypted_size(data.len() as u64, 16).unwrap());
        assert_eq!(
            store.raw_object(BUCKET, "hello.txt").unwrap().len() as u64,
            info.size
        );

        let obj = svc.fetch_decrypted("hello.txt").await.unwrap();
        assert_eq!(obj.content_length, Some(data.len() as u64));
        assert_eq!(read(obj).await.unwrap(), data);
    }

    #[tokio::test]
    async fn store_without_declared_length_spools() {
        let (svc, _store, spool) = service(16).await;
        svc.store_encrypted("spooled.bin", None, body(b"abcdefghijklmnopqrstuvwxyz"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);

        let obj = svc.fetch_decrypted("spooled.bin").await.unwrap();
        assert_eq!(read(obj).await.unwrap(), b"abcdefghijklmnopqrstuvwxyz");
    }

    #[tokio::test]
    async fn wrong_declared_length_stores_nothing() {
        let (svc, store, _spool) = service(16).await;
        let err = svc
            .store_encrypted("f", Some(5), body(b"four"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
        let err = svc
            .store_encrypted("f", Some(3), body(b"four"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalid_upload_name_is_client_error() {
        let (svc, _store, _spool) = service(16).await;
        let err = svc
            .store_encrypted("bad\nname", Some(1), body(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientInput(_)));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (svc, _store, _spool) = service(16).await;
        assert!(matches!(
            svc.fetch_decrypted("missing.txt").await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            svc.fetch_decrypted("bad\0name").await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn moved_ciphertext_fails_integrity() {
        let (svc, store, _spool) = service(16).await;
        svc.store_encrypted("n1", Some(6), body(b"secret"))
            .await
            .unwrap();
        store.insert_raw(BUCKET, "n2", store.raw_object(BUCKET, "n1").unwrap());

        assert!(matches!(
            svc.fetch_decrypted("n2").await,
            Err(AppError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_later_frame_aborts_the_body() {
        let (svc, store, _spool) = service(4).await;
        svc.store_encrypted("f", Some(12), body(b"aaaabbbbcccc"))
            .await
            .unwrap();
        let mut raw = store.raw_object(BUCKET, "f").unwrap().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        store.insert_raw(BUCKET, "f", raw);

        let obj = svc.fetch_decrypted("f").await.unwrap();
        let err = read(obj).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn empty_object_is_served_empty() {
        let (svc, _store, _spool) = service(16).await;
        svc.store_encrypted("empty", Some(0), body(b"")).await.unwrap();
        let obj = svc.fetch_decrypted("empty").await.unwrap();
        assert_eq!(obj.content_length, Some(0));
        assert!(read(obj).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn impossible_stored_length_is_integrity_error() {
        let (svc, store, _spool) = service(16).await;
        svc.store_encrypted("f", Some(3), body(b"abc")).await.unwrap();
        let mut raw = store.raw_object(BUCKET, "f").unwrap().to_vec();
        raw.truncate(raw.len() - 1);
        store.insert_raw(BUCKET, "f", raw);
        assert!(matches!(
            svc.fetch_decrypted("f").await,
            Err(AppError::Integrity(_))
        ));
    }

    #[test]
    fn content_level_not_found_maps_to_404() {
        let identity = ObjectIdentity::new(BUCKET, "f").unwrap();
        let err = CipherError::Io(io::Error::new(io::ErrorKind::NotFound, "no such key"));
        assert!(matches!(decrypt_failure(&identity, err), AppError::NotFound));
        let err = CipherError::Io(io::Error::other("reset"));
        assert!(matches!(decrypt_failure(&identity, err), AppError::Backend(_)));
    }

    #[tokio::test]
    async fn body_read_failure_is_client_error() {
        let (svc, store, spool) = service(16).await;
        let err = svc
            .store_encrypted("f", Some(100), failing_body())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientInput(_)), "{err:?}");

        let err = svc
            .store_encrypted("f", None, failing_body())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientInput(_)), "{err:?}");
        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_spool_dir_is_server_error() {
        let (svc, store, spool) = service(16).await;
        let mut settings = svc.settings().clone();
        settings.spool_dir = spool.path().join("does-not-exist");
        let svc = GatewayService::new(Arc::new(store.clone()), svc.deriver.clone(), settings);

        let err = svc
            .store_encrypted("a.txt", None, body(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)), "{err:?}");
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cancelled_derivation_keeps_its_permit() {
        let (svc, store, _spool) = service(16).await;
        let slow = KeyDeriver::with_params(
            SecretString::from("test secret"),
            KdfParams {
                mem_cost_kib: 64 * 1024,
                time_cost: 8,
                parallelism: 1,
            },
        )
        .unwrap();
        let mut settings = svc.settings().clone();
        settings.kdf_concurrency = 1;
        let svc = GatewayService::new(Arc::new(store), slow, settings);
        let identity = ObjectIdentity::new(BUCKET, "slow.bin").unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), svc.derive_key(&identity)).await;
        assert!(cancelled.is_err(), "derivation finished before the timeout");
        assert_eq!(svc.kdf_permits.available_permits(), 0);

        // Released once the abandoned computation ends.
        let permit = tokio::time::timeout(
            Duration::from_secs(120),
            svc.kdf_permits.clone().acquire_owned(),
        )
        .await
        .unwrap()
        .unwrap();
        drop(permit);
        assert_eq!(svc.kdf_permits.available_permits(), 1);
    }
}
