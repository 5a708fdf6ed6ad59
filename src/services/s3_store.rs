//! [`ObjectStore`] backed by any S3-compatible service (MinIO, SeaweedFS,
//! AWS S3) through `aws-sdk-s3`.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream as SdkByteStream,
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use secrecy::{ExposeSecret, SecretString};
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::{
    models::object::UploadInfo,
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult, StoredObject},
};

/// Pieces buffered between the request body and the SDK.
const PIPE_DEPTH: usize = 4;

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client for `cfg`.
    ///
    /// Uses path-style addressing, which MinIO and SeaweedFS require.
    pub fn new(cfg: &S3Config) -> Self {
        let credentials = Credentials::new(
            &cfg.access_key_id,
            cfg.secret_access_key.expose_secret(),
            None, // session token
            None, // expiration
            "filesrv-static",
        );
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        if cfg.endpoint.starts_with("http://") {
            tracing::warn!(
                endpoint = %cfg.endpoint,
                "S3 endpoint uses plaintext HTTP; credentials and ciphertext travel unencrypted"
            );
        }

        Self {
            client: Client::from_conf(conf),
        }
    }
}

fn backend<E, R>(context: &str, err: &SdkError<E, R>) -> StoreError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    StoreError::Backend(format!("{context}: {}", DisplayErrorContext(err)))
}

/// HTTP status of the backend's response, if one was received.
fn response_status<E>(err: &SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "created bucket");
                Ok(())
            }
            Err(err) => {
                let create_err = backend("create bucket", &err);
                let already_ours = err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you());
                // Some backends answer with a different error for an existing
                // bucket; confirm with a HEAD before giving up.
                if already_ours || self.bucket_exists(bucket).await? {
                    info!(bucket, "bucket already exists");
                    Ok(())
                } else {
                    Err(create_err)
                }
            }
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if response_status(&err) == Some(404) => Ok(false),
            Err(err) => Err(backend("head bucket", &err)),
        }
    }

    async fn put<'a>(
        &self,
        bucket: &str,
        name: &str,
        mut body: ByteStream<'a>,
        size: u64,
    ) -> StoreResult<UploadInfo> {
        let content_length = i64::try_from(size)
            .map_err(|_| StoreError::Backend(format!("object size {size} too large")))?;

        // The SDK wants a 'static body; pump ours through a channel polled in
        // this same task so dropping the request drops both ends.
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PIPE_DEPTH);
        let pump = async move {
            while let Some(item) = body.next().await {
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        };
        let frames = ReceiverStream::new(rx).map_ok(Frame::data);
        let upload = self
            .client
            .put_object()
            .bucket(bucket)
            .key(name)
            .content_length(content_length)
            .body(SdkByteStream::from_body_1_x(StreamBody::new(frames)))
            .send();

        let ((), result) = tokio::join!(pump, upload);
        let output = result.map_err(|err| backend("put object", &err))?;
        debug!(bucket, name, size, "put object");

        Ok(UploadInfo {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size,
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        })
    }

    async fn get(&self, bucket: &str, name: &str) -> StoreResult<StoredObject> {
        let output = match self.client.get_object().bucket(bucket).key(name).send().await {
            Ok(output) => output,
            Err(err) => {
                let typed_not_found = err.as_service_error().is_some_and(|e| e.is_no_such_key());
                // Not every S3 implementation sends the NoSuchKey code.
                if typed_not_found || response_status(&err) == Some(404) {
                    return Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        name: name.to_string(),
                    });
                }
                return Err(backend("get object", &err));
            }
        };

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok());
        let reader = output.body.into_async_read();

        Ok(StoredObject {
            size,
            body: ReaderStream::new(reader).boxed(),
        })
    }
}
