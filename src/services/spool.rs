//! Temporary on-disk copies of uploads whose length is not declared.
//!
//! The backend needs the ciphertext size before the upload starts. When a
//! multipart part carries no `Content-Length`, the plaintext is streamed to a
//! uniquely named file first to learn its length, then streamed back out.
//! The file is removed when the [`Spooled`] guard is dropped, on every path.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::object_store::ByteStream;

/// A spooled upload. Deletes its file on drop.
#[derive(Debug)]
pub struct Spooled {
    path: PathBuf,
    len: u64,
}

impl Spooled {
    /// Stream `body` into a new file under `dir`.
    pub async fn write<S>(dir: &Path, body: S) -> io::Result<Self>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let path = dir.join(format!(".spool-{}", Uuid::new_v4()));
        let mut file = File::create(&path).await?;
        // From here on the guard owns the file and removes it on any error.
        let mut spooled = Self { path, len: 0 };

        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            spooled.len += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = %spooled.path.display(), len = spooled.len, "spooled upload");
        Ok(spooled)
    }

    /// Number of bytes spooled.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the spooled bytes back from the start.
    pub async fn reader(&self) -> io::Result<ByteStream<'static>> {
        let file = File::open(&self.path).await?;
        Ok(ReaderStream::new(file).boxed())
    }
}

impl Drop for Spooled {
    fn drop(&mut self) {
        // A single unlink; blocking the worker for it is acceptable.
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), "failed to remove spool file: {err}"),
        }
    }
}

/// Create the spool directory if needed.
pub async fn prepare_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{TryStreamExt, stream};

    fn body(parts: Vec<io::Result<Bytes>>) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(parts)
    }

    #[tokio::test]
    async fn spools_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = Spooled::write(
            dir.path(),
            body(vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))]),
        )
        .await
        .unwrap();
        assert_eq!(spooled.len(), 11);

        let parts: Vec<Bytes> = spooled.reader().await.unwrap().try_collect().await.unwrap();
        assert_eq!(parts.concat(), b"hello world");
    }

    #[tokio::test]
    async fn file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = Spooled::write(dir.path(), body(vec![Ok(Bytes::from_static(b"x"))]))
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(spooled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn file_removed_on_body_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Spooled::write(
            dir.path(),
            body(vec![Ok(Bytes::from_static(b"x")), Err(io::Error::other("reset"))]),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = Spooled::write(dir.path(), body(vec![])).await.unwrap();
        assert!(spooled.is_empty());
    }
}
