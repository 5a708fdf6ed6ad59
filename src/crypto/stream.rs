//! Streaming XChaCha20-Poly1305 encryption/decryption
//!
//! Encrypted stream format (binary):
//! ```text
//! preamble: [4 bytes: magic "FSE1"][4 bytes: chunk size, BE][16 bytes: random nonce prefix]
//! frame:    [1 byte: flags][3 bytes: zero][4 bytes: len, BE][len bytes: ciphertext][16 bytes: tag]
//! nonce(i) = nonce prefix (16 bytes) || i (8 bytes, BE)
//! AAD(i)   = preamble || frame header
//! ```
//!
//! Every frame but the last holds exactly `chunk size` plaintext bytes; the
//! last one carries the final flag. An empty plaintext is a single empty
//! final frame. The frame index in the nonce rejects reordering, the final
//! flag rejects truncation, and binding the preamble into every AAD rejects
//! splicing frames between streams.

use bytes::{Bytes, BytesMut};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use futures::{Stream, StreamExt, stream::BoxStream};
use rand::RngCore;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::crypto::{EncryptionKey, NONCE_SIZE, TAG_SIZE};

const MAGIC: [u8; 4] = *b"FSE1";
const NONCE_PREFIX_SIZE: usize = 16;

/// Size of the stream preamble in bytes.
pub const PREAMBLE_SIZE: usize = MAGIC.len() + 4 + NONCE_PREFIX_SIZE;

/// Size of the cleartext header in front of every frame.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Bytes every frame adds on top of its plaintext.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + TAG_SIZE;

/// Largest accepted chunk size, on both the encrypt and decrypt side.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const FLAG_FINAL: u8 = 0x01;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The ciphertext failed authentication or is not a well-formed stream.
    #[error("integrity check failed: {0}")]
    Integrity(&'static str),
    #[error("chunk size {0} is outside the supported range (1 byte to 16 MiB)")]
    InvalidChunkSize(usize),
    #[error("encrypted size overflows u64")]
    SizeOverflow,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CipherError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, CipherError::Integrity(_))
    }
}

fn check_chunk_size(chunk_size: usize) -> Result<(), CipherError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(CipherError::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

/// Exact ciphertext length for `plaintext_len` bytes encrypted with
/// `chunk_size`.
///
/// The backend needs the size before the first byte is encrypted, so this
/// must agree byte for byte with what [`Encryptor`] emits.
pub fn encrypted_size(plaintext_len: u64, chunk_size: usize) -> Result<u64, CipherError> {
    check_chunk_size(chunk_size)?;
    let frames = plaintext_len.div_ceil(chunk_size as u64).max(1);
    frames
        .checked_mul(FRAME_OVERHEAD as u64)
        .and_then(|overhead| overhead.checked_add(PREAMBLE_SIZE as u64))
        .and_then(|total| total.checked_add(plaintext_len))
        .ok_or(CipherError::SizeOverflow)
}

/// Inverse of [`encrypted_size`]. Returns `None` for lengths no well-formed
/// stream with this chunk size can have.
pub fn plaintext_size(ciphertext_len: u64, chunk_size: usize) -> Option<u64> {
    if check_chunk_size(chunk_size).is_err() {
        return None;
    }
    let body = ciphertext_len.checked_sub(PREAMBLE_SIZE as u64)?;
    let chunk = chunk_size as u64;
    let overhead = FRAME_OVERHEAD as u64;
    let full_frame = chunk + overhead;
    let (full_frames, rest) = (body / full_frame, body % full_frame);

    if rest == 0 && full_frames > 0 {
        Some(full_frames * chunk)
    } else if rest > overhead {
        Some(full_frames * chunk + rest - overhead)
    } else if rest == overhead && full_frames == 0 {
        Some(0)
    } else {
        None
    }
}

fn frame_header(is_final: bool, len: u32) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    if is_final {
        header[0] = FLAG_FINAL;
    }
    header[4..].copy_from_slice(&len.to_be_bytes());
    header
}

fn frame_nonce(preamble: &[u8; PREAMBLE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&preamble[PREAMBLE_SIZE - NONCE_PREFIX_SIZE..]);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_be_bytes());
    nonce
}

fn frame_aad(
    preamble: &[u8; PREAMBLE_SIZE],
    header: &[u8; FRAME_HEADER_SIZE],
) -> [u8; PREAMBLE_SIZE + FRAME_HEADER_SIZE] {
    let mut aad = [0u8; PREAMBLE_SIZE + FRAME_HEADER_SIZE];
    aad[..PREAMBLE_SIZE].copy_from_slice(preamble);
    aad[PREAMBLE_SIZE..].copy_from_slice(header);
    aad
}

/// Turns a plaintext byte stream into an encrypted one, one frame at a time.
///
/// Holds at most one chunk plus one input read in memory.
pub struct Encryptor<'a> {
    input: BoxStream<'a, io::Result<Bytes>>,
    cipher: XChaCha20Poly1305,
    preamble: [u8; PREAMBLE_SIZE],
    chunk_size: usize,
    buffer: BytesMut,
    index: u64,
    preamble_sent: bool,
    input_done: bool,
    finished: bool,
}

impl<'a> Encryptor<'a> {
    pub fn new<S>(input: S, key: &EncryptionKey, chunk_size: usize) -> Result<Self, CipherError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        check_chunk_size(chunk_size)?;

        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble[..MAGIC.len()].copy_from_slice(&MAGIC);
        preamble[MAGIC.len()..MAGIC.len() + 4].copy_from_slice(&(chunk_size as u32).to_be_bytes());
        rand::thread_rng().fill_bytes(&mut preamble[PREAMBLE_SIZE - NONCE_PREFIX_SIZE..]);

        Ok(Self {
            input: input.boxed(),
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            preamble,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            index: 0,
            preamble_sent: false,
            input_done: false,
            finished: false,
        })
    }

    /// Next piece of ciphertext: the preamble first, then one frame per call.
    /// `Ok(None)` once the final frame has been produced.
    pub async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        if !self.preamble_sent {
            self.preamble_sent = true;
            return Ok(Some(Bytes::copy_from_slice(&self.preamble)));
        }

        // Read one byte past the chunk so a full chunk is only marked final
        // when the input has really ended.
        while !self.input_done && self.buffer.len() <= self.chunk_size {
            match self.input.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.input_done = true,
            }
        }

        let is_final = self.input_done && self.buffer.len() <= self.chunk_size;
        let take = self.buffer.len().min(self.chunk_size);
        let plaintext = self.buffer.split_to(take);
        let frame = self.seal(&plaintext, is_final)?;
        if is_final {
            self.finished = true;
        }
        Ok(Some(frame))
    }

    fn seal(&mut self, plaintext: &[u8], is_final: bool) -> io::Result<Bytes> {
        let header = frame_header(is_final, plaintext.len() as u32);
        let nonce = frame_nonce(&self.preamble, self.index);
        let aad = frame_aad(&self.preamble, &header);

        let sealed = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| io::Error::other(format!("frame encryption failed: {e}")))?;
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| io::Error::other("frame counter exhausted"))?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + sealed.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&sealed);
        Ok(frame.freeze())
    }

    /// Stream of ciphertext pieces; ends after the first error.
    pub fn into_stream(self) -> BoxStream<'a, io::Result<Bytes>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut encryptor = state?;
            match encryptor.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), Some(encryptor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}

/// Encrypt `plaintext` under `key`, producing a lazily evaluated ciphertext
/// stream of exactly `encrypted_size(len, chunk_size)` bytes.
pub fn encrypt_stream<'a, S>(
    plaintext: S,
    key: &EncryptionKey,
    chunk_size: usize,
) -> Result<BoxStream<'a, io::Result<Bytes>>, CipherError>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'a,
{
    Ok(Encryptor::new(plaintext, key, chunk_size)?.into_stream())
}

/// Turns an encrypted byte stream back into plaintext, verifying each frame
/// before releasing it.
pub struct Decryptor<'a> {
    input: BoxStream<'a, io::Result<Bytes>>,
    cipher: XChaCha20Poly1305,
    preamble: Option<[u8; PREAMBLE_SIZE]>,
    buffer: BytesMut,
    index: u64,
    input_done: bool,
    finished: bool,
}

impl<'a> Decryptor<'a> {
    pub fn new<S>(input: S, key: &EncryptionKey) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        Self {
            input: input.boxed(),
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            preamble: None,
            buffer: BytesMut::new(),
            index: 0,
            input_done: false,
            finished: false,
        }
    }

    /// Chunk size recorded in the stream, known once the first frame has
    /// been read.
    pub fn chunk_size(&self) -> Option<usize> {
        self.preamble.as_ref().map(|p| {
            u32::from_be_bytes([p[4], p[5], p[6], p[7]]) as usize
        })
    }

    /// Plaintext of the next frame, `Ok(None)` after the final frame.
    ///
    /// The final frame is only released once the input is drained and found
    /// to hold nothing after it.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, CipherError> {
        if self.finished {
            return Ok(None);
        }
        let preamble = match self.preamble {
            Some(preamble) => preamble,
            None => {
                let preamble = self.read_preamble().await?;
                self.preamble = Some(preamble);
                preamble
            }
        };
        let chunk_size = self.chunk_size().unwrap_or_default();

        if !self.fill(FRAME_HEADER_SIZE).await? {
            return Err(CipherError::Integrity("stream truncated before final frame"));
        }
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
        let flags = header[0];
        if flags & !FLAG_FINAL != 0 || header[1..4] != [0, 0, 0] {
            return Err(CipherError::Integrity("malformed frame header"));
        }
        let is_final = flags & FLAG_FINAL != 0;
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len > chunk_size {
            return Err(CipherError::Integrity("frame longer than chunk size"));
        }
        if !is_final && len != chunk_size {
            return Err(CipherError::Integrity("short frame before final frame"));
        }
        if is_final && len == 0 && self.index != 0 {
            return Err(CipherError::Integrity("empty final frame after data"));
        }

        if !self.fill(FRAME_HEADER_SIZE + len + TAG_SIZE).await? {
            return Err(CipherError::Integrity("stream truncated inside frame"));
        }
        let frame = self.buffer.split_to(FRAME_HEADER_SIZE + len + TAG_SIZE);

        let nonce = frame_nonce(&preamble, self.index);
        let aad = frame_aad(&preamble, &header);
        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &frame[FRAME_HEADER_SIZE..],
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::Integrity("frame authentication failed"))?;
        self.index += 1;

        if is_final {
            self.expect_end().await?;
            self.finished = true;
        }
        Ok(Some(Bytes::from(plaintext)))
    }

    async fn read_preamble(&mut self) -> Result<[u8; PREAMBLE_SIZE], CipherError> {
        if !self.fill(PREAMBLE_SIZE).await? {
            return Err(CipherError::Integrity("stream shorter than preamble"));
        }
        let raw = self.buffer.split_to(PREAMBLE_SIZE);
        if raw[..MAGIC.len()] != MAGIC {
            return Err(CipherError::Integrity("unrecognized stream format"));
        }
        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble.copy_from_slice(&raw);
        let chunk_size = u32::from_be_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if check_chunk_size(chunk_size as usize).is_err() {
            return Err(CipherError::Integrity("chunk size out of range"));
        }
        Ok(preamble)
    }

    /// Buffer at least `want` bytes. `Ok(false)` if the input ends first.
    async fn fill(&mut self, want: usize) -> Result<bool, CipherError> {
        while self.buffer.len() < want {
            if self.input_done {
                return Ok(false);
            }
            match self.input.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.input_done = true,
            }
        }
        Ok(true)
    }

    /// Drain the input, failing on anything after the final frame.
    async fn expect_end(&mut self) -> Result<(), CipherError> {
        if !self.buffer.is_empty() {
            return Err(CipherError::Integrity("trailing data after final frame"));
        }
        while let Some(chunk) = self.input.next().await {
            if !chunk?.is_empty() {
                return Err(CipherError::Integrity("trailing data after final frame"));
            }
        }
        self.input_done = true;
        Ok(())
    }

    /// Stream of verified plaintext pieces; ends after the first error.
    pub fn into_stream(self) -> BoxStream<'a, Result<Bytes, CipherError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decryptor = state?;
            match decryptor.next_frame().await {
                Ok(Some(plaintext)) => Some((Ok(plaintext), Some(decryptor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}

/// Decrypt `ciphertext` under `key` as a stream of verified plaintext pieces.
pub fn decrypt_stream<'a, S>(
    ciphertext: S,
    key: &EncryptionKey,
) -> BoxStream<'a, Result<Bytes, CipherError>>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'a,
{
    Decryptor::new(ciphertext, key).into_stream()
}

/// Decrypt `ciphertext` into `writer`, returning the number of plaintext
/// bytes written.
///
/// Frames are written as soon as they verify, so on error the writer may
/// already hold the plaintext of the frames before the bad one.
pub async fn decrypt_to_writer<W, S>(
    writer: &mut W,
    ciphertext: S,
    key: &EncryptionKey,
) -> Result<u64, CipherError>
where
    W: AsyncWrite + Unpin,
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut decryptor = Decryptor::new(ciphertext, key);
    let mut written = 0u64;
    while let Some(plaintext) = decryptor.next_frame().await? {
        writer.write_all(&plaintext).await?;
        written += plaintext.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use futures::{TryStreamExt, executor::block_on};
    use proptest::prelude::*;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::from_bytes([byte; KEY_SIZE])
    }

    /// Feed `data` in pieces of `piece` bytes, the way a socket would.
    fn pieces(data: &[u8], piece: usize) -> BoxStream<'static, io::Result<Bytes>> {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(piece.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    fn encrypt(data: &[u8], key: &EncryptionKey, chunk_size: usize, piece: usize) -> Vec<u8> {
        let stream = encrypt_stream(pieces(data, piece), key, chunk_size).unwrap();
        let frames: Vec<Bytes> = block_on(stream.try_collect()).unwrap();
        frames.concat()
    }

    fn decrypt(ciphertext: &[u8], key: &EncryptionKey, piece: usize) -> Result<Vec<u8>, CipherError> {
        let stream = decrypt_stream(pieces(ciphertext, piece), key);
        let frames: Vec<Bytes> = block_on(stream.try_collect())?;
        Ok(frames.concat())
    }

    #[test]
    fn test_roundtrip_boundaries() {
        let k = key(7);
        let chunk = 16;
        for len in [0, 1, 15, 16, 17, 31, 32, 33, 160] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ciphertext = encrypt(&data, &k, chunk, 5);
            assert_eq!(decrypt(&ciphertext, &k, 3).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn test_size_formula_matches_output() {
        let k = key(1);
        for chunk in [1, 7, 16, 64] {
            for len in 0..=200u64 {
                let data = vec![0xA5u8; len as usize];
                let ciphertext = encrypt(&data, &k, chunk, 13);
                let expected = encrypted_size(len, chunk).unwrap();
                assert_eq!(ciphertext.len() as u64, expected, "chunk {chunk} len {len}");
                assert_eq!(plaintext_size(expected, chunk), Some(len));
            }
        }
    }

    #[test]
    fn test_empty_plaintext_has_one_frame() {
        assert_eq!(
            encrypted_size(0, 65536).unwrap(),
            (PREAMBLE_SIZE + FRAME_OVERHEAD) as u64
        );
        let k = key(2);
        let ciphertext = encrypt(b"", &k, 65536, 1);
        assert_eq!(ciphertext.len(), PREAMBLE_SIZE + FRAME_OVERHEAD);
        assert_eq!(decrypt(&ciphertext, &k, 64).unwrap(), b"");
    }

    #[test]
    fn test_plaintext_size_rejects_impossible_lengths() {
        let chunk = 16;
        assert_eq!(plaintext_size(0, chunk), None);
        assert_eq!(plaintext_size(PREAMBLE_SIZE as u64, chunk), None);
        assert_eq!(plaintext_size((PREAMBLE_SIZE + FRAME_OVERHEAD - 1) as u64, chunk), None);
        // a full frame followed by an empty one is never produced
        let odd = PREAMBLE_SIZE + (chunk + FRAME_OVERHEAD) + FRAME_OVERHEAD;
        assert_eq!(plaintext_size(odd as u64, chunk), None);
        assert_eq!(plaintext_size(100, 0), None);
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(matches!(
            encrypted_size(10, 0),
            Err(CipherError::InvalidChunkSize(0))
        ));
        assert!(Encryptor::new(pieces(b"x", 1), &key(0), MAX_CHUNK_SIZE + 1).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(b"secret data", &key(1), 64, 4);
        let err = decrypt(&ciphertext, &key(2), 64).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_every_byte_flip_is_detected() {
        let k = key(3);
        let ciphertext = encrypt(b"hello world, this spans frames", &k, 8, 3);
        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            let err = decrypt(&tampered, &k, 7).unwrap_err();
            assert!(err.is_integrity(), "flip at {i} gave {err:?}");
        }
    }

    #[test]
    fn test_every_truncation_is_detected() {
        let k = key(4);
        let ciphertext = encrypt(b"0123456789abcdefghij", &k, 8, 20);
        for cut in 0..ciphertext.len() {
            let err = decrypt(&ciphertext[..cut], &k, 5).unwrap_err();
            assert!(err.is_integrity(), "cut at {cut} gave {err:?}");
        }
    }

    #[test]
    fn test_trailing_data_is_rejected() {
        let k = key(5);
        let mut ciphertext = encrypt(b"payload", &k, 8, 8);
        ciphertext.push(0);
        assert!(decrypt(&ciphertext, &k, 4).unwrap_err().is_integrity());
    }

    #[test]
    fn test_swapped_frames_are_rejected() {
        let k = key(6);
        let chunk = 4;
        let ciphertext = encrypt(b"aaaabbbbcc", &k, chunk, 10);
        let frame = FRAME_HEADER_SIZE + chunk + TAG_SIZE;
        let (first, second) = (PREAMBLE_SIZE, PREAMBLE_SIZE + frame);
        let mut swapped = ciphertext.clone();
        swapped[first..first + frame].copy_from_slice(&ciphertext[second..second + frame]);
        swapped[second..second + frame].copy_from_slice(&ciphertext[first..first + frame]);
        assert!(decrypt(&swapped, &k, 9).unwrap_err().is_integrity());
    }

    #[test]
    fn test_frames_from_another_stream_are_rejected() {
        let k = key(8);
        let a = encrypt(b"first stream", &k, 64, 64);
        let b = encrypt(b"other stream", &k, 64, 64);
        let mut spliced = a[..PREAMBLE_SIZE].to_vec();
        spliced.extend_from_slice(&b[PREAMBLE_SIZE..]);
        assert!(decrypt(&spliced, &k, 64).unwrap_err().is_integrity());
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let k = key(9);
        assert_ne!(encrypt(b"same", &k, 64, 4), encrypt(b"same", &k, 64, 4));
    }

    #[test]
    fn test_reader_errors_surface_as_io() {
        let k = key(10);
        let failing = futures::stream::iter(vec![Err(io::Error::new(
            io::ErrorKind::NotFound,
            "gone",
        ))]);
        let err = block_on(Decryptor::new(failing, &k).next_frame()).unwrap_err();
        match err {
            CipherError::Io(io_err) => assert_eq!(io_err.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chunk_size_known_after_first_frame() {
        let k = key(11);
        let ciphertext = encrypt(b"abc", &k, 32, 1);
        let mut decryptor = Decryptor::new(pieces(&ciphertext, 2), &k);
        assert_eq!(decryptor.chunk_size(), None);
        assert_eq!(block_on(decryptor.next_frame()).unwrap().unwrap(), &b"abc"[..]);
        assert_eq!(decryptor.chunk_size(), Some(32));
        assert!(block_on(decryptor.next_frame()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decrypt_to_writer_counts_bytes() {
        let k = key(12);
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let ciphertext = encrypt(&data, &k, 64, 100);

        let mut out = Vec::new();
        let written = decrypt_to_writer(&mut out, pieces(&ciphertext, 37), &k)
            .await
            .unwrap();
        assert_eq!(written, 1000);
        assert_eq!(out, data);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
            piece in 1usize..500,
        ) {
            let k = key(42);
            let ciphertext = encrypt(&data, &k, chunk, piece);
            prop_assert_eq!(ciphertext.len() as u64, encrypted_size(data.len() as u64, chunk).unwrap());
            prop_assert_eq!(decrypt(&ciphertext, &k, piece).unwrap(), data);
        }
    }
}
