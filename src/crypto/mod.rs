//! Encryption at rest: per-object key derivation and the streaming
//! XChaCha20-Poly1305 frame format.
//!
//! - [`kdf`] turns the process secret and an object identity into a key
//! - [`stream`] encrypts a plaintext byte stream into a framed ciphertext
//!   stream and back, verifying every frame

pub mod kdf;
pub mod stream;

pub use kdf::{EncryptionKey, KdfError, KdfParams, KeyDeriver};
pub use stream::{
    CipherError, Decryptor, Encryptor, decrypt_stream, decrypt_to_writer, encrypt_stream,
    encrypted_size, plaintext_size,
};

/// Key size in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;
