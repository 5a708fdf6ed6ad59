//! Key derivation: process secret + object identity → per-object key

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::KEY_SIZE;
use crate::models::identity::ObjectIdentity;

/// The Argon2 implementation rejects salts shorter than this.
const MIN_SALT_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("encryption secret must not be empty")]
    EmptySecret,
    #[error("invalid Argon2id params: {0}")]
    InvalidParams(argon2::Error),
    #[error("Argon2id KDF failed: {0}")]
    Derive(argon2::Error),
}

/// A 256-bit key bound to one object identity.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// The parameters every stored object is encrypted under.
    ///
    /// Changing any of these makes every existing object undecryptable.
    pub const PUBLISHED: KdfParams = KdfParams {
        mem_cost_kib: 64 * 1024,
        time_cost: 1,
        parallelism: 4,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::PUBLISHED
    }
}

/// Derives per-object keys from the process secret.
///
/// Everything that can make derivation fail is checked in [`KeyDeriver::new`],
/// so a deriver that was built successfully at startup does not fail per
/// request. Cheap to clone.
#[derive(Clone)]
pub struct KeyDeriver {
    secret: Arc<SecretString>,
    params: Params,
}

impl KeyDeriver {
    /// Build a deriver with [`KdfParams::PUBLISHED`].
    pub fn new(secret: SecretString) -> Result<Self, KdfError> {
        Self::with_params(secret, KdfParams::PUBLISHED)
    }

    /// Build a deriver with explicit cost parameters.
    ///
    /// Only tests should pass anything but [`KdfParams::PUBLISHED`].
    pub fn with_params(secret: SecretString, params: KdfParams) -> Result<Self, KdfError> {
        if secret.expose_secret().is_empty() {
            return Err(KdfError::EmptySecret);
        }
        let params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(KdfError::InvalidParams)?;

        Ok(Self {
            secret: Arc::new(secret),
            params,
        })
    }

    /// Derive the key for `identity`.
    ///
    /// The salt is `bucket/name`, so renaming an object changes its key.
    /// Blocks for the duration of the Argon2id computation.
    pub fn derive(&self, identity: &ObjectIdentity) -> Result<EncryptionKey, KdfError> {
        let salt = salt_for(identity);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(self.secret.expose_secret().as_bytes(), &salt, &mut key)
            .map_err(KdfError::Derive)?;

        Ok(EncryptionKey::from_bytes(key))
    }
}

impl std::fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDeriver")
            .field("secret", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}

/// `bucket/name` as bytes, NUL-padded up to the minimum salt length.
fn salt_for(identity: &ObjectIdentity) -> Vec<u8> {
    let mut salt = identity.joined().into_bytes();
    if salt.len() < MIN_SALT_LEN {
        salt.resize(MIN_SALT_LEN, 0);
    }
    salt
}
