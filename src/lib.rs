//! Encrypting file gateway.
//!
//! Accepts multipart uploads, encrypts them with a key derived from a
//! process secret and the object's identity, and stores only ciphertext in
//! an S3-compatible bucket. Downloads are decrypted and verified on the fly.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
