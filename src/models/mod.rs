//! Core data models for the encrypted object gateway.
//!
//! Objects are addressed by an [`identity::ObjectIdentity`]; the gateway keeps
//! no metadata of its own, everything else lives in the backend.

pub mod identity;
pub mod object;
