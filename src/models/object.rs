//! Represents the outcome of storing an object.

/// What the backend reports after a successful put.
///
/// Used for logging only; the gateway never trusts these values for
/// correctness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadInfo {
    /// Bucket the object was written to.
    pub bucket: String,

    /// Object name within the bucket.
    pub name: String,

    /// Stored (ciphertext) size in bytes.
    pub size: u64,

    /// Backend entity tag, when the backend returns one.
    pub etag: Option<String>,
}
