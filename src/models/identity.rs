//! Represents the identity of a stored object: the bucket it lives in and
//! its name within that bucket.

use std::fmt;
use thiserror::Error;

const MAX_OBJECT_NAME_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: &'static str },
    #[error("object name invalid: {0}")]
    InvalidObjectName(&'static str),
}

/// The (bucket, name) pair that addresses one stored object.
///
/// The name is an opaque flat key. It may contain `/`, but it is never
/// cleaned, split or resolved against a filesystem: `a/../b` and `b` are two
/// different objects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    bucket: String,
    name: String,
}

impl ObjectIdentity {
    /// Validate both halves and build the identity.
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Result<Self, IdentityError> {
        let bucket = bucket.into();
        let name = name.into();
        validate_bucket_name(&bucket)?;
        validate_object_name(&name)?;
        Ok(Self { bucket, name })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `bucket/name`, the string the per-object key is bound to.
    pub fn joined(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// Object names must be non-empty, bounded, and free of control characters.
///
/// NUL in particular is rejected; key derivation pads short salts with NUL
/// and relies on it never appearing in a real name.
pub fn validate_object_name(name: &str) -> Result<(), IdentityError> {
    if name.is_empty() {
        return Err(IdentityError::InvalidObjectName("must not be empty"));
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(IdentityError::InvalidObjectName(
            "must be at most 1024 bytes",
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(IdentityError::InvalidObjectName(
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> Result<(), IdentityError> {
    let invalid = |reason| IdentityError::InvalidBucketName {
        name: name.to_string(),
        reason,
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
