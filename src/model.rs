//! Data model shared by every client implementation and orchestrator

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum size of a single request copy on AWS S3
pub const AWS_MAX_SINGLE_COPY_SIZE: u64 = 5_000_000_000;

/// Maximum size of a single request copy on Azure Blob Storage
pub const AZURE_MAX_SINGLE_COPY_SIZE: u64 = 256_000_000;

/// Cloud provider an object client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local filesystem / no provider
    #[default]
    None,
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    /// URL scheme used for this provider, including the `://` separator
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::None => "file://",
            Provider::Aws => "s3://",
            Provider::Gcp => "gs://",
            Provider::Azure => "az://",
        }
    }

    /// Largest object the provider can copy in a single request.
    ///
    /// Unknown providers return zero, which forces the multipart path for every object.
    pub fn max_single_copy_size(&self) -> u64 {
        match self {
            Provider::Aws => AWS_MAX_SINGLE_COPY_SIZE,
            Provider::Azure => AZURE_MAX_SINGLE_COPY_SIZE,
            Provider::Gcp => u64::MAX,
            Provider::None => 0,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::None => "none",
            Provider::Aws => "AWS",
            Provider::Gcp => "GCP",
            Provider::Azure => "Azure",
        };
        write!(f, "{}", name)
    }
}

/// Inclusive byte range of an object.
///
/// An `end` of zero means "until the end of the object".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Fails with [`Error::InvalidByteRange`] when `end` precedes `start`
    pub fn validate(&self) -> Result<()> {
        if self.end == 0 || self.end >= self.start {
            return Ok(());
        }

        Err(Error::InvalidByteRange {
            start: self.start,
            end: self.end,
        })
    }

    /// Whether the range extends to the end of the object
    pub fn is_open(&self) -> bool {
        self.end == 0
    }

    /// Offset/length form of the range; `total` is used for open ended ranges
    pub fn to_offset_length(&self, total: u64) -> (u64, u64) {
        if self.is_open() {
            return (self.start, total.saturating_sub(self.start));
        }

        (self.start, self.end - self.start + 1)
    }

    /// HTTP `Range` header value, e.g. `bytes=0-1023`
    pub fn to_range_header(&self) -> String {
        if self.is_open() {
            format!("bytes={}-", self.start)
        } else {
            format!("bytes={}-{}", self.start, self.end)
        }
    }
}

/// Attributes of a stored object.
///
/// Directory stubs produced by delimited listings only populate `key`; see [`ObjectAttrs::is_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// Unique path of the object within its bucket
    pub key: String,

    /// Opaque content fingerprint
    pub etag: Option<String>,

    /// Size in bytes, `None` when unknown
    pub size: Option<u64>,

    pub last_modified: Option<DateTime<Utc>>,

    /// Value that changes whenever the object's content changes
    pub cas: Option<String>,

    /// Version identifier, `None` for the current version
    pub version_id: Option<String>,

    pub lock: Option<ObjectLock>,
}

impl ObjectAttrs {
    /// Directory stub carrying only a key
    pub fn dir_stub(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Whether these attributes describe a directory stub rather than an object
    pub fn is_dir(&self) -> bool {
        self.size.is_none() && self.etag.is_none() && self.last_modified.is_none()
    }

    /// Whether this is the current version of the object
    pub fn is_current_version(&self) -> bool {
        self.version_id.is_none()
    }
}

/// One chunk of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Part {
    /// Provider assigned identifier
    pub id: String,

    /// 1-based ordering number; parts are assembled in this order
    pub number: u32,

    pub size: u64,
}

/// Condition evaluated atomically when an object is written
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    #[default]
    None,

    /// Only write if the current CAS value matches
    IfMatch(String),

    /// Only write if no current version exists
    OnlyIfAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockType {
    #[default]
    Undefined,
    Compliance,
}

/// Retention lock; every delete of the locked object/version fails until `expiration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLock {
    pub lock_type: LockType,
    pub expiration: DateTime<Utc>,
}

impl ObjectLock {
    /// A compliance mode lock expiring at `expiration`
    pub fn compliance(expiration: DateTime<Utc>) -> Self {
        Self {
            lock_type: LockType::Compliance,
            expiration,
        }
    }

    /// Whether the lock still blocks deletion at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketLockingStatus {
    pub enabled: bool,
}

/// Readable object body
pub type ObjectBody = Box<dyn AsyncRead + Unpin + Send>;

/// An object returned by `get_object`
pub struct Object {
    pub attrs: ObjectAttrs,
    pub body: ObjectBody,
}

impl Object {
    /// Read the remainder of the body into memory
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.attrs.size.unwrap_or(0) as usize);
        self.body.read_to_end(&mut data).await?;
        Ok(data)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_validation() {
        assert!(ByteRange::new(0, 0).validate().is_ok());
        assert!(ByteRange::new(10, 0).validate().is_ok());
        assert!(ByteRange::new(10, 10).validate().is_ok());

        let err = ByteRange::new(10, 5).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidByteRange { start: 10, end: 5 }));
    }

    #[test]
    fn test_byte_range_offset_length() {
        assert_eq!(ByteRange::new(5, 9).to_offset_length(100), (5, 5));
        assert_eq!(ByteRange::new(5, 0).to_offset_length(100), (5, 95));
    }

    #[test]
    fn test_byte_range_header() {
        assert_eq!(ByteRange::new(0, 1023).to_range_header(), "bytes=0-1023");
        assert_eq!(ByteRange::new(64, 0).to_range_header(), "bytes=64-");
    }

    #[test]
    fn test_dir_stub() {
        let stub = ObjectAttrs::dir_stub("photos/");
        assert!(stub.is_dir());

        let object = ObjectAttrs {
            key: "photos/cat.png".to_string(),
            size: Some(0),
            ..Default::default()
        };
        assert!(!object.is_dir());
    }

    #[test]
    fn test_provider_scheme_and_copy_limits() {
        assert_eq!(Provider::Aws.scheme(), "s3://");
        assert_eq!(Provider::Gcp.scheme(), "gs://");
        assert_eq!(Provider::Azure.scheme(), "az://");
        assert_eq!(Provider::None.scheme(), "file://");

        assert_eq!(Provider::Aws.max_single_copy_size(), 5_000_000_000);
        assert_eq!(Provider::Azure.max_single_copy_size(), 256_000_000);
        assert_eq!(Provider::Gcp.max_single_copy_size(), u64::MAX);
        assert_eq!(Provider::None.max_single_copy_size(), 0);
    }

    #[test]
    fn test_lock_activity() {
        let now = Utc::now();
        let lock = ObjectLock::compliance(now + chrono::Duration::seconds(30));
        assert!(lock.is_active(now));
        assert!(!lock.is_active(now + chrono::Duration::seconds(31)));
    }
}
