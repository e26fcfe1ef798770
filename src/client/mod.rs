//! Provider agnostic object storage client contract
//!
//! Every cloud adapter implements [`ObjectClient`]; the orchestrators in [`crate::transfer`] only ever talk to this
//! trait, never to a concrete provider.
//!
//! # Multipart emulation
//!
//! Providers without native multipart support synthesize it by uploading each part as a standalone object under a
//! deterministic key (see [`part_key`]) and listing/assembling them on completion. Such providers return
//! [`NO_UPLOAD_ID`] from [`ObjectClient::create_multipart_upload`].
//!
//! # Example
//!
//! ```ignore
//! use cirrus::client::{GetObjectOptions, ObjectClient};
//! use cirrus::client::memory::InMemoryClient;
//! use cirrus::model::Provider;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = InMemoryClient::new(Provider::Aws);
//! let object = client
//!     .get_object(&CancellationToken::new(), GetObjectOptions::new("bucket", "key"))
//!     .await?;
//! let data = object.read_all().await?;
//! ```

pub mod memory;
pub mod rate_limited;

use crate::error::{Error, Result};
use crate::model::{
    BucketLockingStatus, ByteRange, Object, ObjectAttrs, ObjectLock, Part, Precondition, Provider,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upload id used by providers which do not issue upload ids
pub const NO_UPLOAD_ID: &str = "";

/// Maximum number of parts in a single multipart upload
pub const MAX_UPLOAD_PARTS: usize = 10_000;

/// Callback invoked once per listed object.
///
/// Returning an error stops the iteration; the error is handed back to the caller of
/// [`ObjectClient::iterate_objects`] unchanged.
pub type IterateFn<'a> = dyn FnMut(ObjectAttrs) -> BoxFuture<'a, Result<()>> + Send + 'a;

/// Shared, dynamically dispatched client handle
pub type SharedClient = Arc<dyn ObjectClient>;

#[derive(Debug, Clone, Default)]
pub struct GetObjectOptions {
    pub bucket: String,
    pub key: String,

    /// Specific version to read; the current version when `None`
    pub version_id: Option<String>,

    /// Inclusive range to read; the whole object when `None`
    pub byte_range: Option<ByteRange>,
}

impl GetObjectOptions {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, byte_range: ByteRange) -> Self {
        self.byte_range = Some(byte_range);
        self
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectAttrsOptions {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl GetObjectAttrsOptions {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub precondition: Precondition,
    pub lock: Option<ObjectLock>,
}

impl PutObjectOptions {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn with_lock(mut self, lock: ObjectLock) -> Self {
        self.lock = Some(lock);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyObjectOptions {
    pub destination_bucket: String,
    pub destination_key: String,
    pub source_bucket: String,
    pub source_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct AppendToObjectOptions {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteObjectsOptions {
    pub bucket: String,
    pub keys: Vec<String>,
}

/// A key paired with one of its version ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionedKey {
    pub key: String,
    pub version_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteObjectVersionsOptions {
    pub bucket: String,
    pub versions: Vec<VersionedKey>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteDirectoryOptions {
    pub bucket: String,
    pub prefix: String,

    /// Also remove non-current versions
    pub versions: bool,
}

/// Listing options; `include` and `exclude` are mutually exclusive
#[derive(Debug, Clone, Default)]
pub struct IterateObjectsOptions {
    pub bucket: String,
    pub prefix: String,

    /// Groups keys into directory stubs, e.g. `/` lists a single "directory" level
    pub delimiter: String,

    /// Only list keys matching one of these expressions
    pub include: Vec<Regex>,

    /// Skip keys matching any of these expressions
    pub exclude: Vec<Regex>,

    /// Also list non-current versions
    pub versions: bool,
}

impl IterateObjectsOptions {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Fails fast when both include and exclude filters are set
    pub fn validate(&self) -> Result<()> {
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(Error::MutuallyExclusiveFilters);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateMultipartUploadOptions {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListPartsOptions {
    pub bucket: String,
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPartOptions {
    pub bucket: String,
    pub upload_id: String,
    pub key: String,

    /// 1-based number used to order parts on completion
    pub number: u32,

    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPartCopyOptions {
    pub destination_bucket: String,
    pub upload_id: String,
    pub destination_key: String,
    pub source_bucket: String,
    pub source_key: String,
    pub number: u32,

    /// Range of the source object to copy; the whole object when `None`
    pub byte_range: Option<ByteRange>,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadOptions {
    pub bucket: String,
    pub upload_id: String,
    pub key: String,

    /// Parts in the order they are assembled
    pub parts: Vec<Part>,

    pub precondition: Precondition,
    pub lock: Option<ObjectLock>,
}

#[derive(Debug, Clone, Default)]
pub struct AbortMultipartUploadOptions {
    pub bucket: String,
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetBucketLockingStatusOptions {
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct SetObjectLockOptions {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub lock: ObjectLock,
}

/// Unified object storage client.
///
/// Implementations translate provider pagination into a single iteration callback, map provider error codes onto
/// [`Error`], and never retry internally. Every method observes the supplied cancellation token.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Provider this client talks to
    fn provider(&self) -> Provider;

    /// Read an object, or a range of it.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if the object (or version) does not exist
    /// * [`Error::InvalidByteRange`] for a range whose end precedes its start
    async fn get_object(&self, cancel: &CancellationToken, opts: GetObjectOptions) -> Result<Object>;

    /// Metadata only lookup
    async fn get_object_attrs(
        &self,
        cancel: &CancellationToken,
        opts: GetObjectAttrsOptions,
    ) -> Result<ObjectAttrs>;

    /// Write an object, evaluating the precondition atomically before the write becomes visible.
    ///
    /// Writing an existing key demotes the prior current version to a non-current one.
    ///
    /// # Errors
    ///
    /// * [`Error::PreconditionFailed`] if the precondition does not hold
    async fn put_object(&self, cancel: &CancellationToken, opts: PutObjectOptions) -> Result<ObjectAttrs>;

    /// Single request, same provider copy
    async fn copy_object(&self, cancel: &CancellationToken, opts: CopyObjectOptions) -> Result<()>;

    /// Create the object if absent, otherwise append to it.
    ///
    /// At most one concurrent appender per key is supported.
    async fn append_to_object(
        &self,
        cancel: &CancellationToken,
        opts: AppendToObjectOptions,
    ) -> Result<()>;

    /// Delete the current version of each key; missing keys are skipped
    async fn delete_objects(&self, cancel: &CancellationToken, opts: DeleteObjectsOptions) -> Result<()>;

    /// Delete specific versions
    async fn delete_object_versions(
        &self,
        cancel: &CancellationToken,
        opts: DeleteObjectVersionsOptions,
    ) -> Result<()>;

    /// Delete every object under a prefix
    async fn delete_directory(
        &self,
        cancel: &CancellationToken,
        opts: DeleteDirectoryOptions,
    ) -> Result<()>;

    /// Stream the attributes of every matching object to `func`.
    ///
    /// With a non-empty delimiter, keys nested below the first delimiter after the prefix are collapsed into a
    /// single directory stub which is reported once.
    ///
    /// # Errors
    ///
    /// * [`Error::MutuallyExclusiveFilters`] if both include and exclude filters are set
    /// * any error returned by `func`, unchanged
    async fn iterate_objects(
        &self,
        cancel: &CancellationToken,
        opts: IterateObjectsOptions,
        func: &mut IterateFn<'_>,
    ) -> Result<()>;

    /// Begin a multipart upload, returning its id (possibly [`NO_UPLOAD_ID`])
    async fn create_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CreateMultipartUploadOptions,
    ) -> Result<String>;

    /// Parts uploaded so far for an in-progress upload
    async fn list_parts(&self, cancel: &CancellationToken, opts: ListPartsOptions) -> Result<Vec<Part>>;

    async fn upload_part(&self, cancel: &CancellationToken, opts: UploadPartOptions) -> Result<Part>;

    /// Server side copy of (a range of) an existing object into a part
    async fn upload_part_copy(
        &self,
        cancel: &CancellationToken,
        opts: UploadPartCopyOptions,
    ) -> Result<Part>;

    /// Assemble the given parts, in the given order, into the destination object
    async fn complete_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CompleteMultipartUploadOptions,
    ) -> Result<()>;

    /// Discard an in-progress upload and any parts it holds
    async fn abort_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: AbortMultipartUploadOptions,
    ) -> Result<()>;

    async fn get_bucket_locking_status(
        &self,
        _cancel: &CancellationToken,
        _opts: GetBucketLockingStatusOptions,
    ) -> Result<BucketLockingStatus> {
        Err(Error::Unsupported {
            provider: self.provider().to_string(),
            operation: "get_bucket_locking_status".to_string(),
        })
    }

    async fn set_object_lock(&self, _cancel: &CancellationToken, _opts: SetObjectLockOptions) -> Result<()> {
        Err(Error::Unsupported {
            provider: self.provider().to_string(),
            operation: "set_object_lock".to_string(),
        })
    }
}

/// Key under which a synthesized multipart upload stores one part.
///
/// All parts of an upload share the [`part_prefix`], allowing them to be listed and cleaned up together.
pub fn part_key(upload_id: &str, key: &str) -> String {
    format!("{}-{}", part_prefix(upload_id, key), uuid::Uuid::new_v4())
}

/// Common prefix of every part key of an upload
pub fn part_prefix(upload_id: &str, key: &str) -> String {
    format!("{}-mpu-{}", key, upload_id)
}

/// Whether a key is filtered out by include/exclude expressions.
///
/// Expressions are matched against both the full key and its final path component.
pub fn should_ignore(key: &str, include: &[Regex], exclude: &[Regex]) -> bool {
    let base = key.rsplit('/').next().unwrap_or(key);
    let matches = |regexes: &[Regex]| regexes.iter().any(|r| r.is_match(key) || r.is_match(base));

    (!include.is_empty() && !matches(include)) || (!exclude.is_empty() && matches(exclude))
}

/// Check for cancellation before starting a client operation
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    Ok(())
}
