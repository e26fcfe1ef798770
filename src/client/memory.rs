//! In-memory reference implementation of [`ObjectClient`]
//!
//! Objects are stored per bucket in an ordered map keyed by `(key, version_id)`, where the current version of a key
//! always has an empty version id. Writing an existing key moves the previous current version under a fresh version
//! id. Buckets are created on first write; reading from a missing bucket reports the object as not found.
//!
//! Multipart uploads are synthesized with standalone part objects (see [`super::part_key`]), exactly as a provider
//! without native multipart support would.

use super::{
    check_cancelled, part_key, part_prefix, should_ignore, AbortMultipartUploadOptions,
    AppendToObjectOptions, CompleteMultipartUploadOptions, CopyObjectOptions,
    CreateMultipartUploadOptions, DeleteDirectoryOptions, DeleteObjectVersionsOptions,
    DeleteObjectsOptions, GetBucketLockingStatusOptions, GetObjectAttrsOptions, GetObjectOptions,
    IterateFn, IterateObjectsOptions, ListPartsOptions, ObjectClient, PutObjectOptions,
    SetObjectLockOptions, UploadPartCopyOptions, UploadPartOptions,
};
use crate::error::{Error, Result};
use crate::model::{
    BucketLockingStatus, ByteRange, LockType, Object, ObjectAttrs, ObjectLock, Part, Precondition,
    Provider,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Source of the current time, injectable so lock expiry can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Composite identity of a stored object; the current version has an empty `version_id`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ObjectId {
    key: String,
    version_id: String,
}

impl ObjectId {
    fn current(key: &str) -> Self {
        Self {
            key: key.to_string(),
            version_id: String::new(),
        }
    }

    fn version(key: &str, version_id: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            version_id: version_id.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    attrs: ObjectAttrs,
    body: Bytes,
    lock: Option<ObjectLock>,
    part_number: Option<u32>,
}

type Bucket = BTreeMap<ObjectId, StoredObject>;

struct WriteRequest<'a> {
    bucket: &'a str,
    key: &'a str,
    body: Bytes,
    precondition: &'a Precondition,
    lock: Option<&'a ObjectLock>,
    part_number: Option<u32>,
}

/// Reference [`ObjectClient`] holding every object in process memory
pub struct InMemoryClient {
    provider: Provider,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryClient {
    /// Create an empty store reporting the given provider
    pub fn new(provider: Provider) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock))
    }

    pub fn with_clock(provider: Provider, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Current keys of a bucket, in key order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .map(|b| {
                b.keys()
                    .filter(|id| id.version_id.is_empty())
                    .map(|id| id.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Body of the current version of a key
    pub fn body(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|b| b.get(&ObjectId::current(key)))
            .map(|o| o.body.clone())
    }

    /// Version ids of the non-current versions of a key
    pub fn versions(&self, bucket: &str, key: &str) -> Vec<String> {
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .map(|b| {
                b.keys()
                    .filter(|id| id.key == key && !id.version_id.is_empty())
                    .map(|id| id.version_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lookup(
        buckets: &HashMap<String, Bucket>,
        bucket: &str,
        id: &ObjectId,
    ) -> Result<StoredObject> {
        buckets
            .get(bucket)
            .and_then(|b| b.get(id))
            .cloned()
            .ok_or_else(|| Error::not_found("object", &id.key))
    }

    fn write_locked(
        &self,
        buckets: &mut HashMap<String, Bucket>,
        req: WriteRequest<'_>,
    ) -> Result<ObjectAttrs> {
        let now = self.clock.now();
        let bucket = buckets.entry(req.bucket.to_string()).or_default();
        let current = ObjectId::current(req.key);

        match (req.precondition, bucket.get(&current)) {
            (Precondition::OnlyIfAbsent, Some(_)) => return Err(Error::PreconditionFailed),
            (Precondition::IfMatch(_), None) => return Err(Error::PreconditionFailed),
            (Precondition::IfMatch(cas), Some(existing))
                if existing.attrs.cas.as_deref() != Some(cas.as_str()) =>
            {
                return Err(Error::PreconditionFailed)
            }
            _ => {}
        }

        let lock = match req.lock {
            Some(lock) if lock.lock_type == LockType::Compliance => Some(lock.clone()),
            Some(lock) => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported lock type {:?}",
                    lock.lock_type
                )))
            }
            None => None,
        };

        if let Some(mut previous) = bucket.remove(&current) {
            let version_id = uuid::Uuid::new_v4().to_string();
            previous.attrs.version_id = Some(version_id.clone());
            bucket.insert(ObjectId::version(req.key, Some(&version_id)), previous);
        }

        let attrs = ObjectAttrs {
            key: req.key.to_string(),
            etag: Some(uuid::Uuid::new_v4().simple().to_string()),
            size: Some(req.body.len() as u64),
            last_modified: Some(now),
            cas: Some(uuid::Uuid::new_v4().to_string()),
            version_id: None,
            lock: lock.clone(),
        };

        bucket.insert(
            current,
            StoredObject {
                attrs: attrs.clone(),
                body: req.body,
                lock,
                part_number: req.part_number,
            },
        );

        Ok(attrs)
    }

    /// Remove the matching ids, skipping any protected by an active lock.
    ///
    /// Returns the first lock violation after every other target has been removed.
    fn remove_locked<F>(&self, bucket: &mut Bucket, mut matches: F) -> Result<()>
    where
        F: FnMut(&ObjectId) -> bool,
    {
        let now = self.clock.now();
        let mut first_err = None;

        let targets: Vec<ObjectId> = bucket.keys().filter(|id| matches(id)).cloned().collect();
        for id in targets {
            let locked = bucket
                .get(&id)
                .and_then(|o| o.lock.as_ref())
                .is_some_and(|lock| lock.is_active(now));

            if locked {
                first_err.get_or_insert(Error::LockedObject { key: id.key.clone() });
                continue;
            }

            bucket.remove(&id);
        }

        first_err.map_or(Ok(()), Err)
    }

    fn slice(body: &Bytes, range: Option<ByteRange>) -> Result<Bytes> {
        let Some(range) = range else {
            return Ok(body.clone());
        };

        range.validate()?;

        let len = body.len() as u64;
        if len == 0 && range.start == 0 {
            return Ok(Bytes::new());
        }

        if range.start >= len {
            return Err(Error::InvalidByteRange {
                start: range.start,
                end: range.end,
            });
        }

        let end = if range.is_open() {
            len - 1
        } else {
            range.end.min(len - 1)
        };

        Ok(body.slice(range.start as usize..=end as usize))
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new(Provider::None)
    }
}

#[async_trait]
impl ObjectClient for InMemoryClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn get_object(&self, cancel: &CancellationToken, opts: GetObjectOptions) -> Result<Object> {
        check_cancelled(cancel)?;

        let stored = {
            let buckets = self.buckets.lock();
            let id = ObjectId::version(&opts.key, opts.version_id.as_deref());
            Self::lookup(&buckets, &opts.bucket, &id)?
        };

        let body = Self::slice(&stored.body, opts.byte_range)?;

        let mut attrs = stored.attrs;
        attrs.size = Some(body.len() as u64);

        Ok(Object {
            attrs,
            body: Box::new(Cursor::new(body)),
        })
    }

    async fn get_object_attrs(
        &self,
        cancel: &CancellationToken,
        opts: GetObjectAttrsOptions,
    ) -> Result<ObjectAttrs> {
        check_cancelled(cancel)?;

        let buckets = self.buckets.lock();
        let id = ObjectId::version(&opts.key, opts.version_id.as_deref());
        Self::lookup(&buckets, &opts.bucket, &id).map(|o| o.attrs)
    }

    async fn put_object(&self, cancel: &CancellationToken, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.bucket,
                key: &opts.key,
                body: opts.body,
                precondition: &opts.precondition,
                lock: opts.lock.as_ref(),
                part_number: None,
            },
        )
    }

    async fn copy_object(&self, cancel: &CancellationToken, opts: CopyObjectOptions) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let source = Self::lookup(
            &buckets,
            &opts.source_bucket,
            &ObjectId::current(&opts.source_key),
        )?;

        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.destination_bucket,
                key: &opts.destination_key,
                body: source.body,
                precondition: &Precondition::None,
                lock: None,
                part_number: None,
            },
        )?;

        Ok(())
    }

    async fn append_to_object(
        &self,
        cancel: &CancellationToken,
        opts: AppendToObjectOptions,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let body = match Self::lookup(&buckets, &opts.bucket, &ObjectId::current(&opts.key)) {
            Ok(existing) => {
                let mut joined = BytesMut::with_capacity(existing.body.len() + opts.body.len());
                joined.extend_from_slice(&existing.body);
                joined.extend_from_slice(&opts.body);
                joined.freeze()
            }
            Err(err) if err.is_not_found() => opts.body,
            Err(err) => return Err(err),
        };

        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.bucket,
                key: &opts.key,
                body,
                precondition: &Precondition::None,
                lock: None,
                part_number: None,
            },
        )?;

        Ok(())
    }

    async fn delete_objects(&self, cancel: &CancellationToken, opts: DeleteObjectsOptions) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&opts.bucket) else {
            return Ok(());
        };

        let keys: HashSet<&str> = opts.keys.iter().map(String::as_str).collect();
        self.remove_locked(bucket, |id| {
            id.version_id.is_empty() && keys.contains(id.key.as_str())
        })
    }

    async fn delete_object_versions(
        &self,
        cancel: &CancellationToken,
        opts: DeleteObjectVersionsOptions,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(opts.bucket.clone()).or_default();

        let mut first_err = None;
        let mut targets = HashSet::new();
        for version in &opts.versions {
            let id = ObjectId::version(&version.key, Some(&version.version_id));
            if !bucket.contains_key(&id) {
                first_err.get_or_insert(Error::not_found("object version", &version.key));
                continue;
            }
            targets.insert(id);
        }

        let removed = self.remove_locked(bucket, |id| targets.contains(id));

        match (first_err, removed) {
            (Some(err), _) => Err(err),
            (None, result) => result,
        }
    }

    async fn delete_directory(
        &self,
        cancel: &CancellationToken,
        opts: DeleteDirectoryOptions,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&opts.bucket) else {
            return Ok(());
        };

        self.remove_locked(bucket, |id| {
            id.key.starts_with(&opts.prefix) && (opts.versions || id.version_id.is_empty())
        })
    }

    async fn iterate_objects(
        &self,
        cancel: &CancellationToken,
        opts: IterateObjectsOptions,
        func: &mut IterateFn<'_>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        opts.validate()?;

        // Snapshot so that the callback may call back into the client
        let listed: Vec<ObjectAttrs> = {
            let buckets = self.buckets.lock();
            let Some(bucket) = buckets.get(&opts.bucket) else {
                return Ok(());
            };

            let mut seen = HashSet::new();
            let mut listed = Vec::new();

            for (id, object) in bucket.range(ObjectId::current(&opts.prefix)..) {
                if !id.key.starts_with(&opts.prefix) {
                    break;
                }

                if !opts.versions && !id.version_id.is_empty() {
                    continue;
                }

                if should_ignore(&id.key, &opts.include, &opts.exclude) {
                    continue;
                }

                let attrs = match collapse(&id.key, &opts.prefix, &opts.delimiter) {
                    Some(stub) => ObjectAttrs::dir_stub(stub),
                    None => object.attrs.clone(),
                };

                if seen.insert((attrs.key.clone(), attrs.version_id.clone())) {
                    listed.push(attrs);
                }
            }

            listed
        };

        for attrs in listed {
            check_cancelled(cancel)?;
            func(attrs).await?;
        }

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CreateMultipartUploadOptions,
    ) -> Result<String> {
        check_cancelled(cancel)?;

        let id = uuid::Uuid::new_v4().to_string();
        debug!(bucket = %opts.bucket, key = %opts.key, upload_id = %id, "Created multipart upload");

        Ok(id)
    }

    async fn list_parts(&self, cancel: &CancellationToken, opts: ListPartsOptions) -> Result<Vec<Part>> {
        check_cancelled(cancel)?;

        let prefix = part_prefix(&opts.upload_id, &opts.key);
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(&opts.bucket) else {
            return Ok(Vec::new());
        };

        let mut parts: Vec<Part> = bucket
            .iter()
            .filter(|(id, _)| id.version_id.is_empty() && id.key.starts_with(&prefix))
            .map(|(id, object)| Part {
                id: id.key.clone(),
                number: object.part_number.unwrap_or_default(),
                size: object.body.len() as u64,
            })
            .collect();

        parts.sort_by_key(|p| p.number);

        Ok(parts)
    }

    async fn upload_part(&self, cancel: &CancellationToken, opts: UploadPartOptions) -> Result<Part> {
        check_cancelled(cancel)?;

        let key = part_key(&opts.upload_id, &opts.key);
        let size = opts.body.len() as u64;

        let mut buckets = self.buckets.lock();
        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.bucket,
                key: &key,
                body: opts.body,
                precondition: &Precondition::None,
                lock: None,
                part_number: Some(opts.number),
            },
        )?;

        Ok(Part {
            id: key,
            number: opts.number,
            size,
        })
    }

    async fn upload_part_copy(
        &self,
        cancel: &CancellationToken,
        opts: UploadPartCopyOptions,
    ) -> Result<Part> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let source = Self::lookup(
            &buckets,
            &opts.source_bucket,
            &ObjectId::current(&opts.source_key),
        )?;

        let body = Self::slice(&source.body, opts.byte_range)?;
        let size = body.len() as u64;
        let key = part_key(&opts.upload_id, &opts.destination_key);

        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.destination_bucket,
                key: &key,
                body,
                precondition: &Precondition::None,
                lock: None,
                part_number: Some(opts.number),
            },
        )?;

        Ok(Part {
            id: key,
            number: opts.number,
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CompleteMultipartUploadOptions,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();

        let mut body = BytesMut::new();
        for part in &opts.parts {
            let stored = Self::lookup(&buckets, &opts.bucket, &ObjectId::current(&part.id))
                .map_err(|_| Error::not_found("part", &part.id))?;
            body.extend_from_slice(&stored.body);
        }

        self.write_locked(
            &mut buckets,
            WriteRequest {
                bucket: &opts.bucket,
                key: &opts.key,
                body: body.freeze(),
                precondition: &opts.precondition,
                lock: opts.lock.as_ref(),
                part_number: None,
            },
        )?;

        let prefix = part_prefix(&opts.upload_id, &opts.key);
        if let Some(bucket) = buckets.get_mut(&opts.bucket) {
            bucket.retain(|id, _| !id.key.starts_with(&prefix));
        }

        debug!(
            bucket = %opts.bucket,
            key = %opts.key,
            parts = opts.parts.len(),
            "Completed multipart upload"
        );

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: AbortMultipartUploadOptions,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let prefix = part_prefix(&opts.upload_id, &opts.key);
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&opts.bucket) else {
            return Ok(());
        };

        self.remove_locked(bucket, |id| id.key.starts_with(&prefix))
    }

    async fn get_bucket_locking_status(
        &self,
        cancel: &CancellationToken,
        _opts: GetBucketLockingStatusOptions,
    ) -> Result<BucketLockingStatus> {
        check_cancelled(cancel)?;

        Ok(BucketLockingStatus { enabled: true })
    }

    async fn set_object_lock(&self, cancel: &CancellationToken, opts: SetObjectLockOptions) -> Result<()> {
        check_cancelled(cancel)?;

        let mut buckets = self.buckets.lock();
        let id = ObjectId::version(&opts.key, opts.version_id.as_deref());
        let object = buckets
            .get_mut(&opts.bucket)
            .and_then(|b| b.get_mut(&id))
            .ok_or_else(|| Error::not_found("object", &opts.key))?;

        object.lock = Some(opts.lock.clone());
        object.attrs.lock = Some(opts.lock);

        Ok(())
    }
}

/// Directory stub for `key` when a delimiter occurs after `prefix`.
///
/// The stub is the prefix plus everything up to and including the first delimiter of the remainder, matching the
/// common-prefix grouping of hierarchical listings.
fn collapse(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }

    let trimmed = &key[prefix.len()..];
    let idx = trimmed.find(delimiter)?;

    Some(format!("{}{}", prefix, &trimmed[..idx + delimiter.len()]))
}
