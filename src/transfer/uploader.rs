//! Concurrent multipart uploader
//!
//! Parts are transferred on a bounded worker pool and may complete in any order; [`MPUploader::commit`] sorts them by
//! number before asking the provider to assemble the object.
//!
//! # Example
//!
//! ```ignore
//! let uploader = MPUploader::<()>::new(client, &cancel, MPUploaderOptions::new("bucket", "key")).await?;
//! for chunk in chunks {
//!     uploader.upload(chunk).await?;
//! }
//! uploader.commit().await?;
//! ```

use crate::client::{
    AbortMultipartUploadOptions, CompleteMultipartUploadOptions, CreateMultipartUploadOptions,
    SharedClient, UploadPartOptions, MAX_UPLOAD_PARTS,
};
use crate::error::{Error, Result};
use crate::model::{ObjectLock, Part, Precondition};
use crate::pool::Pool;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of concurrent part uploads
pub const DEFAULT_PART_UPLOAD_WORKERS: usize = 4;

/// Callback run, one part at a time, once a part has been uploaded.
///
/// Receives the metadata passed to [`MPUploader::upload_with_meta`]. Returning an error fails the whole upload.
pub type OnPartComplete<M> = Arc<dyn Fn(M, &Part) -> Result<()> + Send + Sync>;

pub struct MPUploaderOptions<M> {
    pub bucket: String,
    pub key: String,

    /// Existing upload to continue; a new upload is created when `None`
    pub upload_id: Option<String>,

    /// Parts already uploaded to `upload_id`
    pub parts: Vec<Part>,

    /// Number of concurrent part uploads, zero for the default
    pub part_upload_workers: usize,

    /// Maximum number of parts, zero for the provider limit of 10,000
    pub max_upload_parts: usize,

    /// Precondition evaluated when the upload is completed
    pub precondition: Precondition,

    /// Lock applied to the completed object
    pub lock: Option<ObjectLock>,

    pub on_part_complete: Option<OnPartComplete<M>>,
}

impl<M> MPUploaderOptions<M> {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }
}

impl<M> Default for MPUploaderOptions<M> {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key: String::new(),
            upload_id: None,
            parts: Vec::new(),
            part_upload_workers: 0,
            max_upload_parts: 0,
            precondition: Precondition::None,
            lock: None,
            on_part_complete: None,
        }
    }
}

/// Drives a single multipart upload
pub struct MPUploader<M = ()> {
    client: SharedClient,
    cancel: CancellationToken,
    bucket: String,
    key: String,
    upload_id: String,
    precondition: Precondition,
    lock: Option<ObjectLock>,
    max_upload_parts: usize,
    parts: Arc<Mutex<Vec<Part>>>,
    number: AtomicU32,
    on_part_complete: Option<OnPartComplete<M>>,
    pool: Pool,
    stopped: AtomicBool,
}

impl<M: Send + 'static> MPUploader<M> {
    /// Create an uploader, starting a new multipart upload unless `opts.upload_id` continues an existing one.
    ///
    /// When continuing, part numbers carry on from the highest existing number.
    pub async fn new(
        client: SharedClient,
        cancel: &CancellationToken,
        opts: MPUploaderOptions<M>,
    ) -> Result<Self> {
        let upload_id = match opts.upload_id {
            Some(id) => id,
            None => client
                .create_multipart_upload(
                    cancel,
                    CreateMultipartUploadOptions {
                        bucket: opts.bucket.clone(),
                        key: opts.key.clone(),
                    },
                )
                .await
                .map_err(|e| e.context("failed to create multipart upload"))?,
        };

        let workers = match opts.part_upload_workers {
            0 => DEFAULT_PART_UPLOAD_WORKERS,
            n => n,
        };

        let max_upload_parts = match opts.max_upload_parts {
            0 => MAX_UPLOAD_PARTS,
            n => n,
        };

        let number = opts.parts.iter().map(|p| p.number).max().unwrap_or(0);

        debug!(
            bucket = %opts.bucket,
            key = %opts.key,
            upload_id = %upload_id,
            resumed_parts = opts.parts.len(),
            "Created multipart uploader"
        );

        Ok(Self {
            client,
            cancel: cancel.clone(),
            bucket: opts.bucket,
            key: opts.key,
            upload_id,
            precondition: opts.precondition,
            lock: opts.lock,
            max_upload_parts,
            parts: Arc::new(Mutex::new(opts.parts)),
            number: AtomicU32::new(number),
            on_part_complete: opts.on_part_complete,
            pool: Pool::new(workers, cancel),
            stopped: AtomicBool::new(false),
        })
    }

    /// Id of the upload; may be empty for providers without upload ids
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Snapshot of the parts uploaded so far, in completion order
    pub fn parts(&self) -> Vec<Part> {
        self.parts.lock().clone()
    }

    /// Token cancelled once the uploader fails or stops
    pub fn token(&self) -> &CancellationToken {
        self.pool.token()
    }

    /// First error recorded by a part upload or the completion callback
    pub fn error(&self) -> Option<Error> {
        self.pool.error()
    }

    /// Upload `body` as the next part.
    ///
    /// Calls must not be made concurrently; part numbers are assigned in call order.
    pub async fn upload(&self, body: Bytes) -> Result<()>
    where
        M: Default,
    {
        self.upload_with_meta(body, M::default()).await
    }

    /// Upload `body` as the next part, handing `meta` to the completion callback once it has been uploaded.
    ///
    /// Fails with [`Error::ExceededMaxPartCount`] before assigning a number once the part limit is reached.
    pub async fn upload_with_meta(&self, body: Bytes, meta: M) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::AlreadyStopped);
        }

        let number = self
            .number
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                ((n as usize) < self.max_upload_parts).then_some(n + 1)
            })
            .map_err(|_| Error::ExceededMaxPartCount {
                max: self.max_upload_parts,
            })?
            + 1;

        let client = self.client.clone();
        let parts = self.parts.clone();
        let callback = self.on_part_complete.clone();
        let opts = UploadPartOptions {
            bucket: self.bucket.clone(),
            upload_id: self.upload_id.clone(),
            key: self.key.clone(),
            number,
            body,
        };

        self.pool
            .queue(move |token| async move {
                let size = opts.body.len();
                let part = client
                    .upload_part(&token, opts)
                    .await
                    .map_err(|e| e.context(format!("failed to upload part {}", number)))?;

                debug!(number, size, "Uploaded part");

                // Parts may be uploaded concurrently, but are completed one at a time
                let mut parts = parts.lock();
                parts.push(part.clone());

                match callback {
                    Some(callback) => callback(meta, &part),
                    None => Ok(()),
                }
            })
            .await
    }

    /// Stop the worker pool without committing or aborting, waiting for in-flight parts.
    ///
    /// Only the first call does any work, later calls fail with [`Error::AlreadyStopped`].
    pub async fn stop(&self) -> Result<()> {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStopped);
        }

        self.pool.stop().await
    }

    /// Stop the pool and discard the upload along with every part it holds.
    ///
    /// Safe to call after a failed [`MPUploader::commit`].
    pub async fn abort(&self) -> Result<()> {
        self.abort_with(&self.cancel).await
    }

    async fn abort_with(&self, cancel: &CancellationToken) -> Result<()> {
        match self.stop().await {
            Ok(()) => {}
            Err(err) if err.is_already_stopped() => {}
            Err(err) => debug!(error = %err, "Ignoring part failure while aborting"),
        }

        self.client
            .abort_multipart_upload(
                cancel,
                AbortMultipartUploadOptions {
                    bucket: self.bucket.clone(),
                    upload_id: self.upload_id.clone(),
                    key: self.key.clone(),
                },
            )
            .await
            .map_err(|e| e.context("failed to abort multipart upload"))
    }

    /// Stop the pool and assemble the uploaded parts, ordered by number
    pub async fn commit(&self) -> Result<()> {
        self.stop().await?;

        let parts = {
            let mut parts = self.parts.lock();
            parts.sort_by_key(|p| p.number);
            parts.clone()
        };

        debug!(
            bucket = %self.bucket,
            key = %self.key,
            parts = parts.len(),
            "Committing multipart upload"
        );

        self.client
            .complete_multipart_upload(
                &self.cancel,
                CompleteMultipartUploadOptions {
                    bucket: self.bucket.clone(),
                    upload_id: self.upload_id.clone(),
                    key: self.key.clone(),
                    parts,
                    precondition: self.precondition.clone(),
                    lock: self.lock.clone(),
                },
            )
            .await
            .map_err(|e| e.context("failed to complete multipart upload"))
    }

    /// Abort, logging rather than returning any failure; used to clean up after a primary error.
    ///
    /// Runs under a fresh token since the primary error has usually cancelled the uploader's own.
    pub(crate) async fn abort_quietly(&self) {
        if let Err(err) = self.abort_with(&CancellationToken::new()).await {
            warn!(
                bucket = %self.bucket,
                key = %self.key,
                upload_id = %self.upload_id,
                error = %err,
                "Failed to abort multipart upload, parts may be left behind"
            );
        }
    }
}
