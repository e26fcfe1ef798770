/*!
 * Bandwidth throttled client decorator using token bucket rate limiting
 */

use super::{
    AbortMultipartUploadOptions, AppendToObjectOptions, CompleteMultipartUploadOptions,
    CopyObjectOptions, CreateMultipartUploadOptions, DeleteDirectoryOptions,
    DeleteObjectVersionsOptions, DeleteObjectsOptions, GetBucketLockingStatusOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFn, IterateObjectsOptions, ListPartsOptions,
    ObjectClient, PutObjectOptions, SetObjectLockOptions, SharedClient, UploadPartCopyOptions,
    UploadPartOptions,
};
use crate::error::{Error, Result};
use crate::model::{BucketLockingStatus, Object, ObjectAttrs, Part, Provider};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use pin_project::pin_project;
use std::io;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Tokens replenished per second; each token is worth `bytes_per_token` bytes
const TOKENS_PER_SEC: u32 = 1000;

/// Bandwidth rate limiter using token bucket algorithm
#[derive(Clone)]
pub struct BandwidthLimiter {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    bytes_per_token: u64,
}

impl BandwidthLimiter {
    /// Create a new bandwidth limiter
    ///
    /// # Arguments
    /// * `max_bytes_per_sec` - Maximum bytes per second (0 = unlimited)
    pub fn new(max_bytes_per_sec: u64) -> Self {
        let Some(tokens_per_sec) = NonZeroU32::new(TOKENS_PER_SEC) else {
            return Self::unlimited();
        };

        if max_bytes_per_sec == 0 {
            return Self::unlimited();
        }

        // Guard against very low bandwidth values where integer division would yield 0
        let bytes_per_token = (max_bytes_per_sec / TOKENS_PER_SEC as u64).max(1);

        Self {
            limiter: Some(Arc::new(RateLimiter::direct(Quota::per_second(tokens_per_sec)))),
            bytes_per_token,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            limiter: None,
            bytes_per_token: 0,
        }
    }

    /// Check if bandwidth limiting is enabled
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until `bytes` may be transferred.
    ///
    /// Requests larger than the bucket's burst are admitted one burst at a time.
    pub async fn wait_for_capacity(&self, cancel: &CancellationToken, bytes: u64) -> Result<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        let mut tokens = bytes.div_ceil(self.bytes_per_token).max(1);
        while tokens > 0 {
            let batch = tokens.min(TOKENS_PER_SEC as u64) as u32;
            tokens -= batch as u64;

            let Some(batch) = NonZeroU32::new(batch) else {
                break;
            };

            tokio::select! {
                ready = limiter.until_n_ready(batch) => {
                    ready.map_err(|err| Error::InvalidArgument(err.to_string()))?;
                }
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        Ok(())
    }
}

/// Reader which waits for bandwidth after every read of the wrapped body
#[pin_project]
pub struct RateLimitedReader<R> {
    #[pin]
    inner: R,
    limiter: BandwidthLimiter,
    cancel: CancellationToken,
    pending: Option<BoxFuture<'static, Result<()>>>,
}

impl<R> RateLimitedReader<R> {
    pub fn new(inner: R, limiter: BandwidthLimiter, cancel: CancellationToken) -> Self {
        Self {
            inner,
            limiter,
            cancel,
            pending: None,
        }
    }
}

impl<R: AsyncRead> AsyncRead for RateLimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();

        if let Some(wait) = this.pending.as_mut() {
            let waited = futures::ready!(wait.poll_unpin(cx));
            *this.pending = None;
            waited.map_err(io::Error::from)?;
        }

        let before = buf.filled().len();
        futures::ready!(this.inner.poll_read(cx, buf))?;
        let read = (buf.filled().len() - before) as u64;

        if read > 0 && this.limiter.is_enabled() {
            let limiter = this.limiter.clone();
            let cancel = this.cancel.clone();
            *this.pending = Some(
                async move { limiter.wait_for_capacity(&cancel, read).await }.boxed(),
            );
        }

        Poll::Ready(Ok(()))
    }
}

/// [`ObjectClient`] that throttles object data through a shared [`BandwidthLimiter`].
///
/// `get_object`, `put_object`, `append_to_object` and `upload_part` are throttled; every other operation is passed
/// straight through.
pub struct RateLimitedClient {
    inner: SharedClient,
    limiter: BandwidthLimiter,
}

impl RateLimitedClient {
    pub fn new(inner: SharedClient, limiter: BandwidthLimiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl ObjectClient for RateLimitedClient {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn get_object(&self, cancel: &CancellationToken, opts: GetObjectOptions) -> Result<Object> {
        let object = self.inner.get_object(cancel, opts).await?;

        Ok(Object {
            attrs: object.attrs,
            body: Box::new(RateLimitedReader::new(
                object.body,
                self.limiter.clone(),
                cancel.clone(),
            )),
        })
    }

    async fn get_object_attrs(
        &self,
        cancel: &CancellationToken,
        opts: GetObjectAttrsOptions,
    ) -> Result<ObjectAttrs> {
        self.inner.get_object_attrs(cancel, opts).await
    }

    async fn put_object(&self, cancel: &CancellationToken, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        self.limiter
            .wait_for_capacity(cancel, opts.body.len() as u64)
            .await?;
        self.inner.put_object(cancel, opts).await
    }

    async fn copy_object(&self, cancel: &CancellationToken, opts: CopyObjectOptions) -> Result<()> {
        self.inner.copy_object(cancel, opts).await
    }

    async fn append_to_object(
        &self,
        cancel: &CancellationToken,
        opts: AppendToObjectOptions,
    ) -> Result<()> {
        self.limiter
            .wait_for_capacity(cancel, opts.body.len() as u64)
            .await?;
        self.inner.append_to_object(cancel, opts).await
    }

    async fn delete_objects(&self, cancel: &CancellationToken, opts: DeleteObjectsOptions) -> Result<()> {
        self.inner.delete_objects(cancel, opts).await
    }

    async fn delete_object_versions(
        &self,
        cancel: &CancellationToken,
        opts: DeleteObjectVersionsOptions,
    ) -> Result<()> {
        self.inner.delete_object_versions(cancel, opts).await
    }

    async fn delete_directory(
        &self,
        cancel: &CancellationToken,
        opts: DeleteDirectoryOptions,
    ) -> Result<()> {
        self.inner.delete_directory(cancel, opts).await
    }

    async fn iterate_objects(
        &self,
        cancel: &CancellationToken,
        opts: IterateObjectsOptions,
        func: &mut IterateFn<'_>,
    ) -> Result<()> {
        self.inner.iterate_objects(cancel, opts, func).await
    }

    async fn create_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CreateMultipartUploadOptions,
    ) -> Result<String> {
        self.inner.create_multipart_upload(cancel, opts).await
    }

    async fn list_parts(&self, cancel: &CancellationToken, opts: ListPartsOptions) -> Result<Vec<Part>> {
        self.inner.list_parts(cancel, opts).await
    }

    async fn upload_part(&self, cancel: &CancellationToken, opts: UploadPartOptions) -> Result<Part> {
        self.limiter
            .wait_for_capacity(cancel, opts.body.len() as u64)
            .await?;
        self.inner.upload_part(cancel, opts).await
    }

    async fn upload_part_copy(
        &self,
        cancel: &CancellationToken,
        opts: UploadPartCopyOptions,
    ) -> Result<Part> {
        self.inner.upload_part_copy(cancel, opts).await
    }

    async fn complete_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: CompleteMultipartUploadOptions,
    ) -> Result<()> {
        self.inner.complete_multipart_upload(cancel, opts).await
    }

    async fn abort_multipart_upload(
        &self,
        cancel: &CancellationToken,
        opts: AbortMultipartUploadOptions,
    ) -> Result<()> {
        self.inner.abort_multipart_upload(cancel, opts).await
    }

    async fn get_bucket_locking_status(
        &self,
        cancel: &CancellationToken,
        opts: GetBucketLockingStatusOptions,
    ) -> Result<BucketLockingStatus> {
        self.inner.get_bucket_locking_status(cancel, opts).await
    }

    async fn set_object_lock(&self, cancel: &CancellationToken, opts: SetObjectLockOptions) -> Result<()> {
        self.inner.set_object_lock(cancel, opts).await
    }
}
