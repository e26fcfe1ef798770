/*!
 * Shared helpers for the integration tests
 */

#![allow(dead_code)]

use async_trait::async_trait;
use cirrus::client::memory::InMemoryClient;
use cirrus::client::{
    AbortMultipartUploadOptions, AppendToObjectOptions, CompleteMultipartUploadOptions, CopyObjectOptions,
    CreateMultipartUploadOptions, DeleteDirectoryOptions, DeleteObjectVersionsOptions, DeleteObjectsOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFn, IterateObjectsOptions, ListPartsOptions, ObjectClient,
    PutObjectOptions, UploadPartCopyOptions, UploadPartOptions,
};
use cirrus::error::{Error, Result};
use cirrus::model::{Object, ObjectAttrs, Part, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory client recording calls, optionally failing or delaying part uploads
pub struct CountingClient {
    pub inner: InMemoryClient,
    pub copy_object_calls: AtomicUsize,
    pub upload_part_calls: AtomicUsize,
    pub upload_part_copy_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub get_object_calls: AtomicUsize,

    /// Part uploads after this many successful ones fail
    pub fail_upload_part_after: Option<usize>,

    /// Object reads after this many successful ones fail
    pub fail_get_object_after: Option<usize>,

    /// Cancelled once this many part copies have succeeded
    pub cancel_after_part_copies: Option<(usize, CancellationToken)>,

    /// Delay part uploads by a varying amount so they complete out of order
    pub delay_parts: bool,
}

impl CountingClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            inner: InMemoryClient::new(provider),
            copy_object_calls: AtomicUsize::new(0),
            upload_part_calls: AtomicUsize::new(0),
            upload_part_copy_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            get_object_calls: AtomicUsize::new(0),
            fail_upload_part_after: None,
            fail_get_object_after: None,
            cancel_after_part_copies: None,
            delay_parts: false,
        }
    }

    pub fn failing_after(provider: Provider, parts: usize) -> Self {
        Self {
            fail_upload_part_after: Some(parts),
            ..Self::new(provider)
        }
    }

    pub fn failing_reads_after(provider: Provider, reads: usize) -> Self {
        Self {
            fail_get_object_after: Some(reads),
            ..Self::new(provider)
        }
    }

    pub fn cancelling_after(provider: Provider, copies: usize, cancel: CancellationToken) -> Self {
        Self {
            cancel_after_part_copies: Some((copies, cancel)),
            ..Self::new(provider)
        }
    }

    pub fn delayed(provider: Provider) -> Self {
        Self {
            delay_parts: true,
            ..Self::new(provider)
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectClient for CountingClient {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn get_object(&self, cancel: &CancellationToken, opts: GetObjectOptions) -> Result<Object> {
        let calls = self.get_object_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_get_object_after.is_some_and(|after| calls >= after) {
            return Err(Error::InvalidArgument("injected read failure".to_string()));
        }

        self.inner.get_object(cancel, opts).await
    }

    async fn get_object_attrs(&self, cancel: &CancellationToken, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs> {
        self.inner.get_object_attrs(cancel, opts).await
    }

    async fn put_object(&self, cancel: &CancellationToken, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        self.inner.put_object(cancel, opts).await
    }

    async fn copy_object(&self, cancel: &CancellationToken, opts: CopyObjectOptions) -> Result<()> {
        self.copy_object_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.copy_object(cancel, opts).await
    }

    async fn append_to_object(&self, cancel: &CancellationToken, opts: AppendToObjectOptions) -> Result<()> {
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

    async fn delete_directory(&self, cancel: &CancellationToken, opts: DeleteDirectoryOptions) -> Result<()> {
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
        let calls = self.upload_part_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_upload_part_after.is_some_and(|after| calls >= after) {
            return Err(Error::InvalidArgument("injected part failure".to_string()));
        }

        if self.delay_parts {
            let millis = (opts.number as u64 * 7919) % 13;
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        self.inner.upload_part(cancel, opts).await
    }

    async fn upload_part_copy(&self, cancel: &CancellationToken, opts: UploadPartCopyOptions) -> Result<Part> {
        let calls = self.upload_part_copy_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let part = self.inner.upload_part_copy(cancel, opts).await?;

        if let Some((after, token)) = &self.cancel_after_part_copies {
            if calls >= *after {
                token.cancel();
            }
        }

        Ok(part)
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
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_multipart_upload(cancel, opts).await
    }
}

/// Deterministic bytes which deflate barely compresses
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

pub async fn put(client: &dyn ObjectClient, bucket: &str, key: &str, body: impl Into<bytes::Bytes>) {
    client
        .put_object(&CancellationToken::new(), PutObjectOptions::new(bucket, key, body))
        .await
        .unwrap();
}
