//! Single call upload helper choosing between one `PutObject` and a multipart upload

use crate::chunk::{seeker_length, ChunkReader};
use crate::client::{PutObjectOptions, SharedClient};
use crate::error::Result;
use crate::model::{ObjectLock, Precondition};
use crate::transfer::uploader::{MPUploader, MPUploaderOptions};
use crate::transfer::{resolve_part_size, MPU_THRESHOLD};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct UploadOptions<R> {
    pub bucket: String,
    pub key: String,

    /// Finite, seekable body; uploaded from its start regardless of its current position
    pub body: R,

    /// Size of each part of a multipart upload, zero for the default
    pub part_size: u64,

    /// Bodies longer than this use a multipart upload, zero for the default
    pub mpu_threshold: u64,

    /// Number of concurrent part uploads, zero for the default
    pub part_upload_workers: usize,

    pub precondition: Precondition,
    pub lock: Option<ObjectLock>,
}

impl<R> UploadOptions<R> {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, body: R) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            body,
            part_size: 0,
            mpu_threshold: 0,
            part_upload_workers: 0,
            precondition: Precondition::None,
            lock: None,
        }
    }
}

/// Upload `opts.body` to `opts.key`
pub async fn upload<R>(client: SharedClient, cancel: &CancellationToken, mut opts: UploadOptions<R>) -> Result<()>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let part_size = resolve_part_size(opts.part_size)?;
    let threshold = match opts.mpu_threshold {
        0 => MPU_THRESHOLD,
        n => n,
    };

    let length = seeker_length(&mut opts.body)
        .await
        .map_err(|e| e.context("failed to determine length of body"))?;

    if length > threshold {
        return upload_multipart(client, cancel, opts, part_size).await;
    }

    let mut body = Vec::with_capacity(length as usize);
    opts.body.seek(SeekFrom::Start(0)).await?;
    opts.body.read_to_end(&mut body).await?;

    debug!(bucket = %opts.bucket, key = %opts.key, size = length, "Uploading object in a single request");

    client
        .put_object(
            cancel,
            PutObjectOptions {
                bucket: opts.bucket,
                key: opts.key,
                body: body.into(),
                precondition: opts.precondition,
                lock: opts.lock,
            },
        )
        .await?;

    Ok(())
}

async fn upload_multipart<R>(
    client: SharedClient,
    cancel: &CancellationToken,
    opts: UploadOptions<R>,
    part_size: u64,
) -> Result<()>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let uploader = MPUploader::<()>::new(
        client,
        cancel,
        MPUploaderOptions {
            part_upload_workers: opts.part_upload_workers,
            precondition: opts.precondition,
            lock: opts.lock,
            ..MPUploaderOptions::new(opts.bucket, opts.key)
        },
    )
    .await
    .map_err(|e| e.context("failed to create uploader"))?;

    let uploaded = upload_chunks(&uploader, opts.body, part_size).await;
    if let Err(err) = uploaded {
        uploader.abort_quietly().await;
        return Err(err);
    }

    Ok(())
}

async fn upload_chunks<R>(uploader: &MPUploader, body: R, part_size: u64) -> Result<()>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let mut reader = ChunkReader::new(body, part_size)?;

    reader
        .for_each(|_, chunk| uploader.upload(chunk))
        .await
        .map_err(|e| e.context("failed to queue chunks"))?;

    uploader
        .commit()
        .await
        .map_err(|e| e.context("failed to complete upload"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryClient;
    use crate::model::Provider;
    use std::io::Cursor;
    use std::sync::Arc;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 199) as u8).collect()
    }

    #[tokio::test]
    async fn test_small_body_single_request() {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));
        let mut body = Cursor::new(b"hello world".to_vec());
        body.set_position(6);

        upload(client.clone(), &CancellationToken::new(), UploadOptions::new("bucket", "key", body))
            .await
            .unwrap();

        assert_eq!(client.body("bucket", "key").unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_large_body_multipart() {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));
        let source = data(10_000);

        let opts = UploadOptions {
            part_size: 1024,
            mpu_threshold: 4096,
            ..UploadOptions::new("bucket", "key", Cursor::new(source.clone()))
        };

        upload(client.clone(), &CancellationToken::new(), opts).await.unwrap();

        assert_eq!(client.body("bucket", "key").unwrap(), source);
        assert_eq!(client.keys("bucket"), vec!["key"]);
    }

    #[tokio::test]
    async fn test_multipart_precondition_failure_aborts() {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));
        let cancel = CancellationToken::new();

        upload(client.clone(), &cancel, UploadOptions::new("bucket", "key", Cursor::new(b"old".to_vec())))
            .await
            .unwrap();

        let opts = UploadOptions {
            part_size: 8,
            mpu_threshold: 16,
            precondition: Precondition::OnlyIfAbsent,
            ..UploadOptions::new("bucket", "key", Cursor::new(data(64)))
        };

        let err = upload(client.clone(), &cancel, opts).await.unwrap_err();

        assert!(err.is_precondition_failed());
        assert_eq!(client.body("bucket", "key").unwrap(), "old");
        assert_eq!(client.keys("bucket"), vec!["key"]);
    }

    #[tokio::test]
    async fn test_single_byte_parts_rejected() {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));

        let opts = UploadOptions {
            part_size: 1,
            ..UploadOptions::new("bucket", "key", Cursor::new(data(64)))
        };

        let err = upload(client.clone(), &CancellationToken::new(), opts).await.unwrap_err();

        assert!(matches!(err, crate::error::Error::InvalidArgument(_)));
        assert!(client.keys("bucket").is_empty());
    }
}
