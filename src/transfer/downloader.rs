//! Concurrent ranged downloader
//!
//! An object (or a range of it) is split into part sized windows which are fetched concurrently and written into a
//! random access sink. Windows are written relative to the start of the requested range, so downloading a slice of
//! an object never leaves a sparse region at the front of the destination.

use crate::chunk::range_windows;
use crate::client::{GetObjectAttrsOptions, GetObjectOptions, SharedClient};
use crate::error::{Error, Result};
use crate::model::ByteRange;
use crate::pool::Pool;
use crate::transfer::{resolve_part_size, DEFAULT_WORKERS};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Random access destination; must tolerate concurrent writes at disjoint offsets
#[async_trait]
pub trait WriteAt: Send + Sync {
    async fn write_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

/// File destination
pub struct FileSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileSink {
    pub fn new(file: tokio::fs::File) -> Self {
        Self {
            file: tokio::sync::Mutex::new(file),
        }
    }

    /// Create (or truncate) the file at `path`
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(tokio::fs::File::create(path).await?))
    }

    /// Flush and release the underlying file
    pub async fn into_inner(self) -> Result<tokio::fs::File> {
        let mut file = self.file.into_inner();
        file.flush().await?;
        Ok(file)
    }
}

#[async_trait]
impl WriteAt for FileSink {
    async fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }
}

/// In-memory destination which grows as needed
#[derive(Default)]
pub struct MemorySink {
    data: parking_lot::Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

#[async_trait]
impl WriteAt for MemorySink {
    async fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        let mut buffer = self.data.lock();
        let start = offset as usize;
        let end = start + data.len();

        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MPDownloaderOptions {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,

    /// Range to download; the whole object when `None`
    pub byte_range: Option<ByteRange>,

    /// Size of each ranged request, zero for the default
    pub part_size: u64,

    /// Number of concurrent requests, zero for the default
    pub workers: usize,
}

impl MPDownloaderOptions {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    fn defaults(mut self) -> Self {
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }

        self
    }
}

/// Downloads an object using multiple concurrent ranged requests
pub struct MPDownloader {
    client: SharedClient,
    opts: MPDownloaderOptions,
    sink: Arc<dyn WriteAt>,
}

impl MPDownloader {
    pub fn new(client: SharedClient, opts: MPDownloaderOptions, sink: Arc<dyn WriteAt>) -> Self {
        Self {
            client,
            opts: opts.defaults(),
            sink,
        }
    }

    /// Run the download; the first failing window aborts the remaining ones
    pub async fn download(&self, cancel: &CancellationToken) -> Result<()> {
        let part_size = resolve_part_size(self.opts.part_size)?;
        let range = match self.byte_range(cancel).await? {
            Some(range) => range,
            None => return Ok(()),
        };

        info!(
            bucket = %self.opts.bucket,
            key = %self.opts.key,
            start = range.start,
            end = range.end,
            "Starting download"
        );

        let pool = Pool::new(self.opts.workers, cancel);
        let base = range.start;

        for window in range_windows(range, part_size) {
            let client = self.client.clone();
            let sink = self.sink.clone();
            let opts = GetObjectOptions {
                bucket: self.opts.bucket.clone(),
                key: self.opts.key.clone(),
                version_id: self.opts.version_id.clone(),
                byte_range: Some(window),
            };

            let queued = pool
                .queue(move |token| async move {
                    let object = client
                        .get_object(&token, opts)
                        .await
                        .map_err(|e| e.context("failed to get object range"))?;

                    // The sink only accepts slices, so the window is buffered in full
                    let data = object
                        .read_all()
                        .await
                        .map_err(|e| e.context("failed to read object body"))?;

                    sink.write_at(&data, window.start - base).await?;

                    debug!(start = window.start, end = window.end, "Downloaded window");
                    Ok(())
                })
                .await;

            // The same error is returned by stop
            if queued.is_err() {
                break;
            }
        }

        pool.stop().await
    }

    /// Resolve the range to download, `None` for an empty object
    async fn byte_range(&self, cancel: &CancellationToken) -> Result<Option<ByteRange>> {
        if let Some(range) = self.opts.byte_range {
            range.validate()?;

            if !range.is_open() {
                return Ok(Some(range));
            }
        }

        let attrs = self
            .client
            .get_object_attrs(
                cancel,
                GetObjectAttrsOptions {
                    bucket: self.opts.bucket.clone(),
                    key: self.opts.key.clone(),
                    version_id: self.opts.version_id.clone(),
                },
            )
            .await
            .map_err(|e| e.context("failed to get object attributes"))?;

        let size = attrs.size.ok_or_else(|| {
            Error::InvalidArgument(format!("size of object '{}' is unknown", self.opts.key))
        })?;

        let start = self.opts.byte_range.map_or(0, |r| r.start);
        if size == 0 && start == 0 {
            return Ok(None);
        }

        if start >= size {
            return Err(Error::InvalidByteRange {
                start,
                end: size.saturating_sub(1),
            });
        }

        Ok(Some(ByteRange::new(start, size - 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryClient;
    use crate::client::{ObjectClient, PutObjectOptions};
    use crate::model::Provider;

    async fn store(data: Vec<u8>) -> Arc<InMemoryClient> {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));
        client
            .put_object(
                &CancellationToken::new(),
                PutObjectOptions::new("bucket", "key", data),
            )
            .await
            .unwrap();
        client
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_download_whole_object() {
        let source = data(1000);
        let client = store(source.clone()).await;
        let sink = Arc::new(MemorySink::new());

        let opts = MPDownloaderOptions {
            part_size: 64,
            workers: 3,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.contents(), source);
    }

    #[tokio::test]
    async fn test_download_range_is_shifted() {
        let source = data(1000);
        let client = store(source.clone()).await;
        let sink = Arc::new(MemorySink::new());

        let opts = MPDownloaderOptions {
            byte_range: Some(ByteRange::new(100, 349)),
            part_size: 64,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.contents(), source[100..=349].to_vec());
    }

    #[tokio::test]
    async fn test_download_open_range() {
        let source = data(300);
        let client = store(source.clone()).await;
        let sink = Arc::new(MemorySink::new());

        let opts = MPDownloaderOptions {
            byte_range: Some(ByteRange::new(250, 0)),
            part_size: 16,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.contents(), source[250..].to_vec());
    }

    #[tokio::test]
    async fn test_download_leading_range_in_small_parts() {
        let client = store(b"0123456789".to_vec()).await;
        let sink = Arc::new(MemorySink::new());

        let opts = MPDownloaderOptions {
            byte_range: Some(ByteRange::new(0, 3)),
            part_size: 2,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.contents(), b"0123".to_vec());
    }

    #[tokio::test]
    async fn test_single_byte_parts_rejected() {
        let client = store(b"0123456789".to_vec()).await;
        let sink = Arc::new(MemorySink::new());

        let opts = MPDownloaderOptions {
            byte_range: Some(ByteRange::new(0, 3)),
            part_size: 1,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        let err = MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let source = data(5000);
        let client = store(source.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");

        let sink = Arc::new(FileSink::create(&path).await.unwrap());
        let opts = MPDownloaderOptions {
            part_size: 512,
            ..MPDownloaderOptions::new("bucket", "key")
        };

        MPDownloader::new(client, opts, sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        let sink = Arc::into_inner(sink).unwrap();
        sink.into_inner().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), source);
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let client = Arc::new(InMemoryClient::new(Provider::Aws));
        let sink = Arc::new(MemorySink::new());

        let err = MPDownloader::new(client, MPDownloaderOptions::new("bucket", "missing"), sink)
            .download(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_empty_object() {
        let client = store(Vec::new()).await;
        let sink = Arc::new(MemorySink::new());

        MPDownloader::new(client, MPDownloaderOptions::new("bucket", "key"), sink.clone())
            .download(&CancellationToken::new())
            .await
            .unwrap();

        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_range() {
        let client = store(data(10)).await;
        let opts = MPDownloaderOptions {
            byte_range: Some(ByteRange::new(8, 2)),
            ..MPDownloaderOptions::new("bucket", "key")
        };

        let err = MPDownloader::new(client, opts, Arc::new(MemorySink::new()))
            .download(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidByteRange { .. }));
    }
}
