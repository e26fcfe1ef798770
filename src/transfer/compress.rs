//! Compress-and-relay: stream every object under a prefix into a single zip archive and upload it
//!
//! The archive is never materialized. Two tasks share a two worker [`Pool`]:
//!
//! - the producer lists the prefix and streams each object body through a zip writer into one end of a fixed capacity
//!   in-memory pipe;
//! - the consumer fills part sized buffers from the other end, hashes them and hands them to an [`MPUploader`].
//!   Buffers come from a [`FreeList`] and only return to it once their part has been uploaded, so reading can never
//!   run more than `part_upload_workers` parts ahead of uploading.
//!
//! A failing stage cancels the pool's token before releasing its end of the pipe, which unblocks the other stage.

use crate::client::{GetObjectOptions, IterateObjectsOptions, ObjectClient, SharedClient};
use crate::error::{Error, Result};
use crate::freelist::FreeList;
use crate::model::{ObjectAttrs, Part};
use crate::pool::Pool;
use crate::transfer::uploader::{MPUploader, MPUploaderOptions, OnPartComplete};
use crate::transfer::{resolve_part_size, DEFAULT_WORKERS};
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use regex::Regex;
use sha2::digest::DynDigest;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Capacity of the pipe between the archiving and uploading stages
const PIPE_CAPACITY: usize = 64 * 1024;

/// Size of the reads from a source object body
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Called with the size of every uploaded part
pub type PartCompleteFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Called with the fraction, in `[0, 1]`, of source bytes archived so far
pub type ProgressReportFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Creates the digest used for the archive checksum
pub type ChecksumFn = Arc<dyn Fn() -> Box<dyn DynDigest + Send> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CompressObjectsOptions {
    pub source_bucket: String,
    pub prefix: String,
    pub delimiter: String,
    pub include: Vec<Regex>,
    pub exclude: Vec<Regex>,

    pub destination_bucket: String,

    /// Key of the uploaded archive
    pub destination: String,

    /// Size of each uploaded part, zero for the default
    pub part_size: u64,

    /// Number of concurrent part uploads, zero for the default
    pub part_upload_workers: usize,

    pub on_part_complete: Option<PartCompleteFn>,

    /// Progress reporting requires an additional listing of the prefix to size it
    pub on_progress: Option<ProgressReportFn>,

    /// Digest of the uploaded archive, SHA-256 when `None`
    pub checksum: Option<ChecksumFn>,
}

impl CompressObjectsOptions {
    fn validate(&self) -> Result<()> {
        if self.source_bucket.is_empty() || self.destination_bucket.is_empty() || self.destination.is_empty() {
            return Err(Error::InvalidArgument(
                "source bucket, destination bucket and destination are required".to_string(),
            ));
        }

        Ok(())
    }

    fn defaults(mut self) -> Result<Self> {
        self.part_size = resolve_part_size(self.part_size)?;

        if self.part_upload_workers == 0 {
            self.part_upload_workers = DEFAULT_WORKERS;
        }

        Ok(self)
    }

    fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match &self.checksum {
            Some(checksum) => checksum(),
            None => Box::new(Sha256::new()),
        }
    }

    fn iterate_options(&self) -> IterateObjectsOptions {
        IterateObjectsOptions {
            bucket: self.source_bucket.clone(),
            prefix: self.prefix.clone(),
            delimiter: self.delimiter.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            versions: false,
        }
    }
}

/// Archive every object under `opts.prefix` and upload the archive to `opts.destination`.
///
/// Returns the hex encoded digest of the archive exactly as uploaded, see [`CompressObjectsOptions::checksum`].
pub async fn compress_objects(
    source: SharedClient,
    destination: SharedClient,
    cancel: &CancellationToken,
    opts: CompressObjectsOptions,
) -> Result<String> {
    opts.validate()?;
    let opts = Arc::new(opts.defaults()?);

    let total = match opts.on_progress {
        Some(_) => calculate_size(&*source, cancel, &opts)
            .await
            .map_err(|e| e.context("could not calculate size of objects with path prefix"))?,
        None => 0,
    };

    info!(
        bucket = %opts.source_bucket,
        prefix = %opts.prefix,
        destination = %opts.destination,
        "Compressing objects"
    );

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let checksum = Arc::new(Mutex::new(None));
    let pool = Pool::new(2, cancel);

    let producer = {
        let opts = opts.clone();
        move |token: CancellationToken| async move {
            let mut writer = writer;
            let result = produce(&*source, &token, &opts, total, &mut writer).await;

            // The consumer must observe the cancellation before the end of the pipe
            if result.is_err() {
                token.cancel();
            }
            drop(writer);

            result.map_err(|e| e.context("could not archive objects"))
        }
    };

    let consumer = {
        let checksum = checksum.clone();
        move |token: CancellationToken| async move {
            let mut reader = reader;
            let result = consume(destination, &token, &opts, &mut reader).await;

            if result.is_err() {
                token.cancel();
            }
            drop(reader);

            *checksum.lock() = Some(result.map_err(|e| e.context("could not upload archive"))?);
            Ok(())
        }
    };

    let mut queued = pool.queue(producer).await;
    if queued.is_ok() {
        queued = pool.queue(consumer).await;
    }

    let stopped = pool.stop().await;
    queued.and(stopped)?;

    let checksum = checksum.lock().take();
    checksum.ok_or(Error::Cancelled)
}

/// Total size of every object which would be archived
async fn calculate_size(
    client: &dyn ObjectClient,
    cancel: &CancellationToken,
    opts: &CompressObjectsOptions,
) -> Result<u64> {
    let total = Arc::new(Mutex::new(0u64));

    let sum = total.clone();
    client
        .iterate_objects(cancel, opts.iterate_options(), &mut |attrs| {
            *sum.lock() += attrs.size.unwrap_or_default();
            async { Ok(()) }.boxed()
        })
        .await?;

    let total = *total.lock();
    Ok(total)
}

/// Name of an object inside the archive.
///
/// A prefix with a trailing separator is removed entirely, otherwise its final component is kept.
pub fn strip_prefix(prefix: &str, key: &str) -> String {
    if prefix.ends_with('/') {
        return key.strip_prefix(prefix).unwrap_or(key).to_string();
    }

    let rest = key.strip_prefix(prefix).and_then(|k| k.strip_prefix('/')).unwrap_or(key);
    let base = prefix.rsplit('/').next().unwrap_or_default();

    if base.is_empty() {
        return rest.to_string();
    }

    format!("{}/{}", base, rest)
}

/// Writer shared between the zip encoder and the pipe pump
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

async fn produce(
    client: &dyn ObjectClient,
    token: &CancellationToken,
    opts: &CompressObjectsOptions,
    total: u64,
    pipe: &mut DuplexStream,
) -> Result<()> {
    let (sender, mut receiver) = mpsc::channel::<Result<ObjectAttrs>>(1);

    let listing = async move {
        let listed = {
            let send = &sender;
            client
                .iterate_objects(token, opts.iterate_options(), &mut |attrs| {
                    async move { send.send(Ok(attrs)).await.map_err(|_| Error::Cancelled) }.boxed()
                })
                .await
        };

        // A closed channel means archiving stopped early and has its own error
        if let Err(err) = listed {
            let _ = sender.send(Err(err)).await;
        }
    };

    // Owns the receiver so that a failure here also fails any pending send
    let archiving = async move {
        let buffer = SharedBuffer::default();
        let mut zip = ZipWriter::new_stream(buffer.clone());
        let mut archived = 0u64;

        while let Some(attrs) = receiver.recv().await {
            let attrs = attrs.map_err(|e| e.context("error whilst iterating objects"))?;
            if attrs.is_dir() {
                continue;
            }

            archive_object(client, token, opts, &attrs, &mut zip, &buffer, pipe).await?;

            let size = attrs.size.unwrap_or_default();
            archived += size;

            match &opts.on_progress {
                Some(progress) if total != 0 => progress((archived as f64 / total as f64).min(1.0)),
                _ => {}
            }
        }

        zip.finish()?;
        pump(&buffer, pipe, token).await?;
        pipe.shutdown().await.map_err(|e| pipe_error(e, token))?;

        Ok::<_, Error>(())
    };

    let ((), archived) = tokio::join!(listing, archiving);
    archived
}

async fn archive_object<W>(
    client: &dyn ObjectClient,
    token: &CancellationToken,
    opts: &CompressObjectsOptions,
    attrs: &ObjectAttrs,
    zip: &mut ZipWriter<W>,
    buffer: &SharedBuffer,
    pipe: &mut DuplexStream,
) -> Result<()>
where
    W: Write + std::io::Seek,
{
    let name = strip_prefix(&opts.prefix, &attrs.key);
    let size = attrs.size.unwrap_or_default();

    debug!(key = %attrs.key, name = %name, size, "Archiving object");

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size > u32::MAX as u64);
    zip.start_file(name, options)?;

    let mut object = client
        .get_object(token, GetObjectOptions::new(opts.source_bucket.as_str(), attrs.key.as_str()))
        .await
        .map_err(|e| e.context(format!("could not get object '{}'", attrs.key)))?;

    let mut chunk = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            n = object.body.read(&mut chunk) => n?,
        };

        if n == 0 {
            break;
        }

        zip.write_all(&chunk[..n])?;
        pump(buffer, pipe, token).await?;
    }

    Ok(())
}

/// Move whatever the zip writer has produced into the pipe, blocking until the consumer has room for it
async fn pump(buffer: &SharedBuffer, pipe: &mut DuplexStream, token: &CancellationToken) -> Result<()> {
    let data = buffer.take();
    if data.is_empty() {
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        written = pipe.write_all(&data) => written.map_err(|e| pipe_error(e, token)),
    }
}

/// A broken pipe caused by the other stage failing is reported as a cancellation
fn pipe_error(err: std::io::Error, token: &CancellationToken) -> Error {
    if token.is_cancelled() {
        return Error::Cancelled;
    }

    err.into()
}

async fn consume(
    client: SharedClient,
    token: &CancellationToken,
    opts: &CompressObjectsOptions,
    pipe: &mut DuplexStream,
) -> Result<String> {
    let part_size = opts.part_size as usize;
    let freelist = Arc::new(FreeList::new(opts.part_upload_workers, Vec::<u8>::new));

    let on_part_complete: OnPartComplete<Bytes> = {
        let freelist = freelist.clone();
        let callback = opts.on_part_complete.clone();
        Arc::new(move |body: Bytes, part: &Part| {
            freelist.put(Vec::from(body));
            if let Some(callback) = &callback {
                callback(part.size);
            }
            Ok(())
        })
    };

    let uploader = MPUploader::new(
        client,
        token,
        MPUploaderOptions {
            part_upload_workers: opts.part_upload_workers,
            on_part_complete: Some(on_part_complete),
            ..MPUploaderOptions::new(opts.destination_bucket.as_str(), opts.destination.as_str())
        },
    )
    .await
    .map_err(|e| e.context("could not create uploader"))?;

    let uploaded = upload_parts(&uploader, &freelist, token, part_size, opts.hasher(), pipe).await;

    match uploaded {
        Ok(checksum) => Ok(checksum),
        Err(err) => {
            // Prefer the part failure which cancelled the uploader over the cancellation itself
            let err = match uploader.error() {
                Some(first) if err.is_cancelled() => first,
                _ => err,
            };

            uploader.abort_quietly().await;
            Err(err)
        }
    }
}

async fn upload_parts(
    uploader: &MPUploader<Bytes>,
    freelist: &FreeList<Vec<u8>>,
    token: &CancellationToken,
    part_size: usize,
    mut hasher: Box<dyn DynDigest + Send>,
    pipe: &mut DuplexStream,
) -> Result<String> {
    let mut parts = 0usize;

    loop {
        let mut buffer = freelist.get(uploader.token()).await?;
        buffer.resize(part_size, 0);

        let n = read_full(pipe, &mut buffer, uploader.token()).await?;
        buffer.truncate(n);
        hasher.update(&buffer);

        // An empty final part is only sent when it is the whole archive
        if n > 0 || parts == 0 {
            let body = Bytes::from(buffer);
            uploader
                .upload_with_meta(body.clone(), body)
                .await
                .map_err(|e| e.context("could not upload part"))?;
            parts += 1;
        } else {
            freelist.put(buffer);
        }

        if n < part_size {
            break;
        }
    }

    // The producer cancels before closing its end, so a short read may be a truncated archive
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    uploader
        .commit()
        .await
        .map_err(|e| e.context("could not commit upload"))?;

    debug!(parts, "Uploaded archive");
    Ok(hex::encode(hasher.finalize()))
}

/// Fill `buffer` from the pipe, returning fewer bytes only once the pipe has been closed
async fn read_full(pipe: &mut DuplexStream, buffer: &mut [u8], token: &CancellationToken) -> Result<usize> {
    let mut filled = 0;

    while filled < buffer.len() {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            n = pipe.read(&mut buffer[filled..]) => n?,
        };

        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled)
}
