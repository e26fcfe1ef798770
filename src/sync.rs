/*!
 * Directory synchronization between the local filesystem and a cloud prefix
 *
 * Exactly one side of a sync must be a cloud location. A source with a trailing separator transfers the contents of
 * the directory; without one the directory itself (its final path component) is recreated under the destination.
 */

use crate::client::rate_limited::{BandwidthLimiter, RateLimitedClient};
use crate::client::{IterateObjectsOptions, SharedClient};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::model::{ObjectAttrs, ObjectLock, Precondition};
use crate::pool::Pool;
use crate::transfer::download::{download_to_file, DownloadOptions};
use crate::transfer::upload::{upload, UploadOptions};
use crate::transfer::DEFAULT_WORKERS;
use crate::url::CloudOrFileUrl;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub part_size: u64,
    pub mpu_threshold: u64,
    pub part_upload_workers: usize,
    pub download_workers: usize,

    /// Number of files transferred concurrently, zero for the default
    pub workers: usize,

    /// Applied to every uploaded object
    pub precondition: Precondition,
    pub lock: Option<ObjectLock>,
}

impl SyncOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            part_size: config.part_size,
            mpu_threshold: config.mpu_threshold,
            part_upload_workers: config.part_upload_workers,
            download_workers: config.download_workers,
            workers: config.sync_workers,
            ..Default::default()
        }
    }

    fn workers(&self) -> usize {
        match self.workers {
            0 => DEFAULT_WORKERS,
            n => n,
        }
    }
}

/// Synchronizes directories with cloud prefixes
pub struct Syncer {
    client: SharedClient,
    opts: SyncOptions,
}

impl Syncer {
    pub fn new(client: SharedClient, opts: SyncOptions) -> Self {
        Self { client, opts }
    }

    /// Create a syncer tuned by `config`, throttling the client when a bandwidth limit is set
    pub fn from_config(client: SharedClient, config: &TransferConfig) -> Self {
        let client: SharedClient = match config.bytes_per_second {
            0 => client,
            limit => Arc::new(RateLimitedClient::new(client, BandwidthLimiter::new(limit))),
        };

        Self::new(client, SyncOptions::from_config(config))
    }

    /// Sync `source` to `destination`, uploading or downloading depending on which side is a cloud location
    pub async fn sync(&self, cancel: &CancellationToken, source: &str, destination: &str) -> Result<()> {
        let source = CloudOrFileUrl::parse(source).map_err(|e| e.context("could not parse source"))?;
        let destination =
            CloudOrFileUrl::parse(destination).map_err(|e| e.context("could not parse destination"))?;

        if source.is_cloud() == destination.is_cloud() {
            return Err(Error::InvalidArgument(
                "one of source and destination needs to be a file path, and the other needs to be a cloud path"
                    .to_string(),
            ));
        }

        if source.is_cloud() {
            return self.download(cancel, &source, &destination).await;
        }

        let metadata = tokio::fs::metadata(source.local_path())
            .await
            .map_err(|e| Error::from(e).context("could not check if source exists"))?;

        if !metadata.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "sync only works on directories, {} is a file",
                source
            )));
        }

        self.upload(cancel, &source, &destination).await
    }

    /// Upload every file below the local `source` directory
    pub async fn upload(
        &self,
        cancel: &CancellationToken,
        source: &CloudOrFileUrl,
        destination: &CloudOrFileUrl,
    ) -> Result<()> {
        let root = source.local_path();
        let prefix = match source.is_dir_contents() {
            true => root.clone(),
            false => root.parent().map(Path::to_path_buf).unwrap_or_default(),
        };

        info!(source = %source, destination = %destination, "Uploading directory");

        let pool = Pool::new(self.opts.workers(), cancel);
        let walked = self.queue_uploads(&pool, &root, &prefix, destination).await;
        let stopped = pool.stop().await;

        walked.map_err(|e| e.context("could not walk directory"))?;
        stopped.map_err(|e| e.context("error whilst uploading directory"))
    }

    async fn queue_uploads(
        &self,
        pool: &Pool,
        root: &Path,
        prefix: &Path,
        destination: &CloudOrFileUrl,
    ) -> Result<()> {
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }

            let relative = entry.path().strip_prefix(prefix).map_err(|_| {
                Error::InvalidArgument(format!("'{}' is outside of the source", entry.path().display()))
            })?;

            let segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let client = self.client.clone();
            let path = entry.into_path();
            let opts = UploadOptions {
                part_size: self.opts.part_size,
                mpu_threshold: self.opts.mpu_threshold,
                part_upload_workers: self.opts.part_upload_workers,
                precondition: self.opts.precondition.clone(),
                lock: self.opts.lock.clone(),
                ..UploadOptions::new(destination.bucket.as_str(), destination.join(&segments).path, ())
            };

            pool.queue(move |token| async move { upload_file(client, &token, path, opts).await })
                .await?;
        }

        Ok(())
    }

    /// Download every object below the cloud `source` prefix into the local `destination` directory
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        source: &CloudOrFileUrl,
        destination: &CloudOrFileUrl,
    ) -> Result<()> {
        // Everything up to and including the last separator is dropped from the local paths
        let prefix = match source.path.rfind('/') {
            Some(idx) => source.path[..=idx].to_string(),
            None => String::new(),
        };

        info!(source = %source, destination = %destination, "Downloading prefix");

        let pool = Pool::new(self.opts.workers(), cancel);

        let iterated = {
            let pool = &pool;
            let prefix = &prefix;
            let client = &self.client;
            let opts = &self.opts;

            let mut queue = move |attrs: ObjectAttrs| {
                if attrs.is_dir() {
                    return async { Ok(()) }.boxed();
                }

                let relative = attrs.key.strip_prefix(prefix.as_str()).unwrap_or(&attrs.key);
                let target = destination.join(&[relative]).local_path();

                let client = client.clone();
                let download = DownloadOptions {
                    part_size: opts.part_size,
                    workers: opts.download_workers,
                    ..DownloadOptions::new(source.bucket.as_str(), attrs.key.as_str())
                };

                async move {
                    pool.queue(move |token| async move { download_file(client, &token, download, target).await })
                        .await
                }
                .boxed()
            };

            self.client
                .iterate_objects(
                    cancel,
                    IterateObjectsOptions::new(source.bucket.as_str(), source.path.as_str()),
                    &mut queue,
                )
                .await
        };

        let stopped = pool.stop().await;

        iterated.map_err(|e| e.context("could not iterate objects"))?;
        stopped.map_err(|e| e.context("error whilst downloading"))
    }
}

async fn upload_file(
    client: SharedClient,
    cancel: &CancellationToken,
    path: PathBuf,
    opts: UploadOptions<()>,
) -> Result<()> {
    debug!(source = %path.display(), bucket = %opts.bucket, key = %opts.key, "Uploading file");

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| Error::from(e).context(format!("could not open '{}'", path.display())))?;

    let opts = UploadOptions {
        bucket: opts.bucket,
        key: opts.key,
        body: file,
        part_size: opts.part_size,
        mpu_threshold: opts.mpu_threshold,
        part_upload_workers: opts.part_upload_workers,
        precondition: opts.precondition,
        lock: opts.lock,
    };

    upload(client, cancel, opts).await
}

async fn download_file(
    client: SharedClient,
    cancel: &CancellationToken,
    opts: DownloadOptions,
    target: PathBuf,
) -> Result<()> {
    debug!(bucket = %opts.bucket, key = %opts.key, destination = %target.display(), "Downloading file");

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::from(e).context("could not create subdirectories"))?;
    }

    download_to_file(client, cancel, opts, &target).await
}

/// Sync `source` to `destination` with default options
pub async fn sync(client: SharedClient, cancel: &CancellationToken, source: &str, destination: &str) -> Result<()> {
    Syncer::new(client, SyncOptions::default())
        .sync(cancel, source, destination)
        .await
}
