//! Single call download helpers

use crate::client::SharedClient;
use crate::error::Result;
use crate::transfer::downloader::{FileSink, MPDownloader, MPDownloaderOptions, WriteAt};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Options for [`download`]; identical to those of the underlying downloader
pub type DownloadOptions = MPDownloaderOptions;

/// Download an object, or part of one, into `sink` using concurrent ranged requests
pub async fn download(
    client: SharedClient,
    cancel: &CancellationToken,
    opts: DownloadOptions,
    sink: Arc<dyn WriteAt>,
) -> Result<()> {
    MPDownloader::new(client, opts, sink).download(cancel).await
}

/// Download an object into a newly created (or truncated) file at `path`
pub async fn download_to_file(
    client: SharedClient,
    cancel: &CancellationToken,
    opts: DownloadOptions,
    path: impl AsRef<Path>,
) -> Result<()> {
    let sink = Arc::new(FileSink::create(path).await?);

    download(client, cancel, opts, sink.clone()).await?;

    // Every window has been written once the download returns, leaving this the only handle
    if let Some(sink) = Arc::into_inner(sink) {
        sink.into_inner().await?;
    }

    Ok(())
}
