//! Transfer orchestrators built on top of [`crate::client::ObjectClient`]
//!
//! - [`uploader`]: concurrent multipart upload with ordered commit
//! - [`downloader`]: concurrent ranged download into a random access sink
//! - [`copy`]: single or multipart server side copies, one object or a whole prefix
//! - [`compress`]: stream a prefix into a zip archive and upload it
//! - [`upload`] / [`download`]: single call helpers choosing the right strategy
//! - [`prefix`]: cheap existence check for a prefix

use crate::error::{Error, Result};

pub mod compress;
pub mod copy;
pub mod download;
pub mod downloader;
pub mod prefix;
pub mod upload;
pub mod uploader;

pub use compress::{compress_objects, ChecksumFn, CompressObjectsOptions};
pub use copy::{copy_object, copy_objects, CopyObjectOptions, CopyObjectsOptions};
pub use download::{download, DownloadOptions};
pub use downloader::{FileSink, MPDownloader, MPDownloaderOptions, MemorySink, WriteAt};
pub use prefix::prefix_exists;
pub use upload::{upload, UploadOptions};
pub use uploader::{MPUploader, MPUploaderOptions, OnPartComplete};

/// Smallest part size accepted by every provider for all but the final part
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Bodies larger than this are uploaded using a multipart upload
pub const MPU_THRESHOLD: u64 = 3 * MIN_PART_SIZE;

/// Default number of concurrent workers for downloads and bulk operations
pub const DEFAULT_WORKERS: usize = 4;

/// Resolve a configured part size, zero selecting [`MIN_PART_SIZE`].
///
/// Parts must span at least two bytes: a one byte window at offset zero would be sent as an open range.
pub(crate) fn resolve_part_size(configured: u64) -> Result<u64> {
    match configured {
        0 => Ok(MIN_PART_SIZE),
        1 => Err(Error::InvalidArgument(
            "part size must be at least 2 bytes".to_string(),
        )),
        n => Ok(n),
    }
}
