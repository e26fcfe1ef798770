//! Server side copies of single objects and whole prefixes
//!
//! Objects up to the provider's single request limit are copied with one `CopyObject` call; anything larger is copied
//! part by part into a multipart upload on the destination.

use crate::chunk::windows;
use crate::client::{
    AbortMultipartUploadOptions, CompleteMultipartUploadOptions, CreateMultipartUploadOptions,
    GetObjectAttrsOptions, IterateObjectsOptions, ObjectClient, SharedClient, UploadPartCopyOptions,
};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::model::ObjectAttrs;
use crate::pool::Pool;
use crate::transfer::{resolve_part_size, DEFAULT_WORKERS};
use futures::FutureExt;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CopyObjectOptions {
    pub destination_bucket: String,
    pub destination_key: String,
    pub source_bucket: String,
    pub source_key: String,

    /// Size of each copied part, zero for the default
    pub part_size: u64,

    /// Overrides the provider's single request copy limit
    pub max_single_copy_size: Option<u64>,
}

/// Copy a single object, using a multipart copy when it exceeds the single request limit.
///
/// A failed multipart copy is aborted before the original error is returned.
pub async fn copy_object(
    client: &dyn ObjectClient,
    cancel: &CancellationToken,
    opts: CopyObjectOptions,
) -> Result<()> {
    let part_size = resolve_part_size(opts.part_size)?;

    let attrs = client
        .get_object_attrs(
            cancel,
            GetObjectAttrsOptions::new(opts.source_bucket.as_str(), opts.source_key.as_str()),
        )
        .await
        .map_err(|e| e.context("failed to get object attributes"))?;

    // Objects of unknown size are left to the provider to copy in one request
    let size = attrs.size.unwrap_or_default();
    let max = opts
        .max_single_copy_size
        .unwrap_or_else(|| client.provider().max_single_copy_size());

    if size <= max {
        debug!(
            source = %opts.source_key,
            destination = %opts.destination_key,
            size,
            "Copying object in a single request"
        );

        return client
            .copy_object(
                cancel,
                crate::client::CopyObjectOptions {
                    destination_bucket: opts.destination_bucket,
                    destination_key: opts.destination_key,
                    source_bucket: opts.source_bucket,
                    source_key: opts.source_key,
                },
            )
            .await;
    }

    let upload_id = client
        .create_multipart_upload(
            cancel,
            CreateMultipartUploadOptions {
                bucket: opts.destination_bucket.clone(),
                key: opts.destination_key.clone(),
            },
        )
        .await
        .map_err(|e| e.context("failed to start multipart upload"))?;

    debug!(
        source = %opts.source_key,
        destination = %opts.destination_key,
        size,
        upload_id = %upload_id,
        "Copying object using a multipart upload"
    );

    let copied = copy_parts(client, cancel, &opts, &upload_id, size, part_size).await;
    let Err(err) = copied else {
        return Ok(());
    };

    // The failure may be the caller's cancellation, so cleanup runs under its own token
    let aborted = client
        .abort_multipart_upload(
            &CancellationToken::new(),
            AbortMultipartUploadOptions {
                bucket: opts.destination_bucket.clone(),
                upload_id: upload_id.clone(),
                key: opts.destination_key.clone(),
            },
        )
        .await;

    if let Err(abort_err) = aborted {
        warn!(
            bucket = %opts.destination_bucket,
            key = %opts.destination_key,
            upload_id = %upload_id,
            error = %abort_err,
            "Failed to abort multipart copy, parts may be left behind"
        );
    }

    Err(err)
}

async fn copy_parts(
    client: &dyn ObjectClient,
    cancel: &CancellationToken,
    opts: &CopyObjectOptions,
    upload_id: &str,
    size: u64,
    part_size: u64,
) -> Result<()> {
    let mut parts = Vec::new();

    for window in windows(size, part_size) {
        let part = client
            .upload_part_copy(
                cancel,
                UploadPartCopyOptions {
                    destination_bucket: opts.destination_bucket.clone(),
                    upload_id: upload_id.to_string(),
                    destination_key: opts.destination_key.clone(),
                    source_bucket: opts.source_bucket.clone(),
                    source_key: opts.source_key.clone(),
                    number: parts.len() as u32 + 1,
                    byte_range: Some(window),
                },
            )
            .await
            .map_err(|e| e.context("failed to copy part"))?;

        parts.push(part);
    }

    client
        .complete_multipart_upload(
            cancel,
            CompleteMultipartUploadOptions {
                bucket: opts.destination_bucket.clone(),
                upload_id: upload_id.to_string(),
                key: opts.destination_key.clone(),
                parts,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| e.context("failed to complete multipart upload"))
}

#[derive(Debug, Clone, Default)]
pub struct CopyObjectsOptions {
    pub destination_bucket: String,
    pub destination_prefix: String,
    pub source_bucket: String,
    pub source_prefix: String,
    pub source_delimiter: String,
    pub source_include: Vec<Regex>,
    pub source_exclude: Vec<Regex>,

    /// Size of each copied part, zero for the default
    pub part_size: u64,

    /// Number of objects copied concurrently, zero for the default
    pub workers: usize,

    /// Overrides the provider's single request copy limit
    pub max_single_copy_size: Option<u64>,
}

impl CopyObjectsOptions {
    /// Part size and worker count taken from `config`, everything else left to the caller
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            part_size: config.part_size,
            workers: config.copy_workers,
            ..Default::default()
        }
    }
}

/// Copy every object under a prefix, replacing the source prefix of each key with the destination prefix.
///
/// Directory stubs produced by the delimiter are skipped. The first failing copy stops the remaining ones.
pub async fn copy_objects(
    client: SharedClient,
    cancel: &CancellationToken,
    opts: CopyObjectsOptions,
) -> Result<()> {
    if opts.source_bucket == opts.destination_bucket && opts.source_prefix == opts.destination_prefix {
        return Err(Error::CopyToSamePrefix);
    }

    resolve_part_size(opts.part_size)?;

    let workers = match opts.workers {
        0 => DEFAULT_WORKERS,
        n => n,
    };

    info!(
        source_bucket = %opts.source_bucket,
        source_prefix = %opts.source_prefix,
        destination_bucket = %opts.destination_bucket,
        destination_prefix = %opts.destination_prefix,
        "Copying objects"
    );

    let pool = Pool::new(workers, cancel);

    let iterate = IterateObjectsOptions {
        bucket: opts.source_bucket.clone(),
        prefix: opts.source_prefix.clone(),
        delimiter: opts.source_delimiter.clone(),
        include: opts.source_include.clone(),
        exclude: opts.source_exclude.clone(),
        versions: false,
    };

    let iterated = {
        let pool = &pool;
        let opts = &opts;
        let source = &client;

        let mut queue = move |attrs: ObjectAttrs| {
            if attrs.is_dir() {
                return async { Ok(()) }.boxed();
            }

            let client = source.clone();
            let copy = CopyObjectOptions {
                destination_bucket: opts.destination_bucket.clone(),
                destination_key: attrs
                    .key
                    .replacen(&opts.source_prefix, &opts.destination_prefix, 1),
                source_bucket: opts.source_bucket.clone(),
                source_key: attrs.key,
                part_size: opts.part_size,
                max_single_copy_size: opts.max_single_copy_size,
            };

            async move {
                pool.queue(move |token| async move { copy_object(&*client, &token, copy).await })
                    .await
            }
            .boxed()
        };

        client.iterate_objects(cancel, iterate, &mut queue).await
    };

    let stopped = pool.stop().await;

    iterated.map_err(|e| e.context("failed to iterate objects"))?;
    stopped.map_err(|e| e.context("failed to copy objects"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryClient;
    use crate::client::PutObjectOptions;
    use crate::model::Provider;
    use std::sync::Arc;

    async fn store(provider: Provider, objects: &[(&str, &'static str)]) -> Arc<InMemoryClient> {
        let client = Arc::new(InMemoryClient::new(provider));
        for (key, body) in objects {
            client
                .put_object(&CancellationToken::new(), PutObjectOptions::new("src", *key, *body))
                .await
                .unwrap();
        }
        client
    }

    fn single(source: &str, destination: &str) -> CopyObjectOptions {
        CopyObjectOptions {
            destination_bucket: "dst".to_string(),
            destination_key: destination.to_string(),
            source_bucket: "src".to_string(),
            source_key: source.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_copy_small_object() {
        let client = store(Provider::Aws, &[("a", "hello")]).await;

        copy_object(&*client, &CancellationToken::new(), single("a", "b"))
            .await
            .unwrap();

        assert_eq!(client.body("dst", "b").unwrap(), "hello");
        assert_eq!(client.body("src", "a").unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_unknown_provider_copies_in_parts() {
        let client = store(Provider::None, &[("a", "0123456789")]).await;
        let opts = CopyObjectOptions {
            part_size: 3,
            ..single("a", "b")
        };

        copy_object(&*client, &CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(client.body("dst", "b").unwrap(), "0123456789");
        assert_eq!(client.keys("dst"), vec!["b"]);
    }

    #[tokio::test]
    async fn test_copy_missing_object() {
        let client = store(Provider::Aws, &[]).await;

        let err = copy_object(&*client, &CancellationToken::new(), single("missing", "b"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(client.keys("dst").is_empty());
    }

    #[tokio::test]
    async fn test_copy_objects_rewrites_prefix() {
        let client = store(
            Provider::Aws,
            &[("in/a", "1"), ("in/dir/b", "22"), ("other/c", "333")],
        )
        .await;

        let opts = CopyObjectsOptions {
            destination_bucket: "dst".to_string(),
            destination_prefix: "out/".to_string(),
            source_bucket: "src".to_string(),
            source_prefix: "in/".to_string(),
            max_single_copy_size: Some(1),
            part_size: 2,
            ..Default::default()
        };

        copy_objects(client.clone(), &CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(client.keys("dst"), vec!["out/a", "out/dir/b"]);
        assert_eq!(client.body("dst", "out/dir/b").unwrap(), "22");
    }

    #[tokio::test]
    async fn test_single_byte_parts_rejected() {
        let client = store(Provider::None, &[("a", "0123456789")]).await;
        let opts = CopyObjectOptions {
            part_size: 1,
            ..single("a", "b")
        };

        let err = copy_object(&*client, &CancellationToken::new(), opts)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(client.keys("dst").is_empty());
    }

    #[tokio::test]
    async fn test_copy_objects_from_config() {
        let client = store(Provider::Aws, &[("in/a", "0123456789"), ("in/b", "abc")]).await;
        let config = TransferConfig {
            part_size: 4,
            copy_workers: 3,
            ..Default::default()
        };

        let opts = CopyObjectsOptions {
            destination_bucket: "dst".to_string(),
            destination_prefix: "out/".to_string(),
            source_bucket: "src".to_string(),
            source_prefix: "in/".to_string(),
            max_single_copy_size: Some(2),
            ..CopyObjectsOptions::from_config(&config)
        };
        assert_eq!(opts.workers, 3);
        assert_eq!(opts.part_size, 4);

        copy_objects(client.clone(), &CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(client.body("dst", "out/a").unwrap(), "0123456789");
        assert_eq!(client.body("dst", "out/b").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_copy_objects_skips_directories() {
        let client = store(Provider::Aws, &[("in/a", "1"), ("in/dir/b", "22")]).await;

        let opts = CopyObjectsOptions {
            destination_bucket: "dst".to_string(),
            destination_prefix: "out/".to_string(),
            source_bucket: "src".to_string(),
            source_prefix: "in/".to_string(),
            source_delimiter: "/".to_string(),
            ..Default::default()
        };

        copy_objects(client.clone(), &CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(client.keys("dst"), vec!["out/a"]);
    }

    #[tokio::test]
    async fn test_copy_to_same_prefix() {
        let client = store(Provider::Aws, &[("in/a", "1")]).await;

        let opts = CopyObjectsOptions {
            destination_bucket: "src".to_string(),
            destination_prefix: "in/".to_string(),
            source_bucket: "src".to_string(),
            source_prefix: "in/".to_string(),
            ..Default::default()
        };

        let err = copy_objects(client, &CancellationToken::new(), opts)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CopyToSamePrefix));
    }
}
