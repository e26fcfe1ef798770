use crate::client::{IterateObjectsOptions, ObjectClient};
use crate::error::{Error, Result};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// Whether any object or directory stub exists under `prefix`.
///
/// Only a single level is listed and the listing stops at the first entry.
pub async fn prefix_exists(
    client: &dyn ObjectClient,
    cancel: &CancellationToken,
    bucket: &str,
    prefix: &str,
) -> Result<bool> {
    let iterated = client
        .iterate_objects(
            cancel,
            IterateObjectsOptions::new(bucket, prefix).with_delimiter("/"),
            &mut |_| async { Err(Error::Halt) }.boxed(),
        )
        .await;

    match iterated {
        Ok(()) => Ok(false),
        Err(err) if err.is_halt() => Ok(true),
        Err(err) => Err(err.context("failed to iterate objects")),
    }
}
