/*!
 * Cirrus - multi-cloud object storage transfers
 *
 * A provider neutral object storage client contract with transfer orchestration built on top of it:
 * - Concurrent multipart uploads and ranged downloads
 * - Server side copies of single objects and whole prefixes
 * - Streaming a prefix into a zip archive uploaded as a multipart upload
 * - Directory sync between the local filesystem and a bucket
 * - Bandwidth limiting and an in-memory reference client
 */

pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod freelist;
pub mod logging;
pub mod model;
pub mod pool;
pub mod sync;
pub mod transfer;
pub mod url;

// Re-export commonly used types
pub use client::memory::InMemoryClient;
pub use client::rate_limited::{BandwidthLimiter, RateLimitedClient};
pub use client::{ObjectClient, SharedClient};
pub use config::TransferConfig;
pub use error::{Error, Result};
pub use model::{ByteRange, ObjectAttrs, Provider};
pub use sync::{SyncOptions, Syncer};
pub use url::CloudOrFileUrl;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
