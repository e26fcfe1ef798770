/*!
 * Round trip tests for directory sync
 */

mod common;

use common::noise;
use cirrus::config::TransferConfig;
use cirrus::model::Provider;
use cirrus::transfer::prefix_exists;
use cirrus::{InMemoryClient, Syncer};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn write_tree(root: &Path) -> Vec<(&'static str, Vec<u8>)> {
    let files = vec![
        ("small.txt", b"Hello, cirrus!".to_vec()),
        ("large.bin", noise(10_000, 7)),
        ("deeply/nested/dir/file.bin", noise(2048, 8)),
    ];

    for (name, body) in &files {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    files
}

#[tokio::test]
async fn test_sync_round_trip() {
    let source = tempdir().unwrap();
    let destination = tempdir().unwrap();
    let files = write_tree(source.path());

    let client = Arc::new(InMemoryClient::new(Provider::Azure));
    let config = TransferConfig {
        part_size: 1024,
        mpu_threshold: 4096,
        part_upload_workers: 2,
        download_workers: 3,
        ..Default::default()
    };
    let syncer = Syncer::from_config(client.clone(), &config);
    let cancel = CancellationToken::new();

    let up = format!("{}/", source.path().display());
    syncer.sync(&cancel, &up, "az://container/backup").await.unwrap();

    assert!(prefix_exists(&*client, &cancel, "container", "backup/deeply/").await.unwrap());
    assert!(!prefix_exists(&*client, &cancel, "container", "restore/").await.unwrap());

    let down = destination.path().display().to_string();
    syncer.sync(&cancel, "az://container/backup/", &down).await.unwrap();

    for (name, body) in files {
        let restored = std::fs::read(destination.path().join(name)).unwrap();
        assert_eq!(restored, body, "{}", name);
    }
}

#[tokio::test]
async fn test_sync_with_bandwidth_limit() {
    let source = tempdir().unwrap();
    std::fs::write(source.path().join("file.txt"), vec![b'x'; 4096]).unwrap();

    let client = Arc::new(InMemoryClient::new(Provider::Aws));
    let config = TransferConfig {
        bytes_per_second: 1024 * 1024,
        ..Default::default()
    };

    let up = format!("{}/", source.path().display());
    Syncer::from_config(client.clone(), &config)
        .sync(&CancellationToken::new(), &up, "s3://bucket/limited")
        .await
        .unwrap();

    assert_eq!(client.body("bucket", "limited/file.txt").unwrap().len(), 4096);
}

#[tokio::test]
async fn test_sync_cancelled() {
    let source = tempdir().unwrap();
    write_tree(source.path());

    let client = Arc::new(InMemoryClient::new(Provider::Aws));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let up = format!("{}/", source.path().display());
    let result = Syncer::from_config(client.clone(), &TransferConfig::default())
        .sync(&cancel, &up, "s3://bucket/backup")
        .await;

    assert!(result.unwrap_err().root().is_cancelled());
    assert!(client.keys("bucket").is_empty());
}
