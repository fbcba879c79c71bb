use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;

use ferry_core::cipher::decrypt_stream;
use ferry_core::config::TransferSettings;
use ferry_core::digest::digest_bytes;
use ferry_core::{DigestAlgorithm, EncryptionKey};
use ferry_services::transport::{receive_into, serve_file};
use ferry_services::{ConflictPolicy, TransferEngine, TransferRequest};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Single-stream transfers
// ══════════════════════════════════════════════════════════════════════════════

/// Plain upload: the remote side sees exactly the file's bytes.
#[tokio::test]
async fn test_upload_over_tcp() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(300_000);
    let source = write_file(dir.path(), "plain.bin", &data)?;

    let sink = Sink::bind(1).await?;
    let result = tcp_engine()
        .upload(&TransferRequest::upload(&source, sink.endpoint()))
        .await?;

    assert!(result.is_success());
    assert_eq!(result.bytes_transferred, data.len() as u64);
    assert_eq!(sink.payloads().await?, vec![data]);
    Ok(())
}

/// Encrypted upload: the wire carries IV + ciphertext that decrypts back.
#[tokio::test]
async fn test_encrypted_upload_over_tcp() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(65_537);
    let source = write_file(dir.path(), "secret.bin", &data)?;
    let key = EncryptionKey::new(vec![0x5a; 16])?;

    let sink = Sink::bind(1).await?;
    let result = tcp_engine()
        .upload(&TransferRequest::upload(&source, sink.endpoint()).encrypt(key.clone()))
        .await?;
    assert!(result.is_success());

    let wire = sink.payloads().await?.remove(0);
    assert_eq!(wire.len(), data.len() + 16);
    assert_ne!(&wire[16..], &data[..]);

    let mut plain = Vec::new();
    decrypt_stream(&wire[..], &mut plain, &key)?;
    assert_eq!(plain, data);
    Ok(())
}

/// Upload into a peer running `receive_into`, with decryption on arrival.
#[tokio::test]
async fn test_upload_into_receiver() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(123_456);
    let source = write_file(dir.path(), "doc.pdf", &data)?;
    let landed = dir.path().join("landed.pdf");
    let key = EncryptionKey::new(vec![1u8; 32])?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let receiver = {
        let landed = landed.clone();
        let key = key.clone();
        tokio::spawn(async move { receive_into(&listener, &landed, Some(&key)).await })
    };

    let result = tcp_engine()
        .upload(&TransferRequest::upload(&source, endpoint).encrypt(key))
        .await?;
    assert!(result.is_success());

    assert_eq!(receiver.await??, data.len() as u64);
    assert_eq!(std::fs::read(&landed)?, data);
    Ok(())
}

/// `send` with several chunks requested, into a single-stream receiver:
/// chunks would fall under the minimum size, so the whole file goes over
/// one connection and nothing is lost.
#[tokio::test]
async fn test_send_small_file_into_receiver_is_whole() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(40_000);
    let source = write_file(dir.path(), "notes.txt", &data)?;
    let landed = dir.path().join("landed.txt");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let receiver = {
        let landed = landed.clone();
        tokio::spawn(async move { receive_into(&listener, &landed, None).await })
    };

    let engine = TransferEngine::tcp(&TransferSettings {
        connect_timeout_secs: 5,
        ..TransferSettings::default()
    });
    let result = engine
        .send(&TransferRequest::upload(&source, endpoint).chunks(4))
        .await?;

    assert!(result.is_success());
    assert_eq!(result.chunks_total, 1);
    assert_eq!(receiver.await??, data.len() as u64);
    assert_eq!(std::fs::read(&landed)?, data);
    Ok(())
}

/// Download from a peer running `serve_file`, verified against the source
/// digest, onto an existing file with the backup policy.
#[tokio::test]
async fn test_download_over_tcp_with_backup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(200_000);
    let served = write_file(dir.path(), "served.bin", &data)?;
    let dest = write_file(dir.path(), "local.bin", b"previous contents")?;
    let key = EncryptionKey::new(vec![7u8; 24])?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let server = {
        let key = key.clone();
        tokio::spawn(async move { serve_file(&listener, &served, Some(&key)).await })
    };

    let request = TransferRequest::download(endpoint, "served.bin", &dest)
        .encrypt(key)
        .expect_digest(digest_bytes(DigestAlgorithm::Sha256, &data))
        .on_conflict(ConflictPolicy::BackupThenOverwrite);
    let result = tcp_engine().download(&request).await?;

    assert!(result.is_success());
    assert_eq!(server.await??, data.len() as u64);
    assert_eq!(std::fs::read(&dest)?, data);
    assert_eq!(
        std::fs::read(dir.path().join("local.bin.bak"))?,
        b"previous contents"
    );
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Parallel upload
// ══════════════════════════════════════════════════════════════════════════════

/// Three chunks over three connections; every chunk arrives intact.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_upload_over_tcp() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(3_000_001);
    let source = write_file(dir.path(), "big.iso", &data)?;

    let sink = Sink::bind(3).await?;
    let result = tcp_engine()
        .parallel_upload(&TransferRequest::upload(&source, sink.endpoint()).chunks(3))
        .await?;

    assert!(result.is_success(), "chunk errors: {:?}", result.chunk_errors);
    assert_eq!(result.chunks_total, 3);
    assert_eq!(result.bytes_transferred, data.len() as u64);

    // Arrival order is up to the network; compare as a set of slices.
    let got = sink.payloads().await?;
    let expected = [
        data[..1_000_000].to_vec(),
        data[1_000_000..2_000_000].to_vec(),
        data[2_000_000..].to_vec(),
    ];
    for slice in &expected {
        assert!(got.contains(slice), "missing a chunk of {} bytes", slice.len());
    }
    assert_eq!(got.len(), 3);
    Ok(())
}

/// Engine-wide rate limit applies to real sockets.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rate_limited_upload_takes_time() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = pattern(100 * 1024);
    let source = write_file(dir.path(), "slow.bin", &data)?;

    let engine = tcp_engine();
    engine.set_rate_limit(32 * 1024);
    let sink = Sink::bind(1).await?;

    let start = Instant::now();
    let result = engine
        .upload(&TransferRequest::upload(&source, sink.endpoint()))
        .await?;
    let elapsed = start.elapsed();

    assert!(result.is_success());
    // 100 KiB at 32 KiB/s spans four windows. The first one opened when the
    // engine was built, so only count the resets after it.
    assert!(elapsed >= Duration::from_secs(2), "finished in {elapsed:?}");
    assert_eq!(sink.payloads().await?, vec![data]);
    Ok(())
}
