use anyhow::Result;
use tokio::net::TcpListener;

use ferry_core::digest::digest_bytes;
use ferry_core::{DigestAlgorithm, EncryptionKey, Error};
use ferry_services::transport::serve_file;
use ferry_services::{ConflictPolicy, TransferRequest};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Connection & integrity failures
// ══════════════════════════════════════════════════════════════════════════════

/// Nobody listening: single-stream upload fails fast with a connection error.
#[tokio::test]
async fn test_upload_to_dead_endpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = write_file(dir.path(), "a.txt", b"hello")?;

    let err = tcp_engine()
        .upload(&TransferRequest::upload(&source, dead_endpoint().await?))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    Ok(())
}

/// Every chunk fails on its own; all failures are collected, none dropped.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_upload_to_dead_endpoint_collects_all_chunks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = write_file(dir.path(), "b.bin", &pattern(40_000))?;

    let result = tcp_engine()
        .parallel_upload(&TransferRequest::upload(&source, dead_endpoint().await?).chunks(4))
        .await?;

    assert_eq!(result.chunks_total, 4);
    assert_eq!(result.failed_chunks(), vec![0, 1, 2, 3]);
    assert!(result
        .chunk_errors
        .values()
        .all(|e| matches!(e, Error::Connection { .. })));
    assert_eq!(result.bytes_transferred, 0);
    assert!(!result.is_success());
    Ok(())
}

/// Served bytes do not match the expected digest: reported, not placed.
#[tokio::test]
async fn test_download_digest_mismatch_keeps_destination() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let served = write_file(dir.path(), "served.txt", b"what the server has")?;
    let dest = write_file(dir.path(), "mine.txt", b"what I have")?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let server = tokio::spawn(async move { serve_file(&listener, &served, None).await });

    let request = TransferRequest::download(endpoint, "served.txt", &dest)
        .expect_digest(digest_bytes(DigestAlgorithm::Sha256, b"what I expected"))
        .on_conflict(ConflictPolicy::Overwrite);
    let result = tcp_engine().download(&request).await?;
    server.await??;

    assert!(!result.digest_match);
    assert_eq!(std::fs::read(&dest)?, b"what I have");
    assert!(!dir.path().join("mine.txt.incoming").exists());
    Ok(())
}

/// Peer closes before sending a full IV: truncated stream, nothing placed.
#[tokio::test]
async fn test_encrypted_download_of_truncated_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("never.bin");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let server = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let (mut stream, _) = listener.accept().await?;
        stream.write_all(&[0u8; 9]).await?;
        stream.shutdown().await?;
        Ok::<_, anyhow::Error>(())
    });

    let key = EncryptionKey::new(vec![2u8; 16])?;
    let err = tcp_engine()
        .download(&TransferRequest::download(endpoint, "x", &dest).encrypt(key))
        .await
        .unwrap_err();
    server.await??;

    assert!(
        matches!(err, Error::TruncatedStream { expected: 16, got: 9 }),
        "got {err:?}"
    );
    assert!(!dest.exists());
    Ok(())
}
