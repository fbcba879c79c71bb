//! Ferry integration test harness.
//!
//! Every test here runs the engine against real TCP sockets on loopback.
//! Listeners bind port 0, so tests can run in parallel without
//! coordinating ports.
//!
//!   cargo test --test integration
//!
//! Each test owns the listeners and tasks it spawns.

mod failures;
mod transfers;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ferry_core::config::TransferSettings;
use ferry_services::TransferEngine;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A loopback listener that accepts a fixed number of connections and keeps
/// each connection's bytes. TCP carries no object names, so payloads come
/// back in accept order.
pub struct Sink {
    pub addr: SocketAddr,
    handle: JoinHandle<Result<Vec<Vec<u8>>>>,
}

impl Sink {
    pub async fn bind(connections: usize) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let mut accepted = Vec::with_capacity(connections);
            for _ in 0..connections {
                let (stream, _) = listener.accept().await?;
                accepted.push(tokio::spawn(async move {
                    let mut stream = stream;
                    let mut buf = Vec::new();
                    stream.read_to_end(&mut buf).await?;
                    Ok::<_, anyhow::Error>(buf)
                }));
            }
            let mut payloads = Vec::with_capacity(accepted.len());
            for conn in accepted {
                payloads.push(conn.await??);
            }
            Ok::<_, anyhow::Error>(payloads)
        });
        Ok(Self { addr, handle })
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub async fn payloads(self) -> Result<Vec<Vec<u8>>> {
        self.handle.await.context("sink task panicked")?
    }
}

/// An address nothing listens on.
pub async fn dead_endpoint() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

/// Deterministic, non-repeating-ish test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn settings() -> TransferSettings {
    TransferSettings {
        min_chunk_size: 0,
        connect_timeout_secs: 5,
        ..TransferSettings::default()
    }
}

pub fn tcp_engine() -> TransferEngine {
    TransferEngine::tcp(&settings())
}
