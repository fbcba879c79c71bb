//! Transport seam: how the engine reaches a remote endpoint.
//!
//! The engine never frames its payloads: a connection carries raw bytes
//! (or an IV-prefixed ciphertext) and the remote side treats end-of-stream
//! as end-of-object. Which object a connection belongs to is the dialer's
//! business; `RemoteObject` carries the name so a dialer can route it.
//!
//! Two dialers ship with the crate:
//!   TcpDialer      plain TCP, one connection per object, name not sent
//!   MemoryDialer   in-process object store, used for loopback and tests

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes};
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

use ferry_core::chunk::part_name;
use ferry_core::{DigestAlgorithm, EncryptionKey, Result};

use crate::stream::Pipe;

/// A full-duplex byte stream to a remote endpoint.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

pub type Connection = Box<dyn Duplex>;

/// The remote object a connection reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// `host:port` (or any dialer-specific address).
    pub endpoint: String,
    /// Object name as the remote side should know it.
    pub name: String,
}

impl RemoteObject {
    pub fn new(endpoint: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            name: name.into(),
        }
    }

    /// Part object for parallel upload: `<endpoint>/<basename>.part<index>`.
    pub fn part(endpoint: &str, source: &Path, index: usize) -> Self {
        Self::new(endpoint, format!("{endpoint}/{}", part_name(source, index)))
    }
}

/// Opens connections. Implementations must be shareable across chunk tasks.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, io::Result<Connection>>;
}

// ── TCP ───────────────────────────────────────────────────────────────────────

/// Dials `object.endpoint` over TCP. The object name is not transmitted;
/// the receiving side decides where each connection's bytes land.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, io::Result<Connection>> {
        Box::pin(async move {
            let stream = tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect(object.endpoint.as_str()),
            )
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", object.endpoint),
                )
            })??;
            stream.set_nodelay(true)?;
            tracing::trace!(endpoint = %object.endpoint, object = %object.name, "tcp connected");
            Ok(Box::new(stream) as Connection)
        })
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// In-process object store behind the `Dialer` seam.
///
/// Writes become visible under the object's name when the connection is
/// shut down; a connection dropped without shutdown publishes nothing.
/// Reads serve whatever is stored under the name (empty if absent).
#[derive(Clone, Default)]
pub struct MemoryDialer {
    objects: Arc<DashMap<String, Bytes>>,
    refused: Arc<DashSet<String>>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.get(name).map(|v| v.value().clone())
    }

    /// Sorted list of stored object names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Make every future dial for `name` fail with `ConnectionRefused`.
    pub fn refuse(&self, name: impl Into<String>) {
        self.refused.insert(name.into());
    }

    pub fn accept(&self, name: &str) {
        self.refused.remove(name);
    }
}

impl Dialer for MemoryDialer {
    fn dial<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, io::Result<Connection>> {
        Box::pin(async move {
            if self.refused.contains(&object.name) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{} refused", object.name),
                ));
            }
            let inbound = self.get(&object.name).unwrap_or_default();
            Ok(Box::new(MemoryConnection {
                name: object.name.clone(),
                inbound,
                outbound: Mutex::new(Vec::new()),
                store: self.objects.clone(),
            }) as Connection)
        })
    }
}

struct MemoryConnection {
    name: String,
    inbound: Bytes,
    outbound: Mutex<Vec<u8>>,
    store: Arc<DashMap<String, Bytes>>,
}

impl AsyncRead for MemoryConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = buf.remaining().min(self.inbound.len());
        buf.put_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemoryConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let data = std::mem::take(
            &mut *self
                .outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.store.insert(self.name.clone(), Bytes::from(data));
        Poll::Ready(Ok(()))
    }
}

// ── Receiving side ────────────────────────────────────────────────────────────

/// Accept one connection on `listener` and write its stream to `path`,
/// decrypting when a key is given. Returns plaintext bytes written.
pub async fn receive_into(
    listener: &TcpListener,
    path: &Path,
    key: Option<&EncryptionKey>,
) -> Result<u64> {
    let (mut stream, peer) = listener.accept().await?;
    let endpoint = peer.to_string();
    let mut file = tokio::fs::File::create(path).await?;

    let pipe = Pipe::new(&endpoint, key, &[], DigestAlgorithm::Sha256);
    let (bytes, digest) = pipe.pull(&mut stream, &mut file).await?;

    tracing::info!(
        action = "receive",
        identifier = %path.display(),
        status = "ok",
        peer = %endpoint,
        bytes,
        digest = %digest,
        "stream received"
    );
    Ok(bytes)
}

/// Accept one connection on `listener` and stream `path` into it,
/// encrypting when a key is given. Returns plaintext bytes sent.
pub async fn serve_file(
    listener: &TcpListener,
    path: &Path,
    key: Option<&EncryptionKey>,
) -> Result<u64> {
    let file = tokio::fs::File::open(path).await?;
    let (mut stream, peer) = listener.accept().await?;
    let endpoint = peer.to_string();

    let pipe = Pipe::new(&endpoint, key, &[], DigestAlgorithm::Sha256);
    let (bytes, digest) = pipe.push(file, &mut stream).await?;

    tracing::info!(
        action = "serve",
        identifier = %path.display(),
        status = "ok",
        peer = %endpoint,
        bytes,
        digest = %digest,
        "file served"
    );
    Ok(bytes)
}
