//! Transfer coordinator: turns a `TransferRequest` into connections.
//!
//! Three shapes of transfer, plus `send` which picks between the uploads:
//!   upload           one connection, whole file
//!   download         one connection, read to EOF into a temp file, verify,
//!                    then resolve against any existing destination
//!   parallel_upload  split by count, one task and one connection per chunk,
//!                    every task joined, failures collected per chunk
//!
//! Single-stream failures propagate as `Err`. Chunk failures never do: they
//! land in `TransferResult::chunk_errors` and the caller decides whether to
//! `retry_chunks`. Nothing is retried automatically.
//!
//! Every finished attempt is logged and published to `subscribe()` receivers.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncSeekExt;
use tokio::sync::broadcast;

use ferry_core::chunk::{self, Chunk};
use ferry_core::config::TransferSettings;
use ferry_core::digest::digest_file;
use ferry_core::{Digest, DigestAlgorithm, EncryptionKey, Error, Result};

use crate::conflict::{self, ConflictPolicy};
use crate::dependency::DependencyTable;
use crate::progress::{self, ProgressHook, ProgressTracker, TransferEvent, EVENT_CAPACITY};
use crate::protocol::ProtocolTable;
use crate::rate_limit::RateLimiter;
use crate::stream::Pipe;
use crate::transport::{Dialer, MemoryDialer, RemoteObject, TcpDialer};

// ── Request ───────────────────────────────────────────────────────────────────

/// What to move, where, and how. Built once, then only borrowed.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Local file for uploads; remote file name for downloads.
    pub source_path: PathBuf,
    pub endpoint: String,
    /// Local destination for downloads.
    pub destination_path: Option<PathBuf>,
    pub chunk_count: usize,
    pub encryption_key: Option<EncryptionKey>,
    /// Per-transfer ceiling, applied on top of the engine-wide one.
    pub rate_limit: Option<u64>,
    pub expected_digest: Option<Digest>,
    pub conflict_policy: ConflictPolicy,
    pub progress: Option<ProgressHook>,
}

impl TransferRequest {
    pub fn upload(source: impl Into<PathBuf>, endpoint: impl Into<String>) -> Self {
        Self {
            source_path: source.into(),
            endpoint: endpoint.into(),
            destination_path: None,
            chunk_count: 1,
            encryption_key: None,
            rate_limit: None,
            expected_digest: None,
            conflict_policy: ConflictPolicy::default(),
            progress: None,
        }
    }

    pub fn download(
        endpoint: impl Into<String>,
        remote: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            destination_path: Some(destination.into()),
            ..Self::upload(remote, endpoint)
        }
    }

    pub fn chunks(mut self, count: usize) -> Self {
        self.chunk_count = count;
        self
    }

    pub fn encrypt(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn rate_limit(mut self, bytes_per_sec: u64) -> Self {
        self.rate_limit = Some(bytes_per_sec);
        self
    }

    pub fn expect_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    pub fn on_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn on_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Remote object for a whole-file transfer: `<endpoint>/<basename>`.
    pub fn remote_object(&self) -> RemoteObject {
        let base = self
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        RemoteObject::new(&self.endpoint, format!("{}/{base}", self.endpoint))
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TransferResult {
    /// Plaintext bytes moved (IVs not counted).
    pub bytes_transferred: u64,
    pub chunks_total: usize,
    pub digest: Option<Digest>,
    pub digest_match: bool,
    pub chunk_errors: BTreeMap<usize, Error>,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.chunk_errors.is_empty() && self.digest_match
    }

    pub fn failed_chunks(&self) -> Vec<usize> {
        self.chunk_errors.keys().copied().collect()
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            bytes_transferred: self.bytes_transferred,
            chunks_total: self.chunks_total,
            digest: self.digest.as_ref().map(|d| d.to_string()),
            digest_match: self.digest_match,
            failed_chunks: self
                .chunk_errors
                .iter()
                .map(|(index, e)| ChunkFailure {
                    index: *index,
                    kind: e.kind(),
                    error: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Serializable view of a `TransferResult`, for JSON output.
#[derive(Debug, Serialize)]
pub struct TransferSummary {
    pub bytes_transferred: u64,
    pub chunks_total: usize,
    pub digest: Option<String>,
    pub digest_match: bool,
    pub failed_chunks: Vec<ChunkFailure>,
}

#[derive(Debug, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub kind: &'static str,
    pub error: String,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct TransferEngine {
    dialer: Arc<dyn Dialer>,
    limiter: RateLimiter,
    algorithm: DigestAlgorithm,
    min_chunk_size: u64,
    dependencies: DependencyTable,
    protocols: ProtocolTable,
    events: broadcast::Sender<TransferEvent>,
}

impl TransferEngine {
    pub fn new(dialer: Arc<dyn Dialer>, settings: &TransferSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dialer,
            limiter: RateLimiter::new(settings.rate_limit_bytes_per_sec),
            algorithm: settings.digest_algorithm,
            min_chunk_size: settings.min_chunk_size,
            dependencies: DependencyTable::new(),
            protocols: ProtocolTable::new(),
            events,
        }
    }

    /// Engine dialing real TCP endpoints with the configured connect timeout.
    pub fn tcp(settings: &TransferSettings) -> Self {
        let dialer = TcpDialer::new(Duration::from_secs(settings.connect_timeout_secs));
        Self::new(Arc::new(dialer), settings)
    }

    /// Engine over an in-process object store.
    pub fn in_memory(dialer: MemoryDialer, settings: &TransferSettings) -> Self {
        Self::new(Arc::new(dialer), settings)
    }

    pub fn set_rate_limit(&self, bytes_per_sec: u64) {
        self.limiter.set_limit(bytes_per_sec);
    }

    pub fn rate_limit(&self) -> u64 {
        self.limiter.limit()
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn dependencies(&self) -> &DependencyTable {
        &self.dependencies
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    /// One `TransferEvent` per finished upload, download or chunk attempt,
    /// from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Upload `request`, splitting it only when it asks for more than one
    /// chunk and every chunk would reach `min_chunk_size`. Otherwise the
    /// file goes as one stream.
    pub async fn send(&self, request: &TransferRequest) -> Result<TransferResult> {
        let chunks = self.plan_chunks(request).await?;
        if chunks > 1 {
            self.parallel_upload(request).await
        } else {
            self.upload(request).await
        }
    }

    /// How many chunks `send` will use for `request`.
    pub async fn plan_chunks(&self, request: &TransferRequest) -> Result<usize> {
        if request.chunk_count <= 1 {
            return Ok(1);
        }
        let size = tokio::fs::metadata(&request.source_path).await?.len();
        let per_chunk = size / request.chunk_count as u64;
        if per_chunk < self.min_chunk_size {
            tracing::info!(
                identifier = %request.source_path.display(),
                size,
                requested = request.chunk_count,
                min_chunk_size = self.min_chunk_size,
                "chunks would be too small, sending as one stream"
            );
            return Ok(1);
        }
        Ok(request.chunk_count)
    }

    /// Send the whole source file over one connection.
    pub async fn upload(&self, request: &TransferRequest) -> Result<TransferResult> {
        let object = request.remote_object();
        let identifier = object.name.clone();
        let outcome = self.upload_inner(request, &object).await;
        progress::record(&self.events, "upload", &identifier, &outcome);
        outcome
    }

    async fn upload_inner(
        &self,
        request: &TransferRequest,
        object: &RemoteObject,
    ) -> Result<TransferResult> {
        let source = tokio::fs::File::open(&request.source_path).await?;
        let size = source.metadata().await?.len();
        let mut conn = self
            .dialer
            .dial(object)
            .await
            .map_err(|e| Error::connection(&request.endpoint, e))?;

        let request_limiter = request.rate_limit.map(RateLimiter::new);
        let limiters = self.limiters(request_limiter.as_ref());
        let tracker = request
            .progress
            .clone()
            .map(|hook| ProgressTracker::new(hook, Some(size)));
        let pipe = Pipe::new(
            &request.endpoint,
            request.encryption_key.as_ref(),
            &limiters,
            self.algorithm,
        )
        .with_progress(tracker.as_ref());
        let (bytes, streamed) = pipe.push(source, &mut conn).await?;

        let reference = match &request.expected_digest {
            Some(expected) => expected.clone(),
            None => self.digest_of(&request.source_path).await?,
        };
        let digest_match = streamed == reference;
        if !digest_match {
            tracing::warn!(
                identifier = %object.name,
                expected = %reference,
                actual = %streamed,
                "uploaded bytes do not match source digest"
            );
        }

        Ok(TransferResult {
            bytes_transferred: bytes,
            chunks_total: 1,
            digest: Some(streamed),
            digest_match,
            chunk_errors: BTreeMap::new(),
        })
    }

    /// Fetch `request.source_path` from the endpoint into
    /// `request.destination_path`.
    ///
    /// A digest mismatch is reported through `digest_match` and leaves the
    /// destination untouched.
    pub async fn download(&self, request: &TransferRequest) -> Result<TransferResult> {
        let object = request.remote_object();
        let identifier = object.name.clone();
        let outcome = self.download_inner(request, &object).await;
        progress::record(&self.events, "download", &identifier, &outcome);
        outcome
    }

    async fn download_inner(
        &self,
        request: &TransferRequest,
        object: &RemoteObject,
    ) -> Result<TransferResult> {
        let destination = request.destination_path.as_deref().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "download needs a destination path",
            ))
        })?;
        let staging = staging_path(destination);

        let mut conn = self
            .dialer
            .dial(object)
            .await
            .map_err(|e| Error::connection(&request.endpoint, e))?;

        let request_limiter = request.rate_limit.map(RateLimiter::new);
        let limiters = self.limiters(request_limiter.as_ref());
        let tracker = request
            .progress
            .clone()
            .map(|hook| ProgressTracker::new(hook, None));
        let pipe = Pipe::new(
            &request.endpoint,
            request.encryption_key.as_ref(),
            &limiters,
            self.algorithm,
        )
        .with_progress(tracker.as_ref());

        let pulled = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            let pulled = pipe.pull(&mut conn, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, Error>(pulled)
        }
        .await;
        let (bytes, digest) = match pulled {
            Ok(v) => v,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };

        let digest_match = request
            .expected_digest
            .as_ref()
            .map_or(true, |expected| *expected == digest);
        if !digest_match {
            tracing::warn!(
                identifier = %object.name,
                expected = ?request.expected_digest.as_ref().map(|d| d.to_string()),
                actual = %digest,
                "downloaded bytes do not match expected digest"
            );
            discard(&staging).await;
        } else {
            let policy = request.conflict_policy;
            let placed = if destination.exists() {
                conflict::resolve(destination, &staging, policy)
            } else {
                tokio::fs::rename(&staging, destination)
                    .await
                    .map_err(Error::from)
            };
            if let Err(e) = placed {
                discard(&staging).await;
                return Err(e);
            }
        }

        Ok(TransferResult {
            bytes_transferred: bytes,
            chunks_total: 1,
            digest: Some(digest),
            digest_match,
            chunk_errors: BTreeMap::new(),
        })
    }

    /// Split the source into `request.chunk_count` ranges and send each over
    /// its own connection concurrently.
    pub async fn parallel_upload(&self, request: &TransferRequest) -> Result<TransferResult> {
        let chunks = chunk::split_by_count(&request.source_path, request.chunk_count)?;
        self.upload_chunks(request, chunks).await
    }

    /// Re-send only the chunks at `indices`, cut exactly as
    /// `parallel_upload` cut them.
    pub async fn retry_chunks(
        &self,
        request: &TransferRequest,
        indices: &[usize],
    ) -> Result<TransferResult> {
        let chunks: Vec<Chunk> = chunk::split_by_count(&request.source_path, request.chunk_count)?
            .into_iter()
            .filter(|c| indices.contains(&c.index))
            .collect();
        tracing::info!(
            identifier = %request.source_path.display(),
            retrying = ?indices,
            "retrying chunks"
        );
        self.upload_chunks(request, chunks).await
    }

    async fn upload_chunks(
        &self,
        request: &TransferRequest,
        chunks: Vec<Chunk>,
    ) -> Result<TransferResult> {
        let before = self.digest_of(&request.source_path).await?;
        let chunks_total = chunks.len();
        let total_bytes: u64 = chunks.iter().map(|c| c.length).sum();
        let tracker = request
            .progress
            .clone()
            .map(|hook| ProgressTracker::new(hook, Some(total_bytes)));

        let request_limiter = request.rate_limit.map(RateLimiter::new);
        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.length < self.min_chunk_size {
                tracing::warn!(
                    index = chunk.index,
                    length = chunk.length,
                    min_chunk_size = self.min_chunk_size,
                    "chunk below minimum size"
                );
            }
            let task = ChunkTask {
                object: RemoteObject::part(&request.endpoint, &request.source_path, chunk.index),
                chunk,
                dialer: self.dialer.clone(),
                key: request.encryption_key.clone(),
                limiters: request_limiter
                    .iter()
                    .chain(std::iter::once(&self.limiter))
                    .cloned()
                    .collect(),
                algorithm: self.algorithm,
                progress: tracker.clone(),
                events: self.events.clone(),
            };
            let index = task.chunk.index;
            handles.push((index, tokio::spawn(task.run())));
        }

        let mut bytes_transferred = 0u64;
        let mut chunk_errors = BTreeMap::new();
        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(bytes)) => bytes_transferred += bytes,
                Ok(Err(e)) => {
                    chunk_errors.insert(index, e);
                }
                Err(join) => {
                    chunk_errors.insert(
                        index,
                        Error::Io(io::Error::new(io::ErrorKind::Other, join.to_string())),
                    );
                }
            }
        }

        let after = self.digest_of(&request.source_path).await?;
        let digest_match = before == after
            && request
                .expected_digest
                .as_ref()
                .map_or(true, |expected| *expected == after);

        let status = if chunk_errors.is_empty() { "ok" } else { "partial" };
        let identifier = request.source_path.display().to_string();
        tracing::info!(
            action = "parallel_upload",
            identifier = %identifier,
            status,
            chunks = chunks_total,
            failed = chunk_errors.len(),
            bytes = bytes_transferred,
            "parallel upload finished"
        );
        let _ = self.events.send(TransferEvent {
            action: "parallel_upload",
            identifier,
            status,
            error: None,
        });

        Ok(TransferResult {
            bytes_transferred,
            chunks_total,
            digest: Some(after),
            digest_match,
            chunk_errors,
        })
    }

    /// Per-request limiter first: it is usually the narrower one.
    fn limiters<'a>(&'a self, request_limiter: Option<&'a RateLimiter>) -> Vec<&'a RateLimiter> {
        request_limiter.into_iter().chain(std::iter::once(&self.limiter)).collect()
    }

    async fn digest_of(&self, path: &Path) -> Result<Digest> {
        let path = path.to_path_buf();
        let algorithm = self.algorithm;
        tokio::task::spawn_blocking(move || digest_file(&path, algorithm))
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }
}

// ── Chunk task ────────────────────────────────────────────────────────────────

/// Everything one chunk needs, owned so it can move into its own task.
struct ChunkTask {
    chunk: Chunk,
    object: RemoteObject,
    dialer: Arc<dyn Dialer>,
    key: Option<EncryptionKey>,
    limiters: Vec<RateLimiter>,
    algorithm: DigestAlgorithm,
    progress: Option<ProgressTracker>,
    events: broadcast::Sender<TransferEvent>,
}

impl ChunkTask {
    async fn run(self) -> Result<u64> {
        let outcome = self.send().await;
        progress::record(&self.events, "chunk_upload", &self.object.name, &outcome);
        outcome
    }

    async fn send(&self) -> Result<u64> {
        let mut source = tokio::fs::File::open(&self.chunk.source).await?;
        source
            .seek(io::SeekFrom::Start(self.chunk.offset))
            .await?;
        let range = tokio::io::AsyncReadExt::take(source, self.chunk.length);

        let mut conn = self
            .dialer
            .dial(&self.object)
            .await
            .map_err(|e| Error::connection(&self.object.endpoint, e))?;

        let limiters: Vec<&RateLimiter> = self.limiters.iter().collect();
        let pipe = Pipe::new(
            &self.object.endpoint,
            self.key.as_ref(),
            &limiters,
            self.algorithm,
        )
        .with_progress(self.progress.as_ref());
        let (bytes, _) = pipe.push(range, &mut conn).await?;
        if bytes != self.chunk.length {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk {}: expected {} bytes, read {bytes}",
                    self.chunk.index, self.chunk.length
                ),
            )));
        }
        Ok(bytes)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `<destination>.incoming`, in the destination's directory so the final
/// rename stays on one filesystem.
fn staging_path(destination: &Path) -> PathBuf {
    let mut s = destination.as_os_str().to_owned();
    s.push(".incoming");
    PathBuf::from(s)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "could not remove staging file");
        }
    }
}
