//! Byte pump between a local file and a connection.
//!
//! `Pipe` is the single place where a transfer's bytes are touched: it
//! hashes the plaintext, applies the cipher when a key is present, and asks
//! the rate limiters for budget before every write.
//!
//! Error attribution: failures on the local side surface as `Error::Io`,
//! failures on the connection as `Error::Connection`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferry_core::cipher::{IvCollector, StreamDecryptor, StreamEncryptor, IV_LEN};
use ferry_core::digest::StreamHasher;
use ferry_core::{Digest, DigestAlgorithm, EncryptionKey, Error, Result};

use crate::progress::ProgressTracker;
use crate::rate_limit::{acquire_all, RateLimiter};

const COPY_BUF: usize = 64 * 1024;

pub struct Pipe<'a> {
    endpoint: &'a str,
    key: Option<&'a EncryptionKey>,
    limiters: &'a [&'a RateLimiter],
    algorithm: DigestAlgorithm,
    progress: Option<&'a ProgressTracker>,
}

impl<'a> Pipe<'a> {
    pub fn new(
        endpoint: &'a str,
        key: Option<&'a EncryptionKey>,
        limiters: &'a [&'a RateLimiter],
        algorithm: DigestAlgorithm,
    ) -> Self {
        Self {
            endpoint,
            key,
            limiters,
            algorithm,
            progress: None,
        }
    }

    /// Report plaintext bytes to `tracker` as they are written.
    pub fn with_progress(mut self, tracker: Option<&'a ProgressTracker>) -> Self {
        self.progress = tracker;
        self
    }

    fn advance(&self, bytes: usize) {
        if let Some(tracker) = self.progress {
            tracker.advance(bytes as u64);
        }
    }

    /// Stream `local` into `remote` (IV first when encrypting), then shut
    /// the connection down. Returns plaintext bytes sent and their digest.
    pub async fn push<R, W>(&self, mut local: R, remote: &mut W) -> Result<(u64, Digest)>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut encryptor = match self.key {
            Some(key) => Some(StreamEncryptor::new(key)?),
            None => None,
        };
        if let Some(enc) = &encryptor {
            let iv = *enc.iv();
            self.write_remote(remote, &iv).await?;
        }

        let mut hasher = StreamHasher::new(self.algorithm);
        let mut buf = vec![0u8; COPY_BUF];
        let mut total = 0u64;
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            if let Some(enc) = encryptor.as_mut() {
                enc.apply(&mut buf[..n]);
            }
            self.write_remote(remote, &buf[..n]).await?;
            self.advance(n);
            total += n as u64;
        }

        remote.flush().await.map_err(|e| self.connection(e))?;
        remote.shutdown().await.map_err(|e| self.connection(e))?;
        Ok((total, hasher.finalize()))
    }

    /// Read `remote` to EOF into `local`, stripping and applying the IV when
    /// decrypting. Returns plaintext bytes written and their digest.
    pub async fn pull<R, W>(&self, remote: &mut R, local: &mut W) -> Result<(u64, Digest)>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut ivs = IvCollector::new();
        let mut decryptor: Option<StreamDecryptor> = None;
        let mut hasher = StreamHasher::new(self.algorithm);
        let mut buf = vec![0u8; COPY_BUF];
        let mut total = 0u64;

        loop {
            let n = remote.read(&mut buf).await.map_err(|e| self.connection(e))?;
            if n == 0 {
                break;
            }
            let mut start = 0;
            if let Some(key) = self.key {
                if decryptor.is_none() {
                    let Some((iv, rest)) = ivs.feed(&buf[..n]) else {
                        continue;
                    };
                    start = n - rest.len();
                    decryptor = Some(StreamDecryptor::new(key, &iv)?);
                }
            }
            let data = &mut buf[start..n];
            if let Some(dec) = decryptor.as_mut() {
                dec.apply(data);
            }
            hasher.update(data);
            self.write_local(local, data).await?;
            self.advance(data.len());
            total += data.len() as u64;
        }

        if self.key.is_some() && !ivs.is_complete() {
            return Err(Error::TruncatedStream {
                expected: IV_LEN,
                got: ivs.filled(),
            });
        }
        local.flush().await?;
        Ok((total, hasher.finalize()))
    }

    async fn write_remote<W: AsyncWrite + Unpin>(&self, remote: &mut W, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = acquire_all(self.limiters, data.len()).await;
            remote
                .write_all(&data[..n])
                .await
                .map_err(|e| self.connection(e))?;
            data = &data[n..];
        }
        Ok(())
    }

    async fn write_local<W: AsyncWrite + Unpin>(&self, local: &mut W, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = acquire_all(self.limiters, data.len()).await;
            local.write_all(&data[..n]).await?;
            data = &data[n..];
        }
        Ok(())
    }

    fn connection(&self, source: std::io::Error) -> Error {
        Error::connection(self.endpoint, source)
    }
}
