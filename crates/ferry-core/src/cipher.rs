//! Cipher codec: AES in CFB mode with a random IV prefix.
//!
//! Wire format of every encrypted stream:
//!
//!   [IV: 16 bytes][ciphertext: remaining bytes]
//!
//! The IV is drawn from the OS RNG per stream and is never derived from the
//! key. CFB is a stream mode, so ciphertext is produced as input arrives and
//! has exactly the plaintext's length. Key size picks the AES variant:
//! 16 → AES-128, 24 → AES-192, 32 → AES-256.
//!
//! Key material is held in `Zeroizing` buffers and wiped on drop.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// AES block size; also the IV length.
pub const IV_LEN: usize = 16;

const COPY_BUF: usize = 64 * 1024;

// ── Key ───────────────────────────────────────────────────────────────────────

/// A symmetric key of 16, 24 or 32 bytes.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<Vec<u8>>);

impl EncryptionKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = Zeroizing::new(bytes.into());
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            n => Err(Error::Key(n)),
        }
    }

    /// Parse a hex-encoded key. Bad hex is reported as a key error.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| Error::Key(hex_key.len() / 2))?;
        Self::new(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(<{} bytes>)", self.0.len())
    }
}

/// Generate a fresh random IV.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

// ── Incremental transforms ────────────────────────────────────────────────────

enum EncState {
    Aes128(BufEncryptor<Aes128>),
    Aes192(BufEncryptor<Aes192>),
    Aes256(BufEncryptor<Aes256>),
}

enum DecState {
    Aes128(BufDecryptor<Aes128>),
    Aes192(BufDecryptor<Aes192>),
    Aes256(BufDecryptor<Aes256>),
}

/// Encrypts a stream in place, buffer by buffer.
///
/// The caller must emit [`StreamEncryptor::iv`] before the first ciphertext
/// byte.
pub struct StreamEncryptor {
    iv: [u8; IV_LEN],
    state: EncState,
}

impl StreamEncryptor {
    /// New encryptor with a random IV.
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        Self::with_iv(key, random_iv())
    }

    pub fn with_iv(key: &EncryptionKey, iv: [u8; IV_LEN]) -> Result<Self> {
        let k = key.as_bytes();
        let bad_key = |_| Error::Key(k.len());
        let state = match k.len() {
            16 => EncState::Aes128(BufEncryptor::new_from_slices(k, &iv).map_err(bad_key)?),
            24 => EncState::Aes192(BufEncryptor::new_from_slices(k, &iv).map_err(bad_key)?),
            32 => EncState::Aes256(BufEncryptor::new_from_slices(k, &iv).map_err(bad_key)?),
            n => return Err(Error::Key(n)),
        };
        Ok(Self { iv, state })
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.state {
            EncState::Aes128(c) => c.encrypt(buf),
            EncState::Aes192(c) => c.encrypt(buf),
            EncState::Aes256(c) => c.encrypt(buf),
        }
    }
}

/// Decrypts a stream in place once its IV prefix has been read.
pub struct StreamDecryptor {
    state: DecState,
}

impl StreamDecryptor {
    pub fn new(key: &EncryptionKey, iv: &[u8; IV_LEN]) -> Result<Self> {
        let k = key.as_bytes();
        let bad_key = |_| Error::Key(k.len());
        let state = match k.len() {
            16 => DecState::Aes128(BufDecryptor::new_from_slices(k, iv).map_err(bad_key)?),
            24 => DecState::Aes192(BufDecryptor::new_from_slices(k, iv).map_err(bad_key)?),
            32 => DecState::Aes256(BufDecryptor::new_from_slices(k, iv).map_err(bad_key)?),
            n => return Err(Error::Key(n)),
        };
        Ok(Self { state })
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.state {
            DecState::Aes128(c) => c.decrypt(buf),
            DecState::Aes192(c) => c.decrypt(buf),
            DecState::Aes256(c) => c.decrypt(buf),
        }
    }
}

/// Incremental IV collector for stream readers that see the prefix in
/// arbitrary pieces. Returns the unconsumed tail of `data` once the IV is
/// complete.
#[derive(Default)]
pub struct IvCollector {
    buf: [u8; IV_LEN],
    filled: usize,
}

impl IvCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; yields `Some((iv, rest))` the first time the IV is full.
    pub fn feed<'a>(&mut self, data: &'a [u8]) -> Option<([u8; IV_LEN], &'a [u8])> {
        if self.filled == IV_LEN {
            return None;
        }
        let take = (IV_LEN - self.filled).min(data.len());
        self.buf[self.filled..self.filled + take].copy_from_slice(&data[..take]);
        self.filled += take;
        if self.filled == IV_LEN {
            Some((self.buf, &data[take..]))
        } else {
            None
        }
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_complete(&self) -> bool {
        self.filled == IV_LEN
    }
}

// ── Stream functions ──────────────────────────────────────────────────────────

/// Encrypt everything `reader` yields into `writer`, IV first.
/// Returns the number of bytes written, IV included.
pub fn encrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &EncryptionKey,
) -> Result<u64> {
    let mut enc = StreamEncryptor::new(key)?;
    writer.write_all(enc.iv())?;
    let mut total = IV_LEN as u64;

    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        enc.apply(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Read the IV prefix, then decrypt the remainder of `reader` into `writer`.
/// Returns the number of plaintext bytes written.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &EncryptionKey,
) -> Result<u64> {
    // Validate the key before consuming any input.
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(Error::Key(key.len()));
    }

    let mut iv = [0u8; IV_LEN];
    let mut got = 0;
    while got < IV_LEN {
        let n = reader.read(&mut iv[got..])?;
        if n == 0 {
            return Err(Error::TruncatedStream {
                expected: IV_LEN,
                got,
            });
        }
        got += n;
    }

    let mut dec = StreamDecryptor::new(key, &iv)?;
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dec.apply(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Encrypt `input` into a new file at `output`.
pub fn encrypt_file(input: &Path, output: &Path, key: &EncryptionKey) -> Result<u64> {
    let reader = File::open(input)?;
    let writer = BufWriter::new(File::create(output)?);
    let n = encrypt_stream(reader, writer, key)?;
    tracing::debug!(input = %input.display(), output = %output.display(), bytes = n, "file encrypted");
    Ok(n)
}

/// Decrypt `input` (IV-prefixed) into a new file at `output`.
pub fn decrypt_file(input: &Path, output: &Path, key: &EncryptionKey) -> Result<u64> {
    let reader = File::open(input)?;
    let writer = BufWriter::new(File::create(output)?);
    let n = decrypt_stream(reader, writer, key)?;
    tracing::debug!(input = %input.display(), output = %output.display(), bytes = n, "file decrypted");
    Ok(n)
}
