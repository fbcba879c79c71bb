//! Chunking: partition a file into index-addressed byte ranges and
//! reassemble them in order.
//!
//! A `Chunk` is only a descriptor (source path + byte range); no file data is
//! held in memory. Two ways to cut a file:
//!
//!   split(path, part_size)        fixed windows, last one shorter
//!   split_by_count(path, count)   floor(size / count) each, last one
//!                                 absorbs the remainder
//!
//! Merging is strictly ordered: indices must be exactly 0..n.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contiguous, index-addressed byte range of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the reassembled stream.
    pub index: usize,
    /// Byte offset of the range within `source`.
    pub offset: u64,
    /// Range length in bytes. May be zero for split-by-count of tiny files.
    pub length: u64,
    pub source: PathBuf,
}

impl Chunk {
    /// Describe an entire on-disk file (e.g. a received part) as one chunk.
    pub fn whole_file(index: usize, path: impl Into<PathBuf>) -> Result<Self> {
        let source = path.into();
        let length = fs::metadata(&source)?.len();
        Ok(Self {
            index,
            offset: 0,
            length,
            source,
        })
    }

    /// Offset one past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Open the source positioned at this chunk, limited to its length.
    pub fn open(&self) -> Result<io::Take<File>> {
        let mut file = File::open(&self.source)?;
        file.seek(SeekFrom::Start(self.offset))?;
        Ok(file.take(self.length))
    }

    /// Copy this chunk's bytes into `writer`. Fails if the source is shorter
    /// than the descriptor claims.
    pub fn copy_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let mut reader = self.open()?;
        let copied = io::copy(&mut reader, writer)?;
        if copied != self.length {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk {} of {}: expected {} bytes, read {}",
                    self.index,
                    self.source.display(),
                    self.length,
                    copied
                ),
            )));
        }
        Ok(copied)
    }
}

/// Remote/on-disk part name: `<basename(source)>.part<index>`.
pub fn part_name(source: &Path, index: usize) -> String {
    let base = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    format!("{base}.part{index}")
}

/// Cut `path` into `part_size`-byte windows.
///
/// The last chunk holds whatever remains; an empty file yields no chunks.
pub fn split(path: &Path, part_size: u64) -> Result<Vec<Chunk>> {
    if part_size == 0 {
        return Err(invalid_input("part size must be greater than zero"));
    }
    let size = fs::metadata(path)?.len();

    let mut chunks = Vec::new();
    let mut offset = 0u64;
    while offset < size {
        let length = part_size.min(size - offset);
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            length,
            source: path.to_path_buf(),
        });
        offset += length;
    }

    tracing::debug!(
        path = %path.display(),
        size,
        part_size,
        chunks = chunks.len(),
        "file split by size"
    );
    Ok(chunks)
}

/// Cut `path` into exactly `count` chunks of `floor(size / count)` bytes,
/// the last one taking the remainder.
///
/// If the file is smaller than `count`, leading chunks are zero-length.
/// Callers that need non-empty chunks must check `size >= count` first.
pub fn split_by_count(path: &Path, count: usize) -> Result<Vec<Chunk>> {
    if count == 0 {
        return Err(invalid_input("chunk count must be greater than zero"));
    }
    let size = fs::metadata(path)?.len();
    Ok(ranges_by_count(size, count)
        .into_iter()
        .enumerate()
        .map(|(index, (offset, length))| Chunk {
            index,
            offset,
            length,
            source: path.to_path_buf(),
        })
        .collect())
}

/// `(offset, length)` pairs for `count` chunks over `size` bytes.
pub fn ranges_by_count(size: u64, count: usize) -> Vec<(u64, u64)> {
    if count == 0 {
        return Vec::new();
    }
    let part = size / count as u64;
    (0..count)
        .map(|i| {
            let offset = i as u64 * part;
            let length = if i == count - 1 { size - offset } else { part };
            (offset, length)
        })
        .collect()
}

/// Check that `chunks` carries indices exactly `0, 1, .., n-1` in order.
pub fn check_order(chunks: &[Chunk]) -> Result<()> {
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.index != expected {
            return Err(Error::OrderViolation {
                expected,
                found: chunk.index,
            });
        }
    }
    Ok(())
}

/// Concatenate chunk contents into `output` in ascending index order.
///
/// The index check runs before `output` is created, so an order violation
/// leaves the filesystem untouched. Zero chunks produce an empty file.
pub fn merge(chunks: &[Chunk], output: &Path) -> Result<u64> {
    check_order(chunks)?;

    let mut writer = BufWriter::new(File::create(output)?);
    let mut total = 0u64;
    for chunk in chunks {
        total += chunk.copy_to(&mut writer)?;
    }
    writer.flush()?;

    tracing::debug!(
        output = %output.display(),
        chunks = chunks.len(),
        bytes = total,
        "chunks merged"
    );
    Ok(total)
}

/// Materialise each chunk as its own file `<dir>/<basename>.part<index>`.
/// Returns the part paths in index order.
pub fn write_parts(chunks: &[Chunk], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut parts = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let part_path = dir.join(part_name(&chunk.source, chunk.index));
        let mut writer = BufWriter::new(File::create(&part_path)?);
        chunk.copy_to(&mut writer)?;
        writer.flush()?;
        parts.push(part_path);
    }
    Ok(parts)
}

fn invalid_input(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()))
}
