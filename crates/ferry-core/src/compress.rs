//! Zstandard file compression, streamed so memory use stays flat.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Good balance of speed and ratio.
pub const DEFAULT_LEVEL: i32 = 3;
pub const MAX_LEVEL: i32 = 22;

/// Compress `input` into a new file at `output`. Returns the compressed
/// size in bytes. `level` is clamped to `1..=MAX_LEVEL`.
pub fn compress_file(input: &Path, output: &Path, level: i32) -> Result<u64> {
    let mut reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    let mut encoder = zstd::stream::Encoder::new(writer, level.clamp(1, MAX_LEVEL))?;
    let read = io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    drop(writer);

    let written = std::fs::metadata(output)?.len();
    tracing::debug!(
        input = %input.display(),
        output = %output.display(),
        read,
        written,
        "file compressed"
    );
    Ok(written)
}

/// Decompress `input` into a new file at `output`. Returns the
/// decompressed size. Input that is not a zstd frame fails as `Error::Io`
/// and leaves no output behind.
pub fn decompress_file(input: &Path, output: &Path) -> Result<u64> {
    let mut decoder = zstd::stream::Decoder::new(File::open(input)?)?;
    let mut writer = BufWriter::new(File::create(output)?);
    let copied = io::copy(&mut decoder, &mut writer).and_then(|n| writer.flush().map(|_| n));
    match copied {
        Ok(n) => {
            tracing::debug!(input = %input.display(), output = %output.display(), bytes = n, "file decompressed");
            Ok(n)
        }
        Err(e) => {
            drop(writer);
            let _ = std::fs::remove_file(output);
            Err(e.into())
        }
    }
}
