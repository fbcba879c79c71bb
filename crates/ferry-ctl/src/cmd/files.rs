//! Local file commands: digest, verify, encrypt, decrypt, compress,
//! decompress, split, merge, resolve.

use std::path::Path;

use anyhow::{bail, Context, Result};

use ferry_core::chunk::{self, Chunk};
use ferry_core::cipher::{decrypt_file, encrypt_file};
use ferry_core::compress::{self, compress_file, decompress_file};
use ferry_core::config::FerryConfig;
use ferry_core::digest::{digest_file, verify_file};
use ferry_core::Digest;
use ferry_services::conflict;

use super::Flags;

pub fn cmd_digest(config: &FerryConfig, flags: &Flags, file: &str) -> Result<()> {
    let algorithm = flags.algorithm(config.transfer.digest_algorithm)?;
    let digest = digest_file(Path::new(file), algorithm)
        .with_context(|| format!("failed to read {file}"))?;
    println!("{}  {}  ({})", digest, file, algorithm);
    Ok(())
}

pub fn cmd_verify(config: &FerryConfig, flags: &Flags, file: &str, expected: &str) -> Result<()> {
    let algorithm = flags.algorithm(config.transfer.digest_algorithm)?;
    let ok = verify_file(Path::new(file), algorithm, &Digest::from_hex(expected))
        .with_context(|| format!("failed to read {file}"))?;
    if ok {
        println!("{}: OK", file);
        Ok(())
    } else {
        println!("{}: FAILED", file);
        std::process::exit(1);
    }
}

pub fn cmd_encrypt(flags: &Flags, input: &str, output: &str) -> Result<()> {
    let key = flags.require_key()?;
    let bytes = encrypt_file(Path::new(input), Path::new(output), &key)
        .with_context(|| format!("failed to encrypt {input}"))?;
    println!("Encrypted {} → {} ({} bytes, IV included)", input, output, bytes);
    Ok(())
}

pub fn cmd_decrypt(flags: &Flags, input: &str, output: &str) -> Result<()> {
    let key = flags.require_key()?;
    let bytes = decrypt_file(Path::new(input), Path::new(output), &key)
        .with_context(|| format!("failed to decrypt {input}"))?;
    println!("Decrypted {} → {} ({} bytes)", input, output, bytes);
    Ok(())
}

pub fn cmd_compress(flags: &Flags, input: &str, output: &str) -> Result<()> {
    let level = flags.level.unwrap_or(compress::DEFAULT_LEVEL);
    let bytes = compress_file(Path::new(input), Path::new(output), level)
        .with_context(|| format!("failed to compress {input}"))?;
    println!("Compressed {} → {} ({} bytes, level {})", input, output, bytes, level);
    Ok(())
}

pub fn cmd_decompress(input: &str, output: &str) -> Result<()> {
    let bytes = decompress_file(Path::new(input), Path::new(output))
        .with_context(|| format!("failed to decompress {input}"))?;
    println!("Decompressed {} → {} ({} bytes)", input, output, bytes);
    Ok(())
}

pub fn cmd_split(flags: &Flags, file: &str, dir: &str) -> Result<()> {
    let path = Path::new(file);
    let chunks = match (flags.size, flags.count) {
        (Some(size), None) => chunk::split(path, size)?,
        (None, Some(count)) => chunk::split_by_count(path, count)?,
        _ => bail!("split needs exactly one of --size <bytes> or --count <n>"),
    };
    let parts = chunk::write_parts(&chunks, Path::new(dir))?;

    println!("Split {} into {} parts:", file, parts.len());
    for (part, c) in parts.iter().zip(&chunks) {
        println!("  {}  ({} bytes @ {})", part.display(), c.length, c.offset);
    }
    Ok(())
}

/// Parts are merged in the order given on the command line.
pub fn cmd_merge(output: &str, parts: &[&str]) -> Result<()> {
    let chunks = parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            Chunk::whole_file(index, *part).with_context(|| format!("failed to stat {part}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let bytes = chunk::merge(&chunks, Path::new(output))?;
    println!("Merged {} parts into {} ({} bytes)", chunks.len(), output, bytes);
    Ok(())
}

pub fn cmd_resolve(config: &FerryConfig, flags: &Flags, existing: &str, incoming: &str) -> Result<()> {
    let policy = flags.policy(&config.storage.conflict_policy)?;
    conflict::resolve(Path::new(existing), Path::new(incoming), policy)
        .with_context(|| format!("could not move {incoming} onto {existing}"))?;
    println!("{} is now in place ({:?})", existing, policy);
    Ok(())
}
