//! Network commands: send, fetch, recv, serve.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;

use ferry_core::config::FerryConfig;
use ferry_services::transport::{receive_into, serve_file};
use ferry_services::{ProgressHook, TransferEngine, TransferRequest, TransferResult};

use super::Flags;

pub async fn cmd_send(config: &FerryConfig, flags: &Flags, file: &str, endpoint: &str) -> Result<()> {
    let engine = TransferEngine::tcp(&config.transfer);
    let mut request = TransferRequest::upload(file, endpoint)
        .chunks(flags.chunks.unwrap_or(config.transfer.chunk_count));
    if let Some(key) = flags.key()? {
        request = request.encrypt(key);
    }
    if let Some(rate) = flags.rate {
        request = request.rate_limit(rate);
    }
    if let Some(digest) = flags.digest() {
        request = request.expect_digest(digest);
    }
    if flags.progress {
        request = request.on_progress(progress_printer());
    }

    let result = match &flags.retry {
        Some(indices) => {
            if flags.chunks.is_none() {
                bail!("--retry needs the --chunks count of the original send");
            }
            engine.retry_chunks(&request, indices).await
        }
        None => engine.send(&request).await,
    }
    .with_context(|| format!("failed to send {file} to {endpoint}"))?;
    if flags.progress {
        eprintln!();
    }

    report(&result, flags.json)?;
    if !result.is_success() {
        if !result.chunk_errors.is_empty() {
            let failed: Vec<String> = result.failed_chunks().iter().map(|i| i.to_string()).collect();
            eprintln!(
                "Resend only the failed chunks with: --chunks {} --retry {}",
                request.chunk_count,
                failed.join(",")
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

pub async fn cmd_fetch(
    config: &FerryConfig,
    flags: &Flags,
    endpoint: &str,
    remote: &str,
    destination: &str,
) -> Result<()> {
    let engine = TransferEngine::tcp(&config.transfer);
    let mut request = TransferRequest::download(endpoint, remote, destination)
        .on_conflict(flags.policy(&config.storage.conflict_policy)?);
    if let Some(key) = flags.key()? {
        request = request.encrypt(key);
    }
    if let Some(rate) = flags.rate {
        request = request.rate_limit(rate);
    }
    if let Some(digest) = flags.digest() {
        request = request.expect_digest(digest);
    }
    if flags.progress {
        request = request.on_progress(progress_printer());
    }

    let result = engine
        .download(&request)
        .await
        .with_context(|| format!("failed to fetch {remote} from {endpoint}"))?;
    if flags.progress {
        eprintln!();
    }

    report(&result, flags.json)?;
    if !result.digest_match {
        bail!("digest mismatch: {destination} was left untouched");
    }
    Ok(())
}

pub async fn cmd_recv(config: &FerryConfig, flags: &Flags, addr: &str, output: Option<&str>) -> Result<()> {
    let path = match output {
        Some(p) => PathBuf::from(p),
        None => default_receive_path(&config.storage.receive_dir)?,
    };
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!("Listening on {} → {}", listener.local_addr()?, path.display());

    let bytes = receive_into(&listener, &path, flags.key()?.as_ref()).await?;
    println!("Received {} bytes into {}", bytes, path.display());
    Ok(())
}

pub async fn cmd_serve(flags: &Flags, addr: &str, file: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!("Serving {} on {}", file, listener.local_addr()?);

    let bytes = serve_file(&listener, Path::new(file), flags.key()?.as_ref()).await?;
    println!("Sent {} bytes", bytes);
    Ok(())
}

/// Running byte count on stderr, overwritten in place.
fn progress_printer() -> ProgressHook {
    ProgressHook::new(|p| {
        let mut err = std::io::stderr().lock();
        let _ = match p.percent() {
            Some(pct) => write!(err, "\r  {} bytes ({:.1}%)", p.transferred, pct),
            None => write!(err, "\r  {} bytes", p.transferred),
        };
        let _ = err.flush();
    })
}

fn default_receive_path(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(dir.join(format!("received-{stamp}")))
}

fn report(result: &TransferResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary())?);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Transfer {}", if result.is_success() { "complete" } else { "incomplete" });
    println!("═══════════════════════════════════════");
    println!("  Bytes   : {}", result.bytes_transferred);
    println!("  Chunks  : {}", result.chunks_total);
    if let Some(digest) = &result.digest {
        println!("  Digest  : {}", digest);
    }
    println!("  Match   : {}", if result.digest_match { "yes" } else { "NO" });

    if !result.chunk_errors.is_empty() {
        println!("\n  Failed chunks:");
        for (index, error) in &result.chunk_errors {
            println!("  ┌─ chunk {}", index);
            println!("  └─ {}", error);
        }
    }
    Ok(())
}
