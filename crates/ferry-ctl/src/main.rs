//! ferry: command-line front end for the Ferry transfer engine.

mod cmd;

use anyhow::Result;

use ferry_core::config::FerryConfig;

use cmd::{files, transfer, versions, Flags};

fn print_usage() {
    println!("Usage: ferry <command> [options]");
    println!();
    println!("Transfers:");
    println!("  send <file> <host:port>              Upload; parallel when --chunks > 1 and");
    println!("                                       each chunk reaches min_chunk_size");
    println!("  fetch <host:port> <name> <dest>      Download into <dest>");
    println!("  recv <addr> [file]                   Accept one incoming stream");
    println!("  serve <addr> <file>                  Serve <file> to one client");
    println!();
    println!("Files:");
    println!("  digest <file>                        Print the file digest");
    println!("  verify <file> <hex>                  Compare against an expected digest");
    println!("  encrypt <in> <out>                   AES-CFB encrypt (IV-prefixed)");
    println!("  decrypt <in> <out>                   Reverse of encrypt");
    println!("  compress <in> <out>                  zstd compress");
    println!("  decompress <in> <out>                Reverse of compress");
    println!("  split <file> <dir>                   Write <file>.part<i> files");
    println!("  merge <out> <part>...                Concatenate parts in order");
    println!("  resolve <existing> <incoming>        Move incoming into place");
    println!("  version save|list <file>             Snapshot or list versions");
    println!("  version revert <file> <id>           Restore a snapshot");
    println!("  config                               Show config path and values");
    println!();
    println!("Options:");
    println!("  --chunks <n>      Parallel connections for send (needs a receiver that");
    println!("                    reassembles .part<i> objects; recv takes one stream)");
    println!("  --retry <i,j>     send: resend only these chunks of a --chunks split");
    println!("  --progress        Show running byte count on stderr");
    println!("  --key <hex>       16, 24 or 32 byte key, hex encoded");
    println!("  --rate <bps>      Per-transfer rate limit in bytes/sec");
    println!("  --digest <hex>    Expected digest");
    println!("  --algo <name>     md5, sha1, sha256 or blake3");
    println!("  --policy <name>   overwrite, backup or abort");
    println!("  --size <bytes>    split: fixed part size");
    println!("  --count <n>       split: number of parts");
    println!("  --level <n>       compress: zstd level 1-22 (default 3)");
    println!("  --json            Machine-readable transfer summary");
    println!();
    println!("Logging is controlled by RUST_LOG (e.g. RUST_LOG=ferry_services=debug).");
}

fn cmd_config(config: &FerryConfig) -> Result<()> {
    println!("# {}", FerryConfig::file_path().display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FerryConfig::load()?;
    tracing::debug!(path = %FerryConfig::file_path().display(), "config loaded");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (flags, remaining) = Flags::parse(&args)?;

    match remaining.as_slice() {
        ["send", file, endpoint]                => transfer::cmd_send(&config, &flags, file, endpoint).await,
        ["fetch", endpoint, remote, dest]       => transfer::cmd_fetch(&config, &flags, endpoint, remote, dest).await,
        ["recv", addr]                          => transfer::cmd_recv(&config, &flags, addr, None).await,
        ["recv", addr, file]                    => transfer::cmd_recv(&config, &flags, addr, Some(*file)).await,
        ["serve", addr, file]                   => transfer::cmd_serve(&flags, addr, file).await,
        ["digest", file]                        => files::cmd_digest(&config, &flags, file),
        ["verify", file, expected]              => files::cmd_verify(&config, &flags, file, expected),
        ["encrypt", input, output]              => files::cmd_encrypt(&flags, input, output),
        ["decrypt", input, output]              => files::cmd_decrypt(&flags, input, output),
        ["compress", input, output]             => files::cmd_compress(&flags, input, output),
        ["decompress", input, output]           => files::cmd_decompress(input, output),
        ["split", file, dir]                    => files::cmd_split(&flags, file, dir),
        ["merge", output, parts @ ..] if !parts.is_empty() => files::cmd_merge(output, parts),
        ["resolve", existing, incoming]         => files::cmd_resolve(&config, &flags, existing, incoming),
        ["version", "save", file]               => versions::cmd_save(file),
        ["version", "revert", file, id]         => versions::cmd_revert(file, id),
        ["version", "list", file]               => versions::cmd_list(file),
        ["config"]                              => cmd_config(&config),
        ["help"] | ["--help"] | ["-h"] | []     => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
