//! File version commands.

use std::path::Path;

use anyhow::{Context, Result};

use ferry_services::conflict::{list_versions, revert, save_version, version_path};

pub fn cmd_save(file: &str) -> Result<()> {
    let id = save_version(Path::new(file)).with_context(|| format!("failed to snapshot {file}"))?;
    println!("Saved {} as version {}", file, id);
    Ok(())
}

pub fn cmd_revert(file: &str, id: &str) -> Result<()> {
    revert(Path::new(file), id).with_context(|| format!("failed to restore {file} to {id}"))?;
    println!("Restored {} from version {}", file, id);
    Ok(())
}

pub fn cmd_list(file: &str) -> Result<()> {
    let path = Path::new(file);
    let ids = list_versions(path)?;
    if ids.is_empty() {
        println!("No saved versions of {}.", file);
        return Ok(());
    }
    println!("Versions of {} ({}):", file, ids.len());
    for id in ids {
        println!("  {}  {}", id, version_path(path, &id).display());
    }
    Ok(())
}
