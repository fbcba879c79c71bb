//! File dependency bookkeeping: which files must accompany a given file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use ferry_core::{Error, Result};

/// `file → [dependency]`, in insertion order, without duplicates.
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    entries: Arc<DashMap<PathBuf, Vec<PathBuf>>>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` depends on `dependency`. Returns false if the
    /// pair was already known.
    pub fn add(&self, path: impl Into<PathBuf>, dependency: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let dependency = dependency.into();
        let mut deps = self.entries.entry(path.clone()).or_default();
        if deps.contains(&dependency) {
            return false;
        }
        tracing::debug!(path = %path.display(), dependency = %dependency.display(), "dependency added");
        deps.push(dependency);
        true
    }

    pub fn remove(&self, path: &Path, dependency: &Path) -> Result<()> {
        let missing = || Error::Dependency {
            path: path.to_path_buf(),
            dependency: dependency.to_path_buf(),
        };
        let mut deps = self.entries.get_mut(path).ok_or_else(missing)?;
        let pos = deps
            .iter()
            .position(|d| d == dependency)
            .ok_or_else(missing)?;
        deps.remove(pos);
        let now_empty = deps.is_empty();
        drop(deps);
        if now_empty {
            self.entries.remove_if(path, |_, d| d.is_empty());
        }
        Ok(())
    }

    pub fn dependencies_of(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .get(path)
            .map(|d| d.value().clone())
            .unwrap_or_default()
    }

    /// Every file with at least one recorded dependency.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
