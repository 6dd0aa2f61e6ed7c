//! File system paths for the ingest pipeline.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths used by the pipeline.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for pipeline files (~/.ingest)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.ingest`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".ingest"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.ingest).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.ingest/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the record store path (~/.ingest/logs.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("logs.sqlite")
    }

    /// Get the diagnostics directory (~/.ingest/diagnostics).
    pub fn diagnostics_dir(&self) -> PathBuf {
        self.base_dir.join("diagnostics")
    }

    /// Get the pipeline's own JSONL log (~/.ingest/diagnostics/pipeline.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.diagnostics_dir().join("pipeline.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.diagnostics_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/ingest-test"));

        assert_eq!(paths.base_dir(), &PathBuf::from("/tmp/ingest-test"));
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/ingest-test/config.json")
        );
        assert_eq!(
            paths.database_file(),
            PathBuf::from("/tmp/ingest-test/logs.sqlite")
        );
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/ingest-test/diagnostics/pipeline.jsonl")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested").join("ingest"));

        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().exists());
        assert!(paths.diagnostics_dir().exists());
    }
}
