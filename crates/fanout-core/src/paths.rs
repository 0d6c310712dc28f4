//! File system paths for the daemon.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Push socket filename under the base runtime directory.
const PUSH_SOCKET_NAME: &str = "fanoutd.sock";

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for daemon runtime files (~/.fanoutd)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.fanoutd`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".fanoutd"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.fanoutd).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.fanoutd/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the database file path (~/.fanoutd/fanout.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("fanout.sqlite")
    }

    /// Get the push socket path (~/.fanoutd/fanoutd.sock).
    pub fn socket_file(&self) -> PathBuf {
        self.base_dir.join(PUSH_SOCKET_NAME)
    }

    /// Get the logs directory (~/.fanoutd/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().expect("Failed to determine home directory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_with_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/fanout-test"));
        assert_eq!(paths.base_dir(), &PathBuf::from("/tmp/fanout-test"));
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/fanout-test/config.json")
        );
        assert_eq!(
            paths.database_file(),
            PathBuf::from("/tmp/fanout-test/fanout.sqlite")
        );
        assert_eq!(
            paths.socket_file(),
            PathBuf::from("/tmp/fanout-test/fanoutd.sock")
        );
    }

    #[test]
    fn test_paths_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested"));

        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().exists());
        assert!(paths.logs_dir().exists());
    }
}
