//! Store configuration loaded from environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ATTIC_WORK_DIR` | `./data` | Work directory; files live under `<work_dir>/storage` |
//! | `ATTIC_FSYNC` | `true` | `sync_all` temporary files before renaming them into place |
//! | `ATTIC_PRUNE_EMPTY_DIRS` | `true` | Remove empty directories when the layout initializes |
//! | `DATABASE_URL` | unset | Connection string for the PostgreSQL document store |

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Configuration shared by the layout, writers, and document stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub work_dir: PathBuf,
    pub fsync: bool,
    pub prune_empty_dirs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(defaults::WORK_DIR),
            fsync: true,
            prune_empty_dirs: true,
            database_url: None,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `work_dir` with every other setting at its default.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: env::var("ATTIC_WORK_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            fsync: parse_bool_env("ATTIC_FSYNC", defaults.fsync),
            prune_empty_dirs: parse_bool_env("ATTIC_PRUNE_EMPTY_DIRS", defaults.prune_empty_dirs),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Builder-style setter for fsync.
    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Builder-style setter for start-up directory pruning.
    pub fn prune_empty_dirs(mut self, prune: bool) -> Self {
        self.prune_empty_dirs = prune;
        self
    }

    /// Directory every stored file lives under.
    pub fn storage_root(&self) -> PathBuf {
        self.work_dir.join(defaults::STORAGE_DIR_NAME)
    }

    /// Reject configurations the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(Error::Config("work_dir must not be empty".to_string()));
        }
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(Error::Config(format!(
                    "DATABASE_URL must be a postgres URL, got '{url}'"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a boolean environment variable, falling back to `default` when unset
/// or unrecognized.
fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|val| match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global, so tests touching them must not run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        env::remove_var("ATTIC_WORK_DIR");
        env::remove_var("ATTIC_FSYNC");
        env::remove_var("ATTIC_PRUNE_EMPTY_DIRS");
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.work_dir, PathBuf::from("./data"));
        assert!(config.fsync);
        assert!(config.prune_empty_dirs);
        assert!(config.database_url.is_none());
        assert_eq!(config.storage_root(), PathBuf::from("./data/storage"));
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(StoreConfig::from_env(), StoreConfig::default());
    }

    #[test]
    fn test_from_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("ATTIC_WORK_DIR", "/var/lib/attic");
        env::set_var("ATTIC_FSYNC", "off");
        env::set_var("ATTIC_PRUNE_EMPTY_DIRS", "NO");
        env::set_var("DATABASE_URL", "postgres://localhost/attic");

        let config = StoreConfig::from_env();
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/attic"));
        assert!(!config.fsync);
        assert!(!config.prune_empty_dirs);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/attic")
        );
        clear_env();
    }

    #[test]
    fn test_from_env_unrecognized_bool_uses_default() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("ATTIC_FSYNC", "maybe");
        assert!(StoreConfig::from_env().fsync);
        clear_env();
    }

    #[test]
    fn test_validate() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::with_work_dir("").validate().is_err());

        let mut config = StoreConfig::default();
        config.database_url = Some("mysql://localhost".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_setters() {
        let config = StoreConfig::with_work_dir("/tmp/x")
            .fsync(false)
            .prune_empty_dirs(false);
        assert!(!config.fsync);
        assert!(!config.prune_empty_dirs);
        assert_eq!(config.storage_root(), PathBuf::from("/tmp/x/storage"));
    }
}
