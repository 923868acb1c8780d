//! Store configuration supplied by the host application.

use super::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Busy timeout applied to every store connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Settings for one named store.
///
/// Deserializable so hosts can embed it in their own config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name; also the file stem of every store artifact.
    pub resource_name: String,
    /// Directory owned by the host process where artifacts live.
    pub data_dir: PathBuf,
    /// Whether an older on-disk schema may be migrated on open.
    #[serde(default)]
    pub allow_automatic_migration: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new(resource_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_name: resource_name.into(),
            data_dir: data_dir.into(),
            allow_automatic_migration: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    pub fn with_automatic_migration(mut self, allow: bool) -> Self {
        self.allow_automatic_migration = allow;
        self
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Rejects names that cannot be used as a plain file stem.
    ///
    /// # Errors
    /// - `DbError::InvalidConfig` for empty names, names with path separators
    ///   or names starting with `.`.
    /// - `DbError::InvalidConfig` for an empty `data_dir`.
    pub fn validate(&self) -> DbResult<()> {
        let name = self.resource_name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidConfig(
                "resource_name cannot be empty".to_string(),
            ));
        }
        if name != self.resource_name {
            return Err(DbError::InvalidConfig(format!(
                "resource_name `{}` has surrounding whitespace",
                self.resource_name
            )));
        }
        if name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(DbError::InvalidConfig(format!(
                "resource_name `{name}` must be a plain file stem"
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("data_dir cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::StoreConfig;
    use crate::db::DbError;

    #[test]
    fn validate_accepts_plain_names() {
        StoreConfig::new("Clients", "/tmp/data")
            .validate()
            .expect("plain name should be valid");
    }

    #[test]
    fn validate_rejects_path_like_names() {
        for name in ["", " padded", "../escape", "nested/name", ".hidden"] {
            let err = StoreConfig::new(name, "/tmp/data")
                .validate()
                .expect_err("name should be rejected");
            assert!(matches!(err, DbError::InvalidConfig(_)), "{name}");
        }
    }

    #[test]
    fn deserialize_applies_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"resource_name":"Clients","data_dir":"/tmp/data"}"#)
                .expect("config should deserialize");
        assert!(!config.allow_automatic_migration);
        assert_eq!(config.busy_timeout_ms, super::DEFAULT_BUSY_TIMEOUT_MS);
    }
}
