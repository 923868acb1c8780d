//! On-disk naming of store artifacts.

use std::path::{Path, PathBuf};

const STORE_EXTENSION: &str = "sqlite";
const WAL_SUFFIX: &str = "-wal";
const SHM_SUFFIX: &str = "-shm";

/// Resolved paths of one store: `<dir>/<name>.sqlite` plus its WAL and
/// shared-memory side files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    directory: PathBuf,
    resource_name: String,
}

impl StoreLocation {
    pub fn new(directory: impl Into<PathBuf>, resource_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            resource_name: resource_name.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn primary_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{STORE_EXTENSION}", self.resource_name))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{STORE_EXTENSION}{WAL_SUFFIX}", self.resource_name))
    }

    pub fn shm_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{STORE_EXTENSION}{SHM_SUFFIX}", self.resource_name))
    }

    /// All artifacts in removal order: primary, WAL, SHM.
    pub fn artifacts(&self) -> [PathBuf; 3] {
        [self.primary_path(), self.wal_path(), self.shm_path()]
    }
}

#[cfg(test)]
mod tests {
    use super::StoreLocation;
    use std::path::PathBuf;

    #[test]
    fn artifacts_share_resource_stem() {
        let location = StoreLocation::new("/data", "Clients");
        let [primary, wal, shm] = location.artifacts();
        assert_eq!(primary, PathBuf::from("/data/Clients.sqlite"));
        assert_eq!(wal, PathBuf::from("/data/Clients.sqlite-wal"));
        assert_eq!(shm, PathBuf::from("/data/Clients.sqlite-shm"));
    }
}
