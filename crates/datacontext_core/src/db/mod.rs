//! SQLite store lifecycle: configuration, bootstrap, migrations, reset.
//!
//! # Responsibility
//! - Own the physical store of one named resource (primary file + WAL/SHM).
//! - Apply schema migrations in deterministic order.
//! - Provide the transactional persistence handle used by repositories.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Repositories never touch application data before migrations succeed.
//! - The three store artifacts are removed together or `clear` reports failure.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod config;
mod context;
mod location;
pub mod migrations;
mod open;

pub use config::{StoreConfig, DEFAULT_BUSY_TIMEOUT_MS};
pub use context::{ChangeScope, CommitObserver, DataContext, ObserverId};
pub use location::StoreLocation;
pub use migrations::{Migration, SchemaModel};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidConfig(String),
    InvalidSchemaModel(String),
    MigrationRequired {
        db_version: u32,
        model_version: u32,
    },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The store was detached by a failed `clear` and has not been re-attached.
    Detached,
    /// The connection is in use by an enclosing call on the same context.
    ConnectionBusy,
}

impl DbError {
    /// Returns whether this error is an initialization defect.
    ///
    /// Hosts are expected to terminate on fatal errors instead of retrying:
    /// they indicate a broken deployment (unreadable schema model, migration
    /// needed but disallowed, store written by a newer build).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidSchemaModel(_)
                | Self::MigrationRequired { .. }
                | Self::UnsupportedSchemaVersion { .. }
        )
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::InvalidConfig(message) => write!(f, "invalid store config: {message}"),
            Self::InvalidSchemaModel(message) => write!(f, "invalid schema model: {message}"),
            Self::MigrationRequired {
                db_version,
                model_version,
            } => write!(
                f,
                "database schema version {db_version} requires migration to {model_version} but automatic migration is disabled"
            ),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Detached => write!(f, "store is detached"),
            Self::ConnectionBusy => write!(f, "store connection is already in use"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
