//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - File connections run in WAL mode, so `-wal`/`-shm` side files belong to
//!   the store.
//! - Returned connections have migrations fully applied.

use super::location::StoreLocation;
use super::migrations::{apply_migrations, SchemaModel};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Where a context keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreTarget {
    File(StoreLocation),
    Memory,
}

impl StoreTarget {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

pub(crate) struct OpenOptions<'a> {
    pub schema: &'a SchemaModel,
    pub allow_automatic_migration: bool,
    pub busy_timeout: Duration,
}

/// Opens the store behind `target` and applies pending migrations.
///
/// # Side effects
/// - Creates the store directory and primary file when absent.
/// - Emits `db_open` logging events with duration and status.
pub(crate) fn open_store(target: &StoreTarget, options: &OpenOptions<'_>) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match connect(target) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
    };

    match bootstrap_connection(&mut conn, target, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn connect(target: &StoreTarget) -> DbResult<Connection> {
    match target {
        StoreTarget::File(location) => {
            std::fs::create_dir_all(location.directory()).map_err(|source| DbError::Io {
                path: location.directory().to_path_buf(),
                source,
            })?;
            let path = location.primary_path();
            info!(
                "event=db_location module=db resource={} path={}",
                location.resource_name(),
                path.display()
            );
            Ok(Connection::open(path)?)
        }
        StoreTarget::Memory => Ok(Connection::open_in_memory()?),
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    target: &StoreTarget,
    options: &OpenOptions<'_>,
) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(options.busy_timeout)?;
    if matches!(target, StoreTarget::File(_)) {
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }

    let outcome = apply_migrations(conn, options.schema, options.allow_automatic_migration)?;
    if outcome.applied() {
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={}",
            outcome.from_version, outcome.to_version
        );
    }
    Ok(())
}
