//! Store lifecycle manager.
//!
//! # Responsibility
//! - Open (create, migrate) one named store and keep its connection.
//! - Track the pending write transaction shared by all repositories.
//! - Tear the store down and recreate it empty on `clear`.
//! - Notify commit observers (live queries) after commits and resets.
//!
//! # Invariants
//! - At most one write transaction is pending; `save` commits all of it.
//! - `save` without pending changes performs no commit and notifies nobody.
//! - `clear` reports `true` only when detach, artifact removal and re-attach
//!   all succeeded.
//! - The context is single-owner: interior mutability is `RefCell` based and
//!   the type is not `Sync`.

use super::location::StoreLocation;
use super::migrations::{current_user_version, SchemaModel};
use super::open::{open_store, OpenOptions, StoreTarget};
use super::{DbError, DbResult, StoreConfig};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

const SAVEPOINT_SQL: &str = "SAVEPOINT record_write;";
const RELEASE_SQL: &str = "RELEASE record_write;";
const ROLLBACK_TO_SAVEPOINT_SQL: &str = "ROLLBACK TO record_write; RELEASE record_write;";
const ROLLBACK_SQL: &str = "ROLLBACK;";

/// What a commit or reset touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeScope {
    /// A commit that wrote to these collections.
    Collections(BTreeSet<String>),
    /// The store was recreated empty; every collection changed.
    Reset,
}

impl ChangeScope {
    pub fn touches(&self, collection: &str) -> bool {
        match self {
            Self::Collections(collections) => collections.contains(collection),
            Self::Reset => true,
        }
    }
}

/// Receiver of post-commit notifications.
///
/// Observers run synchronously on the thread that called `save`/`clear` and
/// may read through the context they are handed.
pub trait CommitObserver {
    /// Collection this observer follows.
    fn collection(&self) -> &str;

    fn on_commit(&mut self, ctx: &DataContext, scope: &ChangeScope);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

struct ObserverSlot {
    id: ObserverId,
    observer: Weak<RefCell<dyn CommitObserver>>,
}

/// Owned persistence handle for one store.
pub struct DataContext {
    target: StoreTarget,
    schema: SchemaModel,
    allow_automatic_migration: bool,
    busy_timeout: Duration,
    conn: RefCell<Option<Connection>>,
    dirty: RefCell<BTreeSet<String>>,
    observers: RefCell<Vec<ObserverSlot>>,
    next_observer_id: Cell<u64>,
}

impl DataContext {
    /// Opens the store described by `config` with the builtin schema.
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        Self::open_with_schema(config, SchemaModel::builtin())
    }

    /// Opens the store described by `config`, migrating it to `schema`.
    ///
    /// # Errors
    /// - Fatal initialization errors (`DbError::is_fatal`) for invalid config
    ///   or schema, disallowed migration, or a store newer than `schema`.
    /// - `DbError::Io`/`DbError::Sqlite` when the store cannot be created.
    pub fn open_with_schema(config: &StoreConfig, schema: SchemaModel) -> DbResult<Self> {
        config.validate()?;
        let location = StoreLocation::new(&config.data_dir, &config.resource_name);
        Self::attach(
            StoreTarget::File(location),
            schema,
            config.allow_automatic_migration,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Opens a private in-memory store. `clear` recreates it empty.
    pub fn open_in_memory(schema: SchemaModel) -> DbResult<Self> {
        Self::attach(
            StoreTarget::Memory,
            schema,
            true,
            Duration::from_millis(super::DEFAULT_BUSY_TIMEOUT_MS),
        )
    }

    fn attach(
        target: StoreTarget,
        schema: SchemaModel,
        allow_automatic_migration: bool,
        busy_timeout: Duration,
    ) -> DbResult<Self> {
        schema.validate()?;
        let conn = open_store(
            &target,
            &OpenOptions {
                schema: &schema,
                allow_automatic_migration,
                busy_timeout,
            },
        )?;

        Ok(Self {
            target,
            schema,
            allow_automatic_migration,
            busy_timeout,
            conn: RefCell::new(Some(conn)),
            dirty: RefCell::new(BTreeSet::new()),
            observers: RefCell::new(Vec::new()),
            next_observer_id: Cell::new(1),
        })
    }

    /// File location of the store, `None` for in-memory stores.
    pub fn location(&self) -> Option<&StoreLocation> {
        match &self.target {
            StoreTarget::File(location) => Some(location),
            StoreTarget::Memory => None,
        }
    }

    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    /// Whether a connection is attached. `false` only after a failed `clear`.
    pub fn is_attached(&self) -> bool {
        self.conn
            .try_borrow()
            .map(|conn| conn.is_some())
            .unwrap_or(true)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.with_connection(|conn| Ok::<_, DbError>(!conn.is_autocommit()))
            .unwrap_or(false)
    }

    pub fn schema_version(&self) -> DbResult<u32> {
        self.with_connection(current_user_version)
    }

    /// Commits all pending changes.
    ///
    /// No-op when nothing is pending. After a commit, observers following the
    /// written collections are notified.
    ///
    /// # Errors
    /// - `DbError::Sqlite` when SQLite rejects the commit. Pending changes stay
    ///   pending; the caller may retry `save` or `rollback`.
    pub fn save(&self) -> DbResult<()> {
        let started_at = Instant::now();
        let committed = self.with_connection(|conn| -> DbResult<bool> {
            if conn.is_autocommit() {
                return Ok(false);
            }
            conn.execute_batch("COMMIT;")?;
            Ok(true)
        });

        match committed {
            Ok(false) => {
                debug!("event=db_save module=db status=skipped reason=no_pending_changes");
                Ok(())
            }
            Ok(true) => {
                let collections = std::mem::take(&mut *self.dirty.borrow_mut());
                info!(
                    "event=db_save module=db status=ok duration_ms={} collections={}",
                    started_at.elapsed().as_millis(),
                    collections.len()
                );
                self.notify(&ChangeScope::Collections(collections));
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=db_save module=db status=error duration_ms={} error_code=db_commit_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Discards all pending changes.
    pub fn rollback(&self) -> DbResult<()> {
        self.with_connection(|conn| -> DbResult<()> {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK;")?;
            }
            Ok(())
        })?;
        self.dirty.borrow_mut().clear();
        info!("event=db_rollback module=db status=ok");
        Ok(())
    }

    /// Deletes the store and recreates it empty.
    ///
    /// Steps: detach the connection, remove the primary, WAL and SHM files
    /// that exist, re-attach a fresh store. Returns `false` at the first
    /// failing step without undoing earlier ones; after a failed removal the
    /// context stays detached and `clear` may be retried.
    pub fn clear(&self) -> bool {
        let started_at = Instant::now();
        let Ok(mut slot) = self.conn.try_borrow_mut() else {
            error!("event=db_clear module=db status=error error_code=connection_busy");
            return false;
        };

        if let Some(conn) = slot.take() {
            if let Err((conn, err)) = conn.close() {
                error!(
                    "event=db_clear module=db status=error step=detach error_code=db_close_failed error={}",
                    err
                );
                *slot = Some(conn);
                return false;
            }
        }
        self.dirty.borrow_mut().clear();

        if let StoreTarget::File(location) = &self.target {
            for path in location.artifacts() {
                if !path.exists() {
                    continue;
                }
                if let Err(err) = std::fs::remove_file(&path) {
                    error!(
                        "event=db_clear module=db status=error step=remove path={} error={}",
                        path.display(),
                        err
                    );
                    return false;
                }
            }
        }

        let reopened = open_store(
            &self.target,
            &OpenOptions {
                schema: &self.schema,
                allow_automatic_migration: self.allow_automatic_migration,
                busy_timeout: self.busy_timeout,
            },
        );
        match reopened {
            Ok(conn) => *slot = Some(conn),
            Err(err) => {
                error!(
                    "event=db_clear module=db status=error step=reattach error={}",
                    err
                );
                return false;
            }
        }
        drop(slot);

        info!(
            "event=db_clear module=db status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        self.notify(&ChangeScope::Reset);
        true
    }

    /// Registers a commit observer held weakly; dropping the observer
    /// unregisters it implicitly.
    pub fn register_observer(&self, observer: Weak<RefCell<dyn CommitObserver>>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.get());
        self.next_observer_id.set(id.0 + 1);
        self.observers
            .borrow_mut()
            .push(ObserverSlot { id, observer });
        id
    }

    /// Returns whether `id` was registered.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|slot| slot.id != id);
        observers.len() != before
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|slot| slot.observer.strong_count() > 0);
        observers.len()
    }

    /// Runs `f` against the attached connection.
    pub(crate) fn with_connection<R, E>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<DbError>,
    {
        let guard = self
            .conn
            .try_borrow()
            .map_err(|_| DbError::ConnectionBusy)?;
        let conn = guard.as_ref().ok_or(DbError::Detached)?;
        f(conn)
    }

    /// Runs a write against `collection` inside the pending transaction,
    /// opening one when none is active.
    ///
    /// A failing `f` leaves the pending state as it was: its statements are
    /// undone and a transaction opened for it is rolled back.
    pub(crate) fn write<R, E>(
        &self,
        collection: &str,
        f: impl FnOnce(&Connection) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<DbError>,
    {
        let result = self.with_connection(|conn| {
            let opened = conn.is_autocommit();
            if opened {
                conn.execute_batch("BEGIN IMMEDIATE;")
                    .map_err(DbError::from)?;
            }
            if let Err(err) = conn.execute_batch(SAVEPOINT_SQL) {
                if opened {
                    undo_write(conn, ROLLBACK_SQL, collection);
                }
                return Err(DbError::from(err).into());
            }

            match f(conn) {
                Ok(value) => {
                    conn.execute_batch(RELEASE_SQL).map_err(DbError::from)?;
                    Ok(value)
                }
                Err(err) => {
                    let undo = if opened {
                        ROLLBACK_SQL
                    } else {
                        ROLLBACK_TO_SAVEPOINT_SQL
                    };
                    undo_write(conn, undo, collection);
                    Err(err)
                }
            }
        })?;
        self.dirty.borrow_mut().insert(collection.to_string());
        Ok(result)
    }

    fn notify(&self, scope: &ChangeScope) {
        let targets: Vec<Rc<RefCell<dyn CommitObserver>>> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|slot| slot.observer.strong_count() > 0);
            observers
                .iter()
                .filter_map(|slot| slot.observer.upgrade())
                .collect()
        };

        for observer in targets {
            let Ok(mut guard) = observer.try_borrow_mut() else {
                warn!("event=db_notify module=db status=skipped reason=observer_busy");
                continue;
            };
            if scope.touches(guard.collection()) {
                guard.on_commit(self, scope);
            }
        }
    }
}

fn undo_write(conn: &Connection, sql: &str, collection: &str) {
    match conn.execute_batch(sql) {
        Ok(()) => debug!(
            "event=db_write module=db status=rolled_back collection={}",
            collection
        ),
        Err(err) => warn!(
            "event=db_write module=db status=error step=undo collection={} error={}",
            collection, err
        ),
    }
}

impl Drop for DataContext {
    fn drop(&mut self) {
        if self.has_pending_changes() {
            warn!("event=db_close module=db status=ok pending_changes=discarded");
        }
    }
}
