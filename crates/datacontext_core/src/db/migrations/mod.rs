//! SQLite schema model and migration executor.
//!
//! # Responsibility
//! - Hold the ordered migrations that define the store schema.
//! - Decide whether an on-disk store may be migrated, then apply pending
//!   migrations atomically.
//!
//! # Invariants
//! - `version` values are strictly increasing and positive.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A store that already holds tables is only migrated when allowed.

use crate::db::{DbError, DbResult};
use rusqlite::Connection;
use std::borrow::Cow;
use std::path::Path;

const RECORDS_MIGRATION: &str = include_str!("0001_records.sql");

/// One schema step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub sql: Cow<'static, str>,
}

/// Ordered migration list describing the schema a build expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaModel {
    migrations: Vec<Migration>,
}

impl Default for SchemaModel {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaModel {
    /// Schema with only the `records` table every repository uses.
    pub fn builtin() -> Self {
        Self {
            migrations: vec![Migration {
                version: 1,
                sql: Cow::Borrowed(RECORDS_MIGRATION),
            }],
        }
    }

    /// Appends one migration. Ordering is checked by [`SchemaModel::validate`].
    pub fn with_migration(mut self, version: u32, sql: impl Into<Cow<'static, str>>) -> Self {
        self.migrations.push(Migration {
            version,
            sql: sql.into(),
        });
        self
    }

    /// Appends every `<version>_<label>.sql` file found in `dir`, ordered by
    /// version.
    ///
    /// # Errors
    /// - `DbError::InvalidSchemaModel` when the directory cannot be read or a
    ///   file name does not start with a numeric version.
    pub fn load_dir(mut self, dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|err| {
            DbError::InvalidSchemaModel(format!(
                "cannot read migration directory `{}`: {err}",
                dir.display()
            ))
        })?;

        let mut loaded = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| {
                    DbError::InvalidSchemaModel(format!(
                        "cannot list migration directory `{}`: {err}",
                        dir.display()
                    ))
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
                continue;
            }

            let version = parse_file_version(&path)?;
            let sql = std::fs::read_to_string(&path).map_err(|err| {
                DbError::InvalidSchemaModel(format!(
                    "cannot read migration `{}`: {err}",
                    path.display()
                ))
            })?;
            loaded.push(Migration {
                version,
                sql: Cow::Owned(sql),
            });
        }

        loaded.sort_by_key(|migration| migration.version);
        self.migrations.extend(loaded);
        Ok(self)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Returns the latest migration version of this model.
    pub fn latest_version(&self) -> u32 {
        self.migrations
            .last()
            .map_or(0, |migration| migration.version)
    }

    /// Checks that the model can be applied at all.
    ///
    /// # Errors
    /// - `DbError::InvalidSchemaModel` for an empty model, a zero version, or
    ///   versions that are not strictly increasing.
    pub fn validate(&self) -> DbResult<()> {
        if self.migrations.is_empty() {
            return Err(DbError::InvalidSchemaModel(
                "schema model has no migrations".to_string(),
            ));
        }

        let mut previous = 0;
        for migration in &self.migrations {
            if migration.version <= previous {
                return Err(DbError::InvalidSchemaModel(format!(
                    "migration version {} must be greater than {previous}",
                    migration.version
                )));
            }
            previous = migration.version;
        }
        Ok(())
    }
}

/// Result of bringing one connection up to the schema model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: u32,
    pub to_version: u32,
}

impl MigrationOutcome {
    pub fn applied(&self) -> bool {
        self.from_version != self.to_version
    }
}

/// Applies all pending migrations of `schema` on the provided connection.
///
/// A fresh database (no tables, `user_version = 0`) is always initialized.
/// An existing database behind the model is migrated only when
/// `allow_automatic_migration` is set.
pub fn apply_migrations(
    conn: &mut Connection,
    schema: &SchemaModel,
    allow_automatic_migration: bool,
) -> DbResult<MigrationOutcome> {
    let current_version = current_user_version(conn)?;
    let latest = schema.latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(MigrationOutcome {
            from_version: current_version,
            to_version: latest,
        });
    }

    if !allow_automatic_migration && !is_fresh_database(conn, current_version)? {
        return Err(DbError::MigrationRequired {
            db_version: current_version,
            model_version: latest,
        });
    }

    let tx = conn.transaction()?;
    for migration in schema.migrations() {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(&migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(MigrationOutcome {
        from_version: current_version,
        to_version: latest,
    })
}

pub(crate) fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn is_fresh_database(conn: &Connection, current_version: u32) -> DbResult<bool> {
    if current_version != 0 {
        return Ok(false);
    }
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table';",
        [],
        |row| row.get(0),
    )?;
    Ok(tables == 0)
}

fn parse_file_version(path: &Path) -> DbResult<u32> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let digits = stem.split('_').next().unwrap_or_default();
    digits.parse::<u32>().map_err(|_| {
        DbError::InvalidSchemaModel(format!(
            "migration file `{}` must be named `<version>_<label>.sql`",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, SchemaModel};
    use crate::db::DbError;
    use rusqlite::Connection;

    #[test]
    fn builtin_model_is_valid() {
        let schema = SchemaModel::builtin();
        schema.validate().expect("builtin model should validate");
        assert_eq!(schema.latest_version(), 1);
    }

    #[test]
    fn validate_rejects_non_monotonic_versions() {
        let schema = SchemaModel::builtin().with_migration(1, "SELECT 1;");
        assert!(matches!(
            schema.validate(),
            Err(DbError::InvalidSchemaModel(_))
        ));
    }

    #[test]
    fn fresh_database_is_initialized_without_permission() {
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = apply_migrations(&mut conn, &SchemaModel::builtin(), false).unwrap();
        assert_eq!(outcome.from_version, 0);
        assert_eq!(outcome.to_version, 1);
        assert!(outcome.applied());
    }

    #[test]
    fn existing_database_requires_permission() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, &SchemaModel::builtin(), false).unwrap();

        let next = SchemaModel::builtin().with_migration(
            2,
            "CREATE INDEX idx_records_updated ON records (updated_at);",
        );
        let err = apply_migrations(&mut conn, &next, false).unwrap_err();
        assert!(matches!(
            err,
            DbError::MigrationRequired {
                db_version: 1,
                model_version: 2
            }
        ));

        let outcome = apply_migrations(&mut conn, &next, true).unwrap();
        assert_eq!(outcome.to_version, 2);
    }

    #[test]
    fn load_dir_rejects_unversioned_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("extra.sql"), "SELECT 1;").unwrap();

        let err = SchemaModel::builtin().load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, DbError::InvalidSchemaModel(_)));
    }
}
