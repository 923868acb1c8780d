//! Generic entity repository over the shared `records` table.
//!
//! # Responsibility
//! - Provide typed CRUD and query APIs for one collection.
//! - Assign primary keys according to the repository's strategy.
//! - Stage writes in the context's pending transaction and commit them.
//!
//! # Invariants
//! - Records returned by `create`/`add` carry a key unless the strategy is
//!   `None`.
//! - Fetch failures surface as typed errors, never as empty results.
//! - Not-found is `None`/`false`, never an error.
//! - `clear` issues one delete and one commit for the whole collection.

use crate::db::{DataContext, DbError};
use crate::model::entity::Entity;
use crate::model::key::{PrimaryKeyStrategy, RecordKey};
use crate::repo::query::{Predicate, Query, QueryError, SortKey, SqlFragment};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT record_key, body FROM records WHERE collection = ?";

static COLLECTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid collection name regex"));

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// The store rejected a commit; pending changes are still pending.
    Commit(DbError),
    Query(QueryError),
    InvalidData(String),
    MissingKey {
        collection: String,
    },
    DuplicateKey {
        collection: String,
        key: String,
    },
    UnsupportedKeyStrategy {
        collection: String,
        strategy: &'static str,
    },
    InvalidCollection(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Commit(err) => write!(f, "commit failed: {err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::MissingKey { collection } => {
                write!(f, "record in `{collection}` has no primary key")
            }
            Self::DuplicateKey { collection, key } => {
                write!(f, "record with key {key} already exists in `{collection}`")
            }
            Self::UnsupportedKeyStrategy {
                collection,
                strategy,
            } => write!(
                f,
                "key strategy `{strategy}` is not supported by the key type of `{collection}`"
            ),
            Self::InvalidCollection(name) => write!(f, "invalid collection name `{name}`"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) | Self::Commit(err) => Some(err),
            Self::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

/// Raw row as stored: SQL key value and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRecord {
    pub key: Value,
    pub body: String,
}

/// Typed CRUD and query surface over one collection.
pub struct Repository<'ctx, T: Entity> {
    ctx: &'ctx DataContext,
    collection: String,
    key_strategy: PrimaryKeyStrategy<T::Key>,
    _record: PhantomData<fn() -> T>,
}

impl<'ctx, T: Entity> Repository<'ctx, T> {
    /// Binds a repository to `T::COLLECTION`.
    pub fn new(
        ctx: &'ctx DataContext,
        key_strategy: PrimaryKeyStrategy<T::Key>,
    ) -> RepoResult<Self> {
        Self::with_collection(ctx, T::COLLECTION, key_strategy)
    }

    /// Binds a repository to an explicit collection name.
    ///
    /// # Errors
    /// - `RepoError::InvalidCollection` unless the name is an identifier.
    /// - `RepoError::UnsupportedKeyStrategy` when `T::Key` cannot hold the
    ///   keys the strategy produces.
    pub fn with_collection(
        ctx: &'ctx DataContext,
        collection: impl Into<String>,
        key_strategy: PrimaryKeyStrategy<T::Key>,
    ) -> RepoResult<Self> {
        let collection = collection.into();
        if !COLLECTION_NAME_RE.is_match(&collection) {
            return Err(RepoError::InvalidCollection(collection));
        }
        if !key_strategy.is_supported() {
            return Err(RepoError::UnsupportedKeyStrategy {
                collection,
                strategy: key_strategy.name(),
            });
        }

        Ok(Self {
            ctx,
            collection,
            key_strategy,
            _record: PhantomData,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_strategy(&self) -> &PrimaryKeyStrategy<T::Key> {
        &self.key_strategy
    }

    pub fn context(&self) -> &'ctx DataContext {
        self.ctx
    }

    /// Returns a new record with its key assigned, not yet staged.
    ///
    /// Stage it with [`Repository::insert`] or [`Repository::put`] after
    /// setting the remaining fields.
    pub fn create(&self) -> RepoResult<T> {
        let mut record = T::default();
        match &self.key_strategy {
            PrimaryKeyStrategy::None => {}
            PrimaryKeyStrategy::AutoNumber => {
                let count = i64::try_from(self.count(None)?)
                    .map_err(|_| RepoError::InvalidData("record count overflow".to_string()))?;
                let key = <T::Key as RecordKey>::from_auto_number(count + 1)
                    .ok_or_else(|| self.unsupported_strategy())?;
                record.set_key(key);
            }
            PrimaryKeyStrategy::Uuid => {
                let key = <T::Key as RecordKey>::from_uuid(Uuid::new_v4())
                    .ok_or_else(|| self.unsupported_strategy())?;
                record.set_key(key);
            }
            PrimaryKeyStrategy::Custom(generator) => record.set_key(generator()),
        }
        Ok(record)
    }

    /// Stages a new record in the pending transaction.
    ///
    /// # Errors
    /// - `RepoError::MissingKey` when the record has no key.
    /// - `RepoError::DuplicateKey` when the key is already used.
    pub fn insert(&self, record: &T) -> RepoResult<()> {
        let key = self.require_key(record)?;
        let body = encode_record(record)?;
        self.ctx.write(&self.collection, |conn| {
            conn.execute(
                "INSERT INTO records (collection, record_key, body) VALUES (?1, ?2, ?3);",
                params![self.collection, key.to_sql(), body],
            )
            .map_err(|err| self.map_write_error(err, &key))?;
            Ok(())
        })
    }

    /// Stages an insert-or-replace of `record` by key.
    pub fn put(&self, record: &T) -> RepoResult<()> {
        let key = self.require_key(record)?;
        let body = encode_record(record)?;
        self.ctx.write(&self.collection, |conn| {
            conn.execute(
                "INSERT INTO records (collection, record_key, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, record_key) DO UPDATE SET
                    body = excluded.body,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![self.collection, key.to_sql(), body],
            )?;
            Ok(())
        })
    }

    /// Creates, configures, stages and commits a record.
    pub fn add(&self, configure: impl FnOnce(&mut T)) -> RepoResult<T> {
        let mut record = self.create()?;
        configure(&mut record);
        self.insert(&record)?;
        self.commit()?;
        Ok(record)
    }

    /// [`Repository::add`] without configuration.
    pub fn add_default(&self) -> RepoResult<T> {
        self.add(|_| {})
    }

    pub fn find(&self, key: &T::Key) -> RepoResult<Option<T>> {
        let body = self.ctx.with_connection(|conn| -> RepoResult<Option<String>> {
            let body = conn
                .query_row(
                    "SELECT body FROM records WHERE collection = ?1 AND record_key = ?2;",
                    params![self.collection, key.to_sql()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(body)
        })?;

        body.map(|body| self.decode(&body)).transpose()
    }

    pub fn contains_key(&self, key: &T::Key) -> RepoResult<bool> {
        self.ctx.with_connection(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM records WHERE collection = ?1 AND record_key = ?2
                );",
                params![self.collection, key.to_sql()],
                |row| row.get(0),
            )?;
            Ok(exists == 1)
        })
    }

    /// Returns one matching record.
    ///
    /// Which record is returned when several match is decided only by
    /// `sort_by`; with no sort keys it is unspecified.
    pub fn first(
        &self,
        predicate: Option<&Predicate>,
        sort_by: &[SortKey],
    ) -> RepoResult<Option<T>> {
        let query = Query {
            predicate: predicate.cloned(),
            sort_by: sort_by.to_vec(),
            limit: Some(1),
            offset: 0,
        };
        Ok(self.query(&query)?.into_iter().next())
    }

    pub fn filter(&self, predicate: &Predicate, sort_by: &[SortKey]) -> RepoResult<Vec<T>> {
        self.query(&Query {
            predicate: Some(predicate.clone()),
            sort_by: sort_by.to_vec(),
            ..Query::default()
        })
    }

    pub fn get_all(&self, sort_by: &[SortKey]) -> RepoResult<Vec<T>> {
        self.query(&Query {
            sort_by: sort_by.to_vec(),
            ..Query::default()
        })
    }

    pub fn query(&self, query: &Query) -> RepoResult<Vec<T>> {
        fetch_stored(self.ctx, &self.collection, query)?
            .iter()
            .map(|stored| self.decode(&stored.body))
            .collect()
    }

    pub fn count(&self, predicate: Option<&Predicate>) -> RepoResult<usize> {
        let mut fragment = SqlFragment {
            sql: "SELECT COUNT(*) FROM records WHERE collection = ?".to_string(),
            params: vec![Value::Text(self.collection.clone())],
        };
        if let Some(predicate) = predicate {
            let compiled = predicate.compile()?;
            fragment.sql.push_str(" AND (");
            fragment.sql.push_str(&compiled.sql);
            fragment.sql.push(')');
            fragment.params.extend(compiled.params);
        }

        let count: i64 = self.ctx.with_connection(|conn| -> RepoResult<i64> {
            Ok(conn.query_row(&fragment.sql, params_from_iter(fragment.params.iter()), |row| {
                row.get(0)
            })?)
        })?;
        usize::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative record count {count}")))
    }

    /// Applies `configure` to the record with `key` and commits.
    ///
    /// Returns `Ok(None)` when no such record exists.
    pub fn update(&self, key: &T::Key, configure: impl FnOnce(&mut T)) -> RepoResult<Option<T>> {
        let Some(mut record) = self.find(key)? else {
            return Ok(None);
        };
        configure(&mut record);

        let new_key = self.require_key(&record)?;
        let body = encode_record(&record)?;
        self.ctx.write(&self.collection, |conn| {
            conn.execute(
                "UPDATE records
                 SET
                    record_key = ?3,
                    body = ?4,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE collection = ?1 AND record_key = ?2;",
                params![self.collection, key.to_sql(), new_key.to_sql(), body],
            )
            .map_err(|err| self.map_write_error(err, &new_key))?;
            Ok::<_, RepoError>(())
        })?;
        self.commit()?;
        Ok(Some(record))
    }

    /// Deletes the record with `key` and commits. Returns `false` when absent.
    pub fn delete(&self, key: &T::Key) -> RepoResult<bool> {
        if !self.contains_key(key)? {
            return Ok(false);
        }

        self.ctx.write(&self.collection, |conn| {
            conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND record_key = ?2;",
                params![self.collection, key.to_sql()],
            )?;
            Ok::<_, RepoError>(())
        })?;
        self.commit()?;
        Ok(true)
    }

    /// Deletes every record of the collection with a single commit.
    pub fn clear(&self) -> RepoResult<()> {
        self.ctx.write(&self.collection, |conn| {
            conn.execute(
                "DELETE FROM records WHERE collection = ?1;",
                [self.collection.as_str()],
            )?;
            Ok::<_, RepoError>(())
        })?;
        self.commit()
    }

    fn commit(&self) -> RepoResult<()> {
        self.ctx.save().map_err(RepoError::Commit)
    }

    fn require_key(&self, record: &T) -> RepoResult<T::Key> {
        record.key().ok_or_else(|| RepoError::MissingKey {
            collection: self.collection.clone(),
        })
    }

    fn decode(&self, body: &str) -> RepoResult<T> {
        decode_record(&self.collection, body)
    }

    fn unsupported_strategy(&self) -> RepoError {
        RepoError::UnsupportedKeyStrategy {
            collection: self.collection.clone(),
            strategy: self.key_strategy.name(),
        }
    }

    fn map_write_error(&self, err: rusqlite::Error, key: &T::Key) -> RepoError {
        if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            return RepoError::DuplicateKey {
                collection: self.collection.clone(),
                key: format!("{key:?}"),
            };
        }
        err.into()
    }
}

/// Runs `query` against `collection` and returns raw rows in query order.
pub(crate) fn fetch_stored(
    ctx: &DataContext,
    collection: &str,
    query: &Query,
) -> RepoResult<Vec<StoredRecord>> {
    let mut fragment = SqlFragment {
        sql: RECORD_SELECT_SQL.to_string(),
        params: vec![Value::Text(collection.to_string())],
    };
    query.append_sql(&mut fragment)?;

    ctx.with_connection(|conn| {
        let mut stmt = conn.prepare(&fragment.sql)?;
        let mut rows = stmt.query(params_from_iter(fragment.params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(StoredRecord {
                key: row.get(0)?,
                body: row.get(1)?,
            });
        }
        Ok(records)
    })
}

pub(crate) fn decode_record<T: Entity>(collection: &str, body: &str) -> RepoResult<T> {
    serde_json::from_str(body).map_err(|err| {
        RepoError::InvalidData(format!("invalid `{collection}` record body: {err}"))
    })
}

fn encode_record<T: Entity>(record: &T) -> RepoResult<String> {
    serde_json::to_string(record)
        .map_err(|err| RepoError::InvalidData(format!("cannot serialize record: {err}")))
}
