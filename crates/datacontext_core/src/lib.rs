//! Embedded record store with typed repositories and live queries.
//!
//! One [`DataContext`] owns a SQLite store; [`Repository`] values give typed
//! access to one collection each; [`LiveSubscription`] keeps a list view in
//! step with commits.

pub mod bridge;
pub mod db;
pub mod live;
pub mod logging;
pub mod model;
pub mod repo;

pub use bridge::{BatchView, ChangeBridge, LiveSubscription, ViewOp};
pub use db::{
    ChangeScope, CommitObserver, DataContext, DbError, DbResult, ObserverId, SchemaModel,
    StoreConfig, StoreLocation,
};
pub use live::{
    diff_layouts, ChangeBatch, IndexPath, Layout, LiveRequest, RowChange, SectionChange,
    StoreChange,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::entity::Entity;
pub use model::key::{PrimaryKeyStrategy, RecordKey};
pub use repo::entity_repo::{RepoError, RepoResult, Repository};
pub use repo::query::{CompareOp, Predicate, Query, QueryError, SortKey, SortOrder};
