//! Typed data access over the shared record store.
//!
//! # Responsibility
//! - Map entity types onto collections of JSON records.
//! - Compile predicates, sort keys and paging into parameterized SQL.
//!
//! # Invariants
//! - Field names never reach SQL text; they are bound as JSON paths.
//! - Repository APIs return `None`/`false` for missing records and typed
//!   errors for everything else.

pub mod entity_repo;
pub mod query;
