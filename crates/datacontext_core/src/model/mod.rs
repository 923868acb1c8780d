//! Record model shared by repositories and live queries.
//!
//! # Responsibility
//! - Define what an application type must expose to be persisted.
//! - Define key types and the policies that assign them.
//!
//! # Invariants
//! - The key field is the only field this layer reads or writes by itself;
//!   every other field is touched through caller closures.

pub mod entity;
pub mod key;
