//! Live query snapshots and change computation.
//!
//! # Responsibility
//! - Fetch a query into a sectioned [`Layout`].
//! - Diff consecutive layouts into an ordered [`ChangeBatch`].
//!
//! # Invariants
//! - Row identity is the stored key, never the position.
//! - A batch replayed against the old layout (deletes descending, section
//!   inserts, inserts ascending) yields the new layout.

pub mod diff;
pub mod layout;

pub use diff::{diff_layouts, ChangeBatch, RowChange, SectionChange, StoreChange};
pub use layout::{IndexPath, Layout, LayoutRow, LiveRequest, Section};
