//! Change-notification bridge between live queries and list views.
//!
//! # Responsibility
//! - Translate store change events into view operations.
//! - Answer view data-source queries from the last installed layout.
//! - Keep a live query subscribed to commits of its collection.
//!
//! # Invariants
//! - Every batch reaches the view bracketed by `begin_updates`/`end_updates`.
//! - Deletes address the pre-batch layout, inserts the post-batch layout;
//!   the cached layout is swapped once, at batch end.
//! - Views that cannot move rows atomically receive a delete then an insert.

mod change_bridge;
mod subscription;

pub use change_bridge::ChangeBridge;
pub use subscription::LiveSubscription;

use crate::live::IndexPath;

/// One edit of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOp {
    SectionInserted(usize),
    SectionDeleted(usize),
    RowInserted(IndexPath),
    RowDeleted(IndexPath),
    RowUpdated(IndexPath),
    RowMoved { from: IndexPath, to: IndexPath },
}

/// A list view that accepts batched edits.
///
/// Views read content back through the subscription's data-source methods;
/// from `end_updates` and `reload_data` on, those answer from the new layout.
pub trait BatchView {
    fn begin_updates(&mut self);

    fn apply_op(&mut self, op: &ViewOp);

    fn end_updates(&mut self);

    /// Discards rendered state; everything must be re-read.
    fn reload_data(&mut self);

    fn supports_atomic_move(&self) -> bool {
        false
    }

    /// Applies `ops` as one batch.
    fn apply(&mut self, ops: &[ViewOp]) {
        self.begin_updates();
        for op in ops {
            self.apply_op(op);
        }
        self.end_updates();
    }
}
