use super::{BatchView, ViewOp};
use crate::live::{ChangeBatch, IndexPath, Layout, RowChange, SectionChange, StoreChange};
use log::warn;
use std::cell::{Ref, RefCell};
use std::rc::Rc;

/// Forwards one live query's change events to a view.
///
/// Protocol per batch: [`ChangeBridge::on_batch_begin`], any number of
/// section/row events in store order, then [`ChangeBridge::on_batch_end`].
/// Events whose index paths do not exist in the relevant layout are logged
/// and dropped.
///
/// The rendered layout lives behind a shared handle that is never borrowed
/// while the view runs, so view callbacks may read it.
pub struct ChangeBridge<T, V: BatchView> {
    view: Option<Rc<RefCell<V>>>,
    layout: Rc<RefCell<Layout<T>>>,
    incoming: Option<Layout<T>>,
}

impl<T, V: BatchView> ChangeBridge<T, V> {
    pub fn new(view: Rc<RefCell<V>>) -> Self {
        Self {
            view: Some(view),
            layout: Rc::new(RefCell::new(Layout::empty())),
            incoming: None,
        }
    }

    /// Layout the view currently renders.
    pub fn layout(&self) -> Ref<'_, Layout<T>> {
        self.layout.borrow()
    }

    /// Shared handle on the rendered layout.
    pub fn layout_handle(&self) -> Rc<RefCell<Layout<T>>> {
        Rc::clone(&self.layout)
    }

    pub fn view(&self) -> Option<&Rc<RefCell<V>>> {
        self.view.as_ref()
    }

    pub fn in_batch(&self) -> bool {
        self.incoming.is_some()
    }

    /// Drops the bridge's handle on the view; later events only update the
    /// cached layout.
    pub fn release_view(&mut self) -> Option<Rc<RefCell<V>>> {
        self.view.take()
    }

    /// Installs `layout` wholesale and asks the view to reload.
    pub fn reload(&mut self, layout: Layout<T>) {
        self.incoming = None;
        *self.layout.borrow_mut() = layout;
        self.with_view("reload", |view| view.reload_data());
    }

    /// Starts a batch whose events lead to `next`.
    pub fn on_batch_begin(&mut self, next: Layout<T>) {
        if self.incoming.is_some() {
            warn!("event=bridge_batch module=bridge status=skipped reason=batch_already_open");
        }
        self.incoming = Some(next);
        self.with_view("begin", |view| view.begin_updates());
    }

    pub fn on_section_changed(&mut self, index: usize, change: SectionChange) {
        let Some(next) = &self.incoming else {
            warn!("event=bridge_section module=bridge status=skipped reason=no_open_batch");
            return;
        };

        let current_sections = self.layout.borrow().number_of_sections();
        let op = match change {
            SectionChange::Insert if index < next.number_of_sections() => {
                ViewOp::SectionInserted(index)
            }
            SectionChange::Delete if index < current_sections => {
                ViewOp::SectionDeleted(index)
            }
            _ => {
                warn!(
                    "event=bridge_section module=bridge status=skipped reason=index_out_of_range change={:?} index={}",
                    change, index
                );
                return;
            }
        };
        self.forward(&[op]);
    }

    pub fn on_row_changed(
        &mut self,
        old: Option<IndexPath>,
        new: Option<IndexPath>,
        change: RowChange,
    ) {
        let Some(next) = &self.incoming else {
            warn!("event=bridge_row module=bridge status=skipped reason=no_open_batch");
            return;
        };

        let before = old.filter(|path| self.layout.borrow().contains(*path));
        let after = new.filter(|path| next.contains(*path));
        let ops = match (change, before, after) {
            (RowChange::Insert, _, Some(to)) => vec![ViewOp::RowInserted(to)],
            (RowChange::Delete, Some(from), _) => vec![ViewOp::RowDeleted(from)],
            (RowChange::Update, Some(at), _) => vec![ViewOp::RowUpdated(at)],
            (RowChange::Move, Some(from), Some(to)) => {
                if self.supports_atomic_move() {
                    vec![ViewOp::RowMoved { from, to }]
                } else {
                    vec![ViewOp::RowDeleted(from), ViewOp::RowInserted(to)]
                }
            }
            _ => {
                warn!(
                    "event=bridge_row module=bridge status=skipped reason=missing_index_path change={:?} old={:?} new={:?}",
                    change, old, new
                );
                return;
            }
        };
        self.forward(&ops);
    }

    /// Installs the post-batch layout, then ends the view's batch.
    pub fn on_batch_end(&mut self) {
        let Some(next) = self.incoming.take() else {
            warn!("event=bridge_batch module=bridge status=skipped reason=no_open_batch");
            return;
        };
        *self.layout.borrow_mut() = next;
        self.with_view("end", |view| view.end_updates());
    }

    /// Delivers a whole batch leading to `next`.
    pub fn apply_batch(&mut self, next: Layout<T>, batch: &ChangeBatch) {
        self.on_batch_begin(next);
        for change in batch.changes() {
            match *change {
                StoreChange::Section { index, change } => self.on_section_changed(index, change),
                StoreChange::Row { old, new, change } => self.on_row_changed(old, new, change),
            }
        }
        self.on_batch_end();
    }

    fn supports_atomic_move(&self) -> bool {
        self.view
            .as_ref()
            .and_then(|view| view.try_borrow().ok().map(|view| view.supports_atomic_move()))
            .unwrap_or(false)
    }

    fn forward(&self, ops: &[ViewOp]) {
        self.with_view("op", |view| {
            for op in ops {
                view.apply_op(op);
            }
        });
    }

    fn with_view(&self, step: &str, f: impl FnOnce(&mut V)) {
        let Some(view) = &self.view else {
            return;
        };
        match view.try_borrow_mut() {
            Ok(mut view) => f(&mut view),
            Err(_) => warn!(
                "event=bridge_view module=bridge status=skipped reason=view_busy step={}",
                step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeBridge;
    use crate::bridge::{BatchView, ViewOp};
    use crate::live::layout::tests::layout_of;
    use crate::live::{diff_layouts, IndexPath, RowChange, SectionChange};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        atomic_moves: bool,
        events: Vec<String>,
    }

    impl BatchView for Recorder {
        fn begin_updates(&mut self) {
            self.events.push("begin".to_string());
        }

        fn apply_op(&mut self, op: &ViewOp) {
            self.events.push(format!("{op:?}"));
        }

        fn end_updates(&mut self) {
            self.events.push("end".to_string());
        }

        fn reload_data(&mut self) {
            self.events.push("reload".to_string());
        }

        fn supports_atomic_move(&self) -> bool {
            self.atomic_moves
        }
    }

    fn path(section: usize, row: usize) -> IndexPath {
        IndexPath::new(section, row)
    }

    #[test]
    fn moves_split_for_views_without_atomic_moves() {
        let old = layout_of(&[("", &[("a", "1"), ("b", "2")])]);
        let new = layout_of(&[("", &[("b", "2"), ("a", "1")])]);

        for atomic_moves in [false, true] {
            let view = Rc::new(RefCell::new(Recorder {
                atomic_moves,
                ..Recorder::default()
            }));
            let mut bridge = ChangeBridge::new(view.clone());
            bridge.reload(old.clone());
            bridge.apply_batch(new.clone(), &diff_layouts(&old, &new));

            let moved = if atomic_moves {
                vec![format!(
                    "{:?}",
                    ViewOp::RowMoved {
                        from: path(0, 0),
                        to: path(0, 1)
                    }
                )]
            } else {
                vec![
                    format!("{:?}", ViewOp::RowDeleted(path(0, 0))),
                    format!("{:?}", ViewOp::RowInserted(path(0, 1))),
                ]
            };
            let mut expected = vec!["reload".to_string(), "begin".to_string()];
            expected.extend(moved);
            expected.push("end".to_string());
            assert_eq!(view.borrow().events, expected);
            assert_eq!(*bridge.layout(), new);
        }
    }

    #[test]
    fn layout_swaps_only_at_batch_end() {
        let old = layout_of(&[("", &[("a", "1")])]);
        let new = layout_of(&[("", &[("a", "1"), ("b", "2")])]);
        let view = Rc::new(RefCell::new(Recorder::default()));
        let mut bridge = ChangeBridge::new(view);
        bridge.reload(old.clone());

        bridge.on_batch_begin(new.clone());
        bridge.on_row_changed(None, Some(path(0, 1)), RowChange::Insert);
        assert_eq!(*bridge.layout(), old);
        assert!(bridge.in_batch());

        bridge.on_batch_end();
        assert_eq!(*bridge.layout(), new);
        assert!(!bridge.in_batch());
    }

    #[test]
    fn events_with_missing_paths_are_skipped() {
        let old = layout_of(&[("", &[("a", "1")])]);
        let view = Rc::new(RefCell::new(Recorder::default()));
        let mut bridge = ChangeBridge::new(view.clone());
        bridge.reload(old.clone());

        bridge.on_batch_begin(old.clone());
        bridge.on_row_changed(None, None, RowChange::Insert);
        bridge.on_row_changed(Some(path(0, 5)), None, RowChange::Delete);
        bridge.on_row_changed(Some(path(0, 0)), None, RowChange::Move);
        bridge.on_section_changed(3, SectionChange::Delete);
        bridge.on_row_changed(Some(path(0, 0)), Some(path(0, 0)), RowChange::Update);
        bridge.on_batch_end();

        assert_eq!(
            view.borrow().events,
            vec![
                "reload".to_string(),
                "begin".to_string(),
                format!("{:?}", ViewOp::RowUpdated(path(0, 0))),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn released_view_receives_nothing() {
        let old = layout_of(&[("", &[("a", "1")])]);
        let new = layout_of(&[("", &[])]);
        let view = Rc::new(RefCell::new(Recorder::default()));
        let mut bridge = ChangeBridge::new(view.clone());
        bridge.reload(old.clone());

        let released = bridge.release_view();
        assert!(released.is_some());
        bridge.apply_batch(new.clone(), &diff_layouts(&old, &new));

        assert_eq!(view.borrow().events, vec!["reload".to_string()]);
        assert_eq!(*bridge.layout(), new);
        assert_eq!(Rc::strong_count(&view), 2);
    }
}
