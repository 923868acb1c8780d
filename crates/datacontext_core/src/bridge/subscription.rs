use super::{BatchView, ChangeBridge};
use crate::db::{ChangeScope, CommitObserver, DataContext, ObserverId};
use crate::live::layout::fetch_layout;
use crate::live::{diff_layouts, IndexPath, Layout, LiveRequest};
use crate::model::entity::Entity;
use crate::repo::entity_repo::{RepoResult, Repository};
use log::{debug, error, info};
use std::cell::RefCell;
use std::rc::Rc;

/// Observer state registered with the context.
struct LiveBinding<T, V: BatchView> {
    collection: String,
    request: LiveRequest,
    bridge: ChangeBridge<T, V>,
}

impl<T: Entity, V: BatchView> LiveBinding<T, V> {
    /// Full fetch followed by a view reload; an unreadable query renders empty.
    fn load(&mut self, ctx: &DataContext) {
        let layout = match fetch_layout::<T>(ctx, &self.collection, &self.request) {
            Ok(layout) => {
                info!(
                    "event=live_fetch module=bridge status=ok collection={} sections={} rows={}",
                    self.collection,
                    layout.number_of_sections(),
                    layout.total_rows()
                );
                layout
            }
            Err(err) => {
                error!(
                    "event=live_fetch module=bridge status=error collection={} error={}",
                    self.collection, err
                );
                Layout::empty()
            }
        };
        self.bridge.reload(layout);
    }

    fn refresh(&mut self, ctx: &DataContext, scope: &ChangeScope) {
        let next = match fetch_layout::<T>(ctx, &self.collection, &self.request) {
            Ok(next) => next,
            Err(err) => {
                error!(
                    "event=live_refresh module=bridge status=error collection={} error={}",
                    self.collection, err
                );
                return;
            }
        };

        let batch = diff_layouts(&self.bridge.layout(), &next);
        if batch.is_empty() {
            debug!(
                "event=live_refresh module=bridge status=skipped collection={} reason=no_changes",
                self.collection
            );
            return;
        }

        debug!(
            "event=live_refresh module=bridge status=ok collection={} reset={} changes={}",
            self.collection,
            matches!(scope, ChangeScope::Reset),
            batch.len()
        );
        self.bridge.apply_batch(next, &batch);
    }
}

impl<T: Entity, V: BatchView> CommitObserver for LiveBinding<T, V> {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn on_commit(&mut self, ctx: &DataContext, scope: &ChangeScope) {
        self.refresh(ctx, scope);
    }
}

/// A live query kept in sync with commits, feeding one view.
///
/// The context holds the subscription weakly: dropping it stops updates and
/// releases the view.
///
/// Data-source methods read the bridge's cached layout and may be called
/// from the view's `end_updates`/`reload_data`, where they already see the
/// post-batch layout.
///
/// # Panics
/// `request`, `view`, `unsubscribe` and `resubscribe` panic when called from
/// inside a view callback of this same subscription.
pub struct LiveSubscription<T, V: BatchView> {
    binding: Rc<RefCell<LiveBinding<T, V>>>,
    layout: Rc<RefCell<Layout<T>>>,
    observer: Option<ObserverId>,
}

impl<T: Entity + 'static, V: BatchView + 'static> LiveSubscription<T, V> {
    pub(crate) fn start(
        ctx: &DataContext,
        collection: &str,
        request: LiveRequest,
        view: Rc<RefCell<V>>,
    ) -> RepoResult<Self> {
        request.validate()?;

        let bridge = ChangeBridge::new(view);
        let layout = bridge.layout_handle();
        let binding = Rc::new(RefCell::new(LiveBinding {
            collection: collection.to_string(),
            request: request.normalized(T::KEY_FIELD),
            bridge,
        }));
        binding.borrow_mut().load(ctx);

        let mut subscription = Self {
            binding,
            layout,
            observer: None,
        };
        subscription.register(ctx);
        Ok(subscription)
    }

    pub fn is_subscribed(&self) -> bool {
        self.observer.is_some()
    }

    /// Effective request, including default sort keys.
    pub fn request(&self) -> LiveRequest {
        self.binding.borrow().request.clone()
    }

    pub fn view(&self) -> Option<Rc<RefCell<V>>> {
        self.binding.borrow().bridge.view().cloned()
    }

    /// Stops updates and hands the view back. The cached layout stays
    /// readable.
    pub fn unsubscribe(&mut self, ctx: &DataContext) -> Option<Rc<RefCell<V>>> {
        if let Some(id) = self.observer.take() {
            ctx.unregister_observer(id);
        }
        self.binding.borrow_mut().bridge.release_view()
    }

    /// Replaces the request: drops the current registration, refetches in
    /// full, reloads the view and registers again.
    pub fn resubscribe(&mut self, ctx: &DataContext, request: LiveRequest) -> RepoResult<()> {
        request.validate()?;

        if let Some(id) = self.observer.take() {
            ctx.unregister_observer(id);
        }
        {
            let mut binding = self.binding.borrow_mut();
            binding.request = request.normalized(T::KEY_FIELD);
            binding.load(ctx);
        }
        self.register(ctx);
        Ok(())
    }

    pub fn with_layout<R>(&self, f: impl FnOnce(&Layout<T>) -> R) -> R {
        f(&self.layout.borrow())
    }

    pub fn number_of_sections(&self) -> usize {
        self.with_layout(Layout::number_of_sections)
    }

    pub fn rows_in_section(&self, section: usize) -> usize {
        self.with_layout(|layout| layout.rows_in_section(section))
    }

    pub fn section_title(&self, section: usize) -> Option<String> {
        self.with_layout(|layout| layout.section_title(section).map(str::to_string))
    }

    pub fn section_index_titles(&self) -> Vec<String> {
        self.with_layout(Layout::section_index_titles)
    }

    pub fn section_for_index_title(&self, title: &str) -> Option<usize> {
        self.with_layout(|layout| layout.section_for_index_title(title))
    }

    pub fn record_at(&self, path: IndexPath) -> Option<T>
    where
        T: Clone,
    {
        self.with_layout(|layout| layout.record_at(path).cloned())
    }

    fn register(&mut self, ctx: &DataContext) {
        let observer: Rc<RefCell<dyn CommitObserver>> = self.binding.clone();
        self.observer = Some(ctx.register_observer(Rc::downgrade(&observer)));
    }
}

impl<'ctx, T: Entity + 'static> Repository<'ctx, T> {
    /// Starts a live query over this repository's collection.
    ///
    /// The view is reloaded once with the initial fetch, then receives
    /// batched edits after every commit touching the collection. Without sort
    /// keys the query is ordered by `T::KEY_FIELD`.
    ///
    /// # Errors
    /// - `RepoError::Query` when the request names invalid fields or
    ///   operands. Fetch failures are logged and render an empty view.
    pub fn subscribe<V: BatchView + 'static>(
        &self,
        request: LiveRequest,
        view: Rc<RefCell<V>>,
    ) -> RepoResult<LiveSubscription<T, V>> {
        LiveSubscription::start(self.context(), self.collection(), request, view)
    }
}
