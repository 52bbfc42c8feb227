use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::coordinator::{CoordinatorConfig, RequestCoordinator};
use super::cursor::{HasMoreBasis, PaginationCursor, Phase};
use super::error::FeedError;
use super::events::{emit, FeedEvent};
use super::merge::{merge, MergeMode};
use super::mutation::{
    AddSettlement, CopyKey, DeletePlan, ItemStore, MutationEngine, MutationIntent, MutationKind,
};
use crate::api::FeedApi;
use crate::model::{AchievementKind, Author, Comment, CommentId, FeedItem, FeedSource, Id, Page};

/// Construction options for [`FeedController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Items requested per page; constant for the controller's lifetime.
    pub page_size: u32,
    /// How many sources keep their cache while inactive (LRU beyond that).
    pub retained_sources: NonZeroUsize,
    pub initial_source: FeedSource,
    pub coordinator: CoordinatorConfig,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            retained_sources: NonZeroUsize::new(FeedSource::ALL_SOURCES.len())
                .unwrap_or(NonZeroUsize::MIN),
            initial_source: FeedSource::All,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Read-only state handed to presentation code.
///
/// `items` is shared with the cache; compare with [`Arc::ptr_eq`] to detect
/// changes cheaply.
#[derive(Debug, Clone)]
pub struct FeedViewModel {
    pub source: FeedSource,
    pub items: Arc<Vec<FeedItem>>,
    pub phase: Phase,
    pub error: Option<String>,
    pub has_more: bool,
    pub has_more_basis: HasMoreBasis,
    pub page: u32,
}

impl FeedViewModel {
    /// Full-list spinner.
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    /// Incremental spinner below the list.
    pub fn is_loading_more(&self) -> bool {
        self.phase == Phase::LoadingMore
    }
}

// ============================================================================
// Source caches
// ============================================================================

struct SourceState {
    cursor: PaginationCursor,
    items: Arc<Vec<FeedItem>>,
    error: Option<String>,
}

impl SourceState {
    fn new(page_size: u32) -> Self {
        Self {
            cursor: PaginationCursor::new(page_size),
            items: Arc::new(Vec::new()),
            error: None,
        }
    }
}

/// Per-source cursors and item lists. The active source is always the
/// most recently used entry, so LRU eviction only drops inactive sources.
struct SourceCaches {
    active: FeedSource,
    page_size: u32,
    sources: LruCache<FeedSource, SourceState>,
}

impl SourceCaches {
    fn new(active: FeedSource, page_size: u32, capacity: NonZeroUsize) -> Self {
        let mut sources = LruCache::new(capacity);
        sources.put(active, SourceState::new(page_size));
        Self {
            active,
            page_size,
            sources,
        }
    }

    fn activate(&mut self, source: FeedSource) -> &mut SourceState {
        if !self.sources.contains(&source) && self.sources.len() == self.sources.cap().get() {
            if let Some((evicted, _)) = self.sources.peek_lru() {
                tracing::debug!(source = %evicted, "Evicting cached feed source");
            }
        }
        self.active = source;
        let page_size = self.page_size;
        self.sources
            .get_or_insert_mut(source, || SourceState::new(page_size))
    }

    fn active_mut(&mut self) -> &mut SourceState {
        let source = self.active;
        self.activate(source)
    }

    fn get_mut(&mut self, source: FeedSource) -> Option<&mut SourceState> {
        self.sources.peek_mut(&source)
    }

    fn active(&self) -> Option<&SourceState> {
        self.sources.peek(&self.active)
    }
}

impl ItemStore for SourceCaches {
    fn find_item(&self, id: &Id) -> Option<&FeedItem> {
        let in_active = self
            .active()
            .and_then(|s| s.items.iter().find(|i| &i.id == id));
        in_active.or_else(|| {
            self.sources
                .iter()
                .find_map(|(_, s)| s.items.iter().find(|i| &i.id == id))
        })
    }

    /// Items are unique within a source, so the source identifies the copy.
    fn update_copies<F: FnMut(CopyKey, &mut FeedItem)>(&mut self, id: &Id, mut f: F) -> usize {
        let mut touched = 0;
        for (source, state) in self.sources.iter_mut() {
            if !state.items.iter().any(|i| &i.id == id) {
                continue;
            }
            let key = copy_key(*source);
            let items = Arc::make_mut(&mut state.items);
            for item in items.iter_mut().filter(|i| &i.id == id) {
                f(key, item);
                touched += 1;
            }
        }
        touched
    }
}

fn copy_key(source: FeedSource) -> CopyKey {
    let index = FeedSource::ALL_SOURCES
        .iter()
        .position(|s| *s == source)
        .unwrap_or_default();
    CopyKey(index as u32)
}

struct Inner {
    caches: SourceCaches,
    engine: MutationEngine,
}

// ============================================================================
// Controller
// ============================================================================

/// Composition root of the feed: owns every source's cursor and item cache,
/// the request coordinator and the mutation engine.
///
/// Cheap to clone; clones share state. Internal locks are never held across
/// an await, so overlapping calls interleave at network boundaries only.
pub struct FeedController<A> {
    api: Arc<A>,
    coordinator: Arc<RequestCoordinator>,
    inner: Arc<Mutex<Inner>>,
    event_tx: Option<mpsc::Sender<FeedEvent>>,
}

impl<A> Clone for FeedController<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            coordinator: Arc::clone(&self.coordinator),
            inner: Arc::clone(&self.inner),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<A: FeedApi> FeedController<A> {
    pub fn new(
        api: A,
        current_user: Author,
        options: ControllerOptions,
        event_tx: Option<mpsc::Sender<FeedEvent>>,
    ) -> Self {
        let caches = SourceCaches::new(
            options.initial_source,
            options.page_size.max(1),
            options.retained_sources,
        );
        Self {
            api: Arc::new(api),
            coordinator: Arc::new(RequestCoordinator::new(
                options.coordinator,
                event_tx.clone(),
            )),
            inner: Arc::new(Mutex::new(Inner {
                caches,
                engine: MutationEngine::new(current_user),
            })),
            event_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: FeedEvent) {
        emit(self.event_tx.as_ref(), event);
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub fn source(&self) -> FeedSource {
        self.lock().caches.active
    }

    pub fn view(&self) -> FeedViewModel {
        let mut inner = self.lock();
        let source = inner.caches.active;
        let state = inner.caches.active_mut();
        FeedViewModel {
            source,
            items: Arc::clone(&state.items),
            phase: state.cursor.phase(),
            error: state.error.clone(),
            has_more: state.cursor.has_more(),
            has_more_basis: state.cursor.has_more_basis(),
            page: state.cursor.page(),
        }
    }

    /// Active items of one achievement type, in feed order.
    pub fn items_of_type(&self, kind: AchievementKind) -> Vec<FeedItem> {
        self.view()
            .items
            .iter()
            .filter(|i| i.kind == kind)
            .cloned()
            .collect()
    }

    /// True while a mutation in `kind`'s lane is outstanding for the item.
    pub fn is_pending(&self, item_id: &Id, kind: MutationKind) -> bool {
        self.lock().engine.is_pending(item_id, kind)
    }

    pub fn pending_mutations(&self) -> Vec<MutationIntent> {
        self.lock().engine.intents().cloned().collect()
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Make `source` active and reload its first page.
    ///
    /// Any fetch still outstanding on the previous source is superseded.
    /// The new source keeps showing its previously cached items until the
    /// fresh page replaces them.
    pub async fn switch_source(&self, source: FeedSource) -> Result<(), FeedError> {
        let generation = {
            let mut inner = self.lock();
            let previous = inner.caches.active;
            if previous != source {
                self.coordinator.cancel(&previous.channel_key());
                if let Some(prev) = inner.caches.get_mut(previous) {
                    prev.cursor.abandon_in_flight();
                }
                tracing::debug!(from = %previous, to = %source, "Switching feed source");
            }
            let generation = self.coordinator.cancel(&source.channel_key());
            let state = inner.caches.activate(source);
            state.error = None;
            state.cursor.begin_initial();
            generation
        };
        self.notify(FeedEvent::ItemsChanged { source });
        self.fetch(source, 1, MergeMode::Replace, generation).await
    }

    /// Reload page 1 of the current source, replacing its items.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        let source = self.source();
        self.switch_source(source).await
    }

    /// Fetch the next page of the current source.
    ///
    /// A no-op while a fetch is outstanding or once the source is exhausted.
    pub async fn load_more(&self) -> Result<(), FeedError> {
        let (source, page, generation) = {
            let mut inner = self.lock();
            let source = inner.caches.active;
            let state = inner.caches.active_mut();
            let Some(page) = state.cursor.begin_next() else {
                tracing::trace!(%source, phase = ?state.cursor.phase(), has_more = state.cursor.has_more(), "load_more ignored");
                return Ok(());
            };
            state.error = None;
            (source, page, self.coordinator.generation(&source.channel_key()))
        };
        self.notify(FeedEvent::ItemsChanged { source });

        let mode = if page == 1 {
            MergeMode::Replace
        } else {
            MergeMode::Append
        };
        self.fetch(source, page, mode, generation).await
    }

    async fn fetch(
        &self,
        source: FeedSource,
        page: u32,
        mode: MergeMode,
        generation: u64,
    ) -> Result<(), FeedError> {
        let key = source.channel_key();
        let page_size = self.lock().caches.page_size;
        tracing::debug!(%source, page, page_size, ?mode, "Fetching feed page");

        let api = Arc::clone(&self.api);
        let result = self
            .coordinator
            .execute_at(&key, generation, move || {
                let api = Arc::clone(&api);
                async move { api.fetch_page(source, page, page_size).await }
            })
            .await;

        let mut inner = self.lock();
        if !self.coordinator.is_current(&key, generation) {
            tracing::debug!(%source, page, generation, "Discarding stale page result");
            return Err(FeedError::Superseded);
        }
        let Some(state) = inner.caches.get_mut(source) else {
            return Err(FeedError::Superseded);
        };

        match result {
            Ok(flight) => {
                let Page { items, pagination } = flight.value;
                let received = items.len();
                state.items = Arc::new(merge(&state.items, items, mode));
                state.cursor.complete(page, received, pagination.as_ref());
                state.error = None;
                tracing::debug!(
                    %source,
                    page,
                    received,
                    total = state.items.len(),
                    has_more = state.cursor.has_more(),
                    "Feed page merged"
                );
                drop(inner);
                self.notify(FeedEvent::PageLoaded {
                    source,
                    page,
                    received,
                });
                self.notify(FeedEvent::ItemsChanged { source });
                Ok(())
            }
            Err(FeedError::Superseded) => Err(FeedError::Superseded),
            Err(FeedError::Busy) => {
                state.cursor.abandon(page);
                Err(FeedError::Busy)
            }
            Err(e) => {
                tracing::warn!(%source, page, error = %e, "Feed page fetch failed");
                state.cursor.fail(page);
                state.error = Some(e.to_string());
                drop(inner);
                self.notify(FeedEvent::ItemsChanged { source });
                Err(e)
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Like or unlike an item, whichever flips its current state.
    ///
    /// Returns [`FeedError::Busy`] while a previous toggle on the same item
    /// is unresolved.
    pub async fn toggle_like(&self, item_id: &Id) -> Result<(), FeedError> {
        let ticket = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.engine.begin_toggle_like(&mut inner.caches, item_id)?
        };
        self.items_changed();

        let result = match ticket.kind {
            MutationKind::Unlike => self.api.unlike(item_id).await,
            _ => self.api.like(item_id).await,
        };

        let kind = ticket.kind;
        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.engine.settle_like(&mut inner.caches, ticket, result)
        };
        self.settled(item_id, kind, &outcome);
        outcome
    }

    /// Post a comment, showing it immediately under a pending id.
    ///
    /// Returns the server's comment. If the pending comment was deleted
    /// before the server answered, returns [`FeedError::Superseded`] and
    /// removes the server copy with a follow-up delete.
    pub async fn add_comment(&self, item_id: &Id, text: &str) -> Result<Comment, FeedError> {
        let ticket = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.engine.begin_add_comment(&mut inner.caches, item_id, text)?
        };
        self.items_changed();

        let result = self.api.add_comment(&ticket.item_id, &ticket.text).await;

        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.engine.settle_add_comment(&mut inner.caches, ticket, result)
        };

        let outcome = match outcome {
            Ok(AddSettlement::Added(comment)) => Ok(comment),
            Ok(AddSettlement::Cancelled { orphan }) => {
                if let Some(orphan) = orphan {
                    match self.api.delete_comment(&orphan).await {
                        Ok(resp) if resp.success => {
                            tracing::debug!(comment = %orphan, "Deleted comment cancelled while pending");
                        }
                        Ok(_) => {
                            tracing::warn!(comment = %orphan, "Server refused to delete cancelled comment");
                        }
                        Err(e) => {
                            tracing::warn!(comment = %orphan, error = %e, "Failed to delete cancelled comment");
                        }
                    }
                }
                Err(FeedError::Superseded)
            }
            Err(e) => Err(e),
        };
        self.settled(item_id, MutationKind::AddComment, &outcome);
        outcome
    }

    /// Delete a comment optimistically. Pending comments are removed locally.
    pub async fn delete_comment(
        &self,
        item_id: &Id,
        comment_id: &CommentId,
    ) -> Result<(), FeedError> {
        let plan = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner
                .engine
                .begin_delete_comment(&mut inner.caches, item_id, comment_id)?
        };
        self.items_changed();

        let ticket = match plan {
            DeletePlan::Local => return Ok(()),
            DeletePlan::Remote(ticket) => ticket,
        };

        let result = self.api.delete_comment(&ticket.comment_id).await;

        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner
                .engine
                .settle_delete_comment(&mut inner.caches, ticket, result)
        };
        self.settled(item_id, MutationKind::DeleteComment, &outcome);
        outcome
    }

    /// Apply an authoritative item pushed by the server to every cached copy.
    ///
    /// Idempotent: delivering the same state twice leaves the cache as after
    /// the first delivery.
    pub fn apply_server_item(&self, item: &FeedItem) {
        let touched = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.engine.apply_server_item(&mut inner.caches, item)
        };
        tracing::debug!(item = %item.id, touched, "Applied server item update");
        if touched > 0 {
            self.items_changed();
        }
    }

    fn items_changed(&self) {
        let source = self.source();
        self.notify(FeedEvent::ItemsChanged { source });
    }

    /// Emit change/failure notifications after a mutation resolves. Failures
    /// never touch the feed-level `error`.
    fn settled<T>(&self, item_id: &Id, kind: MutationKind, outcome: &Result<T, FeedError>) {
        self.items_changed();
        if let Err(e) = outcome {
            if !e.is_silent() {
                self.notify(FeedEvent::MutationFailed {
                    action: kind.action(),
                    item_id: item_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
}
