//! Optimistic mutations: apply locally, send, then reconcile or roll back.
//!
//! The engine never owns items. Every edit goes through an [`ItemStore`]
//! supplied by the controller, so the cache stays the single source of
//! truth. Each operation is split into a synchronous `begin_*` (validate,
//! snapshot, apply, register the intent) and a `settle_*` that consumes the
//! network result. The controller awaits the network call between the two
//! without holding any lock.
//!
//! Reconciliation always *sets* fields from authoritative server values,
//! never increments from them, so redelivered responses are harmless.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::error::{Action, FeedError, ValidationError};
use crate::api::ApiError;
use crate::model::{
    AddCommentResponse, Author, Comment, CommentId, DeleteCommentResponse, FeedItem, Id,
    LikeResponse,
};

/// Access to cached items, implemented by the controller's source caches.
pub trait ItemStore {
    /// The primary cached copy of an item (active source first).
    fn find_item(&self, id: &Id) -> Option<&FeedItem>;

    /// Apply `f` to every cached copy of the item, passing the copy's key.
    /// Returns the number of copies touched.
    fn update_copies<F: FnMut(CopyKey, &mut FeedItem)>(&mut self, id: &Id, f: F) -> usize;

    /// Apply `f` to every cached copy of the item. Returns the number of
    /// copies touched.
    fn update_item<F: FnMut(&mut FeedItem)>(&mut self, id: &Id, mut f: F) -> usize {
        self.update_copies(id, |_, item| f(item))
    }
}

/// Identifies one cached copy of an item within an [`ItemStore`]. Stable
/// while the copy stays cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CopyKey(pub u32);

/// Like fields of one cached copy, as they were before an optimistic toggle.
#[derive(Debug, Clone, PartialEq)]
struct LikeState {
    liked: bool,
    count: u64,
    likes: Option<Vec<Author>>,
}

impl LikeState {
    fn of(item: &FeedItem) -> Self {
        Self {
            liked: item.is_liked_by_current_user,
            count: item.like_count,
            likes: item.likes.clone(),
        }
    }

    fn restore(&self, item: &mut FeedItem) {
        item.is_liked_by_current_user = self.liked;
        item.like_count = self.count;
        item.likes = self.likes.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Unlike,
    AddComment,
    DeleteComment,
}

impl MutationKind {
    fn lane(self) -> Lane {
        match self {
            MutationKind::Like | MutationKind::Unlike => Lane::Like,
            MutationKind::AddComment => Lane::AddComment,
            MutationKind::DeleteComment => Lane::DeleteComment,
        }
    }

    pub fn action(self) -> Action {
        match self {
            MutationKind::Like => Action::Like,
            MutationKind::Unlike => Action::Unlike,
            MutationKind::AddComment => Action::AddComment,
            MutationKind::DeleteComment => Action::DeleteComment,
        }
    }
}

/// Like and Unlike share a lane: only one toggle per item at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    Like,
    AddComment,
    DeleteComment,
}

#[derive(Debug, Clone, PartialEq)]
enum IntentDetail {
    /// Per-copy like state to restore on failure.
    Like { undo: HashMap<CopyKey, LikeState> },
    AddComment { pending: u64, cancelled: bool },
    DeleteComment { comment: Comment, position: usize },
}

/// A pending optimistic change.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationIntent {
    pub kind: MutationKind,
    pub target: Id,
    /// The primary copy of the item before the change was applied.
    pub snapshot: FeedItem,
    pub submitted_at: DateTime<Utc>,
    detail: IntentDetail,
}

#[must_use = "a begun mutation must be settled"]
#[derive(Debug)]
pub struct LikeTicket {
    pub item_id: Id,
    pub kind: MutationKind,
}

#[must_use = "a begun mutation must be settled"]
#[derive(Debug)]
pub struct CommentTicket {
    pub item_id: Id,
    pub text: String,
    pending: u64,
}

impl CommentTicket {
    pub fn pending_id(&self) -> CommentId {
        CommentId::Pending(self.pending)
    }
}

#[must_use = "a begun mutation must be settled"]
#[derive(Debug)]
pub struct DeleteTicket {
    pub item_id: Id,
    pub comment_id: Id,
}

/// What deleting a comment requires after the local edit.
#[derive(Debug)]
pub enum DeletePlan {
    /// The comment was never persisted; removing it locally was enough.
    Local,
    /// The server must delete it; settle with the response.
    Remote(DeleteTicket),
}

/// Outcome of a successful add-comment settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum AddSettlement {
    Added(Comment),
    /// The pending comment was deleted locally before the server answered.
    /// `orphan` is the id the server created anyway, which should be
    /// deleted remotely.
    Cancelled { orphan: Option<Id> },
}

/// Owns the apply/reconcile/rollback template for likes and comments.
#[derive(Debug)]
pub struct MutationEngine {
    current_user: Author,
    pending: HashMap<(Id, Lane), MutationIntent>,
    next_pending_comment: u64,
}

impl MutationEngine {
    pub fn new(current_user: Author) -> Self {
        Self {
            current_user,
            pending: HashMap::new(),
            next_pending_comment: 1,
        }
    }

    pub fn current_user(&self) -> &Author {
        &self.current_user
    }

    /// True while a mutation of `kind`'s lane is outstanding for the item.
    /// Presentation uses this to disable the matching control.
    pub fn is_pending(&self, item_id: &Id, kind: MutationKind) -> bool {
        self.pending.contains_key(&(item_id.clone(), kind.lane()))
    }

    pub fn intents(&self) -> impl Iterator<Item = &MutationIntent> {
        self.pending.values()
    }

    fn ensure_lane_free(&self, item_id: &Id, kind: MutationKind) -> Result<(), FeedError> {
        if self.is_pending(item_id, kind) {
            tracing::debug!(item = %item_id, ?kind, "Mutation already pending, rejecting");
            return Err(FeedError::Busy);
        }
        Ok(())
    }

    fn register(&mut self, kind: MutationKind, snapshot: FeedItem, detail: IntentDetail) {
        let target = snapshot.id.clone();
        self.pending.insert(
            (target.clone(), kind.lane()),
            MutationIntent {
                kind,
                target,
                snapshot,
                submitted_at: Utc::now(),
                detail,
            },
        );
    }

    // ========================================================================
    // Likes
    // ========================================================================

    /// Flip the like state of an item optimistically.
    pub fn begin_toggle_like<S: ItemStore>(
        &mut self,
        store: &mut S,
        item_id: &Id,
    ) -> Result<LikeTicket, FeedError> {
        self.ensure_lane_free(item_id, MutationKind::Like)?;
        let snapshot = store
            .find_item(item_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownItem(item_id.clone()))?;

        let like = !snapshot.is_liked_by_current_user;
        let kind = if like {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        };
        let user = &self.current_user;
        let mut undo = HashMap::new();
        store.update_copies(item_id, |key, item| {
            undo.insert(key, LikeState::of(item));
            set_liked(item, user, like);
        });

        tracing::debug!(item = %item_id, like, copies = undo.len(), "Applied optimistic like toggle");
        self.register(kind, snapshot, IntentDetail::Like { undo });
        Ok(LikeTicket {
            item_id: item_id.clone(),
            kind,
        })
    }

    /// Reconcile a like toggle with the server result.
    ///
    /// Success overwrites whatever authoritative fields the response carries
    /// and keeps the optimistic values otherwise. Failure restores each cached
    /// copy to its own like state from before the toggle.
    pub fn settle_like<S: ItemStore>(
        &mut self,
        store: &mut S,
        ticket: LikeTicket,
        result: Result<LikeResponse, ApiError>,
    ) -> Result<(), FeedError> {
        let intent = self.pending.remove(&(ticket.item_id.clone(), Lane::Like));

        match result {
            Ok(response) => {
                let user = &self.current_user;
                store.update_item(&ticket.item_id, |item| {
                    apply_like_response(item, &response, user)
                });
                Ok(())
            }
            Err(e) => {
                if let Some(MutationIntent {
                    detail: IntentDetail::Like { undo },
                    ..
                }) = intent
                {
                    let mut restored = 0;
                    store.update_copies(&ticket.item_id, |key, item| {
                        if let Some(before) = undo.get(&key) {
                            before.restore(item);
                            restored += 1;
                        }
                    });
                    tracing::warn!(item = %ticket.item_id, error = %e, restored, "Like failed, rolled back");
                }
                Err(FeedError::request(ticket.kind.action(), e))
            }
        }
    }

    // ========================================================================
    // Comments
    // ========================================================================

    /// Append a synthesized comment while the real one is being created.
    pub fn begin_add_comment<S: ItemStore>(
        &mut self,
        store: &mut S,
        item_id: &Id,
        text: &str,
    ) -> Result<CommentTicket, FeedError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        self.ensure_lane_free(item_id, MutationKind::AddComment)?;
        let snapshot = store
            .find_item(item_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownItem(item_id.clone()))?;

        let pending = self.next_pending_comment;
        self.next_pending_comment += 1;
        let comment = Comment {
            id: CommentId::Pending(pending),
            author: self.current_user.clone(),
            content: text.to_string(),
            created_at: Utc::now(),
        };
        store.update_item(item_id, |item| {
            item.comments.push(comment.clone());
            item.comment_count += 1;
        });

        tracing::debug!(item = %item_id, pending, "Applied optimistic comment");
        self.register(
            MutationKind::AddComment,
            snapshot,
            IntentDetail::AddComment {
                pending,
                cancelled: false,
            },
        );
        Ok(CommentTicket {
            item_id: item_id.clone(),
            text: text.to_string(),
            pending,
        })
    }

    /// Swap the pending comment for the server's record, or remove it on
    /// failure.
    pub fn settle_add_comment<S: ItemStore>(
        &mut self,
        store: &mut S,
        ticket: CommentTicket,
        result: Result<AddCommentResponse, ApiError>,
    ) -> Result<AddSettlement, FeedError> {
        let cancelled = match self
            .pending
            .remove(&(ticket.item_id.clone(), Lane::AddComment))
        {
            Some(MutationIntent {
                detail: IntentDetail::AddComment { pending, cancelled },
                ..
            }) if pending == ticket.pending => cancelled,
            Some(other) => {
                // A different add occupies the lane; put it back untouched.
                self.pending
                    .insert((ticket.item_id.clone(), Lane::AddComment), other);
                false
            }
            None => false,
        };
        let pending_id = ticket.pending_id();

        if cancelled {
            let orphan = match result {
                Ok(response) => match response.comment.id {
                    CommentId::Durable(id) => Some(id),
                    CommentId::Pending(_) => None,
                },
                Err(_) => None,
            };
            tracing::debug!(item = %ticket.item_id, ?orphan, "Settled cancelled comment");
            return Ok(AddSettlement::Cancelled { orphan });
        }

        match result {
            Ok(response) => {
                let comment = response.comment;
                store.update_item(&ticket.item_id, |item| {
                    let already_present = item.comment_position(&comment.id).is_some();
                    match item.comment_position(&pending_id) {
                        Some(pos) if already_present => {
                            item.comments.remove(pos);
                        }
                        Some(pos) => item.comments[pos] = comment.clone(),
                        None if already_present => {}
                        None => {
                            item.comments.push(comment.clone());
                            item.comment_count =
                                item.comment_count.max(item.comments.len() as u64);
                        }
                    }
                    if let Some(count) = response.comment_count {
                        item.comment_count = count;
                    }
                });
                Ok(AddSettlement::Added(comment))
            }
            Err(e) => {
                let removed = store.update_item(&ticket.item_id, |item| {
                    if let Some(pos) = item.comment_position(&pending_id) {
                        item.comments.remove(pos);
                        item.comment_count = item.comment_count.saturating_sub(1);
                    }
                });
                tracing::warn!(item = %ticket.item_id, error = %e, removed, "Comment failed, rolled back");
                Err(FeedError::request(Action::AddComment, e))
            }
        }
    }

    /// Remove a comment optimistically.
    ///
    /// Only the achievement owner or the comment author may delete; the
    /// server still has the final word. A comment that is still pending is
    /// removed locally and its add is cancelled instead of calling the
    /// server.
    pub fn begin_delete_comment<S: ItemStore>(
        &mut self,
        store: &mut S,
        item_id: &Id,
        comment_id: &CommentId,
    ) -> Result<DeletePlan, FeedError> {
        let item = store
            .find_item(item_id)
            .ok_or_else(|| ValidationError::UnknownItem(item_id.clone()))?;
        let position = item
            .comment_position(comment_id)
            .ok_or_else(|| ValidationError::UnknownComment(comment_id.clone()))?;
        let comment = item.comments[position].clone();

        let user_id = &self.current_user.id;
        if &item.author.id != user_id && &comment.author.id != user_id {
            return Err(ValidationError::NotPermitted.into());
        }

        match comment_id {
            CommentId::Pending(n) => {
                store.update_item(item_id, |item| remove_comment(item, comment_id));
                if let Some(IntentDetail::AddComment { pending, cancelled }) = self
                    .pending
                    .get_mut(&(item_id.clone(), Lane::AddComment))
                    .map(|intent| &mut intent.detail)
                {
                    if *pending == *n {
                        *cancelled = true;
                    }
                }
                tracing::debug!(item = %item_id, pending = n, "Removed pending comment locally");
                Ok(DeletePlan::Local)
            }
            CommentId::Durable(id) => {
                self.ensure_lane_free(item_id, MutationKind::DeleteComment)?;
                let snapshot = item.clone();
                store.update_item(item_id, |item| remove_comment(item, comment_id));
                self.register(
                    MutationKind::DeleteComment,
                    snapshot,
                    IntentDetail::DeleteComment { comment, position },
                );
                Ok(DeletePlan::Remote(DeleteTicket {
                    item_id: item_id.clone(),
                    comment_id: id.clone(),
                }))
            }
        }
    }

    /// Confirm a comment deletion, or reinsert the comment at its original
    /// position if the server refused or failed.
    pub fn settle_delete_comment<S: ItemStore>(
        &mut self,
        store: &mut S,
        ticket: DeleteTicket,
        result: Result<DeleteCommentResponse, ApiError>,
    ) -> Result<(), FeedError> {
        let intent = self
            .pending
            .remove(&(ticket.item_id.clone(), Lane::DeleteComment));

        let error = match result {
            Ok(response) if response.success => {
                if let Some(count) = response.comment_count {
                    store.update_item(&ticket.item_id, |item| item.comment_count = count);
                }
                return Ok(());
            }
            Ok(_) => ApiError::Rejected,
            Err(e) => e,
        };

        if let Some(MutationIntent {
            detail: IntentDetail::DeleteComment { comment, position },
            ..
        }) = intent
        {
            let restored = store.update_item(&ticket.item_id, |item| {
                if item.comment_position(&comment.id).is_none() {
                    let at = position.min(item.comments.len());
                    item.comments.insert(at, comment.clone());
                    item.comment_count += 1;
                }
            });
            tracing::warn!(item = %ticket.item_id, error = %error, restored, "Comment delete failed, restored");
        }
        Err(FeedError::request(Action::DeleteComment, error))
    }

    // ========================================================================
    // Server pushes
    // ========================================================================

    /// Overwrite like and comment state of every cached copy with a pushed
    /// authoritative item. Pending local comments survive the overwrite.
    ///
    /// A like still in flight is re-based onto the pushed state, so a later
    /// failure rolls back to it rather than to the older snapshot.
    pub fn apply_server_item<S: ItemStore>(&mut self, store: &mut S, server: &FeedItem) -> usize {
        let pushed = LikeState::of(server);
        let mut pending_like = self.pending.get_mut(&(server.id.clone(), Lane::Like));
        if let Some(intent) = pending_like.as_deref_mut() {
            pushed.restore(&mut intent.snapshot);
        }
        store.update_copies(&server.id, |key, item| {
            if let Some(MutationIntent {
                detail: IntentDetail::Like { undo },
                ..
            }) = pending_like.as_deref_mut()
            {
                undo.insert(key, pushed.clone());
            }

            let local_pending: Vec<Comment> = item
                .comments
                .iter()
                .filter(|c| c.id.is_pending())
                .cloned()
                .collect();

            item.is_liked_by_current_user = server.is_liked_by_current_user;
            item.like_count = server.like_count;
            item.likes = server.likes.clone();
            item.comments = server.comments.clone();
            item.comment_count = server.comment_count + local_pending.len() as u64;
            item.comments.extend(local_pending);
        })
    }
}

/// Bring one cached copy to the requested like state, adjusting the count
/// by exactly one if the state changes.
fn set_liked(item: &mut FeedItem, user: &Author, like: bool) {
    if item.is_liked_by_current_user != like {
        item.is_liked_by_current_user = like;
        item.like_count = if like {
            item.like_count + 1
        } else {
            item.like_count.saturating_sub(1)
        };
    }
    splice_liker(item, user, like);
}

fn splice_liker(item: &mut FeedItem, user: &Author, like: bool) {
    if let Some(likes) = item.likes.as_mut() {
        let present = likes.iter().any(|a| a.id == user.id);
        if like && !present {
            likes.push(user.clone());
        } else if !like && present {
            likes.retain(|a| a.id != user.id);
        }
    }
}

fn apply_like_response(item: &mut FeedItem, response: &LikeResponse, user: &Author) {
    if let Some(liked) = response.is_liked {
        // Keeps the count consistent with the flag when no count is sent.
        if item.is_liked_by_current_user != liked {
            item.is_liked_by_current_user = liked;
            item.like_count = if liked {
                item.like_count + 1
            } else {
                item.like_count.saturating_sub(1)
            };
        }
    }
    if let Some(count) = response.like_count {
        item.like_count = count;
    }
    match &response.likes {
        Some(likes) => item.likes = Some(likes.clone()),
        None => splice_liker(item, user, item.is_liked_by_current_user),
    }
}

fn remove_comment(item: &mut FeedItem, comment_id: &CommentId) {
    if let Some(pos) = item.comment_position(comment_id) {
        item.comments.remove(pos);
        item.comment_count = item.comment_count.saturating_sub(1);
    }
}
