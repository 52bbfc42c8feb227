//! Scripted in-memory backend shared by the integration tests.
//!
//! Replies are queued per operation and consumed in order. A gated reply
//! holds the call open until the test sends its result, which is how the
//! tests interleave overlapping requests deterministically.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use feedline::api::{ApiError, FeedApi};
use feedline::model::{
    AchievementKind, AddCommentResponse, Author, Comment, CommentId, DeleteCommentResponse,
    FeedItem, FeedSource, Id, LikeResponse, Page, Pagination,
};

/// A call observed by the scripted backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchPage {
        source: FeedSource,
        page: u32,
        page_size: u32,
    },
    Like(Id),
    Unlike(Id),
    AddComment(Id, String),
    DeleteComment(Id),
}

enum Reply<T> {
    Ready(Result<T, ApiError>),
    Gated(oneshot::Receiver<Result<T, ApiError>>),
}

impl<T> Reply<T> {
    async fn resolve(self) -> Result<T, ApiError> {
        match self {
            Reply::Ready(result) => result,
            Reply::Gated(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::Network("gate dropped".into()))),
        }
    }
}

#[derive(Default)]
struct Script {
    pages: HashMap<(FeedSource, u32), VecDeque<Reply<Page>>>,
    likes: VecDeque<Reply<LikeResponse>>,
    comments: VecDeque<Reply<AddCommentResponse>>,
    deletes: VecDeque<Reply<DeleteCommentResponse>>,
    calls: Vec<Call>,
}

/// Cloneable handle; clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
}

/// Sender side of a gated reply.
pub type Gate<T> = oneshot::Sender<Result<T, ApiError>>;

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::FetchPage { .. }))
            .count()
    }

    pub fn page(&self, source: FeedSource, page: u32, result: Result<Page, ApiError>) {
        self.script()
            .pages
            .entry((source, page))
            .or_default()
            .push_back(Reply::Ready(result));
    }

    pub fn gated_page(&self, source: FeedSource, page: u32) -> Gate<Page> {
        let (tx, rx) = oneshot::channel();
        self.script()
            .pages
            .entry((source, page))
            .or_default()
            .push_back(Reply::Gated(rx));
        tx
    }

    pub fn like_reply(&self, result: Result<LikeResponse, ApiError>) {
        self.script().likes.push_back(Reply::Ready(result));
    }

    pub fn gated_like(&self) -> Gate<LikeResponse> {
        let (tx, rx) = oneshot::channel();
        self.script().likes.push_back(Reply::Gated(rx));
        tx
    }

    pub fn comment_reply(&self, result: Result<AddCommentResponse, ApiError>) {
        self.script().comments.push_back(Reply::Ready(result));
    }

    pub fn gated_comment(&self) -> Gate<AddCommentResponse> {
        let (tx, rx) = oneshot::channel();
        self.script().comments.push_back(Reply::Gated(rx));
        tx
    }

    pub fn delete_reply(&self, result: Result<DeleteCommentResponse, ApiError>) {
        self.script().deletes.push_back(Reply::Ready(result));
    }

    fn unscripted<T>() -> Reply<T> {
        Reply::Ready(Err(ApiError::Network("no scripted reply".into())))
    }
}

impl FeedApi for ScriptedApi {
    async fn fetch_page(
        &self,
        source: FeedSource,
        page: u32,
        page_size: u32,
    ) -> Result<Page, ApiError> {
        let reply = {
            let mut script = self.script();
            script.calls.push(Call::FetchPage {
                source,
                page,
                page_size,
            });
            script
                .pages
                .get_mut(&(source, page))
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(Self::unscripted)
        };
        reply.resolve().await
    }

    async fn like(&self, item_id: &Id) -> Result<LikeResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script.calls.push(Call::Like(item_id.clone()));
            script.likes.pop_front().unwrap_or_else(Self::unscripted)
        };
        reply.resolve().await
    }

    async fn unlike(&self, item_id: &Id) -> Result<LikeResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script.calls.push(Call::Unlike(item_id.clone()));
            script.likes.pop_front().unwrap_or_else(Self::unscripted)
        };
        reply.resolve().await
    }

    async fn add_comment(&self, item_id: &Id, text: &str) -> Result<AddCommentResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script
                .calls
                .push(Call::AddComment(item_id.clone(), text.to_string()));
            script.comments.pop_front().unwrap_or_else(Self::unscripted)
        };
        reply.resolve().await
    }

    async fn delete_comment(&self, comment_id: &Id) -> Result<DeleteCommentResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script.calls.push(Call::DeleteComment(comment_id.clone()));
            script.deletes.pop_front().unwrap_or_else(Self::unscripted)
        };
        reply.resolve().await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn user(id: &str) -> Author {
    Author {
        id: Id::from(id),
        first_name: "Test".into(),
        last_name: id.to_uppercase(),
        avatar_url: None,
    }
}

pub fn me() -> Author {
    user("me")
}

pub fn item(id: &str) -> FeedItem {
    item_by(id, "owner")
}

pub fn item_by(id: &str, author: &str) -> FeedItem {
    FeedItem {
        id: Id::from(id),
        kind: AchievementKind::Project,
        author: user(author),
        title: format!("Achievement {id}"),
        description: None,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        like_count: 0,
        is_liked_by_current_user: false,
        likes: Some(Vec::new()),
        comment_count: 0,
        comments: Vec::new(),
    }
}

pub fn comment(id: &str, author: &str, content: &str) -> Comment {
    Comment {
        id: CommentId::from(id),
        author: user(author),
        content: content.into(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap(),
    }
}

pub fn page(items: Vec<FeedItem>, current: u32, last: u32) -> Page {
    Page {
        items,
        pagination: Some(Pagination {
            current_page: current,
            last_page: Some(last),
            total: None,
        }),
    }
}

pub fn ids(items: &[FeedItem]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}
