use std::fmt;
use thiserror::Error;

use crate::api::ApiError;
use crate::model::{CommentId, Id};

/// User action named in failure messages ("Failed to like achievement").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    LoadFeed,
    Like,
    Unlike,
    AddComment,
    DeleteComment,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::LoadFeed => "load achievements",
            Action::Like => "like achievement",
            Action::Unlike => "unlike achievement",
            Action::AddComment => "add comment",
            Action::DeleteComment => "delete comment",
        })
    }
}

/// Rejections raised before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Comment text cannot be empty")]
    EmptyComment,
    #[error("Achievement {0} is not loaded")]
    UnknownItem(Id),
    #[error("Comment {0} not found")]
    UnknownComment(CommentId),
    #[error("Only the achievement owner or the comment author can delete this comment")]
    NotPermitted,
}

/// Errors surfaced by the feed controller and its components.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// An equivalent operation is already in flight. Callers should render
    /// this as a disabled control, not an error message.
    #[error("Operation already in progress")]
    Busy,
    /// Backoff retries were exhausted on a rate-limited request.
    #[error("Server busy, try again shortly")]
    RateLimited { attempts: u32 },
    /// Any other network or server failure.
    #[error("Failed to {action}: {source}")]
    Request {
        action: Action,
        #[source]
        source: ApiError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The request was cancelled by a newer one on the same channel; its
    /// result was discarded.
    #[error("Request superseded")]
    Superseded,
}

impl FeedError {
    pub(crate) fn request(action: Action, source: ApiError) -> Self {
        if source.is_rate_limited() {
            return FeedError::RateLimited { attempts: 1 };
        }
        FeedError::Request { action, source }
    }

    /// Errors that the UI should absorb silently.
    pub fn is_silent(&self) -> bool {
        matches!(self, FeedError::Busy | FeedError::Superseded)
    }

    /// True if retrying the same user action may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::RateLimited { .. } | FeedError::Busy => true,
            FeedError::Request { source, .. } => match source {
                ApiError::Status(code) => *code >= 500,
                ApiError::Timeout | ApiError::Network(_) => true,
                _ => false,
            },
            FeedError::Validation(_) | FeedError::Superseded => false,
        }
    }
}
