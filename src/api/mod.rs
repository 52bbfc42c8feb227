//! The backend seam consumed by the feed controller.
//!
//! [`FeedApi`] is the logical contract (fetch a page, like/unlike, add and
//! delete comments). [`HttpFeedApi`] implements it against the REST backend;
//! tests substitute scripted in-memory implementations.

mod http;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::model::{
    AddCommentResponse, DeleteCommentResponse, FeedSource, Id, LikeResponse, Page,
};

pub use http::HttpFeedApi;

/// Failures reported by a [`FeedApi`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Server answered 429 Too Many Requests
    #[error("Rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
    /// Non-2xx HTTP status other than 429
    #[error("HTTP error: status {0}")]
    Status(u16),
    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,
    /// Connection, DNS or TLS failure
    #[error("Network error: {0}")]
    Network(String),
    /// Body could not be decoded into the expected shape
    #[error("Invalid response: {0}")]
    Decode(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Request completed but the server reported it did not apply it
    #[error("Server rejected the request")]
    Rejected,
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Logical operations of the achievement feed backend.
///
/// Transport details (URLs, headers, auth) belong to the implementation.
pub trait FeedApi: Send + Sync {
    fn fetch_page(
        &self,
        source: FeedSource,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    fn like(&self, item_id: &Id) -> impl Future<Output = Result<LikeResponse, ApiError>> + Send;

    fn unlike(&self, item_id: &Id)
        -> impl Future<Output = Result<LikeResponse, ApiError>> + Send;

    fn add_comment(
        &self,
        item_id: &Id,
        text: &str,
    ) -> impl Future<Output = Result<AddCommentResponse, ApiError>> + Send;

    fn delete_comment(
        &self,
        comment_id: &Id,
    ) -> impl Future<Output = Result<DeleteCommentResponse, ApiError>> + Send;
}
