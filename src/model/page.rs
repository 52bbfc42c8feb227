use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::item::{Author, Comment, FeedItem};

/// One of the interchangeable feeds, each paginated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    All,
    Connections,
    Popular,
    Mine,
}

impl FeedSource {
    pub const ALL_SOURCES: [FeedSource; 4] = [
        FeedSource::All,
        FeedSource::Connections,
        FeedSource::Popular,
        FeedSource::Mine,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedSource::All => "all",
            FeedSource::Connections => "connections",
            FeedSource::Popular => "popular",
            FeedSource::Mine => "mine",
        }
    }

    /// Request line used by the coordinator for this source's page fetches.
    pub fn channel_key(self) -> String {
        format!("feed:{}", self.as_str())
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FeedSource::All),
            "connections" => Ok(FeedSource::Connections),
            "popular" => Ok(FeedSource::Popular),
            "mine" => Ok(FeedSource::Mine),
            other => Err(format!(
                "unknown feed source '{other}' (expected all, connections, popular or mine)"
            )),
        }
    }
}

/// Server pagination metadata, when the backend supplies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(alias = "current_page")]
    pub current_page: u32,
    #[serde(default, alias = "last_page")]
    pub last_page: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// A single server response for one page of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(alias = "data")]
    pub items: Vec<FeedItem>,
    #[serde(default, alias = "meta")]
    pub pagination: Option<Pagination>,
}

/// Like/unlike response. Every field is optional; whatever is present is
/// authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub likes: Option<Vec<Author>>,
    #[serde(default, alias = "isLikedByCurrentUser")]
    pub is_liked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentResponse {
    pub comment: Comment,
    #[serde(default)]
    pub comment_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentResponse {
    pub success: bool,
    #[serde(default)]
    pub comment_count: Option<u64>,
}
