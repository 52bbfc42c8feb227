use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque server identifier.
///
/// The backend is inconsistent about whether ids are JSON strings or
/// integers, so both are accepted and normalized to a string. `Arc<str>`
/// keeps clones cheap since ids are copied into every set and intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Arc<str>);

impl Id {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self::new(value.to_string())
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Ok(Id::from(s)),
            Raw::Int(n) => Ok(Id::from(n)),
        }
    }
}

/// Identity of a comment in the local cache.
///
/// Comments synthesized by an in-flight `add_comment` carry a `Pending`
/// handle until the server assigns a durable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommentId {
    Durable(Id),
    Pending(u64),
}

impl CommentId {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommentId::Pending(_))
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentId::Durable(id) => write!(f, "{id}"),
            CommentId::Pending(n) => write!(f, "pending:{n}"),
        }
    }
}

impl From<Id> for CommentId {
    fn from(id: Id) -> Self {
        CommentId::Durable(id)
    }
}

impl From<&str> for CommentId {
    fn from(value: &str) -> Self {
        CommentId::Durable(Id::from(value))
    }
}

impl Serialize for CommentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// Anything arriving over the wire is durable by definition.
impl<'de> Deserialize<'de> for CommentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Id::deserialize(deserializer).map(CommentId::Durable)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Achievement category, used for client-side filtering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    Project,
    Job,
    Certificate,
    Award,
    Course,
    Publication,
    #[serde(other)]
    Other,
}

/// Denormalized user identity attached to posts, comments and likes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: Id,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Author {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub author: Author,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An achievement post as cached by the feed.
///
/// `like_count`/`is_liked_by_current_user` and `comment_count`/`comments`
/// are tracked independently: `likes` and `comments` may be partial or
/// absent, the counts are what the UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Id,
    #[serde(rename = "type")]
    pub kind: AchievementKind,
    pub author: Author,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default, alias = "isLiked")]
    pub is_liked_by_current_user: bool,
    #[serde(default)]
    pub likes: Option<Vec<Author>>,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl FeedItem {
    /// Position of a comment in the cached list.
    pub fn comment_position(&self, comment_id: &CommentId) -> Option<usize> {
        self.comments.iter().position(|c| &c.id == comment_id)
    }

    /// True if `user_id` appears in the cached likers list.
    ///
    /// Returns `None` when the list was never populated.
    pub fn liked_by(&self, user_id: &Id) -> Option<bool> {
        self.likes
            .as_ref()
            .map(|likes| likes.iter().any(|l| &l.id == user_id))
    }
}
