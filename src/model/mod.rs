//! Feed entities and the logical JSON shapes exchanged with the backend.

mod item;
mod page;

pub use item::{AchievementKind, Author, Comment, CommentId, FeedItem, Id};
pub use page::{
    AddCommentResponse, DeleteCommentResponse, FeedSource, LikeResponse, Page, Pagination,
};
