//! Feed pagination and mutation cache.
//!
//! This module provides the core of the achievement feed:
//!
//! - **Coordination**: single-flight, throttled, cancellable page fetches
//!   with rate-limit backoff ([`RequestCoordinator`])
//! - **Merging**: order-preserving, de-duplicated page merges ([`merge`])
//! - **Pagination**: a per-source cursor state machine ([`PaginationCursor`])
//! - **Mutations**: optimistic likes and comments with reconciliation and
//!   rollback ([`MutationEngine`])
//! - **Composition**: [`FeedController`], which owns all of the above for
//!   one feed and hands presentation code a [`FeedViewModel`]
//!
//! # Example
//!
//! ```ignore
//! use feedline::feed::{ControllerOptions, FeedController};
//! use feedline::model::FeedSource;
//!
//! let feed = FeedController::new(api, current_user, ControllerOptions::default(), None);
//! feed.switch_source(FeedSource::Popular).await?;
//! feed.load_more().await?;
//! let view = feed.view();
//! ```

mod controller;
mod coordinator;
mod cursor;
mod error;
mod events;
mod merge;
mod mutation;

pub use controller::{ControllerOptions, FeedController, FeedViewModel};
pub use coordinator::{CoordinatorConfig, Flight, RequestCoordinator};
pub use cursor::{HasMoreBasis, PaginationCursor, Phase};
pub use error::{Action, FeedError, ValidationError};
pub use events::FeedEvent;
pub use merge::{merge, MergeMode};
pub use mutation::{
    AddSettlement, CommentTicket, CopyKey, DeletePlan, DeleteTicket, ItemStore, LikeTicket,
    MutationEngine, MutationIntent, MutationKind,
};
