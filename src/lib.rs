//! Paginated achievement feed with optimistic likes and comments.
//!
//! - [`api`]: the backend seam and its REST implementation
//! - [`feed`]: pagination, request coordination and the mutation cache
//! - [`model`]: wire and cache types
//! - [`config`]: `~/.config/feedline/config.toml`

pub mod api;
pub mod config;
pub mod feed;
pub mod model;
pub mod util;
