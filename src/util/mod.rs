//! Utility functions for common operations.
//!
//! # Examples
//!
//! ```
//! use feedline::util::validate_base_url;
//!
//! let base = validate_base_url("https://api.example.com/").unwrap();
//! assert_eq!(base, "https://api.example.com");
//! ```

mod url_validator;

pub use url_validator::{validate_base_url, UrlValidationError};
