//! Remote collection API: liked posts and bookmarks for one account.

pub mod client;
pub mod error;
pub mod pages;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use pages::{pages, PageOptions, PageSource};
pub use types::{MediaKind, Page, PostRecord};
