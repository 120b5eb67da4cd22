//! Local relational archive.
//!
//! SQLite store holding archived posts, their engagement marks (likes and
//! bookmarks) and media rows, plus bookkeeping for sync runs.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{ArchiveDb, SqliteArchiveDb};
pub use error::StateError;
pub use types::{ArchiveSummary, MediaRow, MediaType, PostRow, SyncRunStats, WriteOutcome};
