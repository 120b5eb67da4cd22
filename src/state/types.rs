//! Row types and write outcomes for the archive database.

use chrono::{DateTime, Utc};

use crate::types::Collection;

/// Media type as stored in the `media.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Photo,
    AnimatedGif,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::AnimatedGif => "animated_gif",
            Self::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "animated_gif" => Some(Self::AnimatedGif),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Table holding the engagement marks for a collection.
pub(crate) fn mark_table(kind: Collection) -> &'static str {
    match kind {
        Collection::Liked => "likes",
        Collection::Bookmarked => "bookmarks",
    }
}

/// A row of the `post` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRow {
    pub id: String,
    pub account_username: Option<String>,
    pub text: Option<String>,
}

/// A row of the `media` table. Videos and gifs produce one row per variant,
/// all sharing `id`, `alt_text` and `media_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRow {
    pub id: String,
    pub url: String,
    pub alt_text: Option<String>,
    pub media_type: MediaType,
    pub bitrate: u64,
    pub post_id: String,
}

/// What happened to a single archive write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new row was written.
    Inserted,
    /// The existence check found the row already there; nothing written.
    AlreadyPresent,
    /// The write hit a primary-key or unique constraint.
    Conflict,
    /// The row was refused by another constraint (NOT NULL, CHECK, ...).
    Rejected(String),
}

impl WriteOutcome {
    /// Map a rusqlite error to a per-record outcome when it is a constraint
    /// violation. Anything else is a store failure and is returned unchanged.
    pub(crate) fn from_constraint(err: rusqlite::Error) -> Result<Self, rusqlite::Error> {
        use rusqlite::ffi;

        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                match e.extended_code {
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                        Ok(Self::Conflict)
                    }
                    _ => Ok(Self::Rejected(
                        msg.clone().unwrap_or_else(|| e.to_string()),
                    )),
                }
            }
            _ => Err(err),
        }
    }
}

/// Counters recorded for a finished sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub results_fetched: u64,
    pub pages_fetched: u64,
    pub errors: u64,
    pub interrupted: bool,
}

/// Summary of the archive's contents.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub posts: u64,
    pub likes: u64,
    pub bookmarks: u64,
    pub media_rows: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_sync_stats: Option<SyncRunStats>,
}
