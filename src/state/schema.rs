//! Archive schema and migrations.
//!
//! Version 1 is the layout the archive has always used (`post`, `likes`,
//! `bookmarks`, `media`). Version 2 adds run bookkeeping and the unique
//! indexes that make a racing duplicate mark or media row a conflict instead
//! of a second row.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS post (
    id TEXT NOT NULL PRIMARY KEY,
    account_username TEXT,
    text TEXT
);

CREATE TABLE IF NOT EXISTS likes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmarks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    alt_text TEXT,
    type TEXT NOT NULL,
    bitrate INTEGER NOT NULL,
    post_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_post_id ON media(post_id);
"#;

const SCHEMA_V2: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_post_id ON likes(post_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bookmarks_post_id ON bookmarks(post_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_media_key_url ON media(id, url);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    results_fetched INTEGER DEFAULT 0,
    pages_fetched INTEGER DEFAULT 0,
    errors INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema. Safe to call repeatedly.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        migrate_to_version(conn, version)?;
    }

    Ok(())
}

fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    match version {
        1 => conn.execute_batch(SCHEMA_V1)?,
        2 => {
            // Archives written before the unique indexes may hold duplicates.
            conn.execute_batch(
                r#"
                DELETE FROM likes WHERE id NOT IN (SELECT MIN(id) FROM likes GROUP BY post_id);
                DELETE FROM bookmarks WHERE id NOT IN (SELECT MIN(id) FROM bookmarks GROUP BY post_id);
                DELETE FROM media WHERE rowid NOT IN (SELECT MIN(rowid) FROM media GROUP BY id, url);
                "#,
            )?;
            conn.execute_batch(SCHEMA_V2)?;
        }
        other => {
            tracing::warn!("No migration defined for schema version {}", other);
        }
    }
    set_schema_version(conn, version)?;
    tracing::debug!("Migrated database to schema version {}", version);
    Ok(())
}
