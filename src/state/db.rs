//! Archive database trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    mark_table, ArchiveSummary, MediaRow, MediaType, PostRow, SyncRunStats, WriteOutcome,
};
use crate::types::Collection;

/// Archive store used by the reconciliation engine and the download command.
///
/// Every write is committed on its own. Per-record constraint violations come
/// back as a [`WriteOutcome`]; only store-level failures are errors.
#[async_trait]
pub trait ArchiveDb: Send + Sync {
    /// Insert a post. An existing id yields `WriteOutcome::Conflict`.
    async fn insert_post(&self, post: &PostRow) -> Result<WriteOutcome, StateError>;

    /// Whether an engagement mark of `kind` exists for `post_id`.
    async fn has_mark(&self, kind: Collection, post_id: &str) -> Result<bool, StateError>;

    /// Insert an engagement mark without checking for an existing one.
    async fn insert_mark(&self, kind: Collection, post_id: &str)
        -> Result<WriteOutcome, StateError>;

    /// Insert one media row (one photo or one video/gif variant).
    async fn insert_media(&self, media: &MediaRow) -> Result<WriteOutcome, StateError>;

    /// Every post that has at least one media row, with its rows.
    async fn posts_with_media(&self) -> Result<Vec<(PostRow, Vec<MediaRow>)>, StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, StateError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;

    /// Row counts plus the most recent sync run.
    async fn get_summary(&self) -> Result<ArchiveSummary, StateError>;
}

/// SQLite implementation of the archive database.
pub struct SqliteArchiveDb {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteArchiveDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteArchiveDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteArchiveDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    /// Run an INSERT and turn constraint violations into outcomes.
    fn insert(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<WriteOutcome, StateError> {
        let conn = self.lock()?;
        match conn.execute(sql, params) {
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(e) => WriteOutcome::from_constraint(e).map_err(StateError::query),
        }
    }
}

#[async_trait]
impl ArchiveDb for SqliteArchiveDb {
    async fn insert_post(&self, post: &PostRow) -> Result<WriteOutcome, StateError> {
        self.insert(
            "INSERT INTO post (id, account_username, text) VALUES (?1, ?2, ?3)",
            rusqlite::params![&post.id, &post.account_username, &post.text],
        )
    }

    async fn has_mark(&self, kind: Collection, post_id: &str) -> Result<bool, StateError> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                &format!("SELECT post_id FROM {} WHERE post_id = ?1", mark_table(kind)),
                [post_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        Ok(found.is_some())
    }

    async fn insert_mark(
        &self,
        kind: Collection,
        post_id: &str,
    ) -> Result<WriteOutcome, StateError> {
        self.insert(
            &format!("INSERT INTO {} (post_id) VALUES (?1)", mark_table(kind)),
            [post_id],
        )
    }

    async fn insert_media(&self, media: &MediaRow) -> Result<WriteOutcome, StateError> {
        self.insert(
            "INSERT INTO media (id, url, alt_text, type, bitrate, post_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &media.id,
                &media.url,
                &media.alt_text,
                media.media_type.as_str(),
                media.bitrate as i64,
                &media.post_id,
            ],
        )
    }

    async fn posts_with_media(&self) -> Result<Vec<(PostRow, Vec<MediaRow>)>, StateError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.account_username, p.text, m.id, m.url, m.alt_text, m.type, m.bitrate \
                 FROM post p JOIN media m ON m.post_id = p.id \
                 ORDER BY p.id, m.rowid",
            )
            .map_err(StateError::query)?;

        let rows = stmt
            .query_map([], |row| {
                let post = PostRow {
                    id: row.get(0)?,
                    account_username: row.get(1)?,
                    text: row.get(2)?,
                };
                let type_str: String = row.get(6)?;
                let media = MediaRow {
                    id: row.get(3)?,
                    url: row.get(4)?,
                    alt_text: row.get(5)?,
                    media_type: MediaType::from_str(&type_str).unwrap_or(MediaType::Photo),
                    bitrate: row.get::<_, i64>(7)?.max(0) as u64,
                    post_id: post.id.clone(),
                };
                Ok((post, media))
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        let mut grouped: Vec<(PostRow, Vec<MediaRow>)> = Vec::new();
        for (post, media) in rows {
            match grouped.last_mut() {
                Some((last, items)) if last.id == post.id => items.push(media),
                _ => grouped.push((post, vec![media])),
            }
        }
        Ok(grouped)
    }

    async fn start_sync_run(&self) -> Result<i64, StateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, results_fetched = ?2, pages_fetched = ?3, errors = ?4, interrupted = ?5 WHERE id = ?6",
            rusqlite::params![
                Utc::now().timestamp(),
                stats.results_fetched as i64,
                stats.pages_fetched as i64,
                stats.errors as i64,
                stats.interrupted,
                run_id,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn get_summary(&self) -> Result<ArchiveSummary, StateError> {
        let conn = self.lock()?;

        let count = |table: &str| -> Result<u64, StateError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(StateError::query)
        };

        let mut summary = ArchiveSummary {
            posts: count("post")?,
            likes: count("likes")?,
            bookmarks: count("bookmarks")?,
            media_rows: count("media")?,
            ..Default::default()
        };

        let last_run: Option<(i64, Option<i64>, i64, i64, i64, bool)> = conn
            .query_row(
                "SELECT started_at, completed_at, results_fetched, pages_fetched, errors, interrupted \
                 FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?;

        if let Some((started, completed, fetched, pages, errors, interrupted)) = last_run {
            summary.last_sync_started = timestamp_to_datetime(started);
            summary.last_sync_completed = completed.and_then(timestamp_to_datetime);
            if completed.is_some() {
                summary.last_sync_stats = Some(SyncRunStats {
                    results_fetched: fetched as u64,
                    pages_fetched: pages as u64,
                    errors: errors as u64,
                    interrupted,
                });
            }
        }

        Ok(summary)
    }
}

fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("harrow_state_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn post(id: &str) -> PostRow {
        PostRow {
            id: id.to_string(),
            account_username: Some("artist".to_string()),
            text: Some(format!("post {}", id)),
        }
    }

    fn photo(key: &str, post_id: &str) -> MediaRow {
        MediaRow {
            id: key.to_string(),
            url: format!("https://pbs.example/{}.jpg", key),
            alt_text: None,
            media_type: MediaType::Photo,
            bitrate: 0,
            post_id: post_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = test_dir("open_creates");
        let db_path = dir.join("db.sqlite");
        let db = SqliteArchiveDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert_eq!(db.path(), db_path.as_path());
    }

    #[tokio::test]
    async fn test_duplicate_post_is_conflict() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        assert_eq!(db.insert_post(&post("1")).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(db.insert_post(&post("1")).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(db.get_summary().await.unwrap().posts, 1);
    }

    #[tokio::test]
    async fn test_post_without_username_is_accepted() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        let row = PostRow {
            id: "9".to_string(),
            account_username: None,
            text: None,
        };
        assert_eq!(db.insert_post(&row).await.unwrap(), WriteOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_marks_are_per_kind() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        assert!(!db.has_mark(Collection::Liked, "1").await.unwrap());

        db.insert_mark(Collection::Liked, "1").await.unwrap();
        assert!(db.has_mark(Collection::Liked, "1").await.unwrap());
        assert!(!db.has_mark(Collection::Bookmarked, "1").await.unwrap());

        assert_eq!(
            db.insert_mark(Collection::Liked, "1").await.unwrap(),
            WriteOutcome::Conflict
        );
        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.likes, 1);
        assert_eq!(summary.bookmarks, 0);
    }

    #[tokio::test]
    async fn test_media_variants_share_key() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        for (url, bitrate) in [("https://v/1.mp4", 256_000), ("https://v/2.mp4", 832_000)] {
            let row = MediaRow {
                id: "7_1".to_string(),
                url: url.to_string(),
                alt_text: Some("clip".to_string()),
                media_type: MediaType::Video,
                bitrate,
                post_id: "1".to_string(),
            };
            assert_eq!(db.insert_media(&row).await.unwrap(), WriteOutcome::Inserted);
        }
        assert_eq!(db.get_summary().await.unwrap().media_rows, 2);
    }

    #[tokio::test]
    async fn test_duplicate_media_row_is_conflict() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        let row = photo("3_1", "1");
        db.insert_media(&row).await.unwrap();
        assert_eq!(db.insert_media(&row).await.unwrap(), WriteOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_posts_with_media_groups_rows() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();
        db.insert_post(&post("1")).await.unwrap();
        db.insert_post(&post("2")).await.unwrap();
        db.insert_post(&post("3")).await.unwrap();
        db.insert_media(&photo("a", "1")).await.unwrap();
        db.insert_media(&photo("b", "1")).await.unwrap();
        db.insert_media(&photo("c", "2")).await.unwrap();

        let grouped = db.posts_with_media().await.unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0.id, "1");
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0.id, "2");
        assert_eq!(grouped[1].1[0].id, "c");
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle() {
        let db = SqliteArchiveDb::open_in_memory().unwrap();

        let run_id = db.start_sync_run().await.unwrap();
        assert!(run_id > 0);
        let summary = db.get_summary().await.unwrap();
        assert!(summary.last_sync_started.is_some());
        assert!(summary.last_sync_stats.is_none());

        let stats = SyncRunStats {
            results_fetched: 120,
            pages_fetched: 2,
            errors: 3,
            interrupted: false,
        };
        db.complete_sync_run(run_id, &stats).await.unwrap();

        let summary = db.get_summary().await.unwrap();
        assert!(summary.last_sync_completed.is_some());
        let last = summary.last_sync_stats.unwrap();
        assert_eq!(last.results_fetched, 120);
        assert_eq!(last.errors, 3);
        assert!(!last.interrupted);
    }
}
