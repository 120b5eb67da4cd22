//! Reconciliation of collection pages into the archive.
//!
//! Each page is denormalized: posts reference their author and media by id,
//! and the referenced objects arrive in `includes`. Reconciliation resolves
//! those references and writes normalized rows. Writes are best-effort: a
//! failed or conflicting write is counted and processing carries on, so a
//! re-run over the same data leaves the archive unchanged and only raises
//! the conflict count.

use std::ops::AddAssign;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::{ArchiveDb, MediaRow, MediaType, PostRow, StateError, WriteOutcome};
use crate::types::Collection;
use crate::x::{pages, ApiError, MediaKind, Page, PageOptions, PageSource, PostRecord};

/// Running totals for an ingestion run. Returned from each stage and summed
/// by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Sum of `meta.result_count` over every page fetched.
    pub results_fetched: u64,
    pub pages_fetched: u64,
    pub posts_inserted: u64,
    pub marks_inserted: u64,
    pub media_inserted: u64,
    /// Duplicate posts, marks or media rows.
    pub conflicts: u64,
    /// Rows refused by validation or a non-key constraint.
    pub rejected: u64,
    /// Writes that failed for store-level reasons.
    pub store_failures: u64,
    /// Set when a shutdown request stopped the run between pages.
    pub interrupted: bool,
}

impl IngestReport {
    /// Recoverable per-record errors, the figure reported at the end of a run.
    pub fn errors(&self) -> u64 {
        self.conflicts + self.rejected + self.store_failures
    }

    fn record(&mut self, target: Target, result: Result<WriteOutcome, StateError>) {
        match result {
            Ok(WriteOutcome::Inserted) => match target {
                Target::Post => self.posts_inserted += 1,
                Target::Mark => self.marks_inserted += 1,
                Target::Media => self.media_inserted += 1,
            },
            Ok(WriteOutcome::AlreadyPresent) => {}
            Ok(WriteOutcome::Conflict) => self.conflicts += 1,
            Ok(WriteOutcome::Rejected(_)) => self.rejected += 1,
            Err(e) => {
                debug!(?target, "Archive write failed: {}", e);
                self.store_failures += 1;
            }
        }
    }
}

impl AddAssign for IngestReport {
    fn add_assign(&mut self, other: Self) {
        self.results_fetched += other.results_fetched;
        self.pages_fetched += other.pages_fetched;
        self.posts_inserted += other.posts_inserted;
        self.marks_inserted += other.marks_inserted;
        self.media_inserted += other.media_inserted;
        self.conflicts += other.conflicts;
        self.rejected += other.rejected;
        self.store_failures += other.store_failures;
        self.interrupted |= other.interrupted;
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Post,
    Mark,
    Media,
}

/// Write every post of `page`, its `kind` mark and its media.
pub async fn reconcile_page(db: &dyn ArchiveDb, page: &Page, kind: Collection) -> IngestReport {
    let mut report = IngestReport::default();

    for post in &page.data {
        let row = PostRow {
            id: post.id.clone(),
            account_username: page
                .includes
                .username_for(post.author_id.as_deref())
                .map(str::to_string),
            text: post.text.clone(),
        };
        report.record(Target::Post, db.insert_post(&row).await);

        report.record(Target::Mark, ensure_mark(db, kind, &post.id).await);

        reconcile_media(db, page, post, &mut report).await;
    }

    report
}

/// Insert a mark unless one exists. The lookup and insert are separate
/// statements; the unique index on the mark table catches a racing writer.
async fn ensure_mark(
    db: &dyn ArchiveDb,
    kind: Collection,
    post_id: &str,
) -> Result<WriteOutcome, StateError> {
    if db.has_mark(kind, post_id).await? {
        return Ok(WriteOutcome::AlreadyPresent);
    }
    db.insert_mark(kind, post_id).await
}

async fn reconcile_media(
    db: &dyn ArchiveDb,
    page: &Page,
    post: &PostRecord,
    report: &mut IngestReport,
) {
    for key in post.media_keys() {
        let Some(media) = page.includes.media(key) else {
            continue;
        };

        let (media_type, renditions): (MediaType, Vec<(Option<&str>, u64)>) = match &media.kind
        {
            MediaKind::Photo { url } => (MediaType::Photo, vec![(url.as_deref(), 0)]),
            MediaKind::AnimatedGif { variants } => (
                MediaType::AnimatedGif,
                variants
                    .iter()
                    .map(|v| (Some(v.url.as_str()), v.bit_rate.unwrap_or(0)))
                    .collect(),
            ),
            MediaKind::Video { variants } => (
                MediaType::Video,
                variants
                    .iter()
                    .map(|v| (Some(v.url.as_str()), v.bit_rate.unwrap_or(0)))
                    .collect(),
            ),
            MediaKind::Other(_) => continue,
        };

        for (url, bitrate) in renditions {
            let Some(url) = url else {
                report.record(
                    Target::Media,
                    Ok(WriteOutcome::Rejected(format!("media {} has no url", key))),
                );
                continue;
            };
            let row = MediaRow {
                id: media.media_key.clone(),
                url: url.to_string(),
                alt_text: media.alt_text.clone(),
                media_type,
                bitrate,
                post_id: post.id.clone(),
            };
            report.record(Target::Media, db.insert_media(&row).await);
        }
    }
}

/// Walk one collection from `start` to its last page, reconciling as it goes.
///
/// A page fetch that fails after retries aborts with the error; rows written
/// for earlier pages stay. A shutdown request is honoured between pages.
pub async fn ingest_collection(
    source: &dyn PageSource,
    db: &dyn ArchiveDb,
    collection: Collection,
    start: Option<String>,
    options: &PageOptions,
    shutdown: &CancellationToken,
) -> Result<IngestReport, ApiError> {
    let mut report = IngestReport::default();
    let stream = pages(source, collection, start, options);
    tokio::pin!(stream);

    while let Some(page) = stream.next().await {
        let page = page?;
        report.pages_fetched += 1;
        report.results_fetched += page.meta.result_count;

        info!(
            %collection,
            page = report.pages_fetched,
            results = page.meta.result_count,
            more = page.next_cursor().is_some(),
            "Fetched page"
        );
        debug!("{:#?}", page);
        for problem in &page.errors {
            debug!(
                title = problem.title.as_deref().unwrap_or(""),
                "Partial error in page: {}",
                problem.detail.as_deref().unwrap_or("")
            );
        }

        report += reconcile_page(db, &page, collection).await;

        if shutdown.is_cancelled() {
            warn!(%collection, cursor = ?page.next_cursor(), "Shutdown requested, stopping after this page");
            report.interrupted = true;
            break;
        }
    }

    Ok(report)
}

/// Ingest each requested collection in order and return the combined report.
pub async fn ingest_all(
    source: &dyn PageSource,
    db: &dyn ArchiveDb,
    collections: &[(Collection, Option<String>)],
    options: &PageOptions,
    shutdown: &CancellationToken,
) -> Result<IngestReport, ApiError> {
    let mut total = IngestReport::default();
    for (collection, start) in collections {
        let report =
            ingest_collection(source, db, *collection, start.clone(), options, shutdown).await?;
        info!(
            %collection,
            results = report.results_fetched,
            errors = report.errors(),
            "Collection done"
        );
        total += report;
        if total.interrupted {
            break;
        }
    }
    Ok(total)
}
