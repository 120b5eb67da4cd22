//! Download archived media into a flat data directory, with a plain-text
//! metadata file per post.

pub mod error;
pub mod file;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use self::error::DownloadError;
use crate::retry::RetryConfig;
use crate::state::{ArchiveDb, MediaRow, MediaType, PostRow};

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub directory: PathBuf,
    pub skip_metadata_files: bool,
    /// Empty `directory` before downloading.
    pub clean_directory: bool,
    pub concurrent_downloads: usize,
    pub no_progress_bar: bool,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub download_path: PathBuf,
}

/// Everything needed to materialize one post on disk.
#[derive(Debug, Clone)]
pub struct PostPlan {
    pub post_id: String,
    pub artist: String,
    pub text: String,
    /// Every file belonging to the post, including ones already on disk.
    pub filenames: Vec<String>,
    /// Only the files still missing.
    pub tasks: Vec<DownloadTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub posts: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Photo posts keep every row; video and gif posts keep only the
/// highest-bitrate rendition (the first one on ties).
pub fn select_media(media: &[MediaRow]) -> Vec<&MediaRow> {
    if media.iter().any(|m| m.media_type == MediaType::Photo) {
        return media.iter().collect();
    }
    let Some(mut best) = media.first() else {
        return Vec::new();
    };
    for m in media {
        if m.bitrate > best.bitrate {
            best = m;
        }
    }
    vec![best]
}

pub fn plan_post(
    post: &PostRow,
    media: &[MediaRow],
    directory: &Path,
) -> Result<Option<PostPlan>, DownloadError> {
    let selected = select_media(media);
    if selected.is_empty() {
        return Ok(None);
    }

    let mut filenames: Vec<String> = Vec::with_capacity(selected.len());
    let mut tasks = Vec::new();
    for m in selected {
        let name = file::filename_for(&m.url)?;
        if filenames.contains(&name) {
            continue;
        }
        let download_path = directory.join(&name);
        if download_path.exists() {
            tracing::debug!("File {} already exists, skipping", download_path.display());
        } else {
            tasks.push(DownloadTask {
                url: m.url.clone(),
                download_path,
            });
        }
        filenames.push(name);
    }

    Ok(Some(PostPlan {
        post_id: post.id.clone(),
        artist: post.account_username.clone().unwrap_or_default(),
        text: post.text.clone().unwrap_or_default(),
        filenames,
        tasks,
    }))
}

/// `<file1>__<file2>.txt`
pub fn metadata_filename(filenames: &[String]) -> String {
    format!("{}.txt", filenames.join("__"))
}

pub fn metadata_contents(plan: &PostPlan) -> String {
    format!(
        "post id: {}\nartist: {}\ntext:\n{}\n\n\nfiles: {}",
        plan.post_id,
        plan.artist,
        plan.text,
        plan.filenames.join(", ")
    )
}

/// Hidden when disabled or when stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    pb
}

async fn prepare_directory(directory: &Path, clean: bool) -> std::io::Result<()> {
    if clean && directory.exists() {
        tracing::info!("Cleaning {}", directory.display());
        tokio::fs::remove_dir_all(directory).await?;
    }
    tokio::fs::create_dir_all(directory).await
}

/// Download every archived post's media into `config.directory`.
///
/// A failing post is logged and counted; the others carry on. A shutdown
/// request stops new posts from starting.
pub async fn download_archive(
    client: &Client,
    db: &dyn ArchiveDb,
    config: &DownloadConfig,
    shutdown_token: CancellationToken,
) -> Result<DownloadSummary> {
    let started = Instant::now();
    prepare_directory(&config.directory, config.clean_directory).await?;

    let posts = db.posts_with_media().await?;
    let pb = create_progress_bar(config.no_progress_bar, posts.len() as u64);
    let mut summary = DownloadSummary::default();

    let mut plans = Vec::with_capacity(posts.len());
    for (post, media) in &posts {
        match plan_post(post, media, &config.directory) {
            Ok(Some(plan)) => plans.push(plan),
            Ok(None) => pb.inc(1),
            Err(e) => {
                pb.suspend(|| tracing::error!(post_id = %post.id, "Skipping post: {}", e));
                summary.failed += 1;
                pb.inc(1);
            }
        }
    }

    let results = stream::iter(plans)
        .take_while(|_| std::future::ready(!shutdown_token.is_cancelled()))
        .map(|plan| async move {
            let result = download_post(client, &plan, config).await;
            (plan, result)
        })
        .buffer_unordered(config.concurrent_downloads.max(1));
    tokio::pin!(results);

    while let Some((plan, result)) = results.next().await {
        pb.set_message(plan.post_id.clone());
        summary.posts += 1;
        summary.skipped += plan.filenames.len() - plan.tasks.len();
        match result {
            Ok(count) => summary.downloaded += count,
            Err(e) => {
                pb.suspend(|| {
                    tracing::error!(post_id = %plan.post_id, "Download failed: {}", e);
                });
                summary.failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if shutdown_token.is_cancelled() {
        tracing::info!("Shutdown requested, stopped starting new downloads");
    }
    tracing::info!("── Summary ──");
    tracing::info!(
        "  {} posts, {} files downloaded, {} already present, {} failed",
        summary.posts,
        summary.downloaded,
        summary.skipped,
        summary.failed
    );
    tracing::info!("  destination: {}", config.directory.display());
    tracing::info!("  elapsed: {}", format_duration(started.elapsed()));

    Ok(summary)
}

/// Fetch a post's missing files in order, then write its metadata file.
async fn download_post(
    client: &Client,
    plan: &PostPlan,
    config: &DownloadConfig,
) -> Result<usize, DownloadError> {
    tracing::debug!("Downloading post: {}", plan.post_id);
    for task in &plan.tasks {
        let bytes =
            file::download_file(client, &task.url, &task.download_path, &config.retry).await?;
        tracing::debug!(
            size_bytes = bytes,
            path = %task.download_path.display(),
            "downloaded",
        );
    }

    if !config.skip_metadata_files {
        tracing::debug!("Writing metadata for files: {}", plan.filenames.join(", "));
        tokio::fs::write(
            config.directory.join(metadata_filename(&plan.filenames)),
            metadata_contents(plan),
        )
        .await?;
    }

    Ok(plan.tasks.len())
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
