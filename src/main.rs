//! harrow: archive an X account's liked and bookmarked posts into SQLite.
//!
//! Authorization is OAuth2 with PKCE; the token set is cached next to the
//! database and refreshed on later runs. Each sync walks both collections
//! page by page and reconciles every page into the archive, counting
//! per-record failures instead of stopping on them. Archived media can then
//! be downloaded into a flat directory.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod download;
mod ingest;
pub mod retry;
mod shutdown;
mod state;
mod types;
mod x;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{AuthConfig, Paths};
use state::{ArchiveDb, ArchiveSummary, SyncRunStats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // CLIENT_ID / CLIENT_SECRET may come from a .env file
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let paths = Paths::resolve(cli.data_directory.as_deref())?;
    tracing::debug!(data_directory = %paths.data_directory.display(), "Resolved paths");

    match cli.effective_command() {
        Command::Sync(args) => run_sync(&paths, args).await,
        Command::AuthOnly(args) => run_auth_only(&paths, args).await,
        Command::Download(args) => run_download(&paths, args).await,
        Command::Status => run_status(&paths).await,
        Command::ResetState(args) => run_reset_state(&paths, args).await,
    }
}

/// Exclusive lock on the data directory, held until the returned file drops.
async fn acquire_lock(paths: &Paths) -> anyhow::Result<std::fs::File> {
    tokio::fs::create_dir_all(&paths.data_directory)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory: {}",
                paths.data_directory.display()
            )
        })?;

    let lock_path = paths.lock_file();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another harrow instance is using this data directory (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

fn http_client(timeout: Option<Duration>) -> anyhow::Result<reqwest::Client> {
    let mut builder =
        reqwest::Client::builder().user_agent(concat!("harrow/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Cached-token refresh or browser login, abandoned on shutdown.
async fn login(
    paths: &Paths,
    auth_config: &AuthConfig,
    http: reqwest::Client,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<auth::TokenSet> {
    let server = Arc::new(auth::OAuthClient::new(
        http,
        auth_config.client_id.clone(),
        auth_config.client_secret.clone(),
        &auth_config.endpoints,
    )?);
    let store = auth::TokenStore::new(paths.token_file());

    tokio::select! {
        result = auth::authorize(&store, server, &auth_config.login) => Ok(result?),
        _ = shutdown_token.cancelled() => anyhow::bail!("Interrupted before login completed"),
    }
}

async fn run_sync(paths: &Paths, args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::SyncConfig::from_args(&args)?;
    tracing::debug!(?config, "Sync configuration");
    let _lock = acquire_lock(paths).await?;
    let shutdown_token = shutdown::install_signal_handler()?;

    let http = http_client(Some(config.auth.http_timeout))?;
    let tokens = login(paths, &config.auth, http.clone(), &shutdown_token).await?;

    let db = state::SqliteArchiveDb::open(&paths.database()).await?;
    let client = x::ApiClient::connect(
        http,
        &config.auth.endpoints.api_base,
        &tokens.access_token,
        config.page_size,
    )
    .await
    .context("Failed to resolve the authenticated account")?;
    tracing::info!(
        user = %client.user().username,
        "Archiving into {}",
        db.path().display()
    );

    let run_id = db.start_sync_run().await?;
    let report = ingest::ingest_all(
        &client,
        &db,
        &config.collections,
        &config.pages,
        &shutdown_token,
    )
    .await
    .context("Sync aborted: a page could not be fetched")?;

    db.complete_sync_run(
        run_id,
        &SyncRunStats {
            results_fetched: report.results_fetched,
            pages_fetched: report.pages_fetched,
            errors: report.errors(),
            interrupted: report.interrupted,
        },
    )
    .await?;

    tracing::info!(
        posts = report.posts_inserted,
        marks = report.marks_inserted,
        media = report.media_inserted,
        conflicts = report.conflicts,
        rejected = report.rejected,
        store_failures = report.store_failures,
        "Sync finished"
    );
    println!("Got {} results", report.results_fetched);
    println!("Final error count {}", report.errors());
    if report.interrupted {
        println!("Interrupted; run again to continue.");
    }
    Ok(())
}

async fn run_auth_only(paths: &Paths, args: cli::AuthArgs) -> anyhow::Result<()> {
    let auth_config = AuthConfig::from_args(&args)?;
    let _lock = acquire_lock(paths).await?;
    let shutdown_token = shutdown::install_signal_handler()?;

    let http = http_client(Some(auth_config.http_timeout))?;
    let tokens = login(paths, &auth_config, http, &shutdown_token).await?;

    println!("Token saved to {}", paths.token_file().display());
    if let Some(expires_at) = tokens.expires_at {
        println!(
            "Access token expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if tokens.refresh_token.is_none() {
        println!("No refresh token was granted; the next run will need a browser login.");
    }
    Ok(())
}

async fn run_download(paths: &Paths, args: cli::DownloadArgs) -> anyhow::Result<()> {
    let db_path = paths.database();
    if !db_path.exists() {
        println!("No archive found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let _lock = acquire_lock(paths).await?;
    let shutdown_token = shutdown::install_signal_handler()?;
    let config = download::DownloadConfig::from_args(&args, paths);
    let http = http_client((args.http_timeout > 0).then(|| Duration::from_secs(args.http_timeout)))?;
    let db = state::SqliteArchiveDb::open(&db_path).await?;

    let summary = download::download_archive(&http, &db, &config, shutdown_token).await?;
    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} posts failed to download",
            summary.failed,
            summary.posts + summary.failed
        );
    }
    Ok(())
}

async fn run_status(paths: &Paths) -> anyhow::Result<()> {
    let db_path = paths.database();
    if !db_path.exists() {
        println!("No archive found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let db = state::SqliteArchiveDb::open(&db_path).await?;
    let summary = db.get_summary().await?;

    println!("Archive: {}", db.path().display());
    println!();
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ArchiveSummary) {
    println!("Contents:");
    println!("  Posts:      {}", summary.posts);
    println!("  Likes:      {}", summary.likes);
    println!("  Bookmarks:  {}", summary.bookmarks);
    println!("  Media rows: {}", summary.media_rows);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    match &summary.last_sync_completed {
        Some(completed) => println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None if summary.last_sync_started.is_some() => {
            println!("Last sync completed: never (aborted)")
        }
        None => println!("No sync has run yet."),
    }
    if let Some(stats) = &summary.last_sync_stats {
        println!(
            "  {} results over {} pages, {} errors{}",
            stats.results_fetched,
            stats.pages_fetched,
            stats.errors,
            if stats.interrupted { ", interrupted" } else { "" }
        );
    }
}

async fn run_reset_state(paths: &Paths, args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = paths.database();

    if !db_path.exists() {
        println!("No archive found at {}", db_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the archive database at:");
        println!("  {}", db_path.display());
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let _lock = acquire_lock(paths).await?;
    std::fs::remove_file(&db_path)?;
    for sidecar in config::database_sidecars(&db_path) {
        let _ = std::fs::remove_file(sidecar);
    }
    println!("Archive database deleted.");

    Ok(())
}
