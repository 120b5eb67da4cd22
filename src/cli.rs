use clap::{Args, Parser, Subcommand};

use crate::types::{Collection, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "harrow",
    version,
    about = "Archive liked and bookmarked posts from X into SQLite"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory holding auth.json, db.sqlite and downloaded media
    /// (default: <data dir>/harrow-downloader)
    #[arg(long, global = true)]
    pub data_directory: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(flatten)]
    pub sync: SyncArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in if needed, then fetch liked and bookmarked posts (default)
    Sync(SyncArgs),
    /// Only log in and refresh the cached token
    AuthOnly(AuthArgs),
    /// Download media of archived posts into <data-directory>/data
    Download(DownloadArgs),
    /// Show archive contents and the last sync run
    Status,
    /// Delete the archive database
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// OAuth2 client id of the registered app
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth2 client secret (confidential clients only).
    /// WARNING: passing via --client-secret is visible in process listings.
    /// Prefer the CLIENT_SECRET environment variable or a .env file.
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Port of the local login callback listener
    #[arg(long, default_value_t = crate::auth::DEFAULT_CALLBACK_PORT)]
    pub callback_port: u16,

    /// Give up waiting for the browser login after N seconds (default: wait forever)
    #[arg(long)]
    pub login_timeout: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub http_timeout: u64,

    /// Override the authorization endpoint
    #[arg(long, hide = true)]
    pub authorize_url: Option<String>,

    /// Override the token endpoint
    #[arg(long, hide = true)]
    pub token_url: Option<String>,

    /// Override the API base URL
    #[arg(long, hide = true)]
    pub api_base: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Collection(s) to fetch (default: both)
    #[arg(long = "collection", value_enum)]
    pub collections: Vec<Collection>,

    /// Resume the first collection from this pagination token
    #[arg(long)]
    pub start_cursor: Option<String>,

    /// Results per page (API allows 1-100)
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub page_size: u32,

    /// Seconds to wait between page requests
    #[arg(long, default_value_t = 0)]
    pub api_delay: u64,

    /// Max retries per page request on transient errors (0 = no retries)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Don't write <files>.txt metadata next to downloaded media
    #[arg(long)]
    pub skip_metadata_files: bool,

    /// Empty the data directory before downloading
    #[arg(long)]
    pub clean_data_directory: bool,

    /// Posts downloaded in parallel
    #[arg(long, default_value_t = 4)]
    pub concurrent_downloads: usize,

    /// Max retries per file on transient errors
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// HTTP request timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    pub http_timeout: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

impl Cli {
    /// The subcommand to run; bare `harrow [sync flags]` means sync.
    pub fn effective_command(&self) -> Command {
        match &self.command {
            Some(Command::Sync(args)) => Command::Sync(args.clone()),
            Some(Command::AuthOnly(args)) => Command::AuthOnly(args.clone()),
            Some(Command::Download(args)) => Command::Download(args.clone()),
            Some(Command::Status) => Command::Status,
            Some(Command::ResetState(args)) => Command::ResetState(args.clone()),
            None => Command::Sync(self.sync.clone()),
        }
    }
}
