use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::auth::{Endpoints, LoginConfig};
use crate::cli::{AuthArgs, DownloadArgs, SyncArgs};
use crate::download::DownloadConfig;
use crate::retry::RetryConfig;
use crate::types::Collection;
use crate::x::PageOptions;

const APP_DIR: &str = "harrow-downloader";

/// Where everything lives on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_directory: PathBuf,
}

impl Paths {
    pub fn resolve(data_directory: Option<&str>) -> anyhow::Result<Self> {
        let data_directory = match data_directory {
            Some(dir) => expand_tilde(dir),
            None => dirs::data_dir()
                .context("Could not determine the user data directory; pass --data-directory")?
                .join(APP_DIR),
        };
        Ok(Self { data_directory })
    }

    pub fn token_file(&self) -> PathBuf {
        self.data_directory.join("auth.json")
    }

    pub fn database(&self) -> PathBuf {
        self.data_directory.join("db.sqlite")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_directory.join("harrow.lock")
    }

    pub fn media_directory(&self) -> PathBuf {
        self.data_directory.join("data")
    }
}

/// Resolved OAuth client settings.
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub endpoints: Endpoints,
    pub login: LoginConfig,
    pub http_timeout: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("endpoints", &self.endpoints)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn from_args(args: &AuthArgs) -> anyhow::Result<Self> {
        let client_id = args
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .context("No OAuth client id: set CLIENT_ID or pass --client-id")?;

        let defaults = Endpoints::default();
        Ok(Self {
            client_id,
            client_secret: args.client_secret.clone().filter(|s| !s.is_empty()),
            endpoints: Endpoints {
                authorize: args.authorize_url.clone().unwrap_or(defaults.authorize),
                token: args.token_url.clone().unwrap_or(defaults.token),
                api_base: args.api_base.clone().unwrap_or(defaults.api_base),
            },
            login: LoginConfig {
                bind: SocketAddr::from((Ipv4Addr::LOCALHOST, args.callback_port)),
                timeout: args.login_timeout.map(Duration::from_secs),
            },
            http_timeout: Duration::from_secs(args.http_timeout),
        })
    }
}

/// Everything a sync run needs besides credentials.
#[derive(Debug)]
pub struct SyncConfig {
    pub auth: AuthConfig,
    /// Each collection with the cursor it starts from.
    pub collections: Vec<(Collection, Option<String>)>,
    pub page_size: u32,
    pub pages: PageOptions,
}

impl SyncConfig {
    pub fn from_args(args: &SyncArgs) -> anyhow::Result<Self> {
        let requested: &[Collection] = if args.collections.is_empty() {
            &Collection::ALL
        } else {
            &args.collections
        };
        let mut selected: Vec<Collection> = Vec::with_capacity(requested.len());
        for c in requested {
            if !selected.contains(c) {
                selected.push(*c);
            }
        }

        let collections = selected
            .into_iter()
            .enumerate()
            .map(|(i, c)| (c, if i == 0 { args.start_cursor.clone() } else { None }))
            .collect();

        Ok(Self {
            auth: AuthConfig::from_args(&args.auth)?,
            collections,
            page_size: args.page_size,
            pages: PageOptions {
                retry: RetryConfig {
                    max_retries: args.max_retries,
                    base_delay: Duration::from_secs(args.retry_delay),
                    ..RetryConfig::default()
                },
                delay: Duration::from_secs(args.api_delay),
            },
        })
    }
}

impl DownloadConfig {
    pub fn from_args(args: &DownloadArgs, paths: &Paths) -> Self {
        Self {
            directory: paths.media_directory(),
            skip_metadata_files: args.skip_metadata_files,
            clean_directory: args.clean_data_directory,
            concurrent_downloads: args.concurrent_downloads.max(1),
            no_progress_bar: args.no_progress_bar,
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay: Duration::from_secs(args.retry_delay),
                ..RetryConfig::default()
            },
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// SQLite sidecar files that go with a database at `db`.
pub fn database_sidecars(db: &Path) -> [PathBuf; 2] {
    let with_suffix = |suffix: &str| {
        let mut name = db.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [with_suffix("-wal"), with_suffix("-shm")]
}
