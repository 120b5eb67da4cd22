//! OAuth2 authorization-code flow with PKCE and a cached, refreshable token.
//!
//! A cached refresh token is tried first. If that fails for any reason a
//! loopback listener is started, the user logs in through the browser, and
//! the resulting tokens replace the cache.

pub mod callback;
pub mod endpoints;
pub mod error;
pub mod oauth;
pub mod pkce;
pub mod token;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::callback::CallbackState;
pub use self::endpoints::Endpoints;
pub use self::error::AuthError;
pub use self::oauth::{AuthorizationServer, OAuthClient};
use self::pkce::AuthSession;
pub use self::token::{TokenSet, TokenStore};

pub const DEFAULT_CALLBACK_PORT: u16 = 3621;

/// How long the callback listener gets to finish in-flight requests.
const LISTENER_GRACE: Duration = Duration::from_secs(5);

/// Where the callback listener binds and how long to wait for the browser.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub bind: SocketAddr,
    /// `None` waits until the callback arrives or the process is stopped.
    pub timeout: Option<Duration>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CALLBACK_PORT)),
            timeout: None,
        }
    }
}

/// Return a live token set, refreshing the cached one or running the
/// browser login. The new tokens are saved before returning.
pub async fn authorize(
    store: &TokenStore,
    server: Arc<dyn AuthorizationServer>,
    login: &LoginConfig,
) -> Result<TokenSet, AuthError> {
    if let Some(tokens) = refresh_cached(store, server.as_ref()).await {
        store.save(&tokens).await?;
        tracing::info!("Refreshed cached access token");
        return Ok(tokens);
    }

    let tokens = browser_login(server, login).await?;
    store.save(&tokens).await?;
    tracing::info!("Authorization completed");
    Ok(tokens)
}

/// Any failure here only means the browser login is needed.
async fn refresh_cached(store: &TokenStore, server: &dyn AuthorizationServer) -> Option<TokenSet> {
    let cached = match store.load().await {
        Ok(Some(tokens)) => tokens,
        Ok(None) => return None,
        Err(e) => {
            tracing::debug!("Could not read token cache: {}", e);
            return None;
        }
    };
    let Some(refresh_token) = cached.refresh_token.as_deref() else {
        tracing::debug!("{}", AuthError::NoRefreshToken);
        return None;
    };
    match server.refresh(refresh_token).await {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            tracing::info!("Cached token could not be refreshed, logging in again");
            tracing::debug!("Refresh failed: {}", e);
            None
        }
    }
}

async fn browser_login(
    server: Arc<dyn AuthorizationServer>,
    login: &LoginConfig,
) -> Result<TokenSet, AuthError> {
    let listener = TcpListener::bind(login.bind)
        .await
        .map_err(|source| AuthError::Bind {
            addr: login.bind,
            source,
        })?;
    let port = listener.local_addr()?.port();

    let session = AuthSession::new(format!("http://localhost:{}/callback", port));
    let (state, done) = CallbackState::new(session, server);
    let app = callback::router(state);

    let stop = CancellationToken::new();
    let serve = tokio::spawn({
        let stop = stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }
    });

    println!("Go to http://localhost:{}/login to login", port);

    let outcome = match login.timeout {
        Some(limit) => tokio::time::timeout(limit, done)
            .await
            .map_err(|_| AuthError::Timeout(limit.as_secs())),
        None => Ok(done.await),
    };

    stop_listener(&stop, serve, LISTENER_GRACE).await;

    outcome?.map_err(|_| AuthError::ListenerClosed)?
}

/// Ask the listener to drain, then abort it if it is still running after
/// `grace`.
async fn stop_listener(
    stop: &CancellationToken,
    mut serve: JoinHandle<std::io::Result<()>>,
    grace: Duration,
) {
    stop.cancel();
    match tokio::time::timeout(grace, &mut serve).await {
        Ok(Ok(Ok(()))) => tracing::debug!("Callback listener stopped"),
        Ok(Ok(Err(e))) => tracing::warn!("Callback listener failed: {}", e),
        Ok(Err(e)) => tracing::warn!("Callback listener task failed: {}", e),
        Err(_) => {
            tracing::warn!("Callback listener did not stop in time, aborting it");
            serve.abort();
        }
    }
}
