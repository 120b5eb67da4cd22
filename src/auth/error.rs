use thiserror::Error;

/// Errors from the OAuth2 authorization flow and the token cache.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token endpoint rejected the request (HTTP {status}): {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Authorization server returned an error: {0}")]
    Denied(String),

    #[error("No refresh token cached")]
    NoRefreshToken,

    #[error("Failed to bind callback listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Timed out after {0}s waiting for the login callback")]
    Timeout(u64),

    #[error("Callback listener stopped before a login completed")]
    ListenerClosed,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
