use thiserror::Error;

/// Errors from the remote collection API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: serde_json::Error,
    },

    #[error("Response from {0} carried no data")]
    MissingData(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    /// Rate limits, server errors and transport failures are worth another
    /// attempt; client errors and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Http(e) => !e.is_builder() && !e.is_decode() && !e.is_status(),
            ApiError::Decode { .. } | ApiError::MissingData(_) => false,
        }
    }
}
