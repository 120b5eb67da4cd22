//! On-disk cache for the OAuth2 token set.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::error::AuthError;

/// Tokens granted by the authorization server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token endpoint response body (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenSet {
    pub(crate) fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type.unwrap_or_else(default_token_type),
            expires_at: resp.expires_in.map(|secs| now + Duration::seconds(secs)),
            scopes: resp
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Reads and writes the single cached [`TokenSet`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// `Ok(None)` when nothing is cached yet or the file is unreadable as a
    /// token set.
    pub async fn load(&self) -> Result<Option<TokenSet>, AuthError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No cached token at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                tracing::warn!(
                    "Token file {} is corrupt, ignoring it: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Replace the cached token set. Written to a sibling temp file and
    /// renamed into place.
    pub async fn save(&self, tokens: &TokenSet) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(tokens)?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Saved token set to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("harrow_token_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample() -> TokenSet {
        TokenSet {
            access_token: "access-1".into(),
            refresh_token: Some("refresh-1".into()),
            token_type: "bearer".into(),
            expires_at: Some(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()),
            scopes: vec!["like.read".into(), "offline.access".into()],
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let store = TokenStore::new(test_dir("missing").join("auth.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = TokenStore::new(test_dir("save_load").join("nested").join("auth.json"));
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let store = TokenStore::new(test_dir("replace").join("auth.json"));
        store.save(&sample()).await.unwrap();
        let mut newer = sample();
        newer.access_token = "access-2".into();
        store.save(&newer).await.unwrap();
        assert_eq!(
            store.load().await.unwrap().unwrap().access_token,
            "access-2"
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_none() {
        let dir = test_dir("corrupt");
        let path = dir.join("auth.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(TokenStore::new(path).load().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let store = TokenStore::new(test_dir("perms").join("auth.json"));
        store.save(&sample()).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_from_response() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let resp: TokenResponse = serde_json::from_str(
            r#"{"token_type":"bearer","expires_in":7200,"access_token":"a",
                "scope":"like.read bookmark.read offline.access","refresh_token":"r"}"#,
        )
        .unwrap();
        let tokens = TokenSet::from_response(resp, now);
        assert_eq!(tokens.expires_at, Some(now + Duration::hours(2)));
        assert_eq!(
            tokens.scopes,
            ["like.read", "bookmark.read", "offline.access"]
        );
        assert_eq!(tokens.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("access-1"));
        assert!(!rendered.contains("refresh-1"));
    }
}
