/// Authorization and API endpoints. Defaults point at X; tests and
/// self-hosted mocks override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub api_base: String,
}

pub const DEFAULT_AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";

/// Scopes requested at login. `offline.access` is what yields a refresh token.
pub const SCOPES: &[&str] = &[
    "bookmark.read",
    "like.read",
    "list.read",
    "users.read",
    "offline.access",
    "tweet.read",
];

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: DEFAULT_AUTHORIZE_URL.to_string(),
            token: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}
