//! Authorization-server client: consent URL, code exchange and refresh.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use url::Url;

use super::endpoints::{Endpoints, SCOPES};
use super::error::AuthError;
use super::pkce::AuthSession;
use super::token::{TokenResponse, TokenSet};

/// The remote half of the authorization-code flow.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// Consent URL the browser is sent to for this attempt.
    fn authorize_url(&self, session: &AuthSession) -> String;

    /// Trade an authorization code for tokens, proving possession of the
    /// session's PKCE verifier.
    async fn exchange_code(&self, code: &str, session: &AuthSession)
        -> Result<TokenSet, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}

/// Confidential or public OAuth2 client. With a secret the token endpoint
/// is called with HTTP basic auth; without one `client_id` goes in the form.
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: Option<String>,
    authorize: Url,
    token: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authorize", &self.authorize.as_str())
            .field("token", &self.token)
            .finish()
    }
}

impl OAuthClient {
    pub fn new(
        http: Client,
        client_id: String,
        client_secret: Option<String>,
        endpoints: &Endpoints,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            client_id,
            client_secret,
            authorize: Url::parse(&endpoints.authorize)?,
            token: endpoints.token.clone(),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, AuthError> {
        let mut fields = form.to_vec();
        fields.push(("client_id", self.client_id.as_str()));

        let mut request = self.http.post(&self.token).form(&fields);
        if let Some(secret) = &self.client_secret {
            request = request.basic_auth(&self.client_id, Some(secret));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TokenResponse = serde_json::from_str(&body)?;
        Ok(TokenSet::from_response(parsed, Utc::now()))
    }
}

#[async_trait]
impl AuthorizationServer for OAuthClient {
    fn authorize_url(&self, session: &AuthSession) -> String {
        let mut url = self.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &session.redirect_uri)
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", &session.state)
            .append_pair("code_challenge", &session.code_challenge)
            .append_pair("code_challenge_method", "S256");
        url.into()
    }

    async fn exchange_code(
        &self,
        code: &str,
        session: &AuthSession,
    ) -> Result<TokenSet, AuthError> {
        tracing::debug!("Exchanging authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", session.redirect_uri.as_str()),
            ("code_verifier", session.code_verifier.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        tracing::debug!("Refreshing access token");
        let mut tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        // Servers that do not rotate refresh tokens omit it from the response
        tokens
            .refresh_token
            .get_or_insert_with(|| refresh_token.to_string());
        Ok(tokens)
    }
}
