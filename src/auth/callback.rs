//! Loopback HTTP endpoints that receive the authorization redirect.

use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::oneshot;

use super::error::AuthError;
use super::oauth::AuthorizationServer;
use super::pkce::AuthSession;
use super::token::TokenSet;

pub(crate) type LoginResult = Result<TokenSet, AuthError>;

/// Shared state for one login attempt.
pub(crate) struct CallbackState {
    session: AuthSession,
    authorize_url: String,
    server: Arc<dyn AuthorizationServer>,
    /// Taken by the first callback with a valid state; later ones get 409.
    done: Mutex<Option<oneshot::Sender<LoginResult>>>,
}

impl CallbackState {
    pub(crate) fn new(
        session: AuthSession,
        server: Arc<dyn AuthorizationServer>,
    ) -> (Arc<Self>, oneshot::Receiver<LoginResult>) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Self {
            authorize_url: server.authorize_url(&session),
            session,
            server,
            done: Mutex::new(Some(tx)),
        });
        (state, rx)
    }
}

pub(crate) fn router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .with_state(state)
}

async fn login(State(state): State<Arc<CallbackState>>) -> Redirect {
    Redirect::temporary(&state.authorize_url)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let valid = params
        .state
        .as_deref()
        .is_some_and(|s| state.session.state_matches(s));
    if !valid {
        tracing::warn!("Rejected callback with missing or mismatched state");
        return (StatusCode::BAD_REQUEST, "Invalid state").into_response();
    }

    let Some(done) = state
        .done
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    else {
        return (StatusCode::CONFLICT, "Login already completed").into_response();
    };

    let result = match (params.code, params.error) {
        (Some(code), None) => state.server.exchange_code(&code, &state.session).await,
        (_, error) => Err(AuthError::Denied(
            params
                .error_description
                .or(error)
                .unwrap_or_else(|| "no authorization code in callback".into()),
        )),
    };

    let response = match &result {
        Ok(_) => (StatusCode::OK, "You can close the tab now").into_response(),
        Err(AuthError::Denied(reason)) => {
            (StatusCode::BAD_REQUEST, format!("Authorization denied: {}", reason)).into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            format!("Token exchange failed: {}", e),
        )
            .into_response(),
    };
    // Receiver gone means the wait already ended (timeout); nothing to report to.
    let _ = done.send(result);
    response
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    /// Authorization server double with call counters.
    #[derive(Default)]
    pub(crate) struct FakeServer {
        pub(crate) exchanges: AtomicUsize,
        pub(crate) refreshes: AtomicUsize,
        pub(crate) fail_exchange: bool,
        pub(crate) fail_refresh: bool,
        /// `(state, redirect_uri)` of the last consent URL handed out.
        pub(crate) issued: Mutex<Option<(String, String)>>,
    }

    pub(crate) fn tokens(access: &str) -> TokenSet {
        TokenSet {
            access_token: access.into(),
            refresh_token: Some(format!("{}-refresh", access)),
            token_type: "bearer".into(),
            expires_at: None,
            scopes: vec![],
        }
    }

    #[async_trait]
    impl AuthorizationServer for FakeServer {
        fn authorize_url(&self, session: &AuthSession) -> String {
            *self.issued.lock().unwrap() =
                Some((session.state.clone(), session.redirect_uri.clone()));
            format!(
                "https://auth.example/authorize?state={}&code_challenge={}&code_challenge_method=S256",
                session.state, session.code_challenge
            )
        }

        async fn exchange_code(
            &self,
            code: &str,
            _session: &AuthSession,
        ) -> Result<TokenSet, AuthError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange {
                return Err(AuthError::TokenEndpoint {
                    status: 400,
                    body: "invalid_grant".into(),
                });
            }
            Ok(tokens(&format!("from-{}", code)))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(AuthError::TokenEndpoint {
                    status: 400,
                    body: "invalid_request".into(),
                });
            }
            Ok(tokens(&format!("refreshed-{}", refresh_token)))
        }
    }

    fn setup(
        server: FakeServer,
    ) -> (
        Router,
        String,
        Arc<FakeServer>,
        oneshot::Receiver<LoginResult>,
    ) {
        let server = Arc::new(server);
        let session = AuthSession::new("http://localhost:3621/callback");
        let nonce = session.state.clone();
        let (state, rx) = CallbackState::new(session, server.clone());
        (router(state), nonce, server, rx)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, HashMap<String, String>, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_string()))
            .collect();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_login_redirects_to_consent() {
        let (app, nonce, _, _rx) = setup(FakeServer::default());
        let (status, headers, _) = get(&app, "/login").await;
        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        let location = &headers[header::LOCATION.as_str()];
        assert!(location.starts_with("https://auth.example/authorize?"));
        assert!(location.contains(&format!("state={}", nonce)));
        assert!(location.contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn test_wrong_state_is_rejected_without_exchange() {
        let (app, _, server, mut rx) = setup(FakeServer::default());

        let (status, _, body) = get(&app, "/callback?code=abc&state=forged").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid state");

        let (status, _, _) = get(&app, "/callback?code=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(server.exchanges.load(Ordering::SeqCst), 0);
        // flow has not advanced
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_valid_callback_completes_once() {
        let (app, nonce, server, rx) = setup(FakeServer::default());

        let uri = format!("/callback?code=abc&state={}", nonce);
        let (status, _, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "You can close the tab now");
        assert_eq!(rx.await.unwrap().unwrap().access_token, "from-abc");

        let (status, _, _) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(server.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_exchange_is_reported() {
        let (app, nonce, _, rx) = setup(FakeServer {
            fail_exchange: true,
            ..Default::default()
        });

        let (status, _, _) = get(&app, &format!("/callback?code=abc&state={}", nonce)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(matches!(
            rx.await.unwrap(),
            Err(AuthError::TokenEndpoint { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_denied_consent() {
        let (app, nonce, server, rx) = setup(FakeServer::default());

        let (status, _, _) = get(
            &app,
            &format!("/callback?error=access_denied&state={}", nonce),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(matches!(rx.await.unwrap(), Err(AuthError::Denied(_))));
        assert_eq!(server.exchanges.load(Ordering::SeqCst), 0);
    }
}
