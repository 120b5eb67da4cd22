use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ApiError;
use super::pages::PageSource;
use super::types::{Page, UserRecord, UserResponse};
use crate::types::Collection;

/// Fields and expansions requested on every collection page.
const POST_QUERY: &[(&str, &str)] = &[
    (
        "tweet.fields",
        "attachments,text,author_id,referenced_tweets,created_at",
    ),
    (
        "expansions",
        "attachments.media_keys,author_id,referenced_tweets.id,referenced_tweets.id.author_id",
    ),
    (
        "media.fields",
        "alt_text,media_key,type,url,variants,width,height",
    ),
    ("user.fields", "username"),
];

/// Bearer-authenticated client for one account's collections.
pub struct ApiClient {
    http: Client,
    api_base: String,
    access_token: String,
    user: UserRecord,
    page_size: u32,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_base", &self.api_base)
            .field("user", &self.user.username)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Resolve the authenticated account and return a client bound to it.
    pub async fn connect(
        http: Client,
        api_base: &str,
        access_token: &str,
        page_size: u32,
    ) -> Result<Self, ApiError> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let endpoint = format!("{}/2/users/me", api_base);
        let response: UserResponse =
            get_json(&http, &endpoint, access_token, &[]).await?;
        let user = response
            .data
            .ok_or_else(|| ApiError::MissingData(endpoint.clone()))?;
        debug!(user_id = %user.id, username = %user.username, "Resolved authenticated user");

        Ok(Self {
            http,
            api_base,
            access_token: access_token.to_string(),
            user,
            page_size,
        })
    }

    pub fn user(&self) -> &UserRecord {
        &self.user
    }

    fn collection_url(&self, collection: Collection) -> String {
        collection_url(&self.api_base, &self.user.id, collection)
    }
}

pub(crate) fn collection_url(api_base: &str, user_id: &str, collection: Collection) -> String {
    let path = match collection {
        Collection::Liked => "liked_tweets",
        Collection::Bookmarked => "bookmarks",
    };
    format!("{}/2/users/{}/{}", api_base, user_id, path)
}

/// Query string for one page. The cursor is the only parameter that changes
/// from page to page.
pub(crate) fn page_query(page_size: u32, cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query: Vec<(&'static str, String)> = POST_QUERY
        .iter()
        .map(|&(k, v)| (k, v.to_string()))
        .collect();
    query.push(("max_results", page_size.to_string()));
    if let Some(cursor) = cursor {
        query.push(("pagination_token", cursor.to_string()));
    }
    query
}

async fn get_json<T: DeserializeOwned>(
    http: &Client,
    endpoint: &str,
    access_token: &str,
    query: &[(&str, String)],
) -> Result<T, ApiError> {
    debug!("GET {}", endpoint);
    let response = http
        .get(endpoint)
        .bearer_auth(access_token)
        .query(query)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch_page(
        &self,
        collection: Collection,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError> {
        let endpoint = self.collection_url(collection);
        get_json(
            &self.http,
            &endpoint,
            &self.access_token,
            &page_query(self.page_size, cursor),
        )
        .await
    }
}
