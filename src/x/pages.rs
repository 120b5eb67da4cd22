//! Cursor-driven page stream over a remote collection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};

use super::error::ApiError;
use super::types::Page;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::types::Collection;

/// Anything that can return one page of a collection for a given cursor.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        collection: Collection,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError>;
}

/// How pages are fetched: retry policy for transient failures and an
/// optional pause between consecutive requests.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub retry: RetryConfig,
    pub delay: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            delay: Duration::ZERO,
        }
    }
}

enum Cursor {
    Start(Option<String>),
    Next(String),
    Done,
}

/// Lazily walk `collection` starting at `start` (or the beginning).
///
/// Each page's `next_token` drives the next request; the stream ends after
/// the first page that carries none, even if that page had records, and
/// keeps going past empty pages that do carry one. A fetch that still fails
/// after retries is yielded as the final item.
pub fn pages<'a>(
    source: &'a dyn PageSource,
    collection: Collection,
    start: Option<String>,
    options: &'a PageOptions,
) -> impl Stream<Item = Result<Page, ApiError>> + 'a {
    stream::try_unfold(Cursor::Start(start), move |state| async move {
        let cursor = match state {
            Cursor::Done => return Ok::<_, ApiError>(None),
            Cursor::Start(cursor) => cursor,
            Cursor::Next(cursor) => {
                if !options.delay.is_zero() {
                    tokio::time::sleep(options.delay).await;
                }
                Some(cursor)
            }
        };

        let page = fetch_with_retry(source, collection, cursor.as_deref(), &options.retry)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    %collection,
                    cursor = cursor.as_deref().unwrap_or("<start>"),
                    "Page fetch failed: {}",
                    e
                );
            })?;

        let next = match page.next_cursor() {
            Some(token) => Cursor::Next(token.to_string()),
            None => Cursor::Done,
        };
        Ok::<_, ApiError>(Some((page, next)))
    })
}

async fn fetch_with_retry(
    source: &dyn PageSource,
    collection: Collection,
    cursor: Option<&str>,
    retry_config: &RetryConfig,
) -> Result<Page, ApiError> {
    retry::retry_with_backoff(
        retry_config,
        |e: &ApiError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || source.fetch_page(collection, cursor),
    )
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use futures_util::StreamExt;
    use serde_json::json;

    /// Serves canned pages keyed by cursor and records every request.
    /// Queued failures for a cursor are returned before its page.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pages: HashMap<(Collection, Option<String>), Page>,
        failures: Mutex<HashMap<Option<String>, VecDeque<ApiError>>>,
        pub(crate) calls: Mutex<Vec<(Collection, Option<String>)>>,
    }

    impl ScriptedSource {
        pub(crate) fn page(mut self, collection: Collection, cursor: Option<&str>, page: Page) -> Self {
            self.pages
                .insert((collection, cursor.map(str::to_string)), page);
            self
        }

        pub(crate) fn fail(self, cursor: Option<&str>, err: ApiError) -> Self {
            self.failures
                .lock()
                .unwrap()
                .entry(cursor.map(str::to_string))
                .or_default()
                .push_back(err);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(
            &self,
            collection: Collection,
            cursor: Option<&str>,
        ) -> Result<Page, ApiError> {
            let key = cursor.map(str::to_string);
            self.calls.lock().unwrap().push((collection, key.clone()));
            if let Some(err) = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            self.pages
                .get(&(collection, key))
                .cloned()
                .ok_or_else(|| ApiError::Status {
                    status: 400,
                    endpoint: "scripted".into(),
                    body: format!("no page for cursor {:?}", cursor),
                })
        }
    }

    pub(crate) fn page(value: serde_json::Value) -> Page {
        serde_json::from_value(value).unwrap()
    }

    pub(crate) fn instant_options() -> PageOptions {
        PageOptions {
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            delay: Duration::ZERO,
        }
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 503,
            endpoint: "scripted".into(),
            body: "over capacity".into(),
        }
    }

    #[tokio::test]
    async fn test_walks_until_no_cursor() {
        let source = ScriptedSource::default()
            .page(
                Collection::Liked,
                None,
                page(json!({"data": [{"id": "1"}], "meta": {"result_count": 1, "next_token": "a"}})),
            )
            .page(
                Collection::Liked,
                Some("a"),
                page(json!({"meta": {"result_count": 0, "next_token": "b"}})),
            )
            .page(
                Collection::Liked,
                Some("b"),
                page(json!({"data": [{"id": "2"}, {"id": "3"}], "meta": {"result_count": 2}})),
            );
        let options = instant_options();

        let results: Vec<_> = pages(&source, Collection::Liked, None, &options)
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        let counts: Vec<usize> = results
            .iter()
            .map(|r| r.as_ref().unwrap().data.len())
            .collect();
        assert_eq!(counts, [1, 0, 2]);
        let cursors: Vec<Option<String>> = source
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect();
        assert_eq!(cursors, [None, Some("a".into()), Some("b".into())]);
    }

    #[tokio::test]
    async fn test_single_page_without_cursor() {
        let source = ScriptedSource::default().page(
            Collection::Bookmarked,
            None,
            page(json!({"data": [{"id": "1"}], "meta": {"result_count": 1}})),
        );
        let options = instant_options();
        let results: Vec<_> = pages(&source, Collection::Bookmarked, None, &options)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_from_cursor() {
        let source = ScriptedSource::default().page(
            Collection::Liked,
            Some("resume"),
            page(json!({"meta": {"result_count": 0}})),
        );
        let options = instant_options();
        let results: Vec<_> = pages(&source, Collection::Liked, Some("resume".into()), &options)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(
            source.calls.lock().unwrap()[0],
            (Collection::Liked, Some("resume".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let source = ScriptedSource::default()
            .page(
                Collection::Liked,
                None,
                page(json!({"meta": {"result_count": 0}})),
            )
            .fail(None, server_error());
        let options = instant_options();
        let results: Vec<_> = pages(&source, Collection::Liked, None, &options)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_ends_stream() {
        let source = ScriptedSource::default().page(
            Collection::Liked,
            None,
            page(json!({"data": [{"id": "1"}], "meta": {"result_count": 1, "next_token": "gone"}})),
        );
        let options = instant_options();
        let results: Vec<_> = pages(&source, Collection::Liked, None, &options)
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ApiError::Status { status: 400, .. })
        ));
        // 400 is not retried
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_fatal() {
        let source = ScriptedSource::default()
            .fail(None, server_error())
            .fail(None, server_error())
            .fail(None, server_error());
        let options = instant_options();
        let results: Vec<_> = pages(&source, Collection::Liked, None, &options)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(source.call_count(), 3);
    }
}
