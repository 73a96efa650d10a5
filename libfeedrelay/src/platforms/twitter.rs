//! X/Twitter feed source
//!
//! Uses the v2 REST API with an app-only bearer token:
//!
//! - `GET /2/users/by/username/{handle}` to resolve the account once
//! - `GET /2/users/{id}/tweets?since_id=...` to poll for new posts
//!
//! The timeline endpoint returns posts newest first, one page at a time, with
//! `meta.next_token` pointing at the next older page. Throttled requests come
//! back as HTTP 429 with the window reset time in `x-rate-limit-reset`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::{ConfigError, Result, SourceError};
use crate::platforms::FeedSource;
use crate::types::{AccountId, Cursor, Post, PostId};

const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

/// The timeline only reaches back 3200 posts, i.e. 640 pages of 5
const MAX_PAGES: usize = 640;

pub struct TwitterSource {
    client: reqwest::Client,
    api_base: String,
    bearer_token: SecretString,
    page_size: u8,
}

impl TwitterSource {
    pub fn new(
        client: reqwest::Client,
        api_base: String,
        bearer_token: SecretString,
        page_size: u8,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bearer_token,
            page_size,
        }
    }

    /// Build from the `[source]` section
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` when no bearer token is configured.
    pub fn from_config(config: &SourceConfig, client: reqwest::Client) -> Result<Self> {
        let token = config
            .bearer_token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_string()))
            .ok_or_else(|| ConfigError::MissingField("source.bearer_token".to_string()))?;

        Ok(Self::new(
            client,
            config.api_base.clone(),
            token,
            config.page_size,
        ))
    }

    /// Issue a GET and return the status and body
    ///
    /// Transport failures and 429 responses are turned into errors here; every
    /// other status is left to the caller.
    async fn get(&self, url: &str, query: &[(&str, String)], context: &str) -> Result<(u16, String)> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.bearer_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("Twitter request failed ({}): {}", context, e)))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = rate_limit_reset(response.headers(), Utc::now());
            return Err(SourceError::RateLimited { retry_after }.into());
        }

        let body = response.text().await.map_err(|e| {
            SourceError::Network(format!("Twitter response unreadable ({}): {}", context, e))
        })?;

        Ok((status, body))
    }

    async fn fetch_page(
        &self,
        url: &str,
        cursor: Cursor,
        pagination_token: Option<String>,
    ) -> Result<TimelinePage> {
        let mut query = vec![
            ("max_results", self.page_size.to_string()),
            ("tweet.fields", "created_at".to_string()),
        ];
        if let Some(since) = cursor {
            query.push(("since_id", since.to_string()));
        }
        if let Some(token) = pagination_token {
            query.push(("pagination_token", token));
        }

        let (status, body) = self.get(url, &query, "fetch timeline").await?;
        if !(200..300).contains(&status) {
            return Err(map_status_error(status, &body, "fetch timeline").into());
        }

        Ok(parse_timeline(&body)?)
    }
}

#[async_trait]
impl FeedSource for TwitterSource {
    async fn resolve_account(&self, handle: &str) -> Result<AccountId> {
        let handle = handle.trim_start_matches('@');
        let url = format!("{}/2/users/by/username/{}", self.api_base, handle);

        let (status, body) = self.get(&url, &[], "resolve account").await?;
        match status {
            200..=299 => {}
            // 400 is what the API answers for syntactically invalid usernames
            400 | 404 => {
                return Err(SourceError::NotFound(format!(
                    "@{}: HTTP {}: {}",
                    handle,
                    status,
                    problem_detail(&body)
                ))
                .into());
            }
            _ => return Err(map_status_error(status, &body, "resolve account").into()),
        }

        let account = parse_user(&body, handle)?;
        debug!(handle, account = %account, "Resolved account");
        Ok(account)
    }

    /// Return the oldest page of posts after `cursor`
    ///
    /// With a cursor, pages are followed back until the one just after the
    /// cursor, so a burst larger than a page is delivered over several polls
    /// instead of losing its oldest posts. Without a cursor only the newest
    /// page is fetched.
    async fn fetch_since(&self, account: &AccountId, cursor: Cursor) -> Result<Vec<Post>> {
        let url = format!("{}/2/users/{}/tweets", self.api_base, account);

        let mut page = self.fetch_page(&url, cursor, None).await?;
        if cursor.is_none() {
            return Ok(page.posts);
        }

        let mut pages = 1;
        while let Some(token) = page.next_token.take() {
            if pages >= MAX_PAGES {
                warn!(pages, "Timeline pagination limit reached, older posts are out of reach");
                break;
            }

            let older = self.fetch_page(&url, cursor, Some(token)).await?;
            pages += 1;
            // A trailing empty page leaves the last non-empty one as the oldest
            if older.posts.is_empty() {
                break;
            }
            page = older;
        }

        if pages > 1 {
            debug!(pages, cursor = ?cursor, "Walked back to the oldest unseen page");
        }
        Ok(page.posts)
    }

    fn name(&self) -> &str {
        "twitter"
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: Option<UserData>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TimelineEnvelope {
    #[serde(default)]
    data: Vec<TweetData>,
    #[serde(default)]
    meta: TimelineMeta,
}

#[derive(Debug, Default, Deserialize)]
struct TimelineMeta {
    next_token: Option<String>,
}

/// One timeline page, newest first
#[derive(Debug)]
struct TimelinePage {
    posts: Vec<Post>,
    /// Token for the next older page, if any
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    text: String,
    created_at: Option<DateTime<Utc>>,
}

/// Problem entry, as found in `errors` arrays and in top-level error bodies
#[derive(Debug, Default, Deserialize)]
struct ApiProblem {
    title: Option<String>,
    detail: Option<String>,
}

impl ApiProblem {
    fn describe(&self) -> Option<String> {
        self.detail.clone().or_else(|| self.title.clone())
    }
}

/// Parse a user lookup body
///
/// The API answers 200 with an `errors` array and no `data` when the handle
/// is unknown or the account is suspended.
fn parse_user(body: &str, handle: &str) -> std::result::Result<AccountId, SourceError> {
    let envelope: UserEnvelope = serde_json::from_str(body).map_err(|e| {
        SourceError::InvalidResponse(format!("Malformed user lookup response: {}", e))
    })?;

    match envelope.data {
        Some(user) if !user.id.is_empty() => Ok(AccountId(user.id)),
        _ => {
            let reason = envelope
                .errors
                .first()
                .and_then(ApiProblem::describe)
                .unwrap_or_else(|| "not found or access denied".to_string());
            Err(SourceError::NotFound(format!("@{}: {}", handle, reason)))
        }
    }
}

/// Parse a timeline page, preserving the provider's newest-first order
fn parse_timeline(body: &str) -> std::result::Result<TimelinePage, SourceError> {
    let envelope: TimelineEnvelope = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("Malformed timeline response: {}", e)))?;

    let posts = envelope
        .data
        .into_iter()
        .map(|tweet| {
            let id = tweet.id.parse::<PostId>().map_err(|_| {
                SourceError::InvalidResponse(format!("Non-numeric post id: {}", tweet.id))
            })?;
            Ok(Post {
                id,
                text: tweet.text,
                created_at: tweet.created_at,
            })
        })
        .collect::<std::result::Result<Vec<_>, SourceError>>()?;

    Ok(TimelinePage {
        posts,
        next_token: envelope.meta.next_token.filter(|t| !t.is_empty()),
    })
}

/// When the current rate-limit window ends
///
/// Prefers `x-rate-limit-reset` (unix seconds), then `retry-after` (delta
/// seconds), then `now`, leaving the caller's floor to decide the wait.
fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let header_number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(reset) = header_number(RATE_LIMIT_RESET) {
        if let Some(at) = Utc.timestamp_opt(reset, 0).single() {
            return at;
        }
    }
    if let Some(seconds) = header_number(RETRY_AFTER.as_str()) {
        return now + chrono::Duration::seconds(seconds.max(0));
    }
    now
}

/// Human-readable reason from an error body, or the start of the raw body
fn problem_detail(body: &str) -> String {
    serde_json::from_str::<ApiProblem>(body)
        .ok()
        .and_then(|p| p.describe())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Map a non-success, non-429 status to a source error
fn map_status_error(status: u16, body: &str, context: &str) -> SourceError {
    let detail = problem_detail(body);

    match status {
        401 | 403 => SourceError::Authentication(format!(
            "Twitter authentication failed ({}): HTTP {}: {}. \
                Suggestion: Check that the bearer token is valid and has read access.",
            context, status, detail
        )),
        500..=599 => SourceError::Network(format!(
            "Twitter server error ({}): HTTP {}: {}",
            context, status, detail
        )),
        _ => SourceError::InvalidResponse(format!(
            "Twitter request rejected ({}): HTTP {}: {}",
            context, status, detail
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::platforms::stub::{StubResponse, StubServer};
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_user() {
        let body = r#"{"data":{"id":"1456789","name":"Mycelial Oracle","username":"MycelialOracle"}}"#;
        assert_eq!(
            parse_user(body, "MycelialOracle").unwrap(),
            AccountId("1456789".to_string())
        );
    }

    #[test]
    fn test_parse_user_not_found() {
        let body = r#"{"errors":[{"value":"nobody","detail":"Could not find user with username: [nobody].","title":"Not Found Error","resource_type":"user"}]}"#;
        match parse_user(body, "nobody").unwrap_err() {
            SourceError::NotFound(msg) => {
                assert!(msg.contains("@nobody"));
                assert!(msg.contains("Could not find user"));
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_user_malformed() {
        assert!(matches!(
            parse_user("<html>", "x"),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_timeline_keeps_provider_order() {
        let body = r#"{
            "data": [
                {"id":"105","text":"third","created_at":"2024-05-01T12:05:00.000Z","edit_history_tweet_ids":["105"]},
                {"id":"104","text":"second","created_at":"2024-05-01T12:04:00.000Z","edit_history_tweet_ids":["104"]},
                {"id":"103","text":"first","created_at":"2024-05-01T12:03:00.000Z","edit_history_tweet_ids":["103"]}
            ],
            "meta": {"result_count":3,"newest_id":"105","oldest_id":"103"}
        }"#;

        let page = parse_timeline(body).unwrap();
        assert!(page.next_token.is_none());
        let posts = page.posts;
        let ids: Vec<u64> = posts.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![105, 104, 103]);
        assert_eq!(posts[2].text, "first");
        assert!(posts[0].created_at.is_some());
    }

    #[test]
    fn test_parse_timeline_without_data_is_empty() {
        let body = r#"{"meta":{"result_count":0}}"#;
        assert!(parse_timeline(body).unwrap().posts.is_empty());
    }

    #[test]
    fn test_parse_timeline_rejects_non_numeric_ids() {
        let body = r#"{"data":[{"id":"abc","text":"x"}]}"#;
        assert!(matches!(
            parse_timeline(body),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_rate_limit_reset_header() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from_static("1700000900"));

        assert_eq!(
            rate_limit_reset(&headers, now),
            Utc.timestamp_opt(1_700_000_900, 0).unwrap()
        );
    }

    #[test]
    fn test_rate_limit_retry_after_fallback() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));

        assert_eq!(rate_limit_reset(&headers, now), now + chrono::Duration::seconds(120));
    }

    #[test]
    fn test_rate_limit_without_headers_is_now() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(rate_limit_reset(&HeaderMap::new(), now), now);
    }

    #[test]
    fn test_map_status_error() {
        let body = r#"{"title":"Unauthorized","type":"about:blank","status":401,"detail":"Unauthorized"}"#;
        assert!(matches!(
            map_status_error(401, body, "fetch timeline"),
            SourceError::Authentication(_)
        ));
        assert!(matches!(
            map_status_error(503, "Service Unavailable", "fetch timeline"),
            SourceError::Network(_)
        ));

        let rejected = map_status_error(400, r#"{"title":"Invalid Request"}"#, "resolve account");
        match rejected {
            SourceError::InvalidResponse(msg) => {
                assert!(msg.contains("HTTP 400"));
                assert!(msg.contains("Invalid Request"));
            }
            other => panic!("Expected InvalidResponse, got {:?}", other),
        }
    }

    fn stub_source(server: &StubServer, page_size: u8) -> TwitterSource {
        TwitterSource::new(
            reqwest::Client::new(),
            server.base_url(),
            SecretString::from("bearer-token".to_string()),
            page_size,
        )
    }

    /// Timeline page body with `ids` newest first
    fn page(ids: &[u64], next_token: Option<&str>) -> String {
        let data: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| serde_json::json!({"id": id.to_string(), "text": format!("post {}", id)}))
            .collect();
        let mut meta = serde_json::json!({"result_count": ids.len()});
        if let Some(token) = next_token {
            meta["next_token"] = serde_json::json!(token);
        }
        serde_json::json!({"data": data, "meta": meta}).to_string()
    }

    fn account() -> AccountId {
        AccountId("1".to_string())
    }

    #[tokio::test]
    async fn test_resolve_account_over_http() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            r#"{"data":{"id":"1456789","username":"MycelialOracle"}}"#,
        )]);

        let account = stub_source(&server, 5)
            .resolve_account("@MycelialOracle")
            .await
            .unwrap();

        assert_eq!(account, AccountId("1456789".to_string()));
        let requests = server.requests();
        assert_eq!(requests[0].line, "GET /2/users/by/username/MycelialOracle");
        assert!(requests[0].has_header("authorization: bearer bearer-token"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_account_is_not_found() {
        let server = StubServer::start(vec![StubResponse::json(
            404,
            r#"{"title":"Not Found Error","detail":"Could not find user"}"#,
        )]);

        let err = stub_source(&server, 5)
            .resolve_account("nobody")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Source(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_first_fetch_omits_since_id() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            &page(&[205, 204, 203, 202, 201], Some("older")),
        )]);

        let posts = stub_source(&server, 5).fetch_since(&account(), None).await.unwrap();

        let ids: Vec<u64> = posts.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![205, 204, 203, 202, 201]);

        // Without a cursor only the newest page is wanted
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query("max_results").as_deref(), Some("5"));
        assert_eq!(requests[0].query("tweet.fields").as_deref(), Some("created_at"));
        assert_eq!(requests[0].query("since_id"), None);
    }

    #[tokio::test]
    async fn test_page_size_is_sent_as_max_results() {
        let server = StubServer::start(vec![StubResponse::json(200, r#"{"meta":{"result_count":0}}"#)]);

        let posts = stub_source(&server, 20)
            .fetch_since(&account(), Some(PostId(100)))
            .await
            .unwrap();

        assert!(posts.is_empty());
        let requests = server.requests();
        assert_eq!(requests[0].query("max_results").as_deref(), Some("20"));
        assert_eq!(requests[0].query("since_id").as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_burst_larger_than_a_page_returns_oldest_page() {
        let server = StubServer::start(vec![
            StubResponse::json(200, &page(&[110, 109, 108, 107, 106], Some("page2"))),
            StubResponse::json(200, &page(&[105, 104, 103, 102, 101], None)),
        ]);

        let posts = stub_source(&server, 5)
            .fetch_since(&account(), Some(PostId(100)))
            .await
            .unwrap();

        let ids: Vec<u64> = posts.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![105, 104, 103, 102, 101]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query("pagination_token"), None);
        assert_eq!(requests[1].query("pagination_token").as_deref(), Some("page2"));
        assert_eq!(requests[1].query("since_id").as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_trailing_empty_page_keeps_last_posts() {
        let server = StubServer::start(vec![
            StubResponse::json(200, &page(&[107, 106, 105, 104, 103], Some("page2"))),
            StubResponse::json(200, &page(&[102, 101], Some("page3"))),
            StubResponse::json(200, r#"{"meta":{"result_count":0}}"#),
        ]);

        let posts = stub_source(&server, 5)
            .fetch_since(&account(), Some(PostId(100)))
            .await
            .unwrap();

        let ids: Vec<u64> = posts.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![102, 101]);
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_http_429_is_rate_limited_until_reset() {
        let server = StubServer::start(vec![StubResponse::json(
            429,
            r#"{"title":"Too Many Requests","detail":"Too Many Requests","status":429}"#,
        )
        .header("x-rate-limit-reset", "1700000900")]);

        let err = stub_source(&server, 5)
            .fetch_since(&account(), Some(PostId(100)))
            .await
            .unwrap_err();

        assert_eq!(
            err.rate_limited_until(),
            Some(Utc.timestamp_opt(1_700_000_900, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_http_401_is_authentication() {
        let server = StubServer::start(vec![StubResponse::json(
            401,
            r#"{"title":"Unauthorized","detail":"Unauthorized","status":401}"#,
        )]);

        let err = stub_source(&server, 5)
            .fetch_since(&account(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Source(SourceError::Authentication(_))));
    }
}
