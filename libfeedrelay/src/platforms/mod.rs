//! External collaborators of the relay loop
//!
//! The relay reads from one [`FeedSource`] and writes to one [`MessageSink`].
//! Both are traits so the loop can be driven by the mocks in [`mock`] in
//! tests and by the HTTP adapters in production.
//!
//! # Examples
//!
//! ```no_run
//! use libfeedrelay::platforms::{http_client, FeedSource, twitter::TwitterSource};
//! use secrecy::SecretString;
//!
//! # async fn example() -> libfeedrelay::error::Result<()> {
//! let source = TwitterSource::new(
//!     http_client()?,
//!     "https://api.twitter.com".to_string(),
//!     SecretString::from("bearer".to_string()),
//!     5,
//! );
//!
//! let account = source.resolve_account("MycelialOracle").await?;
//! let posts = source.fetch_since(&account, None).await?;
//! println!("{} recent posts", posts.len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::{AccountId, Cursor, Post};

pub mod telegram;
pub mod twitter;

// Mock collaborators are available for all builds to support integration tests
pub mod mock;

#[cfg(test)]
mod stub;

/// Source of new posts for a single account
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Map a human-readable handle to the provider's stable account id
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotFound` if the handle does not name an existing,
    /// accessible account.
    async fn resolve_account(&self, handle: &str) -> Result<AccountId>;

    /// Fetch posts newer than `cursor`, newest first
    ///
    /// At most one page is returned; an empty vector means nothing is new.
    ///
    /// # Errors
    ///
    /// - `SourceError::RateLimited` when the provider throttles the request
    /// - any other `SourceError` for network, auth or response failures
    async fn fetch_since(&self, account: &AccountId, cursor: Cursor) -> Result<Vec<Post>>;

    /// Lowercase provider name, for logs
    fn name(&self) -> &str;
}

/// Destination for relayed posts
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send one text message to `destination`
    async fn deliver(&self, destination: &str, text: &str) -> Result<()>;

    /// Longest message the destination accepts, in characters
    fn max_message_length(&self) -> Option<usize>;

    fn name(&self) -> &str;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for the production adapters
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::InvalidValue(format!("Failed to build HTTP client: {}", e)).into())
}
