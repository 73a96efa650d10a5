//! The relay loop
//!
//! A three-state machine that moves posts from a [`FeedSource`] to a
//! [`MessageSink`]:
//!
//! ```text
//!            fetch ok, posts           deliver ok, more left
//!  Polling ─────────────────▶ Delivering ───────────────┐
//!     ▲  │                     │   ▲                     │
//!     │  │ empty / error /     │   └─────────────────────┘
//!     │  │ rate limited        │ batch done / error
//!     │  ▼                     ▼
//!     └────────── Backoff ◀────┘
//!        slept
//! ```
//!
//! The cursor only advances after a successful delivery and is persisted
//! before the next post is attempted. Failures never leave the loop; they
//! become a [`Backoff`] with a delay that depends on the cause.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::error::{ConfigError, RelayError, Result};
use crate::platforms::{FeedSource, MessageSink};
use crate::types::{AccountId, Cursor, Post};

pub mod batch;
pub mod clock;

pub use batch::{fit_to_limit, into_chronological};
pub use clock::{Clock, MockClock, SystemClock};

/// Longest single sleep while a shutdown flag is being watched
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// About to fetch from the feed source
    Polling,
    /// Posts still to deliver, oldest first
    Delivering(VecDeque<Post>),
    /// Waiting before the next poll
    Backoff(Backoff),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub delay: Duration,
    pub cause: BackoffCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffCause {
    /// Normal wait between cycles
    PollInterval,
    /// The feed source asked us to slow down
    RateLimited,
    /// Something failed; retry after the error backoff
    Failure,
}

/// Everything the loop needs from the configuration
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub handle: String,
    pub destination: String,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub rate_limit_floor: Duration,
    pub pacing: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let handle = config
            .handle()
            .ok_or_else(|| ConfigError::MissingField("source.handle".to_string()))?;
        let destination = config
            .chat_id()
            .ok_or_else(|| ConfigError::MissingField("sink.chat_id".to_string()))?;

        Ok(Self {
            handle: handle.to_string(),
            destination: destination.to_string(),
            poll_interval: config.relay.poll_interval(),
            error_backoff: config.relay.error_backoff(),
            rate_limit_floor: config.relay.rate_limit_floor(),
            pacing: config.relay.pacing(),
        })
    }
}

pub struct Relay {
    source: Box<dyn FeedSource>,
    sink: Box<dyn MessageSink>,
    store: Box<dyn CursorStore>,
    clock: Box<dyn Clock>,
    settings: RelaySettings,
    account: AccountId,
    cursor: Cursor,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Relay {
    /// Resolve the account and load the cursor
    ///
    /// # Errors
    ///
    /// Returns `RelayError::AccountResolution` if the handle cannot be
    /// resolved. This is fatal: retrying cannot make an account exist.
    pub async fn start(
        settings: RelaySettings,
        source: Box<dyn FeedSource>,
        sink: Box<dyn MessageSink>,
        store: Box<dyn CursorStore>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        info!(handle = %settings.handle, source = source.name(), "Monitoring account");

        let account = source
            .resolve_account(&settings.handle)
            .await
            .map_err(|e| RelayError::AccountResolution(format!("@{}: {}", settings.handle, e)))?;

        let cursor = store.load();
        match cursor {
            Some(id) => info!(account = %account, cursor = %id, "Resuming after last forwarded post"),
            None => info!(account = %account, "No cursor yet, starting from the latest page"),
        }

        Ok(Self {
            source,
            sink,
            store,
            clock,
            settings,
            account,
            cursor,
            shutdown: None,
        })
    }

    /// Watch `flag`; `run` returns once it is set
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Run until the shutdown flag is set; without a flag, run forever
    pub async fn run(&mut self) {
        let mut state = RelayState::Polling;
        while !self.shutdown_requested() {
            state = self.step(state).await;
        }
        info!(cursor = ?self.cursor, "Relay loop stopped");
    }

    /// Run one poll and its deliveries, stopping at the next backoff
    ///
    /// The returned backoff has not been slept.
    pub async fn run_cycle(&mut self) -> Backoff {
        let mut state = RelayState::Polling;
        loop {
            state = match state {
                RelayState::Backoff(backoff) => return backoff,
                other => self.step(other).await,
            };
        }
    }

    /// Perform exactly one transition
    pub async fn step(&mut self, state: RelayState) -> RelayState {
        match state {
            RelayState::Polling => self.poll().await,
            RelayState::Delivering(batch) => self.deliver_next(batch).await,
            RelayState::Backoff(backoff) => {
                self.wait(backoff.delay).await;
                RelayState::Polling
            }
        }
    }

    async fn poll(&mut self) -> RelayState {
        debug!(account = %self.account, cursor = ?self.cursor, "Polling");

        let posts = match self.source.fetch_since(&self.account, self.cursor).await {
            Ok(posts) => posts,
            Err(e) => return self.backoff_for(e),
        };

        let batch = into_chronological(posts, self.cursor);
        if batch.is_empty() {
            info!(handle = %self.settings.handle, "No new posts");
            return self.poll_interval();
        }

        info!(count = batch.len(), "Fetched new posts");
        RelayState::Delivering(batch)
    }

    async fn deliver_next(&mut self, mut batch: VecDeque<Post>) -> RelayState {
        let Some(post) = batch.pop_front() else {
            return self.poll_interval();
        };

        let limit = self.sink.max_message_length();
        let text = fit_to_limit(&post.text, limit);
        if matches!(text, Cow::Owned(_)) {
            warn!(post_id = %post.id, limit = ?limit, "Post truncated to fit the destination");
        }

        if let Err(e) = self.sink.deliver(&self.settings.destination, &text).await {
            return self.backoff_for(e);
        }
        info!(post_id = %post.id, sink = self.sink.name(), "Forwarded post");

        // Advance in memory first: a failed save must not cause this process
        // to deliver the same post again.
        self.cursor = Some(post.id);
        if let Err(e) = self.store.save(post.id) {
            return self.backoff_for(e);
        }

        if batch.is_empty() {
            return self.poll_interval();
        }

        if !self.settings.pacing.is_zero() {
            self.wait(self.settings.pacing).await;
        }
        RelayState::Delivering(batch)
    }

    fn poll_interval(&self) -> RelayState {
        RelayState::Backoff(Backoff {
            delay: self.settings.poll_interval,
            cause: BackoffCause::PollInterval,
        })
    }

    /// Turn a failure into the matching backoff
    fn backoff_for(&self, error: RelayError) -> RelayState {
        if let Some(until) = error.rate_limited_until() {
            let delay = rate_limit_delay(until, self.clock.now(), self.settings.rate_limit_floor);
            warn!(
                retry_after = %until,
                delay = %humantime::format_duration(delay),
                cursor = ?self.cursor,
                "Rate limited by feed source"
            );
            return RelayState::Backoff(Backoff {
                delay,
                cause: BackoffCause::RateLimited,
            });
        }

        error!(
            error = %error,
            handle = %self.settings.handle,
            cursor = ?self.cursor,
            at = %self.clock.now(),
            delay = %humantime::format_duration(self.settings.error_backoff),
            "Relay cycle failed, retrying"
        );
        RelayState::Backoff(Backoff {
            delay: self.settings.error_backoff,
            cause: BackoffCause::Failure,
        })
    }

    async fn wait(&self, delay: Duration) {
        let Some(flag) = &self.shutdown else {
            self.clock.sleep(delay).await;
            return;
        };

        // Sleep in short slices so a shutdown request is seen promptly
        let mut remaining = delay;
        while !remaining.is_zero() && !flag.load(Ordering::Relaxed) {
            let slice = remaining.min(SHUTDOWN_POLL);
            self.clock.sleep(slice).await;
            remaining -= slice;
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// How long to back off for a rate limit that lifts at `until`
///
/// Never shorter than `floor`, which also covers a reset time in the past
/// due to clock skew.
pub fn rate_limit_delay(until: DateTime<Utc>, now: DateTime<Utc>, floor: Duration) -> Duration {
    (until - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(floor)
}
