//! Mock collaborators for testing
//!
//! Scriptable stand-ins for the feed source, the message sink and the cursor
//! store. Each mock is cheap to clone and clones share state, so a test can
//! hand one copy to the relay and inspect another afterwards.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::cursor::CursorStore;
use crate::error::{CursorError, Result, SinkError, SourceError};
use crate::platforms::{FeedSource, MessageSink};
use crate::types::{AccountId, Cursor, Post, PostId};

/// Feed source that answers fetches from a script
///
/// Each fetch consumes one scripted outcome; once the script is exhausted every
/// fetch returns no posts.
#[derive(Clone)]
pub struct MockSource {
    handle: String,
    account: AccountId,
    script: Arc<Mutex<VecDeque<std::result::Result<Vec<Post>, SourceError>>>>,
    fetches: Arc<Mutex<Vec<(AccountId, Cursor)>>>,
    resolve_calls: Arc<Mutex<usize>>,
}

impl MockSource {
    /// Source that knows exactly one account
    pub fn new(handle: &str, account_id: &str) -> Self {
        Self {
            handle: handle.trim_start_matches('@').to_string(),
            account: AccountId(account_id.to_string()),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fetches: Arc::new(Mutex::new(Vec::new())),
            resolve_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue a successful fetch; `ids` are given newest first, as the provider does
    pub fn push_posts(&self, ids: &[u64]) -> &Self {
        let posts = ids
            .iter()
            .map(|id| Post::new(*id, format!("post {}", id)))
            .collect();
        self.push_page(posts)
    }

    pub fn push_page(&self, posts: Vec<Post>) -> &Self {
        self.script.lock().unwrap().push_back(Ok(posts));
        self
    }

    pub fn push_error(&self, error: SourceError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// Every `(account, cursor)` pair passed to `fetch_since`, in call order
    pub fn fetches(&self) -> Vec<(AccountId, Cursor)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn resolve_call_count(&self) -> usize {
        *self.resolve_calls.lock().unwrap()
    }
}

#[async_trait]
impl FeedSource for MockSource {
    async fn resolve_account(&self, handle: &str) -> Result<AccountId> {
        *self.resolve_calls.lock().unwrap() += 1;

        let handle = handle.trim_start_matches('@');
        if handle.eq_ignore_ascii_case(&self.handle) {
            Ok(self.account.clone())
        } else {
            Err(SourceError::NotFound(format!("@{}: not found or access denied", handle)).into())
        }
    }

    async fn fetch_since(&self, account: &AccountId, cursor: Cursor) -> Result<Vec<Post>> {
        self.fetches
            .lock()
            .unwrap()
            .push((account.clone(), cursor));

        match self.script.lock().unwrap().pop_front() {
            Some(Ok(posts)) => Ok(posts),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "mock-source"
    }
}

/// Message sink that records what it was asked to deliver
///
/// Failures are scripted per call: the n-th queued outcome applies to the
/// n-th delivery attempt, and attempts past the script succeed.
#[derive(Clone, Default)]
pub struct MockSink {
    outcomes: Arc<Mutex<VecDeque<Option<SinkError>>>>,
    delivered: Arc<Mutex<Vec<(String, String)>>>,
    attempts: Arc<Mutex<usize>>,
    max_length: Option<usize>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            max_length: Some(limit),
            ..Self::default()
        }
    }

    /// Next delivery attempt succeeds
    pub fn push_success(&self) -> &Self {
        self.outcomes.lock().unwrap().push_back(None);
        self
    }

    /// Next delivery attempt fails with `error`
    pub fn push_failure(&self, error: SinkError) -> &Self {
        self.outcomes.lock().unwrap().push_back(Some(error));
        self
    }

    /// `(destination, text)` for every successful delivery, in order
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Texts of successful deliveries, in order
    pub fn delivered_texts(&self) -> Vec<String> {
        self.delivered().into_iter().map(|(_, text)| text).collect()
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl MessageSink for MockSink {
    async fn deliver(&self, destination: &str, text: &str) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;

        if let Some(Some(error)) = self.outcomes.lock().unwrap().pop_front() {
            return Err(error.into());
        }

        self.delivered
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }

    fn max_message_length(&self) -> Option<usize> {
        self.max_length
    }

    fn name(&self) -> &str {
        "mock-sink"
    }
}

/// In-memory cursor store with a save history and switchable failures
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    value: Arc<Mutex<Cursor>>,
    saves: Arc<Mutex<Vec<PostId>>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(id: u64) -> Self {
        let store = Self::default();
        *store.value.lock().unwrap() = Some(PostId(id));
        store
    }

    /// Make subsequent saves fail (simulates a crash or full disk after delivery)
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    /// Every successfully saved id, in order
    pub fn saves(&self) -> Vec<PostId> {
        self.saves.lock().unwrap().clone()
    }

    pub fn current(&self) -> Cursor {
        *self.value.lock().unwrap()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Cursor {
        *self.value.lock().unwrap()
    }

    fn save(&self, id: PostId) -> Result<()> {
        if *self.fail_saves.lock().unwrap() {
            return Err(CursorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock save failure",
            ))
            .into());
        }

        *self.value.lock().unwrap() = Some(id);
        self.saves.lock().unwrap().push(id);
        Ok(())
    }
}
