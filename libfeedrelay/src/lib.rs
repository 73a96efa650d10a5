//! Feedrelay - forward a single account's posts to a messaging channel
//!
//! This library provides the relay loop and the pieces it coordinates: a
//! durable cursor store, a feed source adapter and a message sink adapter.

pub mod config;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod relay;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use cursor::{CursorStore, FileCursorStore};
pub use error::{RelayError, Result};
pub use relay::{Relay, RelayState};
pub use types::{AccountId, Cursor, Post, PostId};
