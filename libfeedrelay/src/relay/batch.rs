//! Preparing fetched posts for delivery

use std::borrow::Cow;
use std::collections::VecDeque;

use tracing::warn;

use crate::types::{Cursor, Post};

const ELLIPSIS: char = '…';

/// Order a fetched page oldest first, dropping anything already forwarded
///
/// The provider answers newest first, so for well-formed pages this is a
/// reversal. Sorting by id keeps delivery chronological even if a page comes
/// back in some other order. Posts at or below `cursor` and repeated ids are
/// dropped so the cursor can only move forward.
pub fn into_chronological(mut posts: Vec<Post>, cursor: Cursor) -> VecDeque<Post> {
    posts.sort_by_key(|post| post.id);
    posts.dedup_by_key(|post| post.id);

    posts
        .into_iter()
        .filter(|post| match cursor {
            Some(last) if post.id <= last => {
                warn!(post_id = %post.id, cursor = %last, "Skipping post at or behind cursor");
                false
            }
            _ => true,
        })
        .collect()
}

/// Fit `text` into a sink's length limit, counted in characters
///
/// Over-long text is cut so that, with a trailing `…`, it is exactly `limit`
/// characters.
pub fn fit_to_limit(text: &str, limit: Option<usize>) -> Cow<'_, str> {
    let Some(limit) = limit else {
        return Cow::Borrowed(text);
    };

    if text.chars().count() <= limit {
        return Cow::Borrowed(text);
    }
    if limit == 0 {
        return Cow::Owned(String::new());
    }

    let mut truncated: String = text.chars().take(limit - 1).collect();
    truncated.push(ELLIPSIS);
    Cow::Owned(truncated)
}
