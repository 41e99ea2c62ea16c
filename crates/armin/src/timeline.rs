//! Message timeline: fetching pages of one conversation and reconciling them
//! with what is already loaded.
//!
//! # Reconciliation rules
//!
//! - A head page (offset 0) with zero rows never replaces a non-empty list.
//! - Fetched rows win over loaded rows with the same id.
//! - Loaded rows inside a head page's time window but missing from it were
//!   deleted remotely and are dropped. Rows newer than the window stay: the
//!   page may have been fetched before they existed. Rows older than a full
//!   page stay too.
//! - Older pages are merged in front of what is loaded.

use chat_core::{ChatResult, Message, MessageFilter, MessageId, ProfileId, RemoteStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Observable status of the open timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

/// One page of a conversation as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageFetch {
    pub peer_id: ProfileId,
    /// Rows of the page, oldest first.
    pub messages: Vec<Message>,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl PageFetch {
    pub fn is_head(&self) -> bool {
        self.offset == 0
    }
}

/// Merge directional scans into one list ordered by `created_at`.
///
/// Ties keep input order and the first occurrence of an id wins.
pub fn merge_directional(scans: impl IntoIterator<Item = Vec<Message>>) -> Vec<Message> {
    let mut merged: Vec<Message> = scans.into_iter().flatten().collect();
    merged.sort_by_key(|message| message.created_at);
    let mut seen = HashSet::with_capacity(merged.len());
    merged.retain(|message| seen.insert(message.id.clone()));
    merged
}

/// Slice `history` (oldest first) down to the requested page.
///
/// Offset 0 takes the newest `limit` rows. Larger offsets take the `limit`
/// rows preceding `anchor` (the oldest loaded message), or count back from
/// the newest row when there is no anchor.
pub fn slice_window(
    history: &[Message],
    limit: usize,
    offset: usize,
    anchor: Option<&Message>,
) -> Vec<Message> {
    let end = if offset == 0 {
        history.len()
    } else if let Some(anchor) = anchor {
        history
            .iter()
            .position(|message| message.id == anchor.id)
            .unwrap_or_else(|| history.partition_point(|m| m.created_at < anchor.created_at))
    } else {
        history.len().saturating_sub(offset)
    };
    let start = end.saturating_sub(limit);
    history[start..end].to_vec()
}

/// Combine a fetched page with the loaded messages.
pub fn reconcile(existing: &[Message], page: &PageFetch) -> Vec<Message> {
    if page.messages.is_empty() {
        return existing.to_vec();
    }

    let fetched_ids: HashSet<&MessageId> = page.messages.iter().map(|m| &m.id).collect();
    let window_start = page.messages.first().map(|m| m.created_at);
    let window_end = page.messages.last().map(|m| m.created_at);
    // A short head page is the whole conversation up to its newest row.
    let covers_history = page.is_head() && page.messages.len() < page.limit;

    let deleted_remotely = |message: &Message| -> bool {
        if !page.is_head() {
            return false;
        }
        let (Some(start), Some(end)) = (window_start, window_end) else {
            return false;
        };
        if message.created_at > end {
            return false;
        }
        covers_history || message.created_at >= start
    };

    let mut kept: Vec<Message> = Vec::with_capacity(existing.len() + page.messages.len());
    let mut dropped = 0usize;
    for message in existing {
        if fetched_ids.contains(&message.id) {
            continue;
        }
        if deleted_remotely(message) {
            dropped += 1;
            continue;
        }
        kept.push(message.clone());
    }

    if dropped > 0 {
        debug!(peer_id = %page.peer_id, dropped, "dropping messages deleted remotely");
    }

    merge_directional([page.messages.clone(), kept])
}

/// Fetches pages of the conversation between the local identity and a peer.
pub struct MessageTimeline {
    store: Arc<dyn RemoteStore>,
    me: ProfileId,
}

impl MessageTimeline {
    pub fn new(store: Arc<dyn RemoteStore>, me: ProfileId) -> Self {
        Self { store, me }
    }

    /// Both directions of the conversation, merged and ordered.
    ///
    /// Issued as two equality scans rather than one OR filter.
    pub async fn load_history(&self, peer: &ProfileId) -> ChatResult<Vec<Message>> {
        let outgoing = MessageFilter::sent_by(&self.me).to(peer);
        let incoming = MessageFilter::sent_by(peer).to(&self.me);
        let (sent, received) = tokio::try_join!(
            self.store.list_messages(&outgoing),
            self.store.list_messages(&incoming)
        )?;
        Ok(merge_directional([sent, received]))
    }

    /// Fetch one page without touching local state.
    pub async fn fetch_window(
        &self,
        peer: &ProfileId,
        limit: usize,
        offset: usize,
        anchor: Option<&Message>,
    ) -> ChatResult<PageFetch> {
        let history = self.load_history(peer).await?;
        let messages = slice_window(&history, limit, offset, anchor);
        let has_more = messages.len() == limit;

        debug!(
            peer_id = %peer,
            total = history.len(),
            fetched = messages.len(),
            offset,
            has_more,
            "fetched message page"
        );

        Ok(PageFetch {
            peer_id: peer.clone(),
            messages,
            limit,
            offset,
            has_more,
        })
    }

    /// Fetch one page and reconcile it against `existing`.
    ///
    /// Returns the reconciled list and whether older messages remain.
    pub async fn fetch_page(
        &self,
        peer: &ProfileId,
        limit: usize,
        offset: usize,
        existing: &[Message],
    ) -> ChatResult<(Vec<Message>, bool)> {
        let anchor = if offset > 0 { existing.first() } else { None };
        let page = self.fetch_window(peer, limit, offset, anchor).await?;
        Ok((reconcile(existing, &page), page.has_more))
    }
}

impl std::fmt::Debug for MessageTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTimeline")
            .field("me", &self.me)
            .finish_non_exhaustive()
    }
}
