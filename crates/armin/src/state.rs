//! Observable engine state and the reducer that mutates it.
//!
//! Every change to [`ChatState`] goes through [`apply`], so results of
//! overlapping fetches are always reconciled against the latest state rather
//! than the state seen when the fetch started.

use chat_core::{
    ConversationState, ConversationSummary, Message, MessageId, ProfileId, UNKNOWN_PEER_NAME,
    UNKNOWN_PEER_ROLE,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::timeline::{reconcile, PageFetch, TimelineStatus};

/// Everything the UI renders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChatState {
    pub conversations: Vec<ConversationSummary>,
    pub current_conversation: Option<ConversationState>,
    /// Directory load in progress.
    pub is_loading: bool,
    /// Last user-visible error. A new error replaces the previous one.
    pub error: Option<String>,
}

impl ChatState {
    pub fn current_peer(&self) -> Option<&ProfileId> {
        self.current_conversation.as_ref().map(|c| c.peer_id())
    }

    pub fn conversation(&self, peer: &ProfileId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|c| &c.peer_id == peer)
    }

    /// Whether `peer` is open and already shows at least one message.
    pub fn has_messages_for(&self, peer: &ProfileId) -> bool {
        self.current_conversation
            .as_ref()
            .is_some_and(|c| c.peer_id() == peer && !c.messages.is_empty())
    }

    pub fn timeline_status(&self) -> TimelineStatus {
        match &self.current_conversation {
            None => TimelineStatus::Idle,
            Some(c) if c.is_loading => TimelineStatus::Loading,
            Some(_) if self.error.is_some() => TimelineStatus::Error,
            Some(_) => TimelineStatus::Ready,
        }
    }
}

/// A single state transition.
#[derive(Clone, Debug)]
pub enum Action {
    ConversationsRequested,
    ConversationsLoaded(Vec<ConversationSummary>),
    ConversationsFailed(String),
    /// Open a conversation. Reopening the open peer keeps its messages.
    ConversationOpened(ConversationSummary),
    MessagesLoading {
        peer: ProfileId,
    },
    PageFetched {
        page: PageFetch,
    },
    MessagesFailed {
        peer: ProfileId,
        error: String,
    },
    /// Claim the load of the page preceding the loaded messages.
    OlderPageRequested {
        peer: ProfileId,
    },
    OlderPageFailed {
        peer: ProfileId,
        error: String,
    },
    MessageAppended(Message),
    MessageRemoved(MessageId),
    MarkedRead {
        me: ProfileId,
        peer: ProfileId,
        at: DateTime<Utc>,
    },
    /// Snapshot loaded from the persistent cache.
    Restored(ConversationState),
    Failed(String),
    ClearError,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationsRequested => "conversations_requested",
            Self::ConversationsLoaded(_) => "conversations_loaded",
            Self::ConversationsFailed(_) => "conversations_failed",
            Self::ConversationOpened(_) => "conversation_opened",
            Self::MessagesLoading { .. } => "messages_loading",
            Self::PageFetched { .. } => "page_fetched",
            Self::MessagesFailed { .. } => "messages_failed",
            Self::OlderPageRequested { .. } => "older_page_requested",
            Self::OlderPageFailed { .. } => "older_page_failed",
            Self::MessageAppended(_) => "message_appended",
            Self::MessageRemoved(_) => "message_removed",
            Self::MarkedRead { .. } => "marked_read",
            Self::Restored(_) => "restored",
            Self::Failed(_) => "failed",
            Self::ClearError => "clear_error",
        }
    }
}

fn is_placeholder(summary: &ConversationSummary) -> bool {
    summary.peer_name == UNKNOWN_PEER_NAME && summary.peer_role == UNKNOWN_PEER_ROLE
}

/// Apply `action` to `state`. Returns whether anything changed.
pub fn apply(state: &mut ChatState, action: Action) -> bool {
    let before = state.clone();
    match action {
        Action::ConversationsRequested => {
            state.is_loading = true;
        }
        Action::ConversationsLoaded(mut conversations) => {
            // Keep display fields we already know when a rebuild could not
            // resolve them.
            for summary in conversations.iter_mut().filter(|s| is_placeholder(s)) {
                if let Some(known) = before.conversation(&summary.peer_id) {
                    summary.peer_name = known.peer_name.clone();
                    summary.peer_role = known.peer_role.clone();
                }
            }
            state.conversations = conversations;
            state.is_loading = false;
            state.error = None;
        }
        Action::ConversationsFailed(error) => {
            state.is_loading = false;
            state.error = Some(error);
        }
        Action::ConversationOpened(summary) => {
            let same_peer = state.current_peer() == Some(&summary.peer_id);
            match state.current_conversation.as_mut() {
                Some(current) if same_peer => {
                    if !is_placeholder(&summary) {
                        current.summary = summary;
                    }
                }
                _ => {
                    let mut conversation = ConversationState::new(summary);
                    conversation.is_loading = true;
                    state.current_conversation = Some(conversation);
                }
            }
        }
        Action::MessagesLoading { peer } => {
            if let Some(current) = open_on(state, &peer) {
                current.is_loading = true;
            }
        }
        Action::PageFetched { page } => {
            if let Some(current) = open_on(state, &page.peer_id) {
                let messages = reconcile(&current.messages, &page);
                current.has_more = if page.is_head() {
                    // A head page says nothing about older pages already loaded.
                    let older_loaded = current
                        .messages
                        .first()
                        .zip(page.messages.first())
                        .is_some_and(|(oldest, first)| oldest.created_at < first.created_at);
                    if older_loaded {
                        current.has_more
                    } else {
                        page.has_more
                    }
                } else {
                    page.has_more
                };
                current.messages = messages;
                if !page.is_head() {
                    current.loading_more = false;
                }
                // A head page landing mid load-more leaves that load claimed.
                current.is_loading = current.loading_more;
                state.error = None;
            }
        }
        Action::MessagesFailed { peer, error } => {
            if let Some(current) = open_on(state, &peer) {
                current.is_loading = current.loading_more;
            }
            state.error = Some(error);
        }
        Action::OlderPageRequested { peer } => {
            if let Some(current) = open_on(state, &peer) {
                if current.has_more && !current.is_loading && !current.loading_more {
                    current.loading_more = true;
                    current.is_loading = true;
                }
            }
        }
        Action::OlderPageFailed { peer, error } => {
            if let Some(current) = open_on(state, &peer) {
                current.loading_more = false;
                current.is_loading = false;
            }
            state.error = Some(error);
        }
        Action::MessageAppended(message) => {
            let peer = state.current_peer().cloned();
            if let Some(current) = state.current_conversation.as_mut() {
                let belongs_here = peer
                    .as_ref()
                    .is_some_and(|peer| &message.sender_id == peer || &message.receiver_id == peer);
                if belongs_here && !current.messages.iter().any(|m| m.id == message.id) {
                    let index = current
                        .messages
                        .partition_point(|m| m.created_at <= message.created_at);
                    current.messages.insert(index, message.clone());
                }
            }
            bump_activity(state, &message);
        }
        Action::MessageRemoved(id) => {
            if let Some(current) = state.current_conversation.as_mut() {
                current.messages.retain(|m| m.id != id);
            }
        }
        Action::MarkedRead { me, peer, at } => {
            if let Some(current) = open_on(state, &peer) {
                for message in current.messages.iter_mut() {
                    if message.sender_id == peer && message.is_unread_for(&me) {
                        message.read_at = Some(at);
                    }
                }
                current.summary.unread_count = 0;
            }
            if let Some(summary) = state.conversations.iter_mut().find(|s| s.peer_id == peer) {
                summary.unread_count = 0;
            }
        }
        Action::Restored(mut conversation) => {
            conversation.is_loading = false;
            conversation.loading_more = false;
            state.current_conversation = Some(conversation);
        }
        Action::Failed(error) => {
            state.error = Some(error);
        }
        Action::ClearError => {
            state.error = None;
        }
    }
    *state != before
}

fn open_on<'a>(state: &'a mut ChatState, peer: &ProfileId) -> Option<&'a mut ConversationState> {
    state
        .current_conversation
        .as_mut()
        .filter(|current| current.peer_id() == peer)
}

/// Move the directory entry of the message's peer to the front.
fn bump_activity(state: &mut ChatState, message: &Message) {
    let Some(index) = state
        .conversations
        .iter()
        .position(|s| s.peer_id == message.sender_id || s.peer_id == message.receiver_id)
    else {
        return;
    };
    let mut summary = state.conversations.remove(index);
    if message.created_at > summary.last_activity_at {
        summary.last_activity_at = message.created_at;
    }
    let position = state
        .conversations
        .partition_point(|s| s.last_activity_at > summary.last_activity_at);
    state.conversations.insert(position, summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, message_at};

    fn summary(peer: &str, name: &str, secs: i64, unread: u32) -> ConversationSummary {
        ConversationSummary {
            peer_id: peer.into(),
            peer_name: name.to_string(),
            peer_role: "atleta".to_string(),
            last_activity_at: at(secs),
            unread_count: unread,
        }
    }

    fn opened(peer: &str, messages: Vec<Message>) -> ChatState {
        let mut state = ChatState::default();
        apply(&mut state, Action::ConversationOpened(summary(peer, "Q", 0, 0)));
        apply(
            &mut state,
            Action::PageFetched {
                page: PageFetch {
                    peer_id: peer.into(),
                    has_more: false,
                    messages,
                    limit: 50,
                    offset: 0,
                },
            },
        );
        state
    }

    #[test]
    fn directory_reload_keeps_open_conversation() {
        let mut state = opened("q", vec![message_at("m1", "q", "me", 1)]);
        apply(
            &mut state,
            Action::ConversationsLoaded(vec![summary("q", "Q", 1, 1)]),
        );

        let current = state.current_conversation.as_ref().unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(state.conversations.len(), 1);
    }

    #[test]
    fn placeholder_rows_keep_known_names() {
        let mut state = ChatState::default();
        apply(
            &mut state,
            Action::ConversationsLoaded(vec![summary("q", "Giulia", 1, 0)]),
        );
        let mut unresolved = ConversationSummary::placeholder("q".into());
        unresolved.last_activity_at = at(5);
        apply(&mut state, Action::ConversationsLoaded(vec![unresolved]));

        assert_eq!(state.conversations[0].peer_name, "Giulia");
        assert_eq!(state.conversations[0].last_activity_at, at(5));
    }

    #[test]
    fn empty_page_never_clears_messages() {
        let mut state = opened("q", vec![message_at("m1", "q", "me", 1)]);
        let changed = apply(
            &mut state,
            Action::PageFetched {
                page: PageFetch {
                    peer_id: "q".into(),
                    messages: vec![],
                    limit: 50,
                    offset: 0,
                    has_more: false,
                },
            },
        );

        assert!(!changed);
        assert_eq!(state.current_conversation.unwrap().messages.len(), 1);
    }

    #[test]
    fn page_for_other_peer_is_ignored() {
        let mut state = opened("q", vec![message_at("m1", "q", "me", 1)]);
        apply(
            &mut state,
            Action::PageFetched {
                page: PageFetch {
                    peer_id: "r".into(),
                    messages: vec![message_at("x", "r", "me", 2)],
                    limit: 50,
                    offset: 0,
                    has_more: false,
                },
            },
        );

        let current = state.current_conversation.unwrap();
        assert_eq!(current.peer_id().as_str(), "q");
        assert_eq!(current.messages[0].id.as_str(), "m1");
    }

    #[test]
    fn head_refresh_keeps_has_more_when_older_pages_loaded() {
        let history = (0..4)
            .map(|i| message_at(&format!("m{i}"), "q", "me", i))
            .collect();
        let mut state = opened("q", history);
        state.current_conversation.as_mut().unwrap().has_more = true;

        apply(
            &mut state,
            Action::PageFetched {
                page: PageFetch {
                    peer_id: "q".into(),
                    messages: vec![
                        message_at("m2", "q", "me", 2),
                        message_at("m3", "q", "me", 3),
                    ],
                    limit: 2,
                    offset: 0,
                    has_more: true,
                },
            },
        );

        let current = state.current_conversation.unwrap();
        assert_eq!(current.messages.len(), 4);
        assert!(current.has_more);
    }

    #[test]
    fn reopening_same_peer_keeps_messages() {
        let mut state = opened("q", vec![message_at("m1", "q", "me", 1)]);
        apply(&mut state, Action::ConversationOpened(summary("q", "Q2", 0, 0)));

        let current = state.current_conversation.unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.summary.peer_name, "Q2");
    }

    #[test]
    fn append_is_sorted_and_bumps_directory() {
        let mut state = opened(
            "q",
            vec![message_at("m1", "q", "me", 1), message_at("m3", "q", "me", 3)],
        );
        apply(
            &mut state,
            Action::ConversationsLoaded(vec![summary("r", "R", 10, 0), summary("q", "Q", 3, 0)]),
        );

        apply(&mut state, Action::MessageAppended(message_at("m2", "me", "q", 20)));
        apply(&mut state, Action::MessageAppended(message_at("m2", "me", "q", 20)));

        let ids: Vec<_> = state
            .current_conversation
            .as_ref()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m3", "m2"]);
        assert_eq!(state.conversations[0].peer_id.as_str(), "q");
        assert_eq!(state.conversations[0].last_activity_at, at(20));
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut state = opened(
            "q",
            vec![message_at("m1", "q", "me", 1), message_at("m2", "me", "q", 2)],
        );
        apply(
            &mut state,
            Action::ConversationsLoaded(vec![summary("q", "Q", 2, 1)]),
        );
        let marked = Action::MarkedRead {
            me: "me".into(),
            peer: "q".into(),
            at: at(100),
        };

        assert!(apply(&mut state, marked.clone()));
        assert!(!apply(&mut state, marked));

        let current = state.current_conversation.as_ref().unwrap();
        assert_eq!(current.messages[0].read_at, Some(at(100)));
        assert_eq!(current.messages[1].read_at, None);
        assert_eq!(state.conversations[0].unread_count, 0);
    }

    #[test]
    fn failures_keep_data_and_set_error() {
        let mut state = opened("q", vec![message_at("m1", "q", "me", 1)]);
        apply(&mut state, Action::MessagesLoading { peer: "q".into() });
        assert_eq!(state.timeline_status(), TimelineStatus::Loading);

        apply(
            &mut state,
            Action::MessagesFailed {
                peer: "q".into(),
                error: "boom".to_string(),
            },
        );

        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.timeline_status(), TimelineStatus::Error);
        assert_eq!(state.current_conversation.as_ref().unwrap().messages.len(), 1);

        apply(&mut state, Action::ClearError);
        assert_eq!(state.timeline_status(), TimelineStatus::Ready);
    }

    fn page(peer: &str, messages: Vec<Message>, limit: usize, offset: usize) -> Action {
        Action::PageFetched {
            page: PageFetch {
                peer_id: peer.into(),
                has_more: messages.len() == limit,
                messages,
                limit,
                offset,
            },
        }
    }

    fn loaded_ids(state: &ChatState) -> Vec<&str> {
        state
            .current_conversation
            .as_ref()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.id.as_str())
            .collect()
    }

    #[test]
    fn out_of_order_head_page_keeps_newer_messages() {
        let mut state = opened("q", vec![]);
        let newest: Vec<_> = (2..5)
            .map(|i| message_at(&format!("m{i}"), "q", "me", i))
            .collect();
        let stale: Vec<_> = (1..4)
            .map(|i| message_at(&format!("m{i}"), "q", "me", i))
            .collect();

        apply(&mut state, page("q", newest, 3, 0));
        apply(&mut state, page("q", stale, 3, 0));

        assert_eq!(loaded_ids(&state), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn older_page_claim_is_exclusive() {
        let history = (3..5)
            .map(|i| message_at(&format!("m{i}"), "q", "me", i))
            .collect();
        let mut state = opened("q", history);
        state.current_conversation.as_mut().unwrap().has_more = true;
        let request = Action::OlderPageRequested { peer: "q".into() };

        assert!(apply(&mut state, request.clone()));
        assert!(!apply(&mut state, request.clone()));

        // A head refresh finishing first does not release the claim.
        apply(
            &mut state,
            page(
                "q",
                vec![message_at("m3", "q", "me", 3), message_at("m4", "q", "me", 4)],
                2,
                0,
            ),
        );
        let current = state.current_conversation.as_ref().unwrap();
        assert!(current.loading_more);
        assert_eq!(state.timeline_status(), TimelineStatus::Loading);
        assert!(!apply(&mut state, request.clone()));

        apply(
            &mut state,
            page(
                "q",
                vec![message_at("m1", "q", "me", 1), message_at("m2", "q", "me", 2)],
                2,
                2,
            ),
        );
        let current = state.current_conversation.as_ref().unwrap();
        assert!(!current.loading_more);
        assert!(!current.is_loading);
        assert_eq!(loaded_ids(&state), vec!["m1", "m2", "m3", "m4"]);
        assert!(apply(&mut state, request));
    }

    #[test]
    fn failed_older_page_releases_claim() {
        let history = vec![message_at("m3", "q", "me", 3)];
        let mut state = opened("q", history);
        state.current_conversation.as_mut().unwrap().has_more = true;
        apply(&mut state, Action::OlderPageRequested { peer: "q".into() });

        apply(
            &mut state,
            Action::OlderPageFailed {
                peer: "q".into(),
                error: "timeout".to_string(),
            },
        );

        let current = state.current_conversation.as_ref().unwrap();
        assert!(!current.loading_more);
        assert_eq!(state.timeline_status(), TimelineStatus::Error);
    }

    #[test]
    fn removal_drops_only_that_message() {
        let mut state = opened(
            "q",
            vec![message_at("m1", "q", "me", 1), message_at("m2", "me", "q", 2)],
        );
        apply(&mut state, Action::MessageRemoved("m2".into()));

        let current = state.current_conversation.unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.messages[0].id.as_str(), "m1");
    }
}
