//! Conversation directory.
//!
//! Builds the list of peers the local identity can talk to, most recent
//! activity first. Peers come from the store's precomputed participants
//! function, or from the raw message scans when that fails, and are then
//! enriched with role-based peers that have no messages yet.

use chat_cache::{keys, TtlCache};
use chat_core::{
    epoch_floor, ChatResult, ConversationSummary, DirectoryScope, Identity, Message,
    MessageFilter, Profile, ProfileId, RemoteStore, RoleClass, UNKNOWN_PEER_NAME,
    UNKNOWN_PEER_ROLE,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::timeline::merge_directional;

/// A directory row whose display fields may still be unresolved.
#[derive(Debug)]
struct PeerDraft {
    peer_id: ProfileId,
    name: Option<String>,
    role: Option<String>,
    last_activity_at: DateTime<Utc>,
    unread_count: u32,
}

impl PeerDraft {
    fn new(peer_id: ProfileId, last_activity_at: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            name: None,
            role: None,
            last_activity_at,
            unread_count: 0,
        }
    }

    fn is_resolved(&self) -> bool {
        self.name.is_some() && self.role.is_some()
    }

    /// Fill whatever display fields are still missing.
    fn fill_from(&mut self, profile: &Profile) {
        if self.name.is_none() && !profile.display_name.trim().is_empty() {
            self.name = Some(profile.display_name.clone());
        }
        if self.role.is_none() && !profile.role.trim().is_empty() {
            self.role = Some(profile.role.clone());
        }
    }

    fn into_summary(self) -> ConversationSummary {
        ConversationSummary {
            peer_id: self.peer_id,
            peer_name: self.name.unwrap_or_else(|| UNKNOWN_PEER_NAME.to_string()),
            peer_role: self.role.unwrap_or_else(|| UNKNOWN_PEER_ROLE.to_string()),
            last_activity_at: self.last_activity_at,
            unread_count: self.unread_count,
        }
    }
}

/// Insertion-ordered drafts keyed by peer id.
#[derive(Debug, Default)]
struct Drafts {
    order: Vec<PeerDraft>,
    index: HashMap<ProfileId, usize>,
}

impl Drafts {
    fn get_mut(&mut self, peer_id: &ProfileId) -> Option<&mut PeerDraft> {
        let index = *self.index.get(peer_id)?;
        self.order.get_mut(index)
    }

    /// Adds `draft` unless its peer is already present. Returns whether it was added.
    fn push(&mut self, draft: PeerDraft) -> bool {
        if self.index.contains_key(&draft.peer_id) {
            return false;
        }
        self.index.insert(draft.peer_id.clone(), self.order.len());
        self.order.push(draft);
        true
    }

    fn unresolved(&self) -> Vec<ProfileId> {
        self.order
            .iter()
            .filter(|draft| !draft.is_resolved())
            .map(|draft| draft.peer_id.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Peers derived from the message history, most recent first.
///
/// The first message seen for a peer sets its activity time; unread counts
/// are accumulated over every incoming unread row.
pub fn peers_from_messages(me: &ProfileId, messages: &[Message]) -> Vec<ConversationSummary> {
    let mut drafts = Drafts::default();
    for message in messages.iter().rev() {
        let peer = message.peer_of(me);
        if peer == me {
            continue;
        }
        if drafts.get_mut(peer).is_none() {
            drafts.push(PeerDraft::new(peer.clone(), message.created_at));
        }
        if message.is_unread_for(me) {
            if let Some(draft) = drafts.get_mut(peer) {
                draft.unread_count = draft.unread_count.saturating_add(1);
            }
        }
    }
    drafts
        .order
        .into_iter()
        .map(PeerDraft::into_summary)
        .collect()
}

/// Builds and caches the conversation list for one identity.
pub struct ConversationDirectory {
    store: Arc<dyn RemoteStore>,
    identity: Identity,
    profile: Profile,
    cache: Arc<TtlCache<Vec<ConversationSummary>>>,
}

impl ConversationDirectory {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        identity: Identity,
        profile: Profile,
        cache: Arc<TtlCache<Vec<ConversationSummary>>>,
    ) -> Self {
        Self {
            store,
            identity,
            profile,
            cache,
        }
    }

    fn me(&self) -> &ProfileId {
        &self.identity.profile_id
    }

    fn cache_key(&self) -> String {
        keys::conversations(self.me())
    }

    /// The cached list, if still fresh.
    pub fn cached(&self) -> Option<Vec<ConversationSummary>> {
        self.cache.get(&self.cache_key())
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&self.cache_key());
    }

    /// Rebuild the directory from the store. Any store error aborts the build.
    pub async fn build(&self) -> ChatResult<Vec<ConversationSummary>> {
        let mut drafts = self.collect_peers().await?;
        self.resolve_display_fields(&mut drafts).await?;
        self.enrich(&mut drafts).await?;

        let mut summaries: Vec<ConversationSummary> = drafts
            .order
            .into_iter()
            .map(PeerDraft::into_summary)
            .collect();
        // Stable, so ties keep discovery order.
        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        info!(
            profile_id = %self.me(),
            conversations = summaries.len(),
            "conversation directory built"
        );
        self.cache.set(self.cache_key(), summaries.clone());
        Ok(summaries)
    }

    async fn collect_peers(&self) -> ChatResult<Drafts> {
        match self.store.list_recent_peers(&self.identity).await {
            Ok(peers) => {
                debug!(peers = peers.len(), "participants function returned peers");
                let mut drafts = Drafts::default();
                for peer in peers {
                    if &peer.peer_id == self.me() {
                        continue;
                    }
                    drafts.push(PeerDraft {
                        peer_id: peer.peer_id,
                        name: peer.peer_name,
                        role: peer.peer_role,
                        last_activity_at: peer.last_activity_at.unwrap_or_else(epoch_floor),
                        unread_count: peer.unread_count,
                    });
                }
                Ok(drafts)
            }
            Err(err) => {
                warn!(error = %err, "participants function failed, deriving peers from messages");
                self.peers_from_scans().await
            }
        }
    }

    async fn peers_from_scans(&self) -> ChatResult<Drafts> {
        let me = self.me();
        let sent_filter = MessageFilter::sent_by(me);
        let received_filter = MessageFilter::received_by(me);
        let (sent, received) = tokio::try_join!(
            self.store.list_messages(&sent_filter),
            self.store.list_messages(&received_filter)
        )?;
        let merged = merge_directional([sent, received]);

        let mut drafts = Drafts::default();
        for summary in peers_from_messages(me, &merged) {
            drafts.push(PeerDraft {
                peer_id: summary.peer_id,
                name: None,
                role: None,
                last_activity_at: summary.last_activity_at,
                unread_count: summary.unread_count,
            });
        }
        debug!(messages = merged.len(), peers = drafts.len(), "peers derived from messages");
        Ok(drafts)
    }

    async fn resolve_display_fields(&self, drafts: &mut Drafts) -> ChatResult<()> {
        let unresolved = drafts.unresolved();
        if unresolved.is_empty() {
            return Ok(());
        }
        let profiles = self.store.get_profiles(&unresolved).await?;
        debug!(
            requested = unresolved.len(),
            found = profiles.len(),
            "resolved peer display fields"
        );
        for profile in &profiles {
            if let Some(draft) = drafts.get_mut(&profile.id) {
                draft.fill_from(profile);
            }
        }
        Ok(())
    }

    async fn enrich(&self, drafts: &mut Drafts) -> ChatResult<()> {
        let scope = match self.profile.role_class() {
            RoleClass::Staff => DirectoryScope::Counterparts {
                org_id: self.profile.org_id.clone(),
            },
            RoleClass::Counterpart => DirectoryScope::AssignedStaff {
                athlete_id: self.me().clone(),
            },
            RoleClass::Other => return Ok(()),
        };

        let peers = self.store.list_directory_peers(&scope).await?;
        let mut added = 0usize;
        for peer in &peers {
            if &peer.id == self.me() {
                continue;
            }
            match drafts.get_mut(&peer.id) {
                Some(draft) => draft.fill_from(peer),
                None => {
                    let mut draft = PeerDraft::new(peer.id.clone(), epoch_floor());
                    draft.fill_from(peer);
                    if drafts.push(draft) {
                        added += 1;
                    }
                }
            }
        }
        debug!(?scope, candidates = peers.len(), added, "directory enriched");
        Ok(())
    }
}

impl std::fmt::Debug for ConversationDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationDirectory")
            .field("identity", &self.identity)
            .field("role", &self.profile.role)
            .finish_non_exhaustive()
    }
}
