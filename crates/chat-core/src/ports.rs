//! Traits at the boundary between the engine and the outside world.
//!
//! Implementations live in adapter crates (Supabase in `toshinori`) or in the
//! engine's test fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ChatResult;
use crate::types::{
    DirectoryScope, Identity, Message, MessageFilter, MessageId, MessageKind, NewMessage, Profile,
    ProfileId, RecentPeer,
};

/// Source of the authenticated user.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// External auth user id, or `None` when nobody is signed in.
    async fn current_user_id(&self) -> ChatResult<Option<String>>;
}

/// Row-level access to messages and profiles.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_profile_by_user(&self, user_id: &str) -> ChatResult<Option<Profile>>;

    async fn get_profile(&self, id: &ProfileId) -> ChatResult<Option<Profile>>;

    /// Batch lookup. Unknown ids are omitted from the result.
    async fn get_profiles(&self, ids: &[ProfileId]) -> ChatResult<Vec<Profile>>;

    /// One directional scan, ascending by `created_at`.
    async fn list_messages(&self, filter: &MessageFilter) -> ChatResult<Vec<Message>>;

    /// Insert and return the stored row with its server-assigned fields.
    async fn insert_message(&self, message: &NewMessage) -> ChatResult<Message>;

    /// Set `read_at` on every unread message from `peer` to `me`.
    /// Returns the number of rows updated.
    async fn mark_read(
        &self,
        me: &ProfileId,
        peer: &ProfileId,
        at: DateTime<Utc>,
    ) -> ChatResult<usize>;

    /// Hard delete. Fails with `NotFound` for a missing message and
    /// `Permission` unless `requester` sent it.
    async fn delete_message(&self, id: &MessageId, requester: &ProfileId) -> ChatResult<()>;

    /// Precomputed peer summaries keyed by the auth user. Callers must
    /// tolerate failure.
    async fn list_recent_peers(&self, me: &Identity) -> ChatResult<Vec<RecentPeer>>;

    async fn list_directory_peers(&self, scope: &DirectoryScope) -> ChatResult<Vec<Profile>>;
}

/// Object storage for chat attachments.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` at `path` and return its public URL.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ChatResult<String>;
}

/// Out-of-band notification after a message was stored.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn message_sent(
        &self,
        sender: &ProfileId,
        peer: &ProfileId,
        body: &str,
        kind: MessageKind,
    ) -> ChatResult<()>;
}

/// Notifier that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl NotificationDispatcher for NullNotifier {
    async fn message_sent(
        &self,
        _sender: &ProfileId,
        _peer: &ProfileId,
        _body: &str,
        _kind: MessageKind,
    ) -> ChatResult<()> {
        Ok(())
    }
}
