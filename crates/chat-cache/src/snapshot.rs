//! Persisted snapshot of the open conversation.

use chat_core::{ChatError, ChatResult, ConversationState, ProfileId};
use chat_storage::{PersistentStorage, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::keys;

/// Snapshots written with a different version are discarded on read.
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0.0";

const MAX_TTL_DAYS: i64 = 100 * 365;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: String,
    saved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: ConversationState,
}

/// Long-lived tier: one entry per identity, survives restarts.
pub struct ConversationSnapshotStore {
    storage: Arc<dyn PersistentStorage>,
    ttl: chrono::Duration,
}

fn storage_error(err: StorageError) -> ChatError {
    ChatError::Storage(err.to_string())
}

impl ConversationSnapshotStore {
    pub fn new(storage: Arc<dyn PersistentStorage>, ttl: Duration) -> Self {
        let max_ttl = chrono::Duration::days(MAX_TTL_DAYS);
        Self {
            storage,
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or(max_ttl)
                .min(max_ttl),
        }
    }

    /// Persist `state` for `me`. Empty conversations are not saved.
    /// Returns whether anything was written.
    pub fn save(&self, me: &ProfileId, state: &ConversationState) -> ChatResult<bool> {
        if state.messages.is_empty() {
            return Ok(false);
        }

        let now = Utc::now();
        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            saved_at: now,
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            state: state.clone(),
        };
        let json = serde_json::to_string(&envelope)?;
        self.storage
            .set(&keys::current_conversation(me), &json)
            .map_err(storage_error)?;

        debug!(
            peer_id = %state.summary.peer_id,
            messages = state.messages.len(),
            "open conversation persisted"
        );
        Ok(true)
    }

    /// Load the snapshot for `me`.
    ///
    /// Expired, corrupt or foreign-version entries are deleted and yield
    /// `None`. Storage failures are logged, never raised.
    pub fn restore(&self, me: &ProfileId) -> Option<ConversationState> {
        let key = keys::current_conversation(me);
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "failed to read conversation snapshot");
                return None;
            }
        };

        let reason = match serde_json::from_str::<SnapshotEnvelope>(&raw) {
            Ok(envelope) if envelope.version != SNAPSHOT_FORMAT_VERSION => "version mismatch",
            Ok(envelope) if envelope.expires_at <= Utc::now() => "expired",
            Ok(envelope) if envelope.state.messages.is_empty() => "empty",
            Ok(envelope) => {
                let mut state = envelope.state;
                state.is_loading = false;
                debug!(
                    peer_id = %state.summary.peer_id,
                    messages = state.messages.len(),
                    "open conversation restored"
                );
                return Some(state);
            }
            Err(_) => "corrupt",
        };

        debug!(reason, "discarding conversation snapshot");
        if let Err(err) = self.storage.delete(&key) {
            warn!(error = %err, "failed to delete conversation snapshot");
        }
        None
    }

    pub fn clear(&self, me: &ProfileId) -> ChatResult<()> {
        self.storage
            .delete(&keys::current_conversation(me))
            .map_err(storage_error)?;
        Ok(())
    }
}

impl std::fmt::Debug for ConversationSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSnapshotStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
