//! Chat ports implemented on top of Supabase.

use async_trait::async_trait;
use chat_core::{
    BlobStorage, ChatError, ChatResult, DirectoryScope, Identity, Message, MessageFilter,
    MessageId, NewMessage, Profile, ProfileId, RecentPeer, RemoteStore, SessionProvider,
    COUNTERPART_ROLES,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::client::{Query, SupabaseClient};
use crate::error::{ToshinoriError, ToshinoriResult};
use crate::rows::{
    AuthUserRow, ChatMessageInsert, ChatMessageRow, ConversationParticipantRow, MessageOwnerRow,
    ProfileRow, TrainerAssignmentRow, ASSIGNMENTS_TABLE, ASSIGNMENT_COLUMNS, MESSAGES_TABLE,
    PROFILES_TABLE, PROFILE_COLUMNS,
};

/// Bucket holding chat attachments.
pub const DEFAULT_ATTACHMENT_BUCKET: &str = "documents";
const PARTICIPANTS_RPC: &str = "get_conversation_participants";

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn in_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    format!("in.({})", values.collect::<Vec<_>>().join(","))
}

/// Remote store, session and attachment storage for one signed-in user.
#[derive(Clone)]
pub struct SupabaseChatStore {
    client: SupabaseClient,
    access_token: String,
    bucket: String,
}

impl SupabaseChatStore {
    pub fn new(client: SupabaseClient, access_token: impl Into<String>) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            bucket: DEFAULT_ATTACHMENT_BUCKET.to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    async fn profiles(&self, mut query: Query) -> ToshinoriResult<Vec<Profile>> {
        query.push(("select", PROFILE_COLUMNS.to_string()));
        let rows: Vec<ProfileRow> = self
            .client
            .select(PROFILES_TABLE, &query, &self.access_token)
            .await?;
        rows.into_iter().map(ProfileRow::into_profile).collect()
    }

    async fn messages(&self, filter: &MessageFilter) -> ToshinoriResult<Vec<Message>> {
        let mut query: Query = vec![("select", "*".to_string())];
        if let Some(sender) = &filter.sender_id {
            query.push(("sender_id", eq(sender.as_str())));
        }
        if let Some(receiver) = &filter.receiver_id {
            query.push(("receiver_id", eq(receiver.as_str())));
        }
        query.push(("order", "created_at.asc".to_string()));

        let rows: Vec<ChatMessageRow> = self
            .client
            .select(MESSAGES_TABLE, &query, &self.access_token)
            .await?;
        rows.into_iter().map(ChatMessageRow::into_message).collect()
    }

    async fn message_owner(&self, id: &MessageId) -> ToshinoriResult<Option<MessageOwnerRow>> {
        let query: Query = vec![
            ("select", "id,sender_id".to_string()),
            ("id", eq(id.as_str())),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<MessageOwnerRow> = self
            .client
            .select(MESSAGES_TABLE, &query, &self.access_token)
            .await?;
        Ok(rows.into_iter().next())
    }
}

impl std::fmt::Debug for SupabaseChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseChatStore")
            .field("client", &self.client)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionProvider for SupabaseChatStore {
    async fn current_user_id(&self) -> ChatResult<Option<String>> {
        if self.access_token.trim().is_empty() {
            return Ok(None);
        }
        match self.client.get_user::<AuthUserRow>(&self.access_token).await {
            Ok(user) => Ok(Some(user.id)),
            Err(ToshinoriError::Supabase { status: 401, .. }) => {
                debug!("access token rejected, treating as signed out");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RemoteStore for SupabaseChatStore {
    async fn find_profile_by_user(&self, user_id: &str) -> ChatResult<Option<Profile>> {
        let profiles = self
            .profiles(vec![("user_id", eq(user_id)), ("limit", "1".to_string())])
            .await?;
        Ok(profiles.into_iter().next())
    }

    async fn get_profile(&self, id: &ProfileId) -> ChatResult<Option<Profile>> {
        let profiles = self
            .profiles(vec![("id", eq(id.as_str())), ("limit", "1".to_string())])
            .await?;
        Ok(profiles.into_iter().next())
    }

    async fn get_profiles(&self, ids: &[ProfileId]) -> ChatResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = in_list(ids.iter().map(ProfileId::as_str));
        Ok(self.profiles(vec![("id", filter)]).await?)
    }

    async fn list_messages(&self, filter: &MessageFilter) -> ChatResult<Vec<Message>> {
        if filter.sender_id.is_none() && filter.receiver_id.is_none() {
            return Err(ChatError::InvalidInput(
                "message scan requires a sender or receiver".to_string(),
            ));
        }
        Ok(self.messages(filter).await?)
    }

    async fn insert_message(&self, message: &NewMessage) -> ChatResult<Message> {
        debug!(
            sender_id = %message.sender_id,
            receiver_id = %message.receiver_id,
            kind = message.kind.as_str(),
            "Inserting chat message"
        );
        let rows: Vec<ChatMessageRow> = self
            .client
            .insert(
                MESSAGES_TABLE,
                &ChatMessageInsert::from(message),
                &self.access_token,
            )
            .await?;
        let row = rows.into_iter().next().ok_or(ToshinoriError::InvalidRow {
            table: MESSAGES_TABLE,
            reason: "insert returned no row".to_string(),
        })?;
        Ok(row.into_message()?)
    }

    async fn mark_read(
        &self,
        me: &ProfileId,
        peer: &ProfileId,
        at: DateTime<Utc>,
    ) -> ChatResult<usize> {
        let query: Query = vec![
            ("receiver_id", eq(me.as_str())),
            ("sender_id", eq(peer.as_str())),
            ("read_at", "is.null".to_string()),
            ("select", "id,sender_id".to_string()),
        ];
        let body = serde_json::json!({ "read_at": at.to_rfc3339() });
        let rows: Vec<MessageOwnerRow> = self
            .client
            .patch(MESSAGES_TABLE, &query, &body, &self.access_token)
            .await?;
        debug!(peer_id = %peer, updated = rows.len(), "Marked messages as read");
        Ok(rows.len())
    }

    async fn delete_message(&self, id: &MessageId, requester: &ProfileId) -> ChatResult<()> {
        let owner = self
            .message_owner(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {id}")))?;
        if owner.sender_id != requester.as_str() {
            return Err(ChatError::Permission(
                "only the sender can delete a message".to_string(),
            ));
        }

        let query: Query = vec![
            ("id", eq(id.as_str())),
            ("sender_id", eq(requester.as_str())),
            ("select", "id,sender_id".to_string()),
        ];
        let deleted: Vec<MessageOwnerRow> = self
            .client
            .delete(MESSAGES_TABLE, &query, &self.access_token)
            .await?;
        if deleted.is_empty() {
            // Ownership was verified above, so the row vanished in between.
            debug!(message_id = %id, "message already deleted");
        }
        Ok(())
    }

    async fn list_recent_peers(&self, me: &Identity) -> ChatResult<Vec<RecentPeer>> {
        let args = serde_json::json!({ "user_uuid": me.user_id });
        let rows: Vec<ConversationParticipantRow> = self
            .client
            .rpc(PARTICIPANTS_RPC, &args, &self.access_token)
            .await?;
        let peers = rows
            .into_iter()
            .map(ConversationParticipantRow::into_recent_peer)
            .collect::<ToshinoriResult<Vec<_>>>()?;
        Ok(peers)
    }

    async fn list_directory_peers(&self, scope: &DirectoryScope) -> ChatResult<Vec<Profile>> {
        match scope {
            DirectoryScope::Counterparts { org_id } => {
                let mut query: Query = vec![
                    ("role", in_list(COUNTERPART_ROLES.iter().copied())),
                    ("order", "updated_at.desc".to_string()),
                ];
                if let Some(org_id) = org_id {
                    query.push(("org_id", eq(org_id)));
                }
                Ok(self.profiles(query).await?)
            }
            DirectoryScope::AssignedStaff { athlete_id } => {
                let query: Query = vec![
                    ("select", ASSIGNMENT_COLUMNS.to_string()),
                    ("atleta_id", eq(athlete_id.as_str())),
                    ("limit", "1".to_string()),
                ];
                let rows: Vec<TrainerAssignmentRow> = self
                    .client
                    .select(ASSIGNMENTS_TABLE, &query, &self.access_token)
                    .await?;
                let mut trainers = Vec::new();
                for row in rows {
                    match row.into_trainer() {
                        Ok(Some(trainer)) => trainers.push(trainer),
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "skipping malformed trainer assignment"),
                    }
                }
                Ok(trainers)
            }
        }
    }
}

#[async_trait]
impl BlobStorage for SupabaseChatStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ChatResult<String> {
        self.client
            .upload_object(&self.bucket, path, bytes, content_type, &self.access_token)
            .await?;
        Ok(self.client.public_object_url(&self.bucket, path))
    }
}
