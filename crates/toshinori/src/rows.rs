//! Typed Supabase rows and their mapping into domain types.
//!
//! Every row kind has exactly one mapping function. Rows are validated here;
//! nothing past this module sees raw JSON.

use chat_core::{
    FileMeta, Message, MessageId, MessageKind, NewMessage, Profile, ProfileId, RecentPeer,
    RoleClass, UNKNOWN_PEER_NAME,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ToshinoriError, ToshinoriResult};

pub(crate) const MESSAGES_TABLE: &str = "chat_messages";
pub(crate) const PROFILES_TABLE: &str = "profiles";
pub(crate) const ASSIGNMENTS_TABLE: &str = "pt_atleti";

/// Columns requested for profile lookups.
pub(crate) const PROFILE_COLUMNS: &str =
    "id,user_id,first_name,last_name,nome,cognome,email,role,org_id";
/// Embedded trainer profile for an athlete's assignment row.
pub(crate) const ASSIGNMENT_COLUMNS: &str =
    "pt_id,pt:profiles!pt_atleti_pt_id_fkey(id,user_id,first_name,last_name,nome,cognome,email,role,org_id)";

const ATHLETE_FALLBACK_NAME: &str = "Atleta";
const STAFF_FALLBACK_NAME: &str = "Personal Trainer";

fn require_id(table: &'static str, field: &str, value: String) -> ToshinoriResult<String> {
    if value.trim().is_empty() {
        return Err(ToshinoriError::InvalidRow {
            table,
            reason: format!("empty {field}"),
        });
    }
    Ok(value)
}

/// A `chat_messages` row.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageRow {
    pub fn into_message(self) -> ToshinoriResult<Message> {
        Ok(Message {
            id: MessageId::from_string(require_id(MESSAGES_TABLE, "id", self.id)?),
            sender_id: ProfileId::from_string(require_id(
                MESSAGES_TABLE,
                "sender_id",
                self.sender_id,
            )?),
            receiver_id: ProfileId::from_string(require_id(
                MESSAGES_TABLE,
                "receiver_id",
                self.receiver_id,
            )?),
            body: self.message.unwrap_or_default(),
            kind: self
                .kind
                .as_deref()
                .map(MessageKind::from_remote)
                .unwrap_or_default(),
            file_url: self.file_url,
            file_name: self.file_name,
            file_size: self.file_size.and_then(|size| u64::try_from(size).ok()),
            read_at: self.read_at,
            created_at: self.created_at,
        })
    }
}

/// Insert payload for `chat_messages`.
#[derive(Debug, Serialize)]
pub struct ChatMessageInsert<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub message: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl<'a> From<&'a NewMessage> for ChatMessageInsert<'a> {
    fn from(message: &'a NewMessage) -> Self {
        let file: Option<&FileMeta> = message.file.as_ref();
        Self {
            sender_id: message.sender_id.as_str(),
            receiver_id: message.receiver_id.as_str(),
            message: &message.body,
            kind: message.kind.as_str(),
            file_url: file.map(|f| f.url.as_str()),
            file_name: file.map(|f| f.name.as_str()),
            file_size: file.map(|f| f.size),
        }
    }
}

/// Minimal projection used to authorize deletes.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageOwnerRow {
    pub id: String,
    pub sender_id: String,
}

/// A `profiles` row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub nome: Option<String>,
    #[serde(default)]
    pub cognome: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

fn join_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

impl ProfileRow {
    /// Display name preference: first/last, then nome/cognome, then email,
    /// then a role-based placeholder.
    fn display_name(&self, role: &str) -> String {
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
            .or_else(|| join_name(self.nome.as_deref(), self.cognome.as_deref()))
            .or_else(|| {
                self.email
                    .as_deref()
                    .map(str::trim)
                    .filter(|email| !email.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| match RoleClass::classify(role) {
                RoleClass::Counterpart => ATHLETE_FALLBACK_NAME.to_string(),
                RoleClass::Staff => STAFF_FALLBACK_NAME.to_string(),
                RoleClass::Other => UNKNOWN_PEER_NAME.to_string(),
            })
    }

    pub fn into_profile(self) -> ToshinoriResult<Profile> {
        let role = self.role.clone().unwrap_or_default();
        let display_name = self.display_name(&role);
        Ok(Profile {
            id: ProfileId::from_string(require_id(PROFILES_TABLE, "id", self.id)?),
            user_id: self.user_id,
            display_name,
            role,
            org_id: self.org_id,
        })
    }
}

/// A row returned by the `get_conversation_participants` procedure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationParticipantRow {
    pub other_user_id: Option<String>,
    #[serde(default)]
    pub other_user_name: Option<String>,
    #[serde(default)]
    pub other_user_role: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: Option<i64>,
}

impl ConversationParticipantRow {
    pub fn into_recent_peer(self) -> ToshinoriResult<RecentPeer> {
        let peer_id = require_id(
            "get_conversation_participants",
            "other_user_id",
            self.other_user_id.unwrap_or_default(),
        )?;
        Ok(RecentPeer {
            peer_id: ProfileId::from_string(peer_id),
            peer_name: self
                .other_user_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            peer_role: self.other_user_role.filter(|role| !role.is_empty()),
            last_activity_at: self.last_message_at,
            unread_count: self
                .unread_count
                .map(|count| u32::try_from(count.max(0)).unwrap_or(u32::MAX))
                .unwrap_or(0),
        })
    }
}

/// PostgREST embeds a to-one relation as an object or, depending on the
/// inferred cardinality, as a one-element array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.into_iter().next(),
        }
    }
}

/// A `pt_atleti` row with the trainer profile embedded.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainerAssignmentRow {
    #[serde(default)]
    pub pt_id: Option<String>,
    #[serde(default)]
    pub pt: Option<OneOrMany<ProfileRow>>,
}

impl TrainerAssignmentRow {
    /// The assigned trainer. A missing embed falls back to the bare id.
    pub fn into_trainer(self) -> ToshinoriResult<Option<Profile>> {
        if let Some(mut row) = self.pt.and_then(OneOrMany::into_first) {
            if row.role.as_deref().map_or(true, str::is_empty) {
                row.role = Some("pt".to_string());
            }
            return row.into_profile().map(Some);
        }
        match self.pt_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(Some(Profile {
                id: ProfileId::from_string(id),
                user_id: None,
                display_name: STAFF_FALLBACK_NAME.to_string(),
                role: "pt".to_string(),
                org_id: None,
            })),
            None => Ok(None),
        }
    }
}

/// Response of `GET /auth/v1/user`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUserRow {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_row_maps_and_normalizes_kind() {
        let row: ChatMessageRow = serde_json::from_value(json!({
            "id": "m1",
            "sender_id": "p1",
            "receiver_id": "q1",
            "message": "ciao",
            "type": "voice",
            "file_url": null,
            "read_at": null,
            "created_at": "2024-03-01T10:00:00.123456+00:00"
        }))
        .unwrap();

        let message = row.into_message().unwrap();
        assert_eq!(message.id.as_str(), "m1");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.body, "ciao");
        assert!(message.read_at.is_none());
    }

    #[test]
    fn message_row_with_file_and_negative_size() {
        let row: ChatMessageRow = serde_json::from_value(json!({
            "id": "m2",
            "sender_id": "p1",
            "receiver_id": "q1",
            "message": "scheda.pdf",
            "type": "file",
            "file_url": "https://cdn/x.pdf",
            "file_name": "scheda.pdf",
            "file_size": -1,
            "read_at": "2024-03-01T10:05:00Z",
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        let message = row.into_message().unwrap();
        assert_eq!(message.kind, MessageKind::File);
        assert_eq!(message.file_size, None);
        assert!(message.read_at.is_some());
    }

    #[test]
    fn message_row_with_empty_id_is_rejected() {
        let row: ChatMessageRow = serde_json::from_value(json!({
            "id": "",
            "sender_id": "p1",
            "receiver_id": "q1",
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert!(matches!(
            row.into_message(),
            Err(ToshinoriError::InvalidRow { table: "chat_messages", .. })
        ));
    }

    #[test]
    fn insert_payload_uses_store_column_names() {
        let new = NewMessage {
            sender_id: "p1".into(),
            receiver_id: "q1".into(),
            body: "hello".to_string(),
            kind: MessageKind::File,
            file: Some(FileMeta {
                url: "https://cdn/a.png".to_string(),
                name: "a.png".to_string(),
                size: 42,
            }),
        };
        let value = serde_json::to_value(ChatMessageInsert::from(&new)).unwrap();
        assert_eq!(value["message"], "hello");
        assert_eq!(value["type"], "file");
        assert_eq!(value["file_size"], 42);
    }

    #[test]
    fn profile_name_preference() {
        let row = ProfileRow {
            id: "p1".into(),
            first_name: Some("Anna".into()),
            last_name: Some("Bianchi".into()),
            nome: Some("Ignored".into()),
            ..Default::default()
        };
        assert_eq!(row.into_profile().unwrap().display_name, "Anna Bianchi");

        let row = ProfileRow {
            id: "p2".into(),
            nome: Some("Luca".into()),
            cognome: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(row.into_profile().unwrap().display_name, "Luca");

        let row = ProfileRow {
            id: "p3".into(),
            email: Some("x@club.it".into()),
            ..Default::default()
        };
        assert_eq!(row.into_profile().unwrap().display_name, "x@club.it");

        let row = ProfileRow {
            id: "p4".into(),
            role: Some("atleta".into()),
            ..Default::default()
        };
        assert_eq!(row.into_profile().unwrap().display_name, "Atleta");
    }

    #[test]
    fn participant_row_clamps_counts() {
        let row: ConversationParticipantRow = serde_json::from_value(json!({
            "other_user_id": "q1",
            "other_user_name": "  ",
            "other_user_role": "pt",
            "last_message_at": null,
            "unread_count": -3
        }))
        .unwrap();

        let peer = row.into_recent_peer().unwrap();
        assert_eq!(peer.unread_count, 0);
        assert_eq!(peer.peer_name, None);
        assert_eq!(peer.peer_role.as_deref(), Some("pt"));
    }

    #[test]
    fn assignment_embed_as_object_or_array() {
        let as_object: TrainerAssignmentRow = serde_json::from_value(json!({
            "pt_id": "t1",
            "pt": { "id": "t1", "nome": "Marco", "cognome": "Rossi", "role": "pt" }
        }))
        .unwrap();
        let trainer = as_object.into_trainer().unwrap().unwrap();
        assert_eq!(trainer.display_name, "Marco Rossi");

        let as_array: TrainerAssignmentRow = serde_json::from_value(json!({
            "pt_id": "t1",
            "pt": [{ "id": "t1", "nome": "Marco" }]
        }))
        .unwrap();
        let trainer = as_array.into_trainer().unwrap().unwrap();
        assert_eq!(trainer.role, "pt");

        let bare: TrainerAssignmentRow = serde_json::from_value(json!({
            "pt_id": "t9",
            "pt": null
        }))
        .unwrap();
        let trainer = bare.into_trainer().unwrap().unwrap();
        assert_eq!(trainer.id.as_str(), "t9");
        assert_eq!(trainer.display_name, "Personal Trainer");
    }
}
