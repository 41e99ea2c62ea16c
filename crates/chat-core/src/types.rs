//! Core types for the chat sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles that see every athlete of their organisation in the directory.
pub const STAFF_ROLES: &[&str] = &["admin", "owner", "trainer", "pt", "staff"];
/// Roles that see their assigned trainer in the directory.
pub const COUNTERPART_ROLES: &[&str] = &["atleta", "athlete"];

/// Display name used when a peer's profile cannot be resolved.
pub const UNKNOWN_PEER_NAME: &str = "Utente";
/// Role used when a peer's profile cannot be resolved.
pub const UNKNOWN_PEER_ROLE: &str = "unknown";

/// Activity timestamp given to peers without any message history.
pub fn epoch_floor() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Stable internal id of a chat participant (profile row id).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

impl ProfileId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProfileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a message (UUID string, assigned by the store).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The local participant, resolved once per session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub profile_id: ProfileId,
    /// External authentication user id the profile was resolved from.
    pub user_id: String,
}

/// Kind of a chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    System,
}

impl MessageKind {
    /// Parses a stored kind. Anything unrecognised is treated as text.
    pub fn from_remote(raw: &str) -> Self {
        match raw {
            "file" => Self::File,
            "system" => Self::System,
            _ => Self::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::System => "system",
        }
    }
}

/// A message between two participants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: ProfileId,
    pub receiver_id: ProfileId,
    pub body: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message is waiting to be read by `me`.
    pub fn is_unread_for(&self, me: &ProfileId) -> bool {
        &self.receiver_id == me && self.read_at.is_none()
    }

    /// The participant on the other side, seen from `me`.
    pub fn peer_of(&self, me: &ProfileId) -> &ProfileId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Attachment metadata carried by file messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub url: String,
    pub name: String,
    pub size: u64,
}

/// Result of a successful attachment upload.
pub type UploadedFile = FileMeta;

/// A message to be inserted. The store assigns id and created_at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: ProfileId,
    pub receiver_id: ProfileId,
    pub body: String,
    pub kind: MessageKind,
    pub file: Option<FileMeta>,
}

/// One row of the conversation directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer_id: ProfileId,
    pub peer_name: String,
    pub peer_role: String,
    pub last_activity_at: DateTime<Utc>,
    pub unread_count: u32,
}

impl ConversationSummary {
    /// Summary for a peer known only by id.
    pub fn placeholder(peer_id: ProfileId) -> Self {
        Self {
            peer_id,
            peer_name: UNKNOWN_PEER_NAME.to_string(),
            peer_role: UNKNOWN_PEER_ROLE.to_string(),
            last_activity_at: epoch_floor(),
            unread_count: 0,
        }
    }
}

/// The open conversation: its summary plus loaded messages, oldest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub summary: ConversationSummary,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub has_more: bool,
    /// An older page is being fetched. Never persisted.
    #[serde(skip)]
    pub loading_more: bool,
}

impl ConversationState {
    pub fn new(summary: ConversationSummary) -> Self {
        Self {
            summary,
            messages: Vec::new(),
            is_loading: false,
            has_more: false,
            loading_more: false,
        }
    }

    pub fn peer_id(&self) -> &ProfileId {
        &self.summary.peer_id
    }
}

/// A participant profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub user_id: Option<String>,
    pub display_name: String,
    pub role: String,
    pub org_id: Option<String>,
}

impl Profile {
    pub fn role_class(&self) -> RoleClass {
        RoleClass::classify(&self.role)
    }
}

/// Coarse role grouping used for directory enrichment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleClass {
    Staff,
    Counterpart,
    Other,
}

impl RoleClass {
    pub fn classify(role: &str) -> Self {
        let role = role.trim().to_lowercase();
        if STAFF_ROLES.contains(&role.as_str()) {
            Self::Staff
        } else if COUNTERPART_ROLES.contains(&role.as_str()) {
            Self::Counterpart
        } else {
            Self::Other
        }
    }
}

/// Equality filter for one directional message scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub sender_id: Option<ProfileId>,
    pub receiver_id: Option<ProfileId>,
}

impl MessageFilter {
    pub fn sent_by(sender: &ProfileId) -> Self {
        Self {
            sender_id: Some(sender.clone()),
            receiver_id: None,
        }
    }

    pub fn received_by(receiver: &ProfileId) -> Self {
        Self {
            sender_id: None,
            receiver_id: Some(receiver.clone()),
        }
    }

    pub fn to(mut self, receiver: &ProfileId) -> Self {
        self.receiver_id = Some(receiver.clone());
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.sender_id
            .as_ref()
            .map_or(true, |id| id == &message.sender_id)
            && self
                .receiver_id
                .as_ref()
                .map_or(true, |id| id == &message.receiver_id)
    }
}

/// Which peers the directory adds for a given local role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryScope {
    /// Every athlete in the organisation (staff view).
    Counterparts { org_id: Option<String> },
    /// The trainer assigned to an athlete.
    AssignedStaff { athlete_id: ProfileId },
}

/// Best-effort peer summary precomputed by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecentPeer {
    pub peer_id: ProfileId,
    pub peer_name: Option<String>,
    pub peer_role: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(sender: &str, receiver: &str, read: bool) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            body: "hi".to_string(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            read_at: read.then(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn unknown_kinds_fall_back_to_text() {
        assert_eq!(MessageKind::from_remote("file"), MessageKind::File);
        assert_eq!(MessageKind::from_remote("system"), MessageKind::System);
        assert_eq!(MessageKind::from_remote("image"), MessageKind::Text);
        assert_eq!(MessageKind::from_remote(""), MessageKind::Text);
    }

    #[test]
    fn unread_only_counts_incoming_messages() {
        let me = ProfileId::from("me");
        assert!(message("peer", "me", false).is_unread_for(&me));
        assert!(!message("peer", "me", true).is_unread_for(&me));
        assert!(!message("me", "peer", false).is_unread_for(&me));
    }

    #[test]
    fn peer_of_is_the_other_side() {
        let me = ProfileId::from("me");
        assert_eq!(message("me", "q", false).peer_of(&me).as_str(), "q");
        assert_eq!(message("q", "me", false).peer_of(&me).as_str(), "q");
    }

    #[test]
    fn role_classification() {
        assert_eq!(RoleClass::classify("PT"), RoleClass::Staff);
        assert_eq!(RoleClass::classify("owner"), RoleClass::Staff);
        assert_eq!(RoleClass::classify("atleta"), RoleClass::Counterpart);
        assert_eq!(RoleClass::classify("athlete"), RoleClass::Counterpart);
        assert_eq!(RoleClass::classify("guest"), RoleClass::Other);
    }

    #[test]
    fn filter_matches_directionally() {
        let me = ProfileId::from("me");
        let q = ProfileId::from("q");
        let outgoing = MessageFilter::sent_by(&me).to(&q);
        assert!(outgoing.matches(&message("me", "q", false)));
        assert!(!outgoing.matches(&message("q", "me", false)));
        assert!(MessageFilter::received_by(&me).matches(&message("q", "me", false)));
    }

    #[test]
    fn message_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MessageKind::File).unwrap();
        assert_eq!(json, "\"file\"");
    }

    #[test]
    fn placeholder_summary_sorts_at_epoch() {
        let summary = ConversationSummary::placeholder("q".into());
        assert_eq!(summary.peer_name, UNKNOWN_PEER_NAME);
        assert_eq!(summary.last_activity_at, epoch_floor());
        assert_eq!(summary.unread_count, 0);
    }
}
