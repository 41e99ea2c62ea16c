//! # chat-core
//!
//! Shared vocabulary of the chat sync engine: identifiers, messages,
//! conversation summaries, the error taxonomy, and the ports through which
//! the engine reaches the remote store, session, object storage, push
//! notifications and realtime transport.

mod error;
pub mod ports;
pub mod realtime;
pub mod types;

pub use error::{ChatError, ChatResult};
pub use ports::{BlobStorage, NotificationDispatcher, NullNotifier, RemoteStore, SessionProvider};
pub use realtime::{ChangeEvent, ChangeKind, RealtimeChannel, RealtimeTransport};
pub use types::{
    epoch_floor, ConversationState, ConversationSummary, DirectoryScope, FileMeta, Identity,
    Message, MessageFilter, MessageId, MessageKind, NewMessage, Profile, ProfileId, RecentPeer,
    RoleClass, UploadedFile, COUNTERPART_ROLES, STAFF_ROLES, UNKNOWN_PEER_NAME,
    UNKNOWN_PEER_ROLE,
};
