//! Cache key layout.
//!
//! ```text
//! chat-conversations:{me}
//! chat-messages:{me}:{peer}:{limit}:{offset}
//! chat-current-conversation:{me}
//! ```

use chat_core::ProfileId;

pub fn conversations(me: &ProfileId) -> String {
    format!("chat-conversations:{me}")
}

/// First page of a conversation. Only offset 0 is ever cached.
pub fn first_page(me: &ProfileId, peer: &ProfileId, limit: usize) -> String {
    format!("chat-messages:{me}:{peer}:{limit}:0")
}

/// Every cached page of one conversation.
pub fn conversation_pages(me: &ProfileId, peer: &ProfileId) -> String {
    format!("chat-messages:{me}:{peer}:")
}

/// Every cached page of every conversation of `me`.
pub fn all_pages(me: &ProfileId) -> String {
    format!("chat-messages:{me}:")
}

pub fn current_conversation(me: &ProfileId) -> String {
    format!("chat-current-conversation:{me}")
}
