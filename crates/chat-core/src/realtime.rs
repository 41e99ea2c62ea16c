//! Change events pushed by the realtime transport.

use tokio::sync::mpsc;

use crate::error::ChatResult;
use crate::types::{MessageId, ProfileId};

/// Kind of row mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A mutation of one message row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub message_id: MessageId,
    pub sender_id: ProfileId,
    pub receiver_id: ProfileId,
}

impl ChangeEvent {
    /// Whether `me` subscribes to this event.
    ///
    /// Inserts and updates are delivered to the receiver. Deletes are
    /// delivered to both sides.
    pub fn concerns(&self, me: &ProfileId) -> bool {
        match self.kind {
            ChangeKind::Inserted | ChangeKind::Updated => &self.receiver_id == me,
            ChangeKind::Deleted => &self.receiver_id == me || &self.sender_id == me,
        }
    }
}

type CloseFn = Box<dyn FnOnce() + Send>;

/// An open push channel. Closing is idempotent and also happens on drop.
pub struct RealtimeChannel {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_close: Option<CloseFn>,
}

impl RealtimeChannel {
    pub fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Next event, or `None` once the transport closed the channel.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn close(&mut self) {
        self.events.close();
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

/// Opens push channels scoped to one identity.
pub trait RealtimeTransport: Send + Sync {
    fn open(&self, me: &ProfileId) -> ChatResult<RealtimeChannel>;
}
