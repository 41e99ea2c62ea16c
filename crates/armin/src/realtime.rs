//! Realtime subscription and the in-process transport.
//!
//! The subscription owns one channel per identity. Events outside the
//! identity's scope are ignored; the rest invoke one of three callbacks
//! without payload, leaving the caller to refetch.

use chat_core::{
    ChangeEvent, ChangeKind, ChatResult, ProfileId, RealtimeChannel, RealtimeTransport,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// What to run for each event class.
#[derive(Clone)]
pub struct RealtimeCallbacks {
    pub on_received: Callback,
    pub on_updated: Callback,
    pub on_deleted: Callback,
}

impl RealtimeCallbacks {
    fn dispatch(&self, kind: ChangeKind) {
        match kind {
            ChangeKind::Inserted => (self.on_received)(),
            ChangeKind::Updated => (self.on_updated)(),
            ChangeKind::Deleted => (self.on_deleted)(),
        }
    }
}

impl std::fmt::Debug for RealtimeCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeCallbacks").finish_non_exhaustive()
    }
}

/// The realtime channel of one identity.
pub struct RealtimeSubscription {
    transport: Arc<dyn RealtimeTransport>,
    me: ProfileId,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    pub fn new(transport: Arc<dyn RealtimeTransport>, me: ProfileId) -> Self {
        Self {
            transport,
            me,
            task: None,
        }
    }

    /// Open a fresh channel, tearing down any previous one first.
    pub fn subscribe(&mut self, callbacks: RealtimeCallbacks) -> ChatResult<()> {
        self.unsubscribe();

        let mut channel = self.transport.open(&self.me)?;
        let me = self.me.clone();
        info!(profile_id = %me, "realtime channel opened");

        self.task = Some(tokio::spawn(async move {
            while let Some(event) = channel.recv().await {
                if !event.concerns(&me) {
                    debug!(message_id = %event.message_id, kind = ?event.kind, "ignoring out-of-scope event");
                    continue;
                }
                debug!(message_id = %event.message_id, kind = ?event.kind, "realtime event");
                callbacks.dispatch(event.kind);
            }
            debug!(profile_id = %me, "realtime channel closed by transport");
        }));
        Ok(())
    }

    /// Tear down the channel. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            // Dropping the task drops the channel, which closes it.
            task.abort();
            info!(profile_id = %self.me, "realtime channel torn down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for RealtimeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSubscription")
            .field("me", &self.me)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct HubInner {
    subscribers: RwLock<HashMap<u64, mpsc::UnboundedSender<ChangeEvent>>>,
    next_id: AtomicU64,
}

/// In-process transport: every published event reaches every open channel.
///
/// Scope filtering happens in the subscriber, as with a coarse server-side
/// filter.
#[derive(Clone, Default)]
pub struct LocalRealtimeHub {
    inner: Arc<HubInner>,
}

impl LocalRealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every open channel, dropping closed ones.
    /// Returns how many channels received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut subscribers = self.inner.subscribers.write();
        subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Close every channel from the transport side.
    pub fn disconnect_all(&self) {
        self.inner.subscribers.write().clear();
    }
}

impl RealtimeTransport for LocalRealtimeHub {
    fn open(&self, me: &ProfileId) -> ChatResult<RealtimeChannel> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().insert(id, sender);
        debug!(profile_id = %me, channel = id, "local realtime channel opened");

        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        Ok(RealtimeChannel::new(receiver, move || {
            if let Some(hub) = hub.upgrade() {
                hub.subscribers.write().remove(&id);
            }
        }))
    }
}

impl std::fmt::Debug for LocalRealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRealtimeHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
