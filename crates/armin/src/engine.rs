//! The chat engine: one signed-in identity, its directory, the open
//! conversation and the realtime wiring between them.
//!
//! # Ownership
//!
//! [`ChatEngine`] is a cheap handle around `Arc<EngineInner>`. Background
//! tasks (refresh worker, realtime callbacks) only hold `Weak` references,
//! so dropping the last handle stops everything.

use async_trait::async_trait;
use chat_cache::{keys, ConversationSnapshotStore, TtlCache};
use chat_config_and_utils::Config;
use chat_core::{
    epoch_floor, BlobStorage, ChangeKind, ChatError, ChatResult,
    ConversationSummary, FileMeta, Identity, Message, MessageId, MessageKind, NewMessage,
    NotificationDispatcher, NullNotifier, Profile, ProfileId, RealtimeTransport, RemoteStore,
    SessionProvider, UploadedFile,
};
use chat_storage::{MemoryStorage, PersistentStorage};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::directory::ConversationDirectory;
use crate::identity::IdentityResolver;
use crate::realtime::{RealtimeCallbacks, RealtimeSubscription};
use crate::refresher::{MessageRefresher, RefreshScheduler};
use crate::state::{apply, Action, ChatState};
use crate::timeline::{MessageTimeline, PageFetch};

/// Tunables of a running engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub page_size: usize,
    pub realtime_debounce: Duration,
    pub short_cache_ttl: Duration,
    pub snapshot_ttl: Duration,
    pub max_upload_bytes: u64,
    /// Load the directory in the background right after start.
    pub prefetch_directory: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size.max(1),
            realtime_debounce: config.realtime_debounce(),
            short_cache_ttl: config.short_cache_ttl(),
            snapshot_ttl: config.snapshot_ttl(),
            max_upload_bytes: config.max_upload_bytes,
            prefetch_directory: true,
        }
    }
}

/// Builder for [`ChatEngine`]. Only the session and the store are required.
pub struct ChatEngineBuilder {
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn RemoteStore>,
    blobs: Option<Arc<dyn BlobStorage>>,
    notifier: Arc<dyn NotificationDispatcher>,
    realtime: Option<Arc<dyn RealtimeTransport>>,
    storage: Option<Arc<dyn PersistentStorage>>,
    config: EngineConfig,
}

impl ChatEngineBuilder {
    pub fn blob_storage(mut self, blobs: Arc<dyn BlobStorage>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn realtime(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime = Some(transport);
        self
    }

    /// Backing storage for the open-conversation snapshot. Defaults to memory.
    pub fn storage(mut self, storage: Arc<dyn PersistentStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the identity, restore the snapshot and start background work.
    pub async fn start(self) -> ChatResult<ChatEngine> {
        let resolver = IdentityResolver::new(self.session, self.store.clone());
        let resolved = resolver.resolve_with_profile().await?;
        let identity = resolved.identity;
        let profile = resolved.profile;
        let me = identity.profile_id.clone();

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn PersistentStorage>);
        let snapshots = Arc::new(ConversationSnapshotStore::new(
            storage,
            self.config.snapshot_ttl,
        ));

        let mut initial = ChatState::default();
        if let Some(restored) = snapshots.restore(&me) {
            info!(
                peer_id = %restored.peer_id(),
                messages = restored.messages.len(),
                "restored open conversation"
            );
            apply(&mut initial, Action::Restored(restored));
        }
        let (state, _) = watch::channel(initial);

        let conversation_cache = Arc::new(TtlCache::new(self.config.short_cache_ttl));
        let directory = ConversationDirectory::new(
            self.store.clone(),
            identity.clone(),
            profile.clone(),
            conversation_cache,
        );
        let timeline = MessageTimeline::new(self.store.clone(), me.clone());

        let inner = Arc::new(EngineInner {
            identity,
            profile,
            store: self.store,
            blobs: self.blobs,
            notifier: self.notifier,
            directory,
            timeline,
            page_cache: TtlCache::new(self.config.short_cache_ttl),
            snapshots,
            state,
            scheduler: RefreshScheduler::new(self.config.realtime_debounce),
            realtime: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config: self.config,
        });

        let refresher = Arc::downgrade(&inner) as Weak<dyn MessageRefresher>;
        if let Some(worker) = inner.scheduler.start(refresher) {
            inner.tasks.lock().push(worker);
        }

        if let Some(transport) = self.realtime {
            let mut subscription = RealtimeSubscription::new(transport, me.clone());
            subscription.subscribe(realtime_callbacks(Arc::downgrade(&inner)))?;
            *inner.realtime.lock() = Some(subscription);
        }

        let persister = spawn_persister(&inner);
        inner.tasks.lock().push(persister);

        if inner.config.prefetch_directory {
            let engine = inner.clone();
            tokio::spawn(async move {
                if let Err(err) = engine.load_conversations().await {
                    warn!(error = %err, "initial directory load failed");
                }
            });
        }

        info!(profile_id = %me, "chat engine started");
        Ok(ChatEngine { inner })
    }
}

fn realtime_callbacks(engine: Weak<EngineInner>) -> RealtimeCallbacks {
    let callback = |kind: ChangeKind| {
        let engine = engine.clone();
        Arc::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.on_realtime(kind);
            }
        }) as Arc<dyn Fn() + Send + Sync>
    };
    RealtimeCallbacks {
        on_received: callback(ChangeKind::Inserted),
        on_updated: callback(ChangeKind::Updated),
        on_deleted: callback(ChangeKind::Deleted),
    }
}

/// Save the open conversation whenever it changes.
fn spawn_persister(inner: &Arc<EngineInner>) -> JoinHandle<()> {
    let mut receiver = inner.state.subscribe();
    let snapshots = inner.snapshots.clone();
    let me = inner.me().clone();
    let mut last_saved = receiver.borrow().current_conversation.clone();

    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let current = receiver.borrow_and_update().current_conversation.clone();
            let Some(current) = current else {
                continue;
            };
            if current.is_loading || last_saved.as_ref() == Some(&current) {
                continue;
            }
            match snapshots.save(&me, &current) {
                Ok(_) => last_saved = Some(current),
                Err(err) => warn!(error = %err, "failed to persist open conversation"),
            }
        }
    })
}

struct EngineInner {
    identity: Identity,
    profile: Profile,
    store: Arc<dyn RemoteStore>,
    blobs: Option<Arc<dyn BlobStorage>>,
    notifier: Arc<dyn NotificationDispatcher>,
    directory: ConversationDirectory,
    timeline: MessageTimeline,
    page_cache: TtlCache<PageFetch>,
    snapshots: Arc<ConversationSnapshotStore>,
    state: watch::Sender<ChatState>,
    scheduler: RefreshScheduler,
    realtime: Mutex<Option<RealtimeSubscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: EngineConfig,
}

impl EngineInner {
    fn me(&self) -> &ProfileId {
        &self.identity.profile_id
    }

    fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    fn dispatch(&self, action: Action) -> bool {
        let name = action.name();
        let changed = self.state.send_if_modified(|state| apply(state, action));
        if changed {
            debug!(action = name, "chat state updated");
        }
        changed
    }

    fn fail(&self, err: ChatError) -> ChatError {
        self.dispatch(Action::Failed(err.to_string()));
        err
    }

    fn first_page_key(&self, peer: &ProfileId) -> String {
        keys::first_page(self.me(), peer, self.config.page_size)
    }

    async fn load_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        self.dispatch(Action::ConversationsRequested);
        self.rebuild_directory().await
    }

    /// Rebuild the directory without announcing a load.
    async fn rebuild_directory(&self) -> ChatResult<Vec<ConversationSummary>> {
        match self.directory.build().await {
            Ok(conversations) => {
                self.dispatch(Action::ConversationsLoaded(conversations));
                Ok(self.snapshot().conversations)
            }
            Err(err) => {
                error!(error = %err, "failed to build conversation directory");
                self.dispatch(Action::ConversationsFailed(err.to_string()));
                Err(err)
            }
        }
    }

    fn spawn_directory_refresh(self: &Arc<Self>) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.rebuild_directory().await {
                warn!(error = %err, "background directory refresh failed");
            }
        });
    }

    /// Fetch the newest page of `peer`, bypassing the cache, and reconcile it.
    async fn refresh_head(&self, peer: &ProfileId) -> ChatResult<PageFetch> {
        match self
            .timeline
            .fetch_window(peer, self.config.page_size, 0, None)
            .await
        {
            Ok(page) => {
                if !page.messages.is_empty() {
                    self.page_cache.set(self.first_page_key(peer), page.clone());
                }
                self.dispatch(Action::PageFetched { page: page.clone() });
                Ok(page)
            }
            Err(err) => {
                error!(peer_id = %peer, error = %err, "failed to fetch messages");
                self.dispatch(Action::MessagesFailed {
                    peer: peer.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn summary_for(&self, peer: &ProfileId) -> ConversationSummary {
        if let Some(known) = self.snapshot().conversation(peer) {
            return known.clone();
        }
        match self.store.get_profile(peer).await {
            Ok(Some(profile)) => ConversationSummary {
                peer_id: peer.clone(),
                peer_name: profile.display_name,
                peer_role: profile.role,
                last_activity_at: epoch_floor(),
                unread_count: 0,
            },
            Ok(None) => ConversationSummary::placeholder(peer.clone()),
            Err(err) => {
                warn!(peer_id = %peer, error = %err, "peer profile lookup failed");
                ConversationSummary::placeholder(peer.clone())
            }
        }
    }

    async fn mark_read(&self, peer: &ProfileId) -> ChatResult<usize> {
        let at = Utc::now();
        self.dispatch(Action::MarkedRead {
            me: self.me().clone(),
            peer: peer.clone(),
            at,
        });
        let updated = self
            .store
            .mark_read(self.me(), peer, at)
            .await
            .map_err(|err| self.fail(err))?;
        if updated > 0 {
            self.directory.invalidate();
        }
        debug!(peer_id = %peer, updated, "conversation marked read");
        Ok(updated)
    }

    /// Mark read after opening. Failures are reported through the state only.
    async fn mark_read_after_open(&self, peer: &ProfileId) {
        if let Err(err) = self.mark_read(peer).await {
            warn!(peer_id = %peer, error = %err, "failed to mark conversation read");
        }
    }

    fn on_realtime(self: &Arc<Self>, kind: ChangeKind) {
        let me = self.me();
        self.directory.invalidate();

        let (current_peer, has_messages) = {
            let state = self.state.borrow();
            let peer = state.current_peer().cloned();
            let has_messages = peer
                .as_ref()
                .is_some_and(|peer| state.has_messages_for(peer));
            (peer, has_messages)
        };

        if kind == ChangeKind::Deleted {
            self.page_cache.invalidate(&keys::all_pages(me));
        }
        if let Some(peer) = current_peer {
            self.page_cache
                .invalidate(&keys::conversation_pages(me, &peer));
            self.scheduler.trigger(peer);
        }

        // A directory rebuild is redundant while an open conversation already
        // shows messages; the message refresh covers it.
        if kind != ChangeKind::Deleted && !has_messages {
            self.spawn_directory_refresh();
        } else {
            debug!(?kind, "skipping directory refresh");
        }
    }
}

#[async_trait]
impl MessageRefresher for EngineInner {
    async fn refresh_messages(&self, peer: &ProfileId) {
        if self.snapshot().current_peer() != Some(peer) {
            debug!(peer_id = %peer, "conversation no longer open, skipping refresh");
            return;
        }
        if let Err(err) = self.refresh_head(peer).await {
            warn!(peer_id = %peer, error = %err, "realtime message refresh failed");
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Handle to a running chat engine.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

impl ChatEngine {
    pub fn builder(
        session: Arc<dyn SessionProvider>,
        store: Arc<dyn RemoteStore>,
    ) -> ChatEngineBuilder {
        ChatEngineBuilder {
            session,
            store,
            blobs: None,
            notifier: Arc::new(NullNotifier),
            realtime: None,
            storage: None,
            config: EngineConfig::default(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn profile(&self) -> &Profile {
        &self.inner.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> ChatState {
        self.inner.snapshot()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.inner.state.subscribe()
    }

    /// Load the conversation directory.
    ///
    /// A fresh cached list is published immediately and revalidated in the
    /// background.
    pub async fn fetch_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        if let Some(cached) = self.inner.directory.cached() {
            debug!(conversations = cached.len(), "serving cached directory");
            self.inner.dispatch(Action::ConversationsLoaded(cached));
            self.inner.spawn_directory_refresh();
            return Ok(self.inner.snapshot().conversations);
        }
        self.inner.load_conversations().await
    }

    /// Open the conversation with `peer` and mark it read.
    ///
    /// Reopening the conversation that is already open with messages only
    /// marks it read.
    pub async fn set_current_conversation(&self, peer: &ProfileId) -> ChatResult<()> {
        let inner = &self.inner;
        if peer == inner.me() {
            return Err(ChatError::InvalidInput(
                "cannot open a conversation with yourself".to_string(),
            ));
        }

        let state = inner.snapshot();
        if state.has_messages_for(peer) {
            debug!(peer_id = %peer, "conversation already open, skipping fetch");
            inner.mark_read_after_open(peer).await;
            return Ok(());
        }
        if let Some(previous) = state.current_peer().filter(|previous| *previous != peer) {
            inner.scheduler.cancel(previous.clone());
        }

        let summary = inner.summary_for(peer).await;
        inner.dispatch(Action::ConversationOpened(summary));
        inner.dispatch(Action::MessagesLoading { peer: peer.clone() });

        if let Some(cached) = inner.page_cache.get(&inner.first_page_key(peer)) {
            debug!(peer_id = %peer, messages = cached.messages.len(), "serving cached page");
            inner.dispatch(Action::PageFetched { page: cached });
        }

        inner.refresh_head(peer).await?;
        inner.mark_read_after_open(peer).await;
        Ok(())
    }

    /// Store a message and append the confirmed row locally.
    pub async fn send_message(
        &self,
        peer: &ProfileId,
        body: &str,
        kind: MessageKind,
        file: Option<FileMeta>,
    ) -> ChatResult<Message> {
        let inner = &self.inner;
        if peer == inner.me() {
            return Err(ChatError::InvalidInput(
                "cannot send a message to yourself".to_string(),
            ));
        }
        if body.trim().is_empty() && file.is_none() {
            return Err(ChatError::InvalidInput("message is empty".to_string()));
        }

        let new_message = NewMessage {
            sender_id: inner.me().clone(),
            receiver_id: peer.clone(),
            body: body.to_string(),
            kind,
            file,
        };
        let message = inner
            .store
            .insert_message(&new_message)
            .await
            .map_err(|err| inner.fail(err))?;
        info!(message_id = %message.id, peer_id = %peer, "message sent");

        inner.directory.invalidate();
        inner
            .page_cache
            .invalidate(&keys::conversation_pages(inner.me(), peer));
        if let Err(err) = inner.snapshots.clear(inner.me()) {
            warn!(error = %err, "failed to clear conversation snapshot");
        }
        inner.dispatch(Action::MessageAppended(message.clone()));

        inner.spawn_directory_refresh();

        let notifier = inner.notifier.clone();
        let (sender, receiver) = (inner.me().clone(), peer.clone());
        let (text, kind) = (message.body.clone(), message.kind);
        tokio::spawn(async move {
            if let Err(err) = notifier.message_sent(&sender, &receiver, &text, kind).await {
                warn!(peer_id = %receiver, error = %err, "message notification failed");
            }
        });

        Ok(message)
    }

    /// Remove a message locally, then delete it remotely.
    ///
    /// Returns `Ok(false)` when no conversation is open. On a remote failure
    /// the message stays removed locally; call
    /// [`refresh_current_conversation`](Self::refresh_current_conversation)
    /// to restore it.
    pub async fn delete_message(&self, id: &MessageId) -> ChatResult<bool> {
        let inner = &self.inner;
        if inner.snapshot().current_conversation.is_none() {
            warn!(message_id = %id, "no open conversation, not deleting");
            return Ok(false);
        }

        inner.dispatch(Action::MessageRemoved(id.clone()));
        inner
            .store
            .delete_message(id, inner.me())
            .await
            .map_err(|err| {
                error!(message_id = %id, error = %err, "failed to delete message");
                inner.fail(err)
            })?;

        inner.directory.invalidate();
        inner.page_cache.invalidate(&keys::all_pages(inner.me()));
        inner.spawn_directory_refresh();
        info!(message_id = %id, "message deleted");
        Ok(true)
    }

    /// Load the page preceding the loaded messages.
    ///
    /// No-op returning 0 when nothing older exists or a load is in flight.
    pub async fn load_more_messages(&self) -> ChatResult<usize> {
        let inner = &self.inner;
        let mut claim = None;
        inner.state.send_if_modified(|state| {
            let Some(peer) = state.current_peer().cloned() else {
                return false;
            };
            if !apply(state, Action::OlderPageRequested { peer: peer.clone() }) {
                return false;
            }
            let current = state.current_conversation.as_ref();
            claim = Some((
                peer,
                current.map_or(0, |c| c.messages.len()),
                current.and_then(|c| c.messages.first().cloned()),
            ));
            true
        });
        let Some((peer, offset, anchor)) = claim else {
            debug!("nothing more to load");
            return Ok(0);
        };

        match inner
            .timeline
            .fetch_window(&peer, inner.config.page_size, offset, anchor.as_ref())
            .await
        {
            Ok(page) => {
                let fetched = page.messages.len();
                inner.dispatch(Action::PageFetched { page });
                Ok(fetched)
            }
            Err(err) => {
                error!(peer_id = %peer, error = %err, "failed to load older messages");
                inner.dispatch(Action::OlderPageFailed {
                    peer,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Mark every message from `peer` as read. Idempotent.
    pub async fn mark_read(&self, peer: &ProfileId) -> ChatResult<usize> {
        self.inner.mark_read(peer).await
    }

    /// Upload an attachment for a later file message.
    pub async fn upload_file(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ChatResult<UploadedFile> {
        let inner = &self.inner;
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("file name is empty".to_string()));
        }
        let size = bytes.len() as u64;
        if size > inner.config.max_upload_bytes {
            return Err(ChatError::InvalidInput(format!(
                "file is {size} bytes, limit is {}",
                inner.config.max_upload_bytes
            )));
        }
        let blobs = inner.blobs.as_ref().ok_or_else(|| {
            ChatError::InvalidInput("attachment storage not configured".to_string())
        })?;

        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin");
        let path = format!(
            "chat_files/{}/{}.{}",
            inner.identity.user_id,
            Utc::now().timestamp_millis(),
            extension
        );

        let url = blobs
            .upload(&path, bytes, content_type)
            .await
            .map_err(|err| inner.fail(err))?;
        info!(path = %path, size, "attachment uploaded");

        Ok(UploadedFile {
            url,
            name: name.to_string(),
            size,
        })
    }

    /// Refetch the open conversation's newest page.
    pub async fn refresh_current_conversation(&self) -> ChatResult<()> {
        let Some(peer) = self.inner.snapshot().current_peer().cloned() else {
            return Ok(());
        };
        self.inner.refresh_head(&peer).await?;
        Ok(())
    }

    pub fn clear_error(&self) {
        self.inner.dispatch(Action::ClearError);
    }

    /// Tear down realtime and background work. The state stays readable.
    pub fn shutdown(&self) {
        if let Some(mut subscription) = self.inner.realtime.lock().take() {
            subscription.unsubscribe();
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        info!(profile_id = %self.inner.me(), "chat engine stopped");
    }

    /// Whether the realtime channel is open.
    pub fn is_live(&self) -> bool {
        self.inner
            .realtime
            .lock()
            .as_ref()
            .is_some_and(RealtimeSubscription::is_active)
    }
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("identity", &self.inner.identity)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_follows_file_config() {
        let mut config = Config::default();
        config.page_size = 20;
        config.realtime_debounce_ms = 150;

        let engine_config = EngineConfig::from(&config);
        assert_eq!(engine_config.page_size, 20);
        assert_eq!(engine_config.realtime_debounce, Duration::from_millis(150));
        assert_eq!(engine_config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(engine_config.prefetch_directory);
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let mut config = Config::default();
        config.page_size = 0;
        assert_eq!(EngineConfig::from(&config).page_size, 1);
    }
}
