//! Engine-level tests.
//!
//! - `scenarios.rs`      - Directory, open, paging, send, delete, upload
//! - `reconciliation.rs` - Head refreshes against loaded messages, page cache
//! - `realtime.rs`       - Event routing, debounce, directory refresh skipping
//! - `persistence.rs`    - Open-conversation snapshot across restarts

mod reconciliation;

use crate::engine::{ChatEngine, ChatEngineBuilder, EngineConfig};
use crate::realtime::LocalRealtimeHub;
use crate::testing::{
    message_at, profile, FakeRemoteStore, FakeSession, MemoryBlobStorage, RecordingNotifier,
};
use chat_core::{ChangeEvent, ChangeKind, MessageId, ProfileId};
use chat_storage::{MemoryStorage, PersistentStorage};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const TRAINER: &str = "trainer-1";
pub(crate) const ATHLETE: &str = "athlete-1";
pub(crate) const OTHER_ATHLETE: &str = "athlete-2";

pub(crate) const TRAINER_USER: &str = "user-trainer";
pub(crate) const ATHLETE_USER: &str = "user-athlete";

pub(crate) const PAGE_SIZE: usize = 3;

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        page_size: PAGE_SIZE,
        realtime_debounce: Duration::from_millis(300),
        short_cache_ttl: Duration::from_secs(300),
        snapshot_ttl: Duration::from_secs(3600),
        max_upload_bytes: 1024,
        prefetch_directory: false,
    }
}

/// One trainer, two athletes of the same organisation, both assigned to the
/// trainer. The participants RPC is unavailable unless a test sets it.
pub(crate) struct Harness {
    pub store: Arc<FakeRemoteStore>,
    pub hub: LocalRealtimeHub,
    pub notifier: Arc<RecordingNotifier>,
    pub blobs: Arc<MemoryBlobStorage>,
    pub storage: Arc<dyn PersistentStorage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<dyn PersistentStorage>) -> Self {
        let store = Arc::new(FakeRemoteStore::new());
        store.add_profile(profile(
            TRAINER,
            Some(TRAINER_USER),
            "Marco Bianchi",
            "trainer",
            Some("org-1"),
        ));
        store.add_profile(profile(
            ATHLETE,
            Some(ATHLETE_USER),
            "Giulia Rossi",
            "athlete",
            Some("org-1"),
        ));
        store.add_profile(profile(
            OTHER_ATHLETE,
            None,
            "Luca Verdi",
            "athlete",
            Some("org-1"),
        ));
        store.assign_trainer(ATHLETE, TRAINER);
        store.assign_trainer(OTHER_ATHLETE, TRAINER);

        Self {
            store,
            hub: LocalRealtimeHub::new(),
            notifier: Arc::new(RecordingNotifier::new()),
            blobs: Arc::new(MemoryBlobStorage::new()),
            storage,
        }
    }

    pub fn builder_as(&self, user_id: &str) -> ChatEngineBuilder {
        ChatEngine::builder(Arc::new(FakeSession::signed_in(user_id)), self.store.clone())
            .blob_storage(self.blobs.clone())
            .notifier(self.notifier.clone())
            .realtime(Arc::new(self.hub.clone()))
            .storage(self.storage.clone())
            .config(test_config())
    }

    pub async fn trainer(&self) -> ChatEngine {
        self.builder_as(TRAINER_USER).start().await.unwrap()
    }

    pub async fn athlete(&self) -> ChatEngine {
        self.builder_as(ATHLETE_USER).start().await.unwrap()
    }

    /// Seed a message `secs` after the test origin.
    pub fn seed(&self, id: &str, sender: &str, receiver: &str, secs: i64) {
        self.store.insert_raw(message_at(id, sender, receiver, secs));
    }

    /// Seed `count` messages alternating between the athlete and the trainer,
    /// ids `m1..`, the athlete writing first.
    pub fn seed_conversation(&self, count: usize) {
        for n in 1..=count {
            let (sender, receiver) = if n % 2 == 1 {
                (ATHLETE, TRAINER)
            } else {
                (TRAINER, ATHLETE)
            };
            self.seed(&format!("m{n}"), sender, receiver, n as i64);
        }
    }

    pub fn publish(&self, kind: ChangeKind, id: &str, sender: &str, receiver: &str) -> usize {
        self.hub.publish(ChangeEvent {
            kind,
            message_id: MessageId::from_string(id),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
        })
    }
}

pub(crate) fn peer(id: &str) -> ProfileId {
    ProfileId::from_string(id)
}

/// Ids of the open conversation's messages, oldest first.
pub(crate) fn open_ids(engine: &ChatEngine) -> Vec<String> {
    engine
        .state()
        .current_conversation
        .map(|c| c.messages.iter().map(|m| m.id.as_str().to_string()).collect())
        .unwrap_or_default()
}

/// Let spawned tasks run.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn basic_workflow() {
    let harness = Harness::new();
    harness.seed_conversation(2);
    let trainer = harness.trainer().await;

    let conversations = trainer.fetch_conversations().await.unwrap();
    assert_eq!(conversations[0].peer_id, peer(ATHLETE));

    trainer.set_current_conversation(&peer(ATHLETE)).await.unwrap();
    assert_eq!(open_ids(&trainer), vec!["m1", "m2"]);

    let sent = trainer
        .send_message(&peer(ATHLETE), "a domani", Default::default(), None)
        .await
        .unwrap();
    assert_eq!(open_ids(&trainer).last(), Some(&sent.id.as_str().to_string()));
}
