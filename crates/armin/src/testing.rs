//! In-memory port implementations for tests.
//!
//! `FakeRemoteStore` behaves like the real store closely enough for the
//! engine: directional scans are ascending by `created_at`, deletes check the
//! sender, and the participants RPC can be made to fail.

use async_trait::async_trait;
use chat_core::{
    epoch_floor, BlobStorage, ChatError, ChatResult, DirectoryScope, Identity, Message,
    MessageFilter, MessageId, MessageKind, NewMessage, NotificationDispatcher, Profile, ProfileId,
    RecentPeer, RemoteStore, RoleClass, SessionProvider,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Fixed origin for `message_at` timestamps.
const TEST_EPOCH_SECS: i64 = 1_700_000_000;

/// A timestamp `secs` seconds after the test origin.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(TEST_EPOCH_SECS + secs, 0).unwrap_or_else(epoch_floor)
}

/// An unread text message created `secs` seconds after the test origin.
pub fn message_at(id: &str, sender: &str, receiver: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        sender_id: sender.into(),
        receiver_id: receiver.into(),
        body: format!("message {id}"),
        kind: MessageKind::Text,
        file_url: None,
        file_name: None,
        file_size: None,
        read_at: None,
        created_at: at(secs),
    }
}

pub fn profile(
    id: &str,
    user_id: Option<&str>,
    display_name: &str,
    role: &str,
    org_id: Option<&str>,
) -> Profile {
    Profile {
        id: id.into(),
        user_id: user_id.map(str::to_string),
        display_name: display_name.to_string(),
        role: role.to_string(),
        org_id: org_id.map(str::to_string),
    }
}

#[derive(Default)]
struct StoreData {
    profiles: BTreeMap<ProfileId, Profile>,
    messages: Vec<Message>,
    /// `None` makes the participants RPC fail.
    recent_peers: Option<Vec<RecentPeer>>,
    /// athlete -> trainer
    assignments: HashMap<ProfileId, ProfileId>,
    latency: Option<Duration>,
}

#[derive(Default)]
struct Counters {
    message_scans: AtomicUsize,
    inserts: AtomicUsize,
    mark_reads: AtomicUsize,
    deletes: AtomicUsize,
    rpc_calls: AtomicUsize,
    profile_lookups: AtomicUsize,
    directory_calls: AtomicUsize,
}

/// Remote store backed by plain collections.
#[derive(Default)]
pub struct FakeRemoteStore {
    data: Mutex<StoreData>,
    counters: Counters,
    fail_scans: AtomicBool,
    fail_writes: AtomicBool,
    clock: AtomicUsize,
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, profile: Profile) {
        self.data.lock().profiles.insert(profile.id.clone(), profile);
    }

    /// Delay every call by `latency` (uses tokio time, so paused clocks apply).
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.data.lock().latency = latency;
    }

    /// `None` makes the participants RPC fail.
    pub fn set_recent_peers(&self, peers: Option<Vec<RecentPeer>>) {
        self.data.lock().recent_peers = peers;
    }

    pub fn assign_trainer(&self, athlete: &str, trainer: &str) {
        self.data
            .lock()
            .assignments
            .insert(athlete.into(), trainer.into());
    }

    /// Store a message as-is, bypassing `insert_message`.
    pub fn insert_raw(&self, message: Message) {
        self.data.lock().messages.push(message);
    }

    /// Remove a message behind the engine's back.
    pub fn remove_raw(&self, id: &str) -> bool {
        let mut data = self.data.lock();
        let before = data.messages.len();
        data.messages.retain(|m| m.id.as_str() != id);
        data.messages.len() != before
    }

    pub fn messages(&self) -> Vec<Message> {
        self.data.lock().messages.clone()
    }

    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    /// Make inserts, mark-read and deletes fail with a remote error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn message_scans(&self) -> usize {
        self.counters.message_scans.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.counters.inserts.load(Ordering::SeqCst)
    }

    pub fn mark_reads(&self) -> usize {
        self.counters.mark_reads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn rpc_calls(&self) -> usize {
        self.counters.rpc_calls.load(Ordering::SeqCst)
    }

    pub fn profile_lookups(&self) -> usize {
        self.counters.profile_lookups.load(Ordering::SeqCst)
    }

    pub fn directory_calls(&self) -> usize {
        self.counters.directory_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = self.data.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writes(&self) -> ChatResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatError::RemoteStore("write rejected".to_string()));
        }
        Ok(())
    }

    /// Strictly increasing creation times, later than any seeded message.
    fn next_created_at(&self) -> DateTime<Utc> {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        let newest = self
            .data
            .lock()
            .messages
            .iter()
            .map(|m| m.created_at)
            .max()
            .unwrap_or_else(|| at(0));
        newest.max(at(1_000_000 + tick)) + ChronoDuration::milliseconds(1)
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    async fn find_profile_by_user(&self, user_id: &str) -> ChatResult<Option<Profile>> {
        self.counters.profile_lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self
            .data
            .lock()
            .profiles
            .values()
            .find(|p| p.user_id.as_deref() == Some(user_id))
            .cloned())
    }

    async fn get_profile(&self, id: &ProfileId) -> ChatResult<Option<Profile>> {
        self.counters.profile_lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.data.lock().profiles.get(id).cloned())
    }

    async fn get_profiles(&self, ids: &[ProfileId]) -> ChatResult<Vec<Profile>> {
        self.counters.profile_lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let data = self.data.lock();
        Ok(ids
            .iter()
            .filter_map(|id| data.profiles.get(id).cloned())
            .collect())
    }

    async fn list_messages(&self, filter: &MessageFilter) -> ChatResult<Vec<Message>> {
        self.counters.message_scans.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(ChatError::RemoteStore("scan failed".to_string()));
        }
        if filter.sender_id.is_none() && filter.receiver_id.is_none() {
            return Err(ChatError::InvalidInput("unbounded scan".to_string()));
        }
        let mut rows: Vec<Message> = self
            .data
            .lock()
            .messages
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn insert_message(&self, message: &NewMessage) -> ChatResult<Message> {
        self.counters.inserts.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check_writes()?;
        let stored = Message {
            id: MessageId::new(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            body: message.body.clone(),
            kind: message.kind,
            file_url: message.file.as_ref().map(|f| f.url.clone()),
            file_name: message.file.as_ref().map(|f| f.name.clone()),
            file_size: message.file.as_ref().map(|f| f.size),
            read_at: None,
            created_at: self.next_created_at(),
        };
        self.data.lock().messages.push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(
        &self,
        me: &ProfileId,
        peer: &ProfileId,
        at: DateTime<Utc>,
    ) -> ChatResult<usize> {
        self.counters.mark_reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check_writes()?;
        let mut updated = 0;
        for message in self.data.lock().messages.iter_mut() {
            if &message.sender_id == peer && message.is_unread_for(me) {
                message.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_message(&self, id: &MessageId, requester: &ProfileId) -> ChatResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check_writes()?;
        let mut data = self.data.lock();
        let index = data
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("message {id}")))?;
        if &data.messages[index].sender_id != requester {
            return Err(ChatError::Permission(
                "only the sender can delete a message".to_string(),
            ));
        }
        data.messages.remove(index);
        Ok(())
    }

    async fn list_recent_peers(&self, _me: &Identity) -> ChatResult<Vec<RecentPeer>> {
        self.counters.rpc_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.data
            .lock()
            .recent_peers
            .clone()
            .ok_or_else(|| ChatError::RemoteStore("participants function missing".to_string()))
    }

    async fn list_directory_peers(&self, scope: &DirectoryScope) -> ChatResult<Vec<Profile>> {
        self.counters.directory_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let data = self.data.lock();
        let peers = match scope {
            DirectoryScope::Counterparts { org_id } => data
                .profiles
                .values()
                .filter(|p| p.role_class() == RoleClass::Counterpart)
                .filter(|p| org_id.is_none() || p.org_id == *org_id)
                .cloned()
                .collect(),
            DirectoryScope::AssignedStaff { athlete_id } => data
                .assignments
                .get(athlete_id)
                .and_then(|trainer| data.profiles.get(trainer))
                .cloned()
                .into_iter()
                .collect(),
        };
        Ok(peers)
    }
}

/// Session that always reports the same user.
#[derive(Debug, Default)]
pub struct FakeSession {
    user_id: Option<String>,
    calls: AtomicUsize,
}

impl FakeSession {
    pub fn signed_in(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for FakeSession {
    async fn current_user_id(&self) -> ChatResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.user_id.clone())
    }
}

/// A notification recorded by `RecordingNotifier`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub sender: ProfileId,
    pub peer: ProfileId,
    pub body: String,
    pub kind: MessageKind,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: AtomicBool::new(true),
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn message_sent(
        &self,
        sender: &ProfileId,
        peer: &ProfileId,
        body: &str,
        kind: MessageKind,
    ) -> ChatResult<()> {
        self.sent.lock().push(SentNotification {
            sender: sender.clone(),
            peer: peer.clone(),
            body: body.to_string(),
            kind,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatError::RemoteStore("push service down".to_string()));
        }
        Ok(())
    }
}

/// Blob storage that keeps uploads in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    objects: Mutex<BTreeMap<String, (Vec<u8>, Option<String>)>>,
}

impl MemoryBlobStorage {
    pub const PUBLIC_BASE: &'static str = "https://files.test/documents";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().get(path).and_then(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ChatResult<String> {
        let mut objects = self.objects.lock();
        if objects.contains_key(path) {
            return Err(ChatError::RemoteStore(format!("object {path} exists")));
        }
        objects.insert(path.to_string(), (bytes, content_type.map(str::to_string)));
        Ok(format!("{}/{}", Self::PUBLIC_BASE, path))
    }
}
