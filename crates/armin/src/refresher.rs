//! Debounced message refreshes driven by realtime events.
//!
//! One worker task owns a [`RefreshMachine`] per conversation. Commands
//! arrive over an unbounded channel; the worker sleeps until the earliest
//! debounce deadline and then hands the conversation to the
//! [`MessageRefresher`].

use async_trait::async_trait;
use chat_core::ProfileId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::refresh_fsm::{RefreshInput, RefreshMachine, RefreshState};

/// Performs the actual refresh once a debounce window closes.
#[async_trait]
pub trait MessageRefresher: Send + Sync {
    async fn refresh_messages(&self, peer: &ProfileId);
}

#[derive(Debug)]
enum RefreshCommand {
    Trigger(ProfileId),
    Cancel(ProfileId),
}

struct Slot {
    machine: RefreshMachine,
    deadline: Option<Instant>,
}

impl Slot {
    fn new() -> Self {
        Self {
            machine: RefreshMachine::new(),
            deadline: None,
        }
    }
}

/// Front end of the refresh worker.
pub struct RefreshScheduler {
    sender: mpsc::UnboundedSender<RefreshCommand>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<RefreshCommand>>>,
    debounce: Duration,
}

impl RefreshScheduler {
    pub fn new(debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            debounce,
        }
    }

    /// Request a refresh of `peer`'s conversation after the debounce window.
    pub fn trigger(&self, peer: ProfileId) {
        if self.sender.send(RefreshCommand::Trigger(peer)).is_err() {
            debug!("refresh worker stopped, dropping trigger");
        }
    }

    /// Drop a pending (not yet started) refresh of `peer`.
    pub fn cancel(&self, peer: ProfileId) {
        if self.sender.send(RefreshCommand::Cancel(peer)).is_err() {
            debug!("refresh worker stopped, dropping cancel");
        }
    }

    /// Spawn the worker. Returns `None` if it was already started.
    ///
    /// The worker exits when the scheduler is dropped or the refresher is
    /// gone.
    pub fn start(&self, refresher: Weak<dyn MessageRefresher>) -> Option<JoinHandle<()>> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            warn!("refresh worker already started");
            return None;
        };
        let debounce = self.debounce;

        Some(tokio::spawn(async move {
            let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ProfileId>();
            let mut slots: HashMap<ProfileId, Slot> = HashMap::new();

            loop {
                let next_deadline = slots.values().filter_map(|slot| slot.deadline).min();

                tokio::select! {
                    command = receiver.recv() => {
                        match command {
                            Some(RefreshCommand::Trigger(peer)) => {
                                on_trigger(&mut slots, peer, debounce);
                            }
                            Some(RefreshCommand::Cancel(peer)) => {
                                on_cancel(&mut slots, &peer);
                            }
                            None => break,
                        }
                    }
                    Some(peer) = done_rx.recv() => {
                        on_completed(&mut slots, &peer);
                    }
                    _ = sleep_until(next_deadline) => {
                        let now = Instant::now();
                        let due: Vec<ProfileId> = slots
                            .iter()
                            .filter(|(_, slot)| slot.deadline.is_some_and(|d| d <= now))
                            .map(|(peer, _)| peer.clone())
                            .collect();

                        for peer in due {
                            let Some(refresher) = refresher.upgrade() else {
                                debug!("refresher dropped, stopping refresh worker");
                                return;
                            };
                            if let Some(slot) = slots.get_mut(&peer) {
                                slot.deadline = None;
                                if slot.machine.consume(&RefreshInput::Elapsed).is_err() {
                                    continue;
                                }
                            }
                            debug!(peer_id = %peer, "debounce elapsed, refreshing messages");
                            let done = done_tx.clone();
                            tokio::spawn(async move {
                                let task_peer = peer.clone();
                                let refresh = tokio::spawn(async move {
                                    refresher.refresh_messages(&task_peer).await;
                                });
                                if let Err(err) = refresh.await {
                                    warn!(peer_id = %peer, error = %err, "message refresh task failed");
                                }
                                let _ = done.send(peer);
                            });
                        }
                    }
                }
            }

            debug!("refresh worker stopped");
        }))
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("debounce", &self.debounce)
            .field("started", &self.receiver.lock().is_none())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn on_trigger(slots: &mut HashMap<ProfileId, Slot>, peer: ProfileId, debounce: Duration) {
    let slot = slots.entry(peer.clone()).or_insert_with(Slot::new);
    let fetching = *slot.machine.state() == RefreshState::Fetching;
    if slot.machine.consume(&RefreshInput::Trigger).is_err() {
        return;
    }
    if fetching {
        debug!(peer_id = %peer, "refresh in flight, dropping trigger");
    } else {
        slot.deadline = Some(Instant::now() + debounce);
    }
}

fn on_cancel(slots: &mut HashMap<ProfileId, Slot>, peer: &ProfileId) {
    let Some(slot) = slots.get_mut(peer) else {
        return;
    };
    if slot.machine.consume(&RefreshInput::Cancel).is_ok() {
        debug!(peer_id = %peer, "pending refresh cancelled");
        slots.remove(peer);
    }
}

fn on_completed(slots: &mut HashMap<ProfileId, Slot>, peer: &ProfileId) {
    if let Some(slot) = slots.get_mut(peer) {
        if slot.machine.consume(&RefreshInput::Completed).is_ok()
            && *slot.machine.state() == RefreshState::Idle
        {
            slots.remove(peer);
        }
    }
}
