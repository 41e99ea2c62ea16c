//! # Armin
//!
//! The chat sync engine: keeps one identity's conversation directory and
//! open conversation consistent with a remote message store.
//!
//! ## Principles
//!
//! - **The remote store is the source of truth** - Local state is a cache of it
//! - **Realtime events carry no payload** - They only trigger refetches
//! - **Bursts collapse** - At most one message fetch per conversation in flight
//! - **Reopening is cheap** - Fresh caches and the persisted snapshot serve first
//!
//! ## Architecture
//!
//! ```text
//! WRITE:
//!   action → remote store → reducer → snapshot
//!
//! READ:
//!   cache → remote store → reconcile → reducer
//!
//! REALTIME:
//!   event → invalidate → debounce → refetch
//! ```
//!
//! ## Crate Structure
//!
//! - [`engine`] - The [`ChatEngine`] and its builder
//! - [`identity`] - Session to profile resolution
//! - [`directory`] - Conversation list aggregation
//! - [`timeline`] - Message pages and reconciliation
//! - [`state`] - Chat state and its reducer
//! - [`realtime`] - Realtime subscription and the in-process hub
//! - [`refresh_fsm`] / [`refresher`] - Debounced realtime refreshes
//! - `testing` - In-memory fakes of every port (tests and the `testing` feature)

pub mod directory;
pub mod engine;
pub mod identity;
pub mod realtime;
pub mod refresh_fsm;
pub mod refresher;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timeline;

#[cfg(test)]
mod tests;

pub use directory::{peers_from_messages, ConversationDirectory};
pub use engine::{ChatEngine, ChatEngineBuilder, EngineConfig};
pub use identity::{IdentityResolver, ResolvedIdentity};
pub use realtime::{LocalRealtimeHub, RealtimeCallbacks, RealtimeSubscription};
pub use refresh_fsm::{RefreshInput, RefreshMachine, RefreshState};
pub use refresher::{MessageRefresher, RefreshScheduler};
pub use state::{apply, Action, ChatState};
pub use timeline::{MessageTimeline, PageFetch, TimelineStatus};
