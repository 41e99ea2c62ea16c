//! Two cache tiers for the chat engine.
//!
//! - [`TtlCache`]: in-memory, minutes-long TTL, prefix invalidation. Holds
//!   conversation lists and first message pages.
//! - [`ConversationSnapshotStore`]: one persisted entry per identity holding
//!   the open conversation, restored before any network call.

pub mod keys;
mod snapshot;
mod ttl;

pub use snapshot::{ConversationSnapshotStore, SNAPSHOT_FORMAT_VERSION};
pub use ttl::TtlCache;
