//! Toshinori: Supabase adapter for the chat engine.
//!
//! Implements the remote store, session and attachment storage ports from
//! `chat-core` against Supabase's REST, auth and storage endpoints.
//!
//! # Architecture
//!
//! ```text
//! armin (ChatEngine) → chat-core ports → SupabaseChatStore → SupabaseClient → Supabase
//! ```
//!
//! Rows are decoded into typed DTOs (`rows`) and validated there before
//! becoming domain values. Errors convert into `ChatError` at this boundary.

mod client;
mod error;
pub mod rows;
mod store;

pub use client::{Query, SupabaseClient};
pub use error::{ToshinoriError, ToshinoriResult};
pub use store::{SupabaseChatStore, DEFAULT_ATTACHMENT_BUCKET};
