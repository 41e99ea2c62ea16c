//! Resolution of the local participant.

use chat_core::{ChatError, ChatResult, Identity, Profile, RemoteStore, SessionProvider};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Identity and the profile it was resolved from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub profile: Profile,
}

/// Resolves the caller's profile id once per session.
///
/// Concurrent callers share a single in-flight lookup. A failed lookup is not
/// remembered, so the next call retries.
pub struct IdentityResolver {
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn RemoteStore>,
    resolved: OnceCell<ResolvedIdentity>,
}

impl IdentityResolver {
    pub fn new(session: Arc<dyn SessionProvider>, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            session,
            store,
            resolved: OnceCell::new(),
        }
    }

    pub async fn resolve(&self) -> ChatResult<Identity> {
        Ok(self.resolve_with_profile().await?.identity)
    }

    pub async fn resolve_with_profile(&self) -> ChatResult<ResolvedIdentity> {
        self.resolved
            .get_or_try_init(|| self.lookup())
            .await
            .cloned()
    }

    /// The identity, if a previous call already resolved it.
    pub fn cached(&self) -> Option<&Identity> {
        self.resolved.get().map(|resolved| &resolved.identity)
    }

    async fn lookup(&self) -> ChatResult<ResolvedIdentity> {
        let user_id = self
            .session
            .current_user_id()
            .await?
            .ok_or_else(|| ChatError::Authentication("no active session".to_string()))?;

        debug!(user_id = %user_id, "resolving chat identity");

        let profile = self
            .store
            .find_profile_by_user(&user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("no profile for user {user_id}")))?;

        info!(profile_id = %profile.id, role = %profile.role, "chat identity resolved");

        Ok(ResolvedIdentity {
            identity: Identity {
                profile_id: profile.id.clone(),
                user_id,
            },
            profile,
        })
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}
