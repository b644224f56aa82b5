use std::sync::Arc;

use tracing::{info, warn};

use crate::Result;
use crate::broadcaster::SessionEvent;
use crate::events::EventBus;
use crate::store::KeyValueStore;
use crate::types::{Role, SessionCredential};

pub const TOKEN_KEY: &str = "token";
pub const IDENTITY_KEY: &str = "userEmail";
pub const ROLE_KEY: &str = "role";
pub const NICKNAME_KEY: &str = "nickname";

const SESSION_KEYS: &[&str] = &[TOKEN_KEY, IDENTITY_KEY, ROLE_KEY];

/// Owns the persisted [`SessionCredential`].
///
/// Every write replaces the whole credential and raises
/// [`SessionEvent::Changed`] once the store has accepted it.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    events: EventBus<SessionEvent>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, events: EventBus<SessionEvent>) -> Self {
        Self { store, events }
    }

    pub async fn set_session(&self, credential: &SessionCredential) -> Result<()> {
        self.store
            .set_many(&[
                (TOKEN_KEY, credential.token.as_str()),
                (IDENTITY_KEY, credential.identity.as_str()),
                (ROLE_KEY, credential.role.as_str()),
            ])
            .await?;
        info!(identity = %credential.identity, role = %credential.role, "session stored");
        self.events.publish(&SessionEvent::Changed);
        Ok(())
    }

    pub async fn get_session(&self) -> Result<Option<SessionCredential>> {
        let Some(token) = self.store.get(TOKEN_KEY).await? else {
            return Ok(None);
        };
        let identity = self.store.get(IDENTITY_KEY).await?;
        let role = self.store.get(ROLE_KEY).await?;

        let (Some(identity), Some(role)) = (identity, role) else {
            warn!("stored session is incomplete, treating as signed out");
            return Ok(None);
        };
        let role = match role.parse::<Role>() {
            Ok(role) => role,
            Err(err) => {
                warn!(error = %err, "stored session has an unusable role");
                return Ok(None);
            }
        };

        Ok(Some(SessionCredential {
            token,
            identity,
            role,
        }))
    }

    /// Bearer token only, for the request pipeline.
    pub async fn token(&self) -> Result<Option<String>> {
        Ok(self.get_session().await?.map(|credential| credential.token))
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.store.remove_many(SESSION_KEYS).await?;
        info!("session cleared");
        self.events.publish(&SessionEvent::Changed);
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

/// Profile data cached next to, but never through, the session store.
pub struct ProfileCache {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn nickname(&self) -> Result<Option<String>> {
        self.store.get(NICKNAME_KEY).await
    }

    pub async fn set_nickname(&self, nickname: &str) -> Result<()> {
        self.store.set(NICKNAME_KEY, nickname).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(NICKNAME_KEY).await
    }
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCache").finish_non_exhaustive()
    }
}
