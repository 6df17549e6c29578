//! Handshake session management.
//!
//! The authorize leg stores a [`HandshakeSession`] and hands its id to the
//! browser in a cookie. The callback leg consumes it exactly once.
//!
//! # Lifecycle
//!
//! 1. Session created when the authorize leg runs
//! 2. The provider redirects back with `code` and `state`
//! 3. The callback takes the session (removing it) and checks strategy,
//!    state and expiry before any code exchange happens
//!
//! A session that expired or was never stored fails the callback closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::expiry_after;
use crate::store::StoreError;

/// Transient state shared between the authorize and callback legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeSession {
    /// Session id (carried in the handshake cookie).
    pub id: Uuid,

    /// Strategy that started the handshake.
    pub strategy_id: String,

    /// Random `state` parameter sent to the provider.
    pub state: String,

    /// Redirect URI sent to the provider; the code exchange must repeat it.
    pub redirect_uri: String,

    /// Timestamp when the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Timestamp when the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl HandshakeSession {
    /// Creates a session with a fresh id and random state.
    ///
    /// A `ttl` past the representable range expires at the latest
    /// representable instant.
    #[must_use]
    pub fn new(
        strategy_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            strategy_id: strategy_id.into(),
            state: generate_state(),
            redirect_uri: redirect_uri.into(),
            created_at: now,
            expires_at: expiry_after(now, ttl)
                .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc()),
        }
    }

    /// Returns `true` if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

/// Generates a random `state` value.
///
/// 32 random bytes encoded as base64url without padding (43 characters).
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Storage for handshake sessions.
#[async_trait]
pub trait HandshakeStore: Send + Sync {
    /// Stores a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn save(&self, session: HandshakeSession) -> Result<(), StoreError>;

    /// Removes and returns a session.
    ///
    /// Returns `None` if the session does not exist or has expired. A
    /// session can be taken at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn take(&self, id: Uuid) -> Result<Option<HandshakeSession>, StoreError>;
}

/// In-memory handshake store.
///
/// Not shared between processes; multi-instance deployments need a
/// shared backend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHandshakeStore {
    sessions: Arc<RwLock<HashMap<Uuid, HandshakeSession>>>,
}

impl InMemoryHandshakeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no sessions are held.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| !session.is_expired());
    }
}

#[async_trait]
impl HandshakeStore for InMemoryHandshakeStore {
    async fn save(&self, session: HandshakeSession) -> Result<(), StoreError> {
        self.cleanup_expired().await;
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn take(&self, id: Uuid) -> Result<Option<HandshakeSession>, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&id).filter(|session| !session.is_expired()))
    }
}
