//! User store trait and in-memory implementation.
//!
//! The durable user store belongs to the host. The bridge only needs
//! find/create/update semantics on one collection, plus an internal access
//! mode that can read and write fields hidden from ordinary callers.
//!
//! # Implementation Notes
//!
//! Implementations should:
//!
//! - Make each single-document find/create/update atomic
//! - Enforce uniqueness of the subject field when concurrent first logins
//!   are possible; the bridge does not lock around match-then-create

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Document fields of a user.
pub type UserData = Map<String, Value>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// An account in the host's user collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalUser {
    /// Document id assigned by the store.
    pub id: String,

    /// Slug of the owning collection.
    pub collection: String,

    /// Document fields, including the subject field.
    #[serde(default)]
    pub data: UserData,

    /// Strategy that authenticated this user in the current flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl InternalUser {
    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Returns a string field value.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    /// Returns the email, if set.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.str_field("email")
    }

    /// Tags the user with its collection and the current strategy.
    pub fn tag(&mut self, collection: &str, strategy: &str) {
        self.collection = collection.to_string();
        self.strategy = Some(strategy.to_string());
    }
}

/// Field visibility for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Hidden fields are stripped from results and ignored on writes.
    Public,
    /// Hidden fields are readable and writable.
    Internal,
}

/// Errors returned by user stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The collection is not managed by this store.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The document does not exist.
    #[error("User not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("Unique constraint violated on field '{field}'")]
    Conflict {
        /// The constrained field.
        field: String,
    },

    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(field: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.into(),
        }
    }
}

/// Storage trait for the host's user collection.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds the first user whose `field` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection is unknown or the backend fails.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        access: AccessMode,
    ) -> StoreResult<Option<InternalUser>>;

    /// Finds a user by document id.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection is unknown or the backend fails.
    async fn find_by_id(
        &self,
        collection: &str,
        id: &str,
        access: AccessMode,
    ) -> StoreResult<Option<InternalUser>>;

    /// Creates a user and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a unique field collides.
    async fn create(
        &self,
        collection: &str,
        data: UserData,
        access: AccessMode,
    ) -> StoreResult<InternalUser>;

    /// Merges `data` into an existing user and returns the updated user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user does not exist and
    /// `StoreError::Conflict` if a unique field collides.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: UserData,
        access: AccessMode,
    ) -> StoreResult<InternalUser>;
}

#[derive(Debug, Default)]
struct CollectionState {
    hidden_fields: Vec<String>,
    unique_fields: Vec<String>,
    documents: HashMap<String, UserData>,
    order: Vec<String>,
}

impl CollectionState {
    fn view(&self, collection: &str, id: &str, access: AccessMode) -> Option<InternalUser> {
        let data = self.documents.get(id)?;
        let mut data = data.clone();
        if access == AccessMode::Public {
            for hidden in &self.hidden_fields {
                data.remove(hidden);
            }
        }
        Some(InternalUser {
            id: id.to_string(),
            collection: collection.to_string(),
            data,
            strategy: None,
        })
    }

    fn writable(&self, mut data: UserData, access: AccessMode) -> UserData {
        if access == AccessMode::Public {
            for hidden in &self.hidden_fields {
                data.remove(hidden);
            }
        }
        data.remove("id");
        data
    }

    fn check_unique(&self, candidate: &UserData, except: Option<&str>) -> StoreResult<()> {
        for field in &self.unique_fields {
            let Some(value) = candidate.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self
                .documents
                .iter()
                .any(|(id, doc)| Some(id.as_str()) != except && doc.get(field) == Some(value));
            if taken {
                return Err(StoreError::conflict(field.clone()));
            }
        }
        Ok(())
    }
}

/// In-memory user store for development and testing.
///
/// Collections must be declared up front. Each collection can declare
/// hidden fields and unique fields.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    collections: Arc<RwLock<HashMap<String, CollectionState>>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a collection with its hidden fields.
    pub async fn add_collection(&self, collection: &str, hidden_fields: Vec<String>) {
        let mut collections = self.collections.write().await;
        let state = collections.entry(collection.to_string()).or_default();
        state.hidden_fields = hidden_fields;
    }

    /// Declares a unique index on a field of a collection.
    pub async fn with_unique_field(&self, collection: &str, field: &str) {
        let mut collections = self.collections.write().await;
        let state = collections.entry(collection.to_string()).or_default();
        if !state.unique_fields.iter().any(|f| f == field) {
            state.unique_fields.push(field.to_string());
        }
    }

    /// Returns the number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map_or(0, |state| state.documents.len())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        access: AccessMode,
    ) -> StoreResult<Option<InternalUser>> {
        let collections = self.collections.read().await;
        let state = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let found = state
            .order
            .iter()
            .find(|id| {
                state
                    .documents
                    .get(*id)
                    .is_some_and(|doc| doc.get(field) == Some(value))
            })
            .and_then(|id| state.view(collection, id, access));
        Ok(found)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &str,
        access: AccessMode,
    ) -> StoreResult<Option<InternalUser>> {
        let collections = self.collections.read().await;
        let state = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        Ok(state.view(collection, id, access))
    }

    async fn create(
        &self,
        collection: &str,
        data: UserData,
        access: AccessMode,
    ) -> StoreResult<InternalUser> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let data = state.writable(data, access);
        state.check_unique(&data, None)?;

        let id = uuid::Uuid::new_v4().to_string();
        state.documents.insert(id.clone(), data);
        state.order.push(id.clone());

        state
            .view(collection, &id, access)
            .ok_or_else(|| StoreError::backend("created document vanished"))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: UserData,
        access: AccessMode,
    ) -> StoreResult<InternalUser> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let patch = state.writable(data, access);
        let mut merged = state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        merged.extend(patch);
        state.check_unique(&merged, Some(id))?;
        state.documents.insert(id.to_string(), merged);

        state
            .view(collection, id, access)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
