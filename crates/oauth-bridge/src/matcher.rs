//! Account matching and linking.
//!
//! Maps an [`ExternalIdentity`] to an [`InternalUser`]:
//!
//! ```text
//! START ─┬─ authenticated session ──────────────▶ LINK ───────────┐
//!        └─ find by subject ─┬─ found ─▶ MATCHED ─┬─ UPDATE ──────┤
//!                            │                    └─ NOOP ────────┤
//!                            └─ not found ─▶ CREATE ──────────────┴─▶ END
//! ```
//!
//! Exactly one terminal branch runs per login. Writes only happen after the
//! identity has been resolved, so a failed resolution never touches the store.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;

use crate::BridgeResult;
use crate::config::{CredentialMode, CredentialSettings};
use crate::resolver::ExternalIdentity;
use crate::schema::DataField;
use crate::store::{AccessMode, InternalUser, UserData, UserStore};

/// Length of generated placeholder credentials.
pub const PLACEHOLDER_LENGTH: usize = 32;

/// Generates a random alphanumeric placeholder credential.
#[must_use]
pub fn generate_placeholder() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PLACEHOLDER_LENGTH)
        .map(char::from)
        .collect()
}

/// Where the credential of a newly created account is stored.
pub trait CredentialPolicy: Send + Sync + fmt::Debug {
    /// Name of the field the credential is written to.
    fn field(&self) -> &str;

    /// Schema field the policy needs the collection to declare, if any.
    fn schema_field(&self) -> Option<DataField>;

    /// Writes the credential into the fields of an account being created.
    ///
    /// Uses `hint` when present, otherwise a random placeholder.
    fn apply(&self, fields: &mut UserData, hint: Option<&str>) {
        let credential = hint.map_or_else(generate_placeholder, str::to_string);
        fields.insert(self.field().to_string(), Value::String(credential));
    }
}

/// Stores the credential in the collection's regular password field.
#[derive(Debug, Clone)]
pub struct VisibleFieldCredential {
    field: String,
}

impl VisibleFieldCredential {
    /// Creates the policy for the given field.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl CredentialPolicy for VisibleFieldCredential {
    fn field(&self) -> &str {
        &self.field
    }

    fn schema_field(&self) -> Option<DataField> {
        None
    }
}

/// Stores the credential in a hidden internal field.
#[derive(Debug, Clone)]
pub struct HiddenFieldCredential {
    field: String,
}

impl HiddenFieldCredential {
    /// Creates the policy for the given field.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl CredentialPolicy for HiddenFieldCredential {
    fn field(&self) -> &str {
        &self.field
    }

    fn schema_field(&self) -> Option<DataField> {
        Some(DataField::new(self.field.clone()).hidden().read_only())
    }
}

/// Builds the credential policy selected by configuration.
#[must_use]
pub fn credential_policy(settings: &CredentialSettings) -> Arc<dyn CredentialPolicy> {
    match settings.mode {
        CredentialMode::VisibleField => Arc::new(VisibleFieldCredential::new(settings.field_name())),
        CredentialMode::HiddenField => Arc::new(HiddenFieldCredential::new(settings.field_name())),
    }
}

/// Terminal branch taken by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The identity was merged into the already-authenticated user.
    Linked,
    /// An existing user matched and was left untouched.
    MatchedNoop,
    /// An existing user matched and was updated with the latest claims.
    MatchedUpdated,
    /// A new user was created.
    Created,
}

impl LinkOutcome {
    /// Returns `true` if the branch wrote to the store.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::MatchedNoop)
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked => write!(f, "link"),
            Self::MatchedNoop => write!(f, "matched_noop"),
            Self::MatchedUpdated => write!(f, "matched_update"),
            Self::Created => write!(f, "create"),
        }
    }
}

/// Result of resolving an identity to an account.
#[derive(Debug, Clone)]
pub struct LinkResult {
    /// The account, tagged with its collection and the current strategy.
    pub user: InternalUser,
    /// Branch that produced it.
    pub outcome: LinkOutcome,
}

/// The account matcher/linker.
#[derive(Clone)]
pub struct AccountLinker {
    store: Arc<dyn UserStore>,
    collection: String,
    subject_field: String,
    credential: Arc<dyn CredentialPolicy>,
}

impl fmt::Debug for AccountLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountLinker")
            .field("collection", &self.collection)
            .field("subject_field", &self.subject_field)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl AccountLinker {
    /// Creates a linker over one collection.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        collection: impl Into<String>,
        subject_field: impl Into<String>,
        credential: Arc<dyn CredentialPolicy>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            subject_field: subject_field.into(),
            credential,
        }
    }

    /// Resolves `identity` to an account.
    ///
    /// `current_user` is the user of an already-authenticated session, if
    /// the request carries one.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Persistence` if a store operation fails,
    /// including a uniqueness conflict from a concurrent first login.
    pub async fn link_or_create(
        &self,
        identity: &ExternalIdentity,
        strategy: &str,
        update_on_login: bool,
        current_user: Option<InternalUser>,
    ) -> BridgeResult<LinkResult> {
        let fields = identity.to_fields(&self.subject_field);

        let (mut user, outcome) = if let Some(current) = current_user {
            let user = self
                .store
                .update(&self.collection, &current.id, fields, AccessMode::Internal)
                .await?;
            (user, LinkOutcome::Linked)
        } else {
            let subject = Value::String(identity.subject.clone());
            let existing = self
                .store
                .find_by_field(
                    &self.collection,
                    &self.subject_field,
                    &subject,
                    AccessMode::Internal,
                )
                .await?;

            match existing {
                Some(user) if update_on_login => {
                    let user = self
                        .store
                        .update(&self.collection, &user.id, fields, AccessMode::Internal)
                        .await?;
                    (user, LinkOutcome::MatchedUpdated)
                }
                Some(user) => (user, LinkOutcome::MatchedNoop),
                None => {
                    let mut fields = fields;
                    self.credential
                        .apply(&mut fields, identity.password_hint.as_deref());
                    let user = self
                        .store
                        .create(&self.collection, fields, AccessMode::Internal)
                        .await?;
                    (user, LinkOutcome::Created)
                }
            }
        };

        user.tag(&self.collection, strategy);

        tracing::info!(
            strategy = %strategy,
            collection = %self.collection,
            user_id = %user.id,
            outcome = %outcome,
            "Resolved external identity"
        );

        Ok(LinkResult { user, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::store::{InMemoryUserStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;

    async fn store() -> InMemoryUserStore {
        let store = InMemoryUserStore::new();
        store
            .add_collection("users", vec!["oauth_credential".to_string()])
            .await;
        store.with_unique_field("users", "sub").await;
        store
    }

    fn linker(store: &InMemoryUserStore, settings: &CredentialSettings) -> AccountLinker {
        AccountLinker::new(
            Arc::new(store.clone()),
            "users",
            "sub",
            credential_policy(settings),
        )
    }

    async fn seed(store: &InMemoryUserStore) -> InternalUser {
        let mut data = UserData::new();
        data.insert("sub".into(), json!("existing_sub"));
        data.insert("email".into(), json!("test@example.org"));
        data.insert("name".into(), json!("existing"));
        store
            .create("users", data, AccessMode::Internal)
            .await
            .unwrap()
    }

    fn changed_identity() -> ExternalIdentity {
        ExternalIdentity::new("existing_sub")
            .with_email("new@example.org")
            .with_name("renamed")
    }

    #[test]
    fn test_placeholder_is_random_alphanumeric() {
        let a = generate_placeholder();
        let b = generate_placeholder();
        assert_eq!(a.len(), PLACEHOLDER_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_credential_policy_selection() {
        let hidden = credential_policy(&CredentialSettings::default());
        assert_eq!(hidden.field(), "oauth_credential");
        let field = hidden.schema_field().unwrap();
        assert!(field.hidden);

        let visible = credential_policy(&CredentialSettings {
            mode: CredentialMode::VisibleField,
            field: None,
        });
        assert_eq!(visible.field(), "password");
        assert!(visible.schema_field().is_none());
    }

    #[tokio::test]
    async fn test_matched_noop_leaves_fields_untouched() {
        let store = store().await;
        let seeded = seed(&store).await;
        let linker = linker(&store, &CredentialSettings::default());

        let result = linker
            .link_or_create(&changed_identity(), "oauth2:1", false, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, LinkOutcome::MatchedNoop);
        assert_eq!(result.user.id, seeded.id);
        assert_eq!(result.user.collection, "users");
        assert_eq!(result.user.strategy.as_deref(), Some("oauth2:1"));

        let stored = store
            .find_by_id("users", &seeded.id, AccessMode::Internal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.email(), Some("test@example.org"));
        assert_eq!(stored.str_field("name"), Some("existing"));
    }

    #[tokio::test]
    async fn test_matched_update_overwrites_fields() {
        let store = store().await;
        let seeded = seed(&store).await;
        let linker = linker(&store, &CredentialSettings::default());

        let result = linker
            .link_or_create(&changed_identity(), "oauth2:1", true, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, LinkOutcome::MatchedUpdated);
        assert_eq!(result.user.id, seeded.id);
        assert_eq!(result.user.email(), Some("new@example.org"));
        assert_eq!(result.user.str_field("name"), Some("renamed"));
        assert_eq!(store.count("users").await, 1);
    }

    #[tokio::test]
    async fn test_create_uses_hidden_placeholder() {
        let store = store().await;
        let linker = linker(&store, &CredentialSettings::default());

        let identity = ExternalIdentity::new("new_sub").with_email("n@example.org");
        let result = linker
            .link_or_create(&identity, "oauth2:1", false, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, LinkOutcome::Created);
        assert_eq!(result.user.str_field("sub"), Some("new_sub"));
        let credential = result.user.str_field("oauth_credential").unwrap();
        assert_eq!(credential.len(), PLACEHOLDER_LENGTH);
        assert!(result.user.field("password").is_none());

        let public = store
            .find_by_id("users", &result.user.id, AccessMode::Public)
            .await
            .unwrap()
            .unwrap();
        assert!(public.field("oauth_credential").is_none());
    }

    #[tokio::test]
    async fn test_create_uses_password_hint_in_visible_mode() {
        let store = store().await;
        let settings = CredentialSettings {
            mode: CredentialMode::VisibleField,
            field: None,
        };
        let linker = linker(&store, &settings);

        let mut identity = ExternalIdentity::new("new_sub");
        identity.password_hint = Some("provided".to_string());
        let result = linker
            .link_or_create(&identity, "oauth2:1", false, None)
            .await
            .unwrap();

        assert_eq!(result.user.str_field("password"), Some("provided"));
    }

    #[tokio::test]
    async fn test_link_merges_into_current_user() {
        let store = store().await;
        let mut data = UserData::new();
        data.insert("email".into(), json!("me@example.org"));
        let current = store
            .create("users", data, AccessMode::Internal)
            .await
            .unwrap();
        let linker = linker(&store, &CredentialSettings::default());

        let identity = ExternalIdentity::new("second_provider_sub");
        let result = linker
            .link_or_create(&identity, "oauth2:2", false, Some(current.clone()))
            .await
            .unwrap();

        assert_eq!(result.outcome, LinkOutcome::Linked);
        assert_eq!(result.user.id, current.id);
        assert_eq!(result.user.str_field("sub"), Some("second_provider_sub"));
        assert_eq!(result.user.email(), Some("me@example.org"));
        assert_eq!(result.user.strategy.as_deref(), Some("oauth2:2"));
        assert_eq!(store.count("users").await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_surfaces_persistence_error() {
        let store = store().await;
        seed(&store).await;

        // Simulates the losing side of a concurrent first login: the
        // lookup missed, but the subject exists by the time create runs.
        let err = store
            .create(
                "users",
                ExternalIdentity::new("existing_sub").to_fields("sub"),
                AccessMode::Internal,
            )
            .await
            .unwrap_err();
        let err: BridgeError = err.into();
        assert!(matches!(err, BridgeError::Persistence { .. }));
    }

    struct BrokenStore;

    #[async_trait]
    impl UserStore for BrokenStore {
        async fn find_by_field(
            &self,
            _collection: &str,
            _field: &str,
            _value: &Value,
            _access: AccessMode,
        ) -> StoreResult<Option<InternalUser>> {
            Err(StoreError::backend("unavailable"))
        }

        async fn find_by_id(
            &self,
            _collection: &str,
            _id: &str,
            _access: AccessMode,
        ) -> StoreResult<Option<InternalUser>> {
            Err(StoreError::backend("unavailable"))
        }

        async fn create(
            &self,
            _collection: &str,
            _data: UserData,
            _access: AccessMode,
        ) -> StoreResult<InternalUser> {
            Err(StoreError::backend("unavailable"))
        }

        async fn update(
            &self,
            _collection: &str,
            _id: &str,
            _data: UserData,
            _access: AccessMode,
        ) -> StoreResult<InternalUser> {
            Err(StoreError::backend("unavailable"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_persistence_error() {
        let linker = AccountLinker::new(
            Arc::new(BrokenStore),
            "users",
            "sub",
            credential_policy(&CredentialSettings::default()),
        );
        let err = linker
            .link_or_create(&ExternalIdentity::new("abc"), "oauth2:1", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Persistence { .. }));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(LinkOutcome::Linked.to_string(), "link");
        assert_eq!(LinkOutcome::MatchedNoop.to_string(), "matched_noop");
        assert!(!LinkOutcome::MatchedNoop.is_write());
        assert!(LinkOutcome::Created.is_write());
    }
}
