//! Startup wiring of the host backend.
//!
//! The server stands in for a real host: it owns an in-memory user store,
//! declares the user collection with its hidden fields and the unique
//! subject index, seeds configured users, and builds the [`HostBackend`]
//! that gets injected into the bridge once everything is in place.

use std::sync::Arc;

use anyhow::Context;
use oauth_bridge::store::{AccessMode, InMemoryUserStore, UserData, UserStore};
use oauth_bridge::{FlowCoordinator, HmacTokenSigner, HostBackend};

use crate::config::AppConfig;

/// Declares the user collection in the store.
pub async fn prepare_store(store: &InMemoryUserStore, cfg: &AppConfig, hidden_fields: Vec<String>) {
    let collection = &cfg.bridge.collection;
    store.add_collection(collection, hidden_fields).await;
    // Two concurrent first logins of one subject must not create two accounts.
    store
        .with_unique_field(collection, &cfg.bridge.subject_field)
        .await;
}

/// Creates the configured seed users and returns how many were created.
pub async fn seed_users(
    store: &dyn UserStore,
    collection: &str,
    users: &[UserData],
) -> anyhow::Result<usize> {
    for (i, data) in users.iter().enumerate() {
        let user = store
            .create(collection, data.clone(), AccessMode::Internal)
            .await
            .with_context(|| format!("failed to seed user #{i}"))?;
        tracing::debug!(collection, user_id = %user.id, "Seeded user");
    }
    if !users.is_empty() {
        tracing::info!(collection, count = users.len(), "Seed users created");
    }
    Ok(users.len())
}

/// Builds the host backend: schema with bridge fields, seeded store, signer.
pub async fn build_backend(
    cfg: &AppConfig,
    coordinator: &FlowCoordinator,
) -> anyhow::Result<HostBackend> {
    let secret = cfg
        .host
        .secret()
        .context("host.secret is required")?;

    let mut schema = cfg.collection.clone();
    coordinator.install_schema(&mut schema);

    let store = InMemoryUserStore::new();
    prepare_store(&store, cfg, schema.hidden_field_names()).await;
    seed_users(&store, &schema.slug, &cfg.seed_users).await?;

    Ok(HostBackend::new(
        Arc::new(store),
        schema,
        Arc::new(HmacTokenSigner::new(secret.as_bytes())),
        cfg.host.cookie_prefix.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn user(sub: &str) -> UserData {
        match json!({ "sub": sub, "email": format!("{sub}@example.org") }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_seed_users() {
        let cfg = AppConfig::default();
        let store = InMemoryUserStore::new();
        prepare_store(&store, &cfg, Vec::new()).await;

        let seeded = seed_users(&store, "users", &[user("a"), user("b")])
            .await
            .unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(store.count("users").await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_seed_subject_fails() {
        let cfg = AppConfig::default();
        let store = InMemoryUserStore::new();
        prepare_store(&store, &cfg, Vec::new()).await;

        let err = seed_users(&store, "users", &[user("a"), user("a")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("seed user #1"));
    }
}
