//! Strategy registry.
//!
//! Every configured provider integration is registered once while the
//! bridge configuration is built. Registration assigns a namespaced id from
//! a monotonic counter and claims the strategy's authorize and callback
//! paths; any collision aborts the build before an endpoint is mounted.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::BridgeResult;
use crate::config::StrategySettings;
use crate::error::BridgeError;
use crate::resolver::UserinfoResolver;

/// Namespace prefix of strategy ids.
pub const STRATEGY_NAMESPACE: &str = "oauth2";

/// Default label of the sign-in control.
pub const DEFAULT_LABEL: &str = "Sign in with OAuth2";

/// Namespaced strategy identifier (`oauth2:<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StrategyId(String);

impl StrategyId {
    fn from_counter(n: u32) -> Self {
        Self(format!("{STRATEGY_NAMESPACE}:{n}"))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration handed to [`StrategyRegistry::register`].
#[derive(Clone)]
pub struct StrategyConfig {
    /// Provider settings.
    pub settings: StrategySettings,

    /// Host-supplied userinfo resolver.
    pub resolver: Arc<dyn UserinfoResolver>,
}

impl StrategyConfig {
    /// Creates a strategy configuration.
    #[must_use]
    pub fn new(settings: StrategySettings, resolver: Arc<dyn UserinfoResolver>) -> Self {
        Self { settings, resolver }
    }
}

/// A registered strategy. Immutable once registered.
#[derive(Clone)]
pub struct RegisteredStrategy {
    /// Assigned id.
    pub id: StrategyId,

    /// Provider settings.
    pub settings: StrategySettings,

    /// Resolved callback path.
    pub callback_path: String,

    /// Host-supplied userinfo resolver.
    pub resolver: Arc<dyn UserinfoResolver>,

    /// `false` when the strategy has no client credentials.
    pub enabled: bool,
}

impl fmt::Debug for RegisteredStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStrategy")
            .field("id", &self.id)
            .field("authorize_path", &self.settings.authorize_path)
            .field("callback_path", &self.callback_path)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RegisteredStrategy {
    /// Path of the authorize leg.
    #[must_use]
    pub fn authorize_path(&self) -> &str {
        &self.settings.authorize_path
    }
}

/// Sign-in control rendered by the host UI for an enabled strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignInControl {
    /// Strategy id.
    pub strategy_id: StrategyId,
    /// Button label.
    pub label: String,
    /// Link target (the authorize leg).
    pub href: String,
}

/// Paths claimed by registered strategies, plus paths the host reserved
/// for its own routes.
#[derive(Debug, Default)]
pub struct PathRegistry {
    claimed: HashMap<String, StrategyId>,
    reserved: HashSet<String>,
}

impl PathRegistry {
    /// Returns the strategy owning `path`, if any.
    #[must_use]
    pub fn owner(&self, path: &str) -> Option<&StrategyId> {
        self.claimed.get(path)
    }

    /// Returns `true` if the host reserved `path`.
    #[must_use]
    pub fn is_reserved(&self, path: &str) -> bool {
        self.reserved.contains(path)
    }

    /// Number of paths claimed by strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Returns `true` if no path is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    fn check(&self, path: &str) -> BridgeResult<()> {
        if self.reserved.contains(path) {
            return Err(BridgeError::configuration(format!(
                "path '{path}' is reserved by the host"
            )));
        }
        match self.claimed.get(path) {
            Some(owner) => Err(BridgeError::configuration(format!(
                "path '{path}' is already registered by strategy {owner}"
            ))),
            None => Ok(()),
        }
    }

    fn claim(&mut self, path: String, id: StrategyId) {
        self.claimed.insert(path, id);
    }
}

/// Registry of provider strategies.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    counter: u32,
    paths: PathRegistry,
    strategies: Vec<Arc<RegisteredStrategy>>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy and returns its id.
    ///
    /// A strategy without a client id is registered disabled: it gets an id
    /// and claims its paths, but exposes no endpoints.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if either path collides with a
    /// path of a registered strategy, or the settings are invalid.
    pub fn register(&mut self, config: StrategyConfig) -> BridgeResult<StrategyId> {
        let StrategyConfig { settings, resolver } = config;
        let enabled = settings.has_credentials();
        let callback_path = settings.resolved_callback_path();

        if enabled {
            settings.validate()?;
        } else if settings.authorize_path == callback_path {
            return Err(BridgeError::configuration(format!(
                "authorize and callback paths must differ (both '{callback_path}')"
            )));
        }

        // Check both before claiming either, so a failed registration
        // leaves the registry untouched.
        self.paths.check(&settings.authorize_path)?;
        self.paths.check(&callback_path)?;

        self.counter += 1;
        let id = StrategyId::from_counter(self.counter);
        self.paths
            .claim(settings.authorize_path.clone(), id.clone());
        self.paths.claim(callback_path.clone(), id.clone());

        if enabled {
            tracing::info!(
                strategy = %id,
                authorize_path = %settings.authorize_path,
                callback_path = %callback_path,
                "Registered OAuth2 strategy"
            );
        } else {
            tracing::warn!(strategy = %id, "No client id, OAuth2 strategy disabled");
        }

        self.strategies.push(Arc::new(RegisteredStrategy {
            id: id.clone(),
            settings,
            callback_path,
            resolver,
            enabled,
        }));
        Ok(id)
    }

    /// Reserves a path served by the host itself, so no strategy can claim
    /// it. Reserve host routes before registering strategies.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if the path is already claimed or
    /// reserved.
    pub fn reserve_path(&mut self, path: impl Into<String>) -> BridgeResult<()> {
        let path = path.into();
        self.paths.check(&path)?;
        self.paths.reserved.insert(path);
        Ok(())
    }

    /// Returns a registered strategy.
    #[must_use]
    pub fn get(&self, id: &StrategyId) -> Option<&Arc<RegisteredStrategy>> {
        self.strategies.iter().find(|s| &s.id == id)
    }

    /// Iterates over all registered strategies in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredStrategy>> {
        self.strategies.iter()
    }

    /// Iterates over enabled strategies.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<RegisteredStrategy>> {
        self.strategies.iter().filter(|s| s.enabled)
    }

    /// Claimed paths.
    #[must_use]
    pub fn paths(&self) -> &PathRegistry {
        &self.paths
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Sign-in controls for every enabled strategy.
    #[must_use]
    pub fn sign_in_controls(&self) -> Vec<SignInControl> {
        self.enabled()
            .map(|s| SignInControl {
                strategy_id: s.id.clone(),
                label: s
                    .settings
                    .label
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
                href: s.settings.authorize_path.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{RequestContext, ResolverError};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopResolver;

    #[async_trait]
    impl UserinfoResolver for NoopResolver {
        async fn userinfo(
            &self,
            _access_token: &str,
            _refresh_token: Option<&str>,
            _request: Option<&RequestContext>,
        ) -> Result<Value, ResolverError> {
            Ok(Value::Null)
        }
    }

    fn config(authorize: &str, callback: &str) -> StrategyConfig {
        StrategyConfig::new(
            StrategySettings {
                client_id: Some("client_id".to_string()),
                authorization_url: "https://id.example.com/authorize".to_string(),
                token_url: "https://id.example.com/token".to_string(),
                authorize_path: authorize.to_string(),
                callback_path: Some(callback.to_string()),
                ..StrategySettings::default()
            },
            Arc::new(NoopResolver),
        )
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut registry = StrategyRegistry::new();
        let a = registry.register(config("/a/authorize", "/a/callback")).unwrap();
        let b = registry.register(config("/b/authorize", "/b/callback")).unwrap();
        assert_eq!(a.as_str(), "oauth2:1");
        assert_eq!(b.as_str(), "oauth2:2");
        assert_eq!(registry.paths().len(), 4);
        assert_eq!(registry.paths().owner("/b/callback"), Some(&b));
    }

    #[test]
    fn test_duplicate_authorize_path_rejected() {
        let mut registry = StrategyRegistry::new();
        registry
            .register(config("/oauth2/authorize", "/a/callback"))
            .unwrap();
        let err = registry
            .register(config("/oauth2/authorize", "/b/callback"))
            .unwrap_err();

        assert!(matches!(err, BridgeError::Configuration { .. }));
        assert_eq!(registry.len(), 1);
        assert!(registry.paths().owner("/b/callback").is_none());
    }

    #[test]
    fn test_callback_colliding_with_other_authorize_rejected() {
        let mut registry = StrategyRegistry::new();
        registry.register(config("/a", "/b")).unwrap();
        let err = registry.register(config("/c", "/a")).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
    }

    #[test]
    fn test_failed_registration_does_not_consume_id() {
        let mut registry = StrategyRegistry::new();
        registry.register(config("/a", "/b")).unwrap();
        registry.register(config("/a", "/c")).unwrap_err();
        let id = registry.register(config("/d", "/e")).unwrap();
        assert_eq!(id.as_str(), "oauth2:2");
    }

    #[test]
    fn test_disabled_strategy_claims_paths() {
        let mut registry = StrategyRegistry::new();
        let mut disabled = config("/oauth2/authorize", "/oauth2/callback");
        disabled.settings.client_id = None;
        let id = registry.register(disabled).unwrap();

        assert_eq!(registry.enabled().count(), 0);
        assert!(!registry.get(&id).unwrap().enabled);
        assert!(registry.sign_in_controls().is_empty());
        assert!(
            registry
                .register(config("/oauth2/authorize", "/other"))
                .is_err()
        );
    }

    #[test]
    fn test_reserved_path_rejected() {
        let mut registry = StrategyRegistry::new();
        registry.reserve_path("/admin").unwrap();
        assert!(registry.paths().is_reserved("/admin"));

        let err = registry.register(config("/a", "/admin")).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
        assert!(err.to_string().contains("reserved by the host"));
        assert!(registry.is_empty());

        let mut disabled = config("/admin", "/b");
        disabled.settings.client_id = None;
        assert!(registry.register(disabled).is_err());
    }

    #[test]
    fn test_reserve_claimed_path_rejected() {
        let mut registry = StrategyRegistry::new();
        registry.register(config("/a", "/b")).unwrap();
        assert!(registry.reserve_path("/b").is_err());
        assert!(registry.reserve_path("/admin").is_ok());
        assert!(registry.reserve_path("/admin").is_err());
    }

    #[test]
    fn test_route_metacharacter_rejected() {
        let mut registry = StrategyRegistry::new();
        let err = registry
            .register(config("/oauth2/:provider", "/b"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
        assert_eq!(registry.paths().len(), 0);
    }

    #[test]
    fn test_sign_in_controls() {
        let mut registry = StrategyRegistry::new();
        let mut labelled = config("/a", "/b");
        labelled.settings.label = Some("Sign in with Example".to_string());
        let id = registry.register(labelled).unwrap();
        registry.register(config("/c", "/d")).unwrap();

        let controls = registry.sign_in_controls();
        assert_eq!(controls.len(), 2);
        assert_eq!(
            controls[0],
            SignInControl {
                strategy_id: id,
                label: "Sign in with Example".to_string(),
                href: "/a".to_string(),
            }
        );
        assert_eq!(controls[1].label, DEFAULT_LABEL);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut registry = StrategyRegistry::new();
        let mut invalid = config("/a", "/b");
        invalid.settings.token_url = String::new();
        let err = registry.register(invalid).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
    }
}
