//! Bridge configuration.
//!
//! Configuration types for the bridge itself, for each provider strategy,
//! and for the cookie attributes of the host's auth collection.
//!
//! # Example (TOML)
//!
//! ```toml
//! [bridge]
//! collection = "users"
//! subject_field = "sub"
//!
//! [bridge.credential]
//! mode = "hidden_field"
//!
//! [bridge.session]
//! cookie_name = "oauth_session"
//! ttl = "10m"
//!
//! [[strategies]]
//! client_id = "client_id"
//! client_secret = "client_secret"
//! authorization_url = "https://id.example.com/oauth/authorize"
//! token_url = "https://id.example.com/oauth/token"
//! callback_url = "https://app.example.com/oauth2/callback"
//! scope = "basic"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Default authorize leg path.
pub const DEFAULT_AUTHORIZE_PATH: &str = "/oauth2/authorize";

/// Default callback leg path.
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth2/callback";

/// Default redirect after a successful login (the admin dashboard).
pub const DEFAULT_SUCCESS_REDIRECT: &str = "/admin";

/// Default redirect after a failed login (the site root).
pub const DEFAULT_FAILURE_REDIRECT: &str = "/";

/// Characters with routing meaning in endpoint paths.
const ROUTE_METACHARACTERS: [char; 4] = [':', '{', '}', '*'];

/// Returns `now + ttl`, or `None` if the result is not representable.
#[must_use]
pub fn expiry_after(now: OffsetDateTime, ttl: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
}

/// Bridge-wide settings shared by all strategies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Slug of the user collection accounts are resolved against.
    pub collection: String,

    /// Name of the field holding the external subject.
    pub subject_field: String,

    /// Where the synthesized placeholder credential is stored.
    pub credential: CredentialSettings,

    /// Handshake session store options.
    pub session: SessionStoreSettings,

    /// Public base URL used to build redirect URIs for strategies without
    /// an absolute `callback_url`.
    pub base_url: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            collection: "users".to_string(),
            subject_field: "sub".to_string(),
            credential: CredentialSettings::default(),
            session: SessionStoreSettings::default(),
            base_url: None,
        }
    }
}

impl BridgeSettings {
    /// Validates the bridge settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the collection or subject field
    /// is empty, the session TTL is zero or out of range, or the base URL
    /// does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "collection cannot be empty".to_string(),
            ));
        }
        if self.subject_field.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "subject_field cannot be empty".to_string(),
            ));
        }
        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.ttl must be > 0".to_string(),
            ));
        }
        if expiry_after(OffsetDateTime::now_utc(), self.session.ttl).is_none() {
            return Err(ConfigError::InvalidValue(
                "session.ttl is out of range".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "session.cookie_name cannot be empty".to_string(),
            ));
        }
        if let Some(base) = &self.base_url {
            Url::parse(base).map_err(|e| {
                ConfigError::InvalidValue(format!("base_url '{base}' is not a valid URL: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Credential storage mode for newly created accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Store the placeholder in the collection's regular password field.
    VisibleField,
    /// Store the placeholder in a hidden internal field.
    #[default]
    HiddenField,
}

/// Credential field settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CredentialSettings {
    /// Storage mode.
    pub mode: CredentialMode,

    /// Field name override. Defaults to `password` in visible mode and
    /// `oauth_credential` in hidden mode.
    pub field: Option<String>,
}

impl CredentialSettings {
    /// Returns the field the placeholder credential is written to.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match (&self.field, self.mode) {
            (Some(field), _) => field,
            (None, CredentialMode::VisibleField) => "password",
            (None, CredentialMode::HiddenField) => "oauth_credential",
        }
    }
}

/// Handshake session store options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionStoreSettings {
    /// Name of the cookie carrying the handshake session id.
    pub cookie_name: String,

    /// Lifetime of a handshake between the authorize and callback legs.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Mark the handshake cookie as `Secure`.
    pub secure: bool,
}

impl Default for SessionStoreSettings {
    fn default() -> Self {
        Self {
            cookie_name: "oauth_session".to_string(),
            ttl: Duration::from_secs(600), // 10 minutes
            secure: false,
        }
    }
}

/// Settings of a single provider integration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategySettings {
    /// OAuth client id. A strategy without one is registered but disabled.
    pub client_id: Option<String>,

    /// OAuth client secret.
    pub client_secret: Option<String>,

    /// Provider authorization endpoint.
    pub authorization_url: String,

    /// Provider token endpoint.
    pub token_url: String,

    /// Provider userinfo endpoint, used when no resolver is supplied in code.
    pub userinfo_url: Option<String>,

    /// Absolute redirect URI registered with the provider.
    pub callback_url: Option<String>,

    /// Path the callback leg is mounted at. Derived from `callback_url`
    /// when unset.
    pub callback_path: Option<String>,

    /// Path the authorize leg is mounted at.
    pub authorize_path: String,

    /// Requested scope.
    pub scope: Option<String>,

    /// Redirect target after a successful login.
    pub success_redirect: String,

    /// Redirect target after a failed login.
    pub failure_redirect: String,

    /// Overwrite stored account fields with the latest identity claims.
    pub update_on_login: bool,

    /// Hand the inbound request context to the userinfo resolver.
    pub pass_request_to_resolver: bool,

    /// Label of the sign-in control rendered by the host.
    pub label: Option<String>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authorization_url: String::new(),
            token_url: String::new(),
            userinfo_url: None,
            callback_url: None,
            callback_path: None,
            authorize_path: DEFAULT_AUTHORIZE_PATH.to_string(),
            scope: None,
            success_redirect: DEFAULT_SUCCESS_REDIRECT.to_string(),
            failure_redirect: DEFAULT_FAILURE_REDIRECT.to_string(),
            update_on_login: false,
            pass_request_to_resolver: false,
            label: None,
        }
    }
}

impl StrategySettings {
    /// Returns `true` if the strategy has client credentials.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.client_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Resolves the callback path.
    ///
    /// Priority: explicit `callback_path` > path of `callback_url` > default.
    #[must_use]
    pub fn resolved_callback_path(&self) -> String {
        if let Some(path) = &self.callback_path {
            return path.clone();
        }
        self.callback_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .map(|u| u.path().to_string())
            .filter(|p| !p.is_empty() && p != "/")
            .unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string())
    }

    /// Validates the strategy settings.
    ///
    /// Missing client credentials are not a validation error; they disable
    /// the strategy at registration time.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an endpoint URL does not parse, a path does
    /// not start with `/` or contains a routing metacharacter (`:`, `{`,
    /// `}`, `*`), or the authorize and callback paths are equal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authorization_url.is_empty() {
            return Err(ConfigError::Missing("authorization_url".to_string()));
        }
        if self.token_url.is_empty() {
            return Err(ConfigError::Missing("token_url".to_string()));
        }

        let urls = [
            ("authorization_url", Some(&self.authorization_url)),
            ("token_url", Some(&self.token_url)),
            ("userinfo_url", self.userinfo_url.as_ref()),
            ("callback_url", self.callback_url.as_ref()),
        ];
        for (name, value) in urls {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| {
                    ConfigError::InvalidValue(format!("{name} '{value}' is not a valid URL: {e}"))
                })?;
            }
        }

        let callback_path = self.resolved_callback_path();
        for (name, path) in [
            ("authorize_path", self.authorize_path.as_str()),
            ("callback_path", callback_path.as_str()),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} '{path}' must start with '/'"
                )));
            }
            if path.contains(ROUTE_METACHARACTERS) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} '{path}' must not contain any of ':', '{{', '}}', '*'"
                )));
            }
        }

        if self.authorize_path == callback_path {
            return Err(ConfigError::InvalidValue(format!(
                "authorize_path and callback_path must differ (both '{callback_path}')"
            )));
        }

        Ok(())
    }
}

/// `SameSite` policy of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum SameSitePolicy {
    /// `SameSite=Strict`.
    Strict,
    /// `SameSite=Lax`.
    #[default]
    Lax,
    /// `SameSite=None`.
    None,
}

impl From<SameSitePolicy> for cookie::SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => cookie::SameSite::Strict,
            SameSitePolicy::Lax => cookie::SameSite::Lax,
            SameSitePolicy::None => cookie::SameSite::None,
        }
    }
}

/// Cookie attributes configured by the host for its auth collection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CookieSettings {
    /// Mark the session cookie as `Secure`.
    pub secure: bool,

    /// `SameSite` attribute.
    pub same_site: SameSitePolicy,

    /// Cookie domain. Omitted from the cookie when unset or empty.
    pub domain: Option<String>,
}

/// Auth settings of the host's user collection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectionAuthSettings {
    /// Session token lifetime.
    #[serde(with = "humantime_serde")]
    pub token_expiration: Duration,

    /// Session cookie attributes.
    pub cookies: CookieSettings,
}

impl CollectionAuthSettings {
    /// Validates the auth settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the token expiration is zero or
    /// out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_expiration.is_zero() {
            return Err(ConfigError::InvalidValue(
                "token_expiration must be > 0".to_string(),
            ));
        }
        if expiry_after(OffsetDateTime::now_utc(), self.token_expiration).is_none() {
            return Err(ConfigError::InvalidValue(
                "token_expiration is out of range".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CollectionAuthSettings {
    fn default() -> Self {
        Self {
            token_expiration: Duration::from_secs(7200), // 2 hours
            cookies: CookieSettings::default(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
