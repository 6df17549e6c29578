use oauth_bridge::schema::{CollectionSchema, DataField};
use oauth_bridge::store::UserData;
use oauth_bridge::{BridgeSettings, StrategySettings};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Host secret and session cookie naming
    #[serde(default)]
    pub host: HostConfig,
    /// Bridge-wide settings
    #[serde(default)]
    pub bridge: BridgeSettings,
    /// Schema of the user collection
    #[serde(default = "default_collection")]
    pub collection: CollectionSchema,
    /// Provider strategies, registered in order
    #[serde(default)]
    pub strategies: Vec<StrategySettings>,
    /// Users created in the in-memory store at startup
    #[serde(default)]
    pub seed_users: Vec<UserData>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            host: HostConfig::default(),
            bridge: BridgeSettings::default(),
            collection: default_collection(),
            strategies: Vec::new(),
            seed_users: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Host validation
        if self.host.secret().is_none() {
            return Err("host.secret is required".into());
        }
        if self.host.cookie_prefix.trim().is_empty() {
            return Err("host.cookie_prefix must not be empty".into());
        }
        if self.host.exchange_timeout.is_zero() {
            return Err("host.exchange_timeout must be > 0".into());
        }
        // Bridge validation
        self.bridge
            .validate()
            .map_err(|e| format!("bridge config error: {e}"))?;
        self.collection
            .auth
            .validate()
            .map_err(|e| format!("collection.auth config error: {e}"))?;
        if self.collection.slug != self.bridge.collection {
            return Err(format!(
                "collection.slug '{}' must match bridge.collection '{}'",
                self.collection.slug, self.bridge.collection
            ));
        }
        // Strategy validation; disabled strategies are only checked at registration
        for (i, strategy) in self.strategies.iter().enumerate() {
            if !strategy.has_credentials() {
                continue;
            }
            strategy
                .validate()
                .map_err(|e| format!("strategies[{i}] config error: {e}"))?;
            if strategy.userinfo_url.is_none() {
                return Err(format!("strategies[{i}].userinfo_url is required"));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Settings the host contributes to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Secret signing session tokens. Required.
    #[serde(default)]
    pub secret: Option<String>,
    /// Session cookies are named `<cookie_prefix>-token`.
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,
    /// Timeout of token and userinfo requests to providers.
    #[serde(default = "default_exchange_timeout", with = "humantime_serde")]
    pub exchange_timeout: Duration,
}

fn default_cookie_prefix() -> String {
    "app".into()
}
fn default_exchange_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_prefix: default_cookie_prefix(),
            exchange_timeout: default_exchange_timeout(),
        }
    }
}

impl HostConfig {
    /// The configured secret, if non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.trim().is_empty())
    }
}

fn default_collection() -> CollectionSchema {
    CollectionSchema::new("users")
        .with_field(DataField::new("email").saved_to_jwt())
        .with_field(DataField::new("name").saved_to_jwt())
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "oauth-bridge.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OAUTH_BRIDGE__HOST__SECRET=...
        builder = builder.add_source(
            Environment::with_prefix("OAUTH_BRIDGE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
