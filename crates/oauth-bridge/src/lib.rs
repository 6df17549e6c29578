//! # oauth-bridge
//!
//! Bridges an external OAuth2 identity provider to a host backend's own
//! cookie-based session authentication.
//!
//! This crate provides:
//! - Multi-provider strategy registration with global path uniqueness
//! - The authorize/callback redirect handshake
//! - Account matching, linking and creation for external identities
//! - Session claims projection and token minting compatible with the host
//!
//! ## Overview
//!
//! ```text
//! browser ─▶ authorize leg ─▶ provider ─▶ callback leg
//!                                             │
//!        code exchange ◀──────────────────────┘
//!             │
//!             ▼
//!      identity resolver ─▶ account matcher ─▶ token minter ─▶ 302 + cookie
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Bridge, strategy and cookie configuration
//! - [`registry`] - Strategy registration and path claims
//! - [`flow`] - Authorize and callback legs
//! - [`exchange`] - Authorization-code exchange
//! - [`resolver`] - Userinfo resolution into external identities
//! - [`matcher`] - Account matching, linking and credential policies
//! - [`minter`] - Claims projection, signing and session cookies
//! - [`schema`] - Collection field-schema introspection
//! - [`store`] - User store trait and in-memory implementation
//! - [`handshake`] - Handshake session storage
//! - [`host`] - Host backend handle and initialization barrier
//! - [`http`] - Axum handlers for the handshake endpoints

pub mod config;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod handshake;
pub mod host;
pub mod http;
pub mod matcher;
pub mod minter;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod store;

pub use config::{
    BridgeSettings, CollectionAuthSettings, ConfigError, CookieSettings, CredentialMode,
    CredentialSettings, SameSitePolicy, SessionStoreSettings, StrategySettings,
};
pub use error::{BridgeError, ErrorCategory};
pub use exchange::{CodeExchanger, ExchangeError, HttpCodeExchanger, TokenSet};
pub use flow::{
    AuthorizeRedirect, CallbackOutcome, CallbackRequest, CompletedLogin, FlowCoordinator,
    IdentityContext,
};
pub use handshake::{HandshakeSession, HandshakeStore, InMemoryHandshakeStore};
pub use host::{HostBackend, HostHandle};
pub use http::bridge_router;
pub use matcher::{
    AccountLinker, CredentialPolicy, HiddenFieldCredential, LinkOutcome, LinkResult,
    VisibleFieldCredential,
};
pub use minter::{
    HmacTokenSigner, MintedSession, SessionClaims, SessionTokenMinter, TokenSigner,
    project_claims,
};
pub use registry::{SignInControl, StrategyConfig, StrategyId, StrategyRegistry};
pub use resolver::{
    ExternalIdentity, HttpUserinfoResolver, RequestContext, ResolverError, UserinfoResolver,
};
pub use schema::{CollectionSchema, DataField, FieldSchema};
pub use store::{AccessMode, InMemoryUserStore, InternalUser, StoreError, UserStore};

/// Type alias for bridge results.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::BridgeResult;
    pub use crate::config::{BridgeSettings, StrategySettings};
    pub use crate::error::BridgeError;
    pub use crate::flow::FlowCoordinator;
    pub use crate::host::{HostBackend, HostHandle};
    pub use crate::registry::{StrategyConfig, StrategyRegistry};
    pub use crate::resolver::{ExternalIdentity, UserinfoResolver};
    pub use crate::schema::CollectionSchema;
    pub use crate::store::{InternalUser, UserStore};
}
