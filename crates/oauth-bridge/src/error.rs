//! Bridge error types.
//!
//! This module defines the errors that can occur while registering strategies
//! and while running the authorization handshake.
//!
//! Every error raised inside the callback leg is caught at the flow boundary,
//! logged, and converted into a failure redirect. Only the initialization
//! barrier is ever surfaced to the browser as a non-redirect response.

use std::fmt;

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::store::StoreError;

/// Errors that can occur during bridge configuration and login flows.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge configuration is invalid (for example, colliding paths).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// The userinfo resolver failed or returned no usable subject.
    #[error("Identity resolution failed: {message}")]
    IdentityResolution {
        /// Description of why resolution failed.
        message: String,
    },

    /// The provider rejected the authorization code or could not be reached.
    #[error("Code exchange failed: {message}")]
    Exchange {
        /// Description of the exchange failure.
        message: String,
    },

    /// A user store operation failed.
    #[error("Persistence error: {message}")]
    Persistence {
        /// Description of the storage failure.
        message: String,
    },

    /// The handshake state is missing, expired, or does not match the callback.
    #[error("Handshake error: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// The host backend handle has not been injected yet.
    #[error("Host backend is not initialized")]
    NotInitialized,

    /// Signing or verifying a session token failed.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the signing failure.
        message: String,
    },
}

impl BridgeError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `IdentityResolution` error.
    #[must_use]
    pub fn identity_resolution(message: impl Into<String>) -> Self {
        Self::IdentityResolution {
            message: message.into(),
        }
    }

    /// Creates a new `Exchange` error.
    #[must_use]
    pub fn exchange(message: impl Into<String>) -> Self {
        Self::Exchange {
            message: message.into(),
        }
    }

    /// Creates a new `Persistence` error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a new `Handshake` error.
    #[must_use]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Returns `true` if this error ends a callback leg with a failure redirect.
    ///
    /// Configuration errors abort the configuration build instead, and the
    /// initialization barrier is reported as its own response.
    #[must_use]
    pub fn is_flow_failure(&self) -> bool {
        matches!(
            self,
            Self::IdentityResolution { .. }
                | Self::Exchange { .. }
                | Self::Persistence { .. }
                | Self::Handshake { .. }
                | Self::Signing { .. }
        )
    }

    /// Returns `true` if the failure originates outside this server
    /// (browser, provider, or resolver).
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::IdentityResolution { .. } | Self::Exchange { .. } | Self::Handshake { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::IdentityResolution { .. } => ErrorCategory::Identity,
            Self::Exchange { .. } => ErrorCategory::Exchange,
            Self::Persistence { .. } => ErrorCategory::Persistence,
            Self::Handshake { .. } => ErrorCategory::Handshake,
            Self::NotInitialized => ErrorCategory::Initialization,
            Self::Signing { .. } => ErrorCategory::Signing,
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<ExchangeError> for BridgeError {
    fn from(err: ExchangeError) -> Self {
        Self::exchange(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for BridgeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::signing(err.to_string())
    }
}

/// Categories of bridge errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid configuration.
    Configuration,
    /// Userinfo resolution failures.
    Identity,
    /// Provider code exchange failures.
    Exchange,
    /// User store failures.
    Persistence,
    /// Handshake state failures.
    Handshake,
    /// Host backend not yet injected.
    Initialization,
    /// Token signing failures.
    Signing,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Identity => write!(f, "identity"),
            Self::Exchange => write!(f, "exchange"),
            Self::Persistence => write!(f, "persistence"),
            Self::Handshake => write!(f, "handshake"),
            Self::Initialization => write!(f, "initialization"),
            Self::Signing => write!(f, "signing"),
        }
    }
}
