//! Authorization-code exchange.
//!
//! The code exchange is the standard OAuth 2.0 authorization-code grant
//! ([RFC 6749 §4.1](https://tools.ietf.org/html/rfc6749#section-4.1)). The
//! flow only depends on the [`CodeExchanger`] trait; [`HttpCodeExchanger`]
//! is the `reqwest` implementation used by the server.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::StrategySettings;

/// Default HTTP timeout for token endpoint requests.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens returned by a successful code exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token.
    pub access_token: String,

    /// Optional refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Errors that can occur while exchanging an authorization code.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The provider returned an OAuth error response.
    #[error("OAuth error: {error} - {description}")]
    OAuth {
        /// OAuth error code.
        error: String,
        /// Error description.
        description: String,
    },

    /// The token endpoint returned a non-success status.
    #[error("Token endpoint returned HTTP {0}")]
    Http(u16),

    /// The token endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The token response could not be parsed.
    #[error("Failed to parse token response: {0}")]
    Parse(String),

    /// The strategy is missing a value required for the exchange.
    #[error("Strategy is missing {0}")]
    MissingSetting(&'static str),
}

impl ExchangeError {
    /// Creates an `OAuth` error.
    #[must_use]
    pub fn oauth(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }
}

/// OAuth error body returned by token endpoints.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Exchanges authorization codes for tokens.
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    /// Exchanges `code` at the strategy's token endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeError` if the provider rejects the code or cannot be
    /// reached. Timeouts surface as `ExchangeError::Network`.
    async fn exchange(
        &self,
        settings: &StrategySettings,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ExchangeError>;
}

/// `reqwest`-backed code exchanger.
#[derive(Debug, Clone)]
pub struct HttpCodeExchanger {
    http_client: reqwest::Client,
}

impl HttpCodeExchanger {
    /// Creates an exchanger with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeError::Network` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ExchangeError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Creates an exchanger around an existing client.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl CodeExchanger for HttpCodeExchanger {
    async fn exchange(
        &self,
        settings: &StrategySettings,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ExchangeError> {
        let client_id = settings
            .client_id
            .as_deref()
            .ok_or(ExchangeError::MissingSetting("client_id"))?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
        ];
        if let Some(secret) = settings.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        tracing::debug!(token_url = %settings.token_url, "Exchanging authorization code");

        let response = self
            .http_client
            .post(&settings.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(ExchangeError::oauth(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }
            return Err(ExchangeError::Http(status.as_u16()));
        }

        let body = response.text().await?;
        // Some providers answer 200 with an error body.
        if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
            return Err(ExchangeError::oauth(
                oauth_error.error,
                oauth_error.error_description.unwrap_or_default(),
            ));
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }
}

/// Builds the provider authorization URL for the authorize leg.
///
/// # Errors
///
/// Returns `ExchangeError` if the strategy has no client id or its
/// authorization URL does not parse.
pub fn authorization_url(
    settings: &StrategySettings,
    redirect_uri: &str,
    state: &str,
) -> Result<Url, ExchangeError> {
    let client_id = settings
        .client_id
        .as_deref()
        .ok_or(ExchangeError::MissingSetting("client_id"))?;
    let mut url = Url::parse(&settings.authorization_url)
        .map_err(|e| ExchangeError::Parse(format!("authorization_url: {e}")))?;
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", client_id);
        params.append_pair("redirect_uri", redirect_uri);
        if let Some(scope) = settings.scope.as_deref() {
            params.append_pair("scope", scope);
        }
        params.append_pair("state", state);
    }
    Ok(url)
}
