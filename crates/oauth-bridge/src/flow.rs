//! Authorization flow coordination.
//!
//! [`FlowCoordinator`] implements the two legs of every strategy:
//!
//! - **authorize**: store a handshake session and redirect to the provider
//! - **callback**: restore the handshake, exchange the code, resolve the
//!   identity, match or create the account and mint the session cookie
//!
//! Every failure inside the callback leg is caught here, logged, and turned
//! into a failure redirect. The only error that escapes is the host handle
//! barrier.

use std::sync::Arc;

use cookie::Cookie;
use uuid::Uuid;

use crate::BridgeResult;
use crate::config::BridgeSettings;
use crate::error::BridgeError;
use crate::exchange::{CodeExchanger, TokenSet, authorization_url};
use crate::handshake::{HandshakeSession, HandshakeStore};
use crate::host::{HostBackend, HostHandle};
use crate::matcher::{AccountLinker, CredentialPolicy, LinkResult, credential_policy};
use crate::registry::{RegisteredStrategy, StrategyRegistry};
use crate::resolver::{IdentityResolver, RequestContext};
use crate::schema::CollectionSchema;
use crate::store::{AccessMode, InternalUser};

/// Redirect produced by the authorize leg.
#[derive(Debug, Clone)]
pub struct AuthorizeRedirect {
    /// Provider authorization URL.
    pub location: String,
    /// Cookie carrying the handshake session id.
    pub handshake_cookie: Cookie<'static>,
}

/// Inputs of the callback leg, extracted from the request.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    /// `code` query parameter.
    pub code: Option<String>,
    /// `state` query parameter.
    pub state: Option<String>,
    /// `error` query parameter set by the provider on denial.
    pub error: Option<String>,
    /// Handshake session id from the handshake cookie.
    pub handshake_id: Option<String>,
    /// Existing session token from the host session cookie.
    pub session_token: Option<String>,
    /// Request URI and headers.
    pub context: RequestContext,
}

/// Context handed to [`FlowCoordinator::verify`].
#[derive(Debug, Clone, Default)]
pub struct IdentityContext {
    /// Inbound request, forwarded to resolvers that ask for it.
    pub request: Option<RequestContext>,
    /// User of an already-authenticated session.
    pub current_user: Option<InternalUser>,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    /// Success redirect target.
    pub location: String,
    /// Session cookie.
    pub session_cookie: Cookie<'static>,
    /// Matcher result.
    pub link: LinkResult,
}

/// Result of the callback leg.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Login succeeded.
    Success(Box<CompletedLogin>),
    /// Login failed; no session cookie is issued.
    Failure {
        /// Failure redirect target.
        location: String,
        /// The caught error.
        error: BridgeError,
    },
}

impl CallbackOutcome {
    /// Redirect target of the outcome.
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Success(login) => &login.location,
            Self::Failure { location, .. } => location,
        }
    }

    /// Returns `true` for a successful login.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Runs the handshake for all registered strategies.
pub struct FlowCoordinator {
    registry: Arc<StrategyRegistry>,
    host: HostHandle,
    handshakes: Arc<dyn HandshakeStore>,
    exchanger: Arc<dyn CodeExchanger>,
    credential: Arc<dyn CredentialPolicy>,
    settings: BridgeSettings,
}

impl std::fmt::Debug for FlowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCoordinator")
            .field("registry", &self.registry)
            .field("host", &self.host)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl FlowCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if the bridge settings are invalid.
    pub fn new(
        settings: BridgeSettings,
        registry: StrategyRegistry,
        host: HostHandle,
        handshakes: Arc<dyn HandshakeStore>,
        exchanger: Arc<dyn CodeExchanger>,
    ) -> BridgeResult<Self> {
        settings.validate()?;
        let credential = credential_policy(&settings.credential);
        Ok(Self {
            registry: Arc::new(registry),
            host,
            handshakes,
            exchanger,
            credential,
            settings,
        })
    }

    /// The strategy registry.
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// The host handle.
    #[must_use]
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Bridge settings.
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Installs the fields the bridge needs into the collection schema.
    ///
    /// Adds the subject field and, in hidden credential mode, the hidden
    /// credential field. Returns the names of the added fields.
    pub fn install_schema(&self, schema: &mut CollectionSchema) -> Vec<String> {
        let mut added = Vec::new();
        if schema.ensure_subject_field(&self.settings.subject_field) {
            added.push(self.settings.subject_field.clone());
        }
        if let Some(field) = self.credential.schema_field() {
            let name = field.name.clone();
            if schema.ensure_field(field) {
                added.push(name);
            }
        }
        if !added.is_empty() {
            tracing::debug!(collection = %schema.slug, fields = ?added, "Installed schema fields");
        }
        added
    }

    /// Redirect URI registered with the provider for a strategy.
    ///
    /// Priority: absolute `callback_url` > `base_url` + callback path >
    /// request `Host` + callback path.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if none of these is available.
    pub fn redirect_uri(
        &self,
        strategy: &RegisteredStrategy,
        host: Option<&str>,
    ) -> BridgeResult<String> {
        if let Some(url) = &strategy.settings.callback_url {
            return Ok(url.clone());
        }
        if let Some(base) = &self.settings.base_url {
            return Ok(format!(
                "{}{}",
                base.trim_end_matches('/'),
                strategy.callback_path
            ));
        }
        match host {
            Some(host) => {
                let scheme = if self.settings.session.secure {
                    "https"
                } else {
                    "http"
                };
                Ok(format!("{scheme}://{host}{}", strategy.callback_path))
            }
            None => Err(BridgeError::configuration(
                "cannot build redirect URI without callback_url, base_url or Host header",
            )),
        }
    }

    /// Runs the authorize leg.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI cannot be built or the handshake
    /// session cannot be stored.
    pub async fn authorize(
        &self,
        strategy: &RegisteredStrategy,
        host: Option<&str>,
    ) -> BridgeResult<AuthorizeRedirect> {
        let redirect_uri = self.redirect_uri(strategy, host)?;
        let session = HandshakeSession::new(
            strategy.id.as_str(),
            redirect_uri.clone(),
            self.settings.session.ttl,
        );
        let location = authorization_url(&strategy.settings, &redirect_uri, &session.state)
            .map_err(|e| BridgeError::configuration(e.to_string()))?;

        let handshake_cookie = self.handshake_cookie(session.id);
        self.handshakes.save(session).await?;

        tracing::debug!(strategy = %strategy.id, "Redirecting to provider");
        Ok(AuthorizeRedirect {
            location: location.into(),
            handshake_cookie,
        })
    }

    fn handshake_cookie(&self, id: Uuid) -> Cookie<'static> {
        let ttl = &self.settings.session.ttl;
        let max_age = time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        Cookie::build((self.settings.session.cookie_name.clone(), id.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.settings.session.secure)
            .same_site(cookie::SameSite::Lax)
            .max_age(max_age)
            .build()
    }

    /// Runs the callback leg.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NotInitialized` if the host backend has not
    /// been injected. Every other failure is returned as
    /// [`CallbackOutcome::Failure`].
    pub async fn callback(
        &self,
        strategy: &RegisteredStrategy,
        request: CallbackRequest,
    ) -> BridgeResult<CallbackOutcome> {
        let backend = self.host.get()?;

        match self.run_callback(&backend, strategy, request).await {
            Ok(login) => {
                tracing::info!(
                    strategy = %strategy.id,
                    user_id = %login.link.user.id,
                    outcome = %login.link.outcome,
                    "Login completed"
                );
                Ok(CallbackOutcome::Success(Box::new(login)))
            }
            Err(error) => {
                if error.is_external() {
                    tracing::warn!(
                        strategy = %strategy.id,
                        category = %error.category(),
                        error = %error,
                        "Login failed"
                    );
                } else {
                    tracing::error!(
                        strategy = %strategy.id,
                        category = %error.category(),
                        error = %error,
                        "Login failed"
                    );
                }
                Ok(CallbackOutcome::Failure {
                    location: strategy.settings.failure_redirect.clone(),
                    error,
                })
            }
        }
    }

    async fn run_callback(
        &self,
        backend: &HostBackend,
        strategy: &RegisteredStrategy,
        request: CallbackRequest,
    ) -> BridgeResult<CompletedLogin> {
        let session = self.restore_handshake(strategy, &request).await?;

        if let Some(error) = &request.error {
            return Err(BridgeError::exchange(format!(
                "provider returned error '{error}'"
            )));
        }
        if request.state.as_deref() != Some(session.state.as_str()) {
            return Err(BridgeError::handshake("state mismatch"));
        }
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BridgeError::exchange("callback carries no authorization code"))?;

        let tokens = self
            .exchanger
            .exchange(&strategy.settings, code, &session.redirect_uri)
            .await?;

        let current_user = self
            .current_user(backend, request.session_token.as_deref())
            .await?;
        let context = IdentityContext {
            request: Some(request.context),
            current_user,
        };
        let link = self.verify_with(backend, strategy, &tokens, context).await?;

        let minted = backend.minter.mint(&link.user, &backend.schema)?;
        Ok(CompletedLogin {
            location: strategy.settings.success_redirect.clone(),
            session_cookie: minted.cookie,
            link,
        })
    }

    async fn restore_handshake(
        &self,
        strategy: &RegisteredStrategy,
        request: &CallbackRequest,
    ) -> BridgeResult<HandshakeSession> {
        let id = request
            .handshake_id
            .as_deref()
            .ok_or_else(|| BridgeError::handshake("no handshake session cookie"))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| BridgeError::handshake("malformed handshake session id"))?;
        let session = self
            .handshakes
            .take(id)
            .await?
            .ok_or_else(|| BridgeError::handshake("handshake session missing or expired"))?;
        if session.strategy_id != strategy.id.as_str() {
            return Err(BridgeError::handshake(format!(
                "handshake started by strategy {}",
                session.strategy_id
            )));
        }
        Ok(session)
    }

    /// Returns the user of an already-authenticated session.
    ///
    /// An invalid or expired token, or one issued for another collection,
    /// is treated as no session.
    async fn current_user(
        &self,
        backend: &HostBackend,
        token: Option<&str>,
    ) -> BridgeResult<Option<InternalUser>> {
        let Some(token) = token else {
            return Ok(None);
        };
        let claims = match backend.minter.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid session cookie");
                return Ok(None);
            }
        };
        if claims.collection() != Some(self.settings.collection.as_str()) {
            return Ok(None);
        }
        let Some(id) = claims.user_id() else {
            return Ok(None);
        };
        Ok(backend
            .store
            .find_by_id(&self.settings.collection, id, AccessMode::Internal)
            .await?)
    }

    /// Resolves tokens to an account.
    ///
    /// Runs the identity resolver, then the matcher. Nothing is written
    /// unless resolution succeeds.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NotInitialized` before the host backend is
    /// injected, `BridgeError::IdentityResolution` if the resolver fails, and
    /// `BridgeError::Persistence` if the store fails.
    pub async fn verify(
        &self,
        strategy: &RegisteredStrategy,
        tokens: &TokenSet,
        context: IdentityContext,
    ) -> BridgeResult<LinkResult> {
        let backend = self.host.get()?;
        self.verify_with(&backend, strategy, tokens, context).await
    }

    async fn verify_with(
        &self,
        backend: &HostBackend,
        strategy: &RegisteredStrategy,
        tokens: &TokenSet,
        context: IdentityContext,
    ) -> BridgeResult<LinkResult> {
        let resolver = IdentityResolver::new(
            strategy.resolver.clone(),
            self.settings.subject_field.clone(),
            strategy.settings.pass_request_to_resolver,
        );
        let identity = resolver.resolve(tokens, context.request.as_ref()).await?;

        let linker = AccountLinker::new(
            backend.store.clone(),
            self.settings.collection.clone(),
            self.settings.subject_field.clone(),
            self.credential.clone(),
        );
        linker
            .link_or_create(
                &identity,
                strategy.id.as_str(),
                strategy.settings.update_on_login,
                context.current_user,
            )
            .await
    }
}
