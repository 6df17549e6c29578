//! Identity resolution.
//!
//! The host supplies a [`UserinfoResolver`] that turns provider tokens into a
//! userinfo object. [`IdentityResolver`] wraps it and normalizes the result
//! into an [`ExternalIdentity`], rejecting anything without a usable subject.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Uri};
use serde_json::{Map, Value};

use crate::BridgeResult;
use crate::error::BridgeError;
use crate::exchange::TokenSet;
use crate::store::UserData;

/// Userinfo key carrying the email address.
const EMAIL_KEY: &str = "email";
/// Userinfo key carrying the display name.
const NAME_KEY: &str = "name";
/// Userinfo key carrying the password hint.
const PASSWORD_KEY: &str = "password";
/// Fallback subject key used by OIDC-style userinfo responses.
const SUB_KEY: &str = "sub";

/// Canonical identity produced once per login attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIdentity {
    /// Provider-assigned subject. Never empty.
    pub subject: String,

    /// Email address, if the provider returned one.
    pub email: Option<String>,

    /// Display name, if the provider returned one.
    pub name: Option<String>,

    /// Credential to use instead of a generated placeholder on account
    /// creation. Never copied into account fields or claims.
    pub password_hint: Option<String>,

    /// Any other claims returned by the resolver.
    pub extra: Map<String, Value>,
}

impl ExternalIdentity {
    /// Creates an identity with only a subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            name: None,
            password_hint: None,
            extra: Map::new(),
        }
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Normalizes a userinfo object.
    ///
    /// The subject is read from `subject_key`, falling back to `sub`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::IdentityResolution` if the value is not an
    /// object or carries no non-empty string subject.
    pub fn from_userinfo(value: Value, subject_key: &str) -> BridgeResult<Self> {
        let Value::Object(mut info) = value else {
            return Err(BridgeError::identity_resolution(
                "userinfo is not a JSON object",
            ));
        };

        let subject = match info.remove(subject_key) {
            Some(value) => Some(value),
            None => info.remove(SUB_KEY),
        };
        let subject = match subject {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::String(_)) => {
                return Err(BridgeError::identity_resolution("subject is empty"));
            }
            Some(_) => {
                return Err(BridgeError::identity_resolution(
                    "subject is not a string",
                ));
            }
            None => return Err(BridgeError::identity_resolution("subject is missing")),
        };

        let take_str = |info: &mut Map<String, Value>, key: &str| match info.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) if !other.is_null() => {
                info.insert(key.to_string(), other);
                None
            }
            _ => None,
        };

        let email = take_str(&mut info, EMAIL_KEY);
        let name = take_str(&mut info, NAME_KEY);
        let password_hint = take_str(&mut info, PASSWORD_KEY).filter(|p| !p.is_empty());
        info.remove("id");

        Ok(Self {
            subject,
            email,
            name,
            password_hint,
            extra: info,
        })
    }

    /// Account fields carried by this identity, with the subject stored
    /// under `subject_field`. The password hint is excluded.
    #[must_use]
    pub fn to_fields(&self, subject_field: &str) -> UserData {
        let mut fields = self.extra.clone();
        if let Some(email) = &self.email {
            fields.insert(EMAIL_KEY.to_string(), Value::String(email.clone()));
        }
        if let Some(name) = &self.name {
            fields.insert(NAME_KEY.to_string(), Value::String(name.clone()));
        }
        fields.insert(
            subject_field.to_string(),
            Value::String(self.subject.clone()),
        );
        fields
    }
}

/// Inbound request context handed to resolvers that ask for it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request URI of the callback leg.
    pub uri: Uri,

    /// Request headers.
    pub headers: HeaderMap,
}

/// Errors returned by userinfo resolvers.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The userinfo endpoint returned a non-success status.
    #[error("Userinfo endpoint returned HTTP {0}")]
    Http(u16),

    /// The userinfo endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The resolver failed for another reason.
    #[error("{0}")]
    Failed(String),
}

impl ResolverError {
    /// Creates a `Failed` error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Host-supplied userinfo callback.
#[async_trait]
pub trait UserinfoResolver: Send + Sync {
    /// Returns the userinfo object for the given tokens.
    ///
    /// `request` is only provided when the strategy enables
    /// `pass_request_to_resolver`.
    ///
    /// # Errors
    ///
    /// Any error fails the login attempt.
    async fn userinfo(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        request: Option<&RequestContext>,
    ) -> Result<Value, ResolverError>;
}

/// Adapter that validates and normalizes resolver output.
#[derive(Clone)]
pub struct IdentityResolver {
    resolver: Arc<dyn UserinfoResolver>,
    subject_key: String,
    pass_request: bool,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("subject_key", &self.subject_key)
            .field("pass_request", &self.pass_request)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Creates an adapter around a host resolver.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn UserinfoResolver>,
        subject_key: impl Into<String>,
        pass_request: bool,
    ) -> Self {
        Self {
            resolver,
            subject_key: subject_key.into(),
            pass_request,
        }
    }

    /// Resolves tokens to an external identity.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::IdentityResolution` if the resolver fails or
    /// returns no usable subject.
    pub async fn resolve(
        &self,
        tokens: &TokenSet,
        request: Option<&RequestContext>,
    ) -> BridgeResult<ExternalIdentity> {
        let request = if self.pass_request { request } else { None };
        let info = self
            .resolver
            .userinfo(
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                request,
            )
            .await
            .map_err(|e| BridgeError::identity_resolution(e.to_string()))?;
        ExternalIdentity::from_userinfo(info, &self.subject_key)
    }
}

/// Resolver that fetches a provider userinfo endpoint with the access token.
#[derive(Debug, Clone)]
pub struct HttpUserinfoResolver {
    http_client: reqwest::Client,
    userinfo_url: String,
}

impl HttpUserinfoResolver {
    /// Creates a resolver for the given endpoint.
    #[must_use]
    pub fn new(http_client: reqwest::Client, userinfo_url: impl Into<String>) -> Self {
        Self {
            http_client,
            userinfo_url: userinfo_url.into(),
        }
    }
}

#[async_trait]
impl UserinfoResolver for HttpUserinfoResolver {
    async fn userinfo(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
        _request: Option<&RequestContext>,
    ) -> Result<Value, ResolverError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Http(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixed {
        info: Value,
        saw_request: Mutex<Option<bool>>,
    }

    impl Fixed {
        fn new(info: Value) -> Arc<Self> {
            Arc::new(Self {
                info,
                saw_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl UserinfoResolver for Fixed {
        async fn userinfo(
            &self,
            _access_token: &str,
            _refresh_token: Option<&str>,
            request: Option<&RequestContext>,
        ) -> Result<Value, ResolverError> {
            *self.saw_request.lock().unwrap() = Some(request.is_some());
            Ok(self.info.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl UserinfoResolver for Failing {
        async fn userinfo(
            &self,
            _access_token: &str,
            _refresh_token: Option<&str>,
            _request: Option<&RequestContext>,
        ) -> Result<Value, ResolverError> {
            Err(ResolverError::failed("provider down"))
        }
    }

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: "at".to_string(),
            refresh_token: None,
            token_type: None,
            expires_in: None,
        }
    }

    #[test]
    fn test_from_userinfo_extracts_known_keys() {
        let identity = ExternalIdentity::from_userinfo(
            json!({
                "sub": "abc",
                "email": "a@example.org",
                "name": "Alice",
                "password": "hint",
                "locale": "en"
            }),
            "sub",
        )
        .unwrap();

        assert_eq!(identity.subject, "abc");
        assert_eq!(identity.email.as_deref(), Some("a@example.org"));
        assert_eq!(identity.name.as_deref(), Some("Alice"));
        assert_eq!(identity.password_hint.as_deref(), Some("hint"));
        assert_eq!(identity.extra.get("locale"), Some(&json!("en")));
    }

    #[test]
    fn test_from_userinfo_custom_subject_key() {
        let identity =
            ExternalIdentity::from_userinfo(json!({"oid": "xyz", "sub": "ignored"}), "oid")
                .unwrap();
        assert_eq!(identity.subject, "xyz");
    }

    #[test]
    fn test_from_userinfo_rejects_missing_or_empty_subject() {
        for info in [
            json!({"email": "a@example.org"}),
            json!({"sub": ""}),
            json!({"sub": "   "}),
            json!({"sub": 42}),
            json!(null),
            json!("abc"),
        ] {
            let err = ExternalIdentity::from_userinfo(info, "sub").unwrap_err();
            assert!(matches!(err, BridgeError::IdentityResolution { .. }));
        }
    }

    #[test]
    fn test_to_fields_excludes_password_hint() {
        let mut identity = ExternalIdentity::new("abc").with_email("a@example.org");
        identity.password_hint = Some("hint".to_string());

        let fields = identity.to_fields("provider_sub");
        assert_eq!(fields.get("provider_sub"), Some(&json!("abc")));
        assert_eq!(fields.get("email"), Some(&json!("a@example.org")));
        assert!(!fields.contains_key("password"));
        assert!(!fields.contains_key("sub"));
    }

    #[tokio::test]
    async fn test_resolver_failure_is_identity_error() {
        let resolver = IdentityResolver::new(Arc::new(Failing), "sub", false);
        let err = resolver.resolve(&tokens(), None).await.unwrap_err();
        assert!(matches!(err, BridgeError::IdentityResolution { .. }));
        assert!(err.to_string().contains("provider down"));
    }

    #[tokio::test]
    async fn test_request_context_only_passed_when_enabled() {
        let ctx = RequestContext::default();

        let fixed = Fixed::new(json!({"sub": "abc"}));
        let resolver = IdentityResolver::new(fixed.clone(), "sub", false);
        resolver.resolve(&tokens(), Some(&ctx)).await.unwrap();
        assert_eq!(*fixed.saw_request.lock().unwrap(), Some(false));

        let fixed = Fixed::new(json!({"sub": "abc"}));
        let resolver = IdentityResolver::new(fixed.clone(), "sub", true);
        resolver.resolve(&tokens(), Some(&ctx)).await.unwrap();
        assert_eq!(*fixed.saw_request.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_http_userinfo_resolver_sends_bearer() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "abc"})))
            .mount(&server)
            .await;

        let http = HttpUserinfoResolver::new(
            reqwest::Client::new(),
            format!("{}/userinfo", server.uri()),
        );
        let resolver = IdentityResolver::new(Arc::new(http), "sub", false);
        let identity = resolver.resolve(&tokens(), None).await.unwrap();
        assert_eq!(identity.subject, "abc");
    }

    #[tokio::test]
    async fn test_http_userinfo_resolver_status_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let http = HttpUserinfoResolver::new(reqwest::Client::new(), server.uri());
        let err = http.userinfo("at", None, None).await.unwrap_err();
        assert!(matches!(err, ResolverError::Http(401)));
    }
}
