//! Session token minting.
//!
//! Projects the account fields the collection marks as JWT-included into a
//! claim set, signs it with the host secret, and builds the session cookie
//! the host's own auth middleware reads.
//!
//! # Claims
//!
//! | Claim | Source |
//! |-------|--------|
//! | `email` | account email (omitted when unset) |
//! | `id` | account id |
//! | `collection` | owning collection slug |
//! | `<field>` | every field marked `save_to_jwt`, one layout level deep |
//! | `iat`, `exp` | issue time and issue time + token expiration |

use std::fmt;
use std::sync::Arc;

use cookie::Cookie;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::BridgeResult;
use crate::config::expiry_after;
use crate::error::BridgeError;
use crate::schema::CollectionSchema;
use crate::store::InternalUser;

/// Claims the signer owns; never overwritten by projected fields.
const REGISTERED_CLAIMS: &[&str] = &["iat", "exp"];

/// Projects the session claims of a user.
///
/// Deterministic: the same user and schema always yield the same map.
#[must_use]
pub fn project_claims(user: &InternalUser, schema: &CollectionSchema) -> Map<String, Value> {
    let mut claims = Map::new();
    if let Some(email) = user.field("email") {
        claims.insert("email".to_string(), email.clone());
    }
    claims.insert("id".to_string(), Value::String(user.id.clone()));
    claims.insert(
        "collection".to_string(),
        Value::String(user.collection.clone()),
    );

    for name in schema.jwt_field_names() {
        if REGISTERED_CLAIMS.contains(&name) {
            continue;
        }
        if let Some(value) = user.field(name) {
            claims.insert(name.to_string(), value.clone());
        }
    }
    claims
}

/// Signed session claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Projected account fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    /// Account id carried by the claims.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.fields.get("id").and_then(Value::as_str)
    }

    /// Collection slug carried by the claims.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.fields.get("collection").and_then(Value::as_str)
    }
}

/// Signs and verifies session tokens with the host secret.
pub trait TokenSigner: Send + Sync {
    /// Signs claims into a token.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Signing` if encoding fails.
    fn sign(&self, claims: &SessionClaims) -> BridgeResult<String>;

    /// Verifies a token's signature and expiry and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Signing` if the token is invalid or expired.
    fn verify(&self, token: &str) -> BridgeResult<SessionClaims>;
}

/// HS256 signer keyed with a shared secret.
#[derive(Clone)]
pub struct HmacTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for HmacTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTokenSigner").finish_non_exhaustive()
    }
}

impl HmacTokenSigner {
    /// Creates a signer from the host secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }
}

impl TokenSigner for HmacTokenSigner {
    fn sign(&self, claims: &SessionClaims) -> BridgeResult<String> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }

    fn verify(&self, token: &str) -> BridgeResult<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        Ok(decode::<SessionClaims>(token, &self.decoding_key, &validation)?.claims)
    }
}

/// A minted session: token, claims and the cookie carrying it.
#[derive(Debug, Clone)]
pub struct MintedSession {
    /// Signed token.
    pub token: String,
    /// Claims inside the token.
    pub claims: SessionClaims,
    /// `Set-Cookie` value for the response.
    pub cookie: Cookie<'static>,
    /// Token and cookie expiry.
    pub expires_at: OffsetDateTime,
}

/// Builds signed session tokens compatible with the host's cookie auth.
#[derive(Clone)]
pub struct SessionTokenMinter {
    signer: Arc<dyn TokenSigner>,
    cookie_prefix: String,
}

impl fmt::Debug for SessionTokenMinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenMinter")
            .field("cookie_prefix", &self.cookie_prefix)
            .finish_non_exhaustive()
    }
}

impl SessionTokenMinter {
    /// Creates a minter.
    #[must_use]
    pub fn new(signer: Arc<dyn TokenSigner>, cookie_prefix: impl Into<String>) -> Self {
        Self {
            signer,
            cookie_prefix: cookie_prefix.into(),
        }
    }

    /// Name of the session cookie (`<prefix>-token`).
    #[must_use]
    pub fn cookie_name(&self) -> String {
        format!("{}-token", self.cookie_prefix)
    }

    /// Mints a session for `user`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Signing` if the token cannot be signed and
    /// `BridgeError::Configuration` if the token expiration is out of range.
    pub fn mint(&self, user: &InternalUser, schema: &CollectionSchema) -> BridgeResult<MintedSession> {
        let now = OffsetDateTime::now_utc();
        let expires_at = expiry_after(now, schema.auth.token_expiration)
            .ok_or_else(|| BridgeError::configuration("token_expiration is out of range"))?;
        let claims = SessionClaims {
            fields: project_claims(user, schema),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let token = self.signer.sign(&claims)?;

        let cookies = &schema.auth.cookies;
        let mut builder = Cookie::build((self.cookie_name(), token.clone()))
            .path("/")
            .http_only(true)
            .expires(expires_at)
            .secure(cookies.secure)
            .same_site(cookies.same_site.into());
        if let Some(domain) = cookies.domain.as_deref().filter(|d| !d.is_empty()) {
            builder = builder.domain(domain.to_string());
        }

        Ok(MintedSession {
            token,
            claims,
            cookie: builder.build(),
            expires_at,
        })
    }

    /// Verifies a session token minted with the same signer.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Signing` if the token is invalid or expired.
    pub fn verify(&self, token: &str) -> BridgeResult<SessionClaims> {
        self.signer.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionAuthSettings, CookieSettings, SameSitePolicy};
    use crate::error::BridgeError;
    use crate::schema::{DataField, FieldSchema};
    use serde_json::json;
    use std::time::Duration;

    fn user() -> InternalUser {
        let mut data = Map::new();
        data.insert("sub".into(), json!("existing_sub"));
        data.insert("email".into(), json!("test@example.org"));
        data.insert("name".into(), json!("existing"));
        data.insert("role".into(), json!("admin"));
        data.insert("bio".into(), json!("not in token"));
        InternalUser {
            id: "u1".to_string(),
            collection: "users".to_string(),
            data,
            strategy: Some("oauth2:1".to_string()),
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new("users")
            .with_field(DataField::new("name").saved_to_jwt())
            .with_field(DataField::new("bio"))
            .with_field(DataField::new("missing").saved_to_jwt())
            .with_field(FieldSchema::Layout {
                fields: vec![DataField::new("role").saved_to_jwt().into()],
            })
    }

    fn minter() -> SessionTokenMinter {
        SessionTokenMinter::new(Arc::new(HmacTokenSigner::new(b"secret")), "app")
    }

    #[test]
    fn test_project_claims() {
        let claims = project_claims(&user(), &schema());
        assert_eq!(
            Value::Object(claims),
            json!({
                "email": "test@example.org",
                "id": "u1",
                "collection": "users",
                "name": "existing",
                "role": "admin"
            })
        );
    }

    #[test]
    fn test_project_claims_is_deterministic() {
        let a = project_claims(&user(), &schema());
        let b = project_claims(&user(), &schema());
        assert_eq!(a, b);
    }

    #[test]
    fn test_project_claims_without_email() {
        let mut user = user();
        user.data.remove("email");
        let claims = project_claims(&user, &schema());
        assert!(!claims.contains_key("email"));
        assert_eq!(claims.get("id"), Some(&json!("u1")));
    }

    #[test]
    fn test_registered_claims_are_not_overwritten() {
        let mut user = user();
        user.data.insert("exp".into(), json!(1));
        let schema = schema().with_field(DataField::new("exp").saved_to_jwt());
        let claims = project_claims(&user, &schema);
        assert!(!claims.contains_key("exp"));
    }

    #[test]
    fn test_mint_and_verify() {
        let minter = minter();
        let session = minter.mint(&user(), &schema()).unwrap();

        assert_eq!(session.claims.exp - session.claims.iat, 7200);
        let verified = minter.verify(&session.token).unwrap();
        assert_eq!(verified, session.claims);
        assert_eq!(verified.user_id(), Some("u1"));
        assert_eq!(verified.collection(), Some("users"));
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let session = minter().mint(&user(), &schema()).unwrap();
        let other = SessionTokenMinter::new(Arc::new(HmacTokenSigner::new(b"other")), "app");
        let err = other.verify(&session.token).unwrap_err();
        assert!(matches!(err, BridgeError::Signing { .. }));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let signer = HmacTokenSigner::new(b"secret");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = signer
            .sign(&SessionClaims {
                fields: project_claims(&user(), &schema()),
                iat: now - 7200,
                exp: now - 60,
            })
            .unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn test_cookie_attributes() {
        let schema = schema().with_auth(CollectionAuthSettings {
            token_expiration: Duration::from_secs(60),
            cookies: CookieSettings {
                secure: true,
                same_site: SameSitePolicy::Strict,
                domain: Some("example.org".to_string()),
            },
        });
        let session = minter().mint(&user(), &schema).unwrap();
        let cookie = &session.cookie;

        assert_eq!(cookie.name(), "app-token");
        assert_eq!(cookie.value(), session.token);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(cookie::SameSite::Strict));
        assert_eq!(cookie.domain(), Some("example.org"));
        assert_eq!(
            cookie.expires_datetime().map(|t| t.unix_timestamp()),
            Some(session.claims.exp)
        );
    }

    #[test]
    fn test_out_of_range_expiration_is_configuration_error() {
        let mut schema = schema();
        schema.auth.token_expiration = Duration::from_secs(100_000_000 * 31_557_600);
        let err = minter().mint(&user(), &schema).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
    }

    #[test]
    fn test_empty_domain_is_omitted() {
        let mut schema = schema();
        schema.auth.cookies.domain = Some(String::new());
        let session = minter().mint(&user(), &schema).unwrap();
        assert_eq!(session.cookie.domain(), None);
        assert_eq!(session.cookie.same_site(), Some(cookie::SameSite::Lax));
    }
}
