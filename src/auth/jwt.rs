//! JWT Token Service
//!
//! Mints and verifies the two token kinds. Access and refresh tokens are
//! signed with different secrets, so holding one key never lets a caller
//! forge the other kind.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

const ISSUER: &str = "todo-auth";

#[derive(Debug, Error)]
pub enum TokenError {
    /// Key misconfiguration; not retryable.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token has the wrong type")]
    WrongType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT Claims structure containing user information and token metadata
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User unique identifier
    pub sub: Uuid,
    pub username: String,
    /// Token issued at timestamp
    pub iat: i64,
    /// Token expiration timestamp
    pub exp: i64,
    /// Token issuer
    pub iss: String,
    pub typ: TokenKind,
    pub jti: Uuid,
}

/// Identity recovered from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: Uuid,
    pub username: String,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Issues and verifies access and refresh tokens
pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 0;

        Self {
            access: SigningKeys::new(&config.access_secret, config.access_ttl),
            refresh: SigningKeys::new(&config.refresh_secret, config.refresh_ttl),
            validation,
        }
    }

    pub fn issue_access_token(&self, user_id: Uuid, username: &str) -> Result<String, TokenError> {
        self.issue(TokenKind::Access, user_id, username)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid, username: &str) -> Result<String, TokenError> {
        self.issue(TokenKind::Refresh, user_id, username)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<TokenIdentity, TokenError> {
        self.verify(TokenKind::Access, token)
    }

    /// Fails on signature mismatch, malformed payload or elapsed expiry.
    pub fn verify_refresh_token(&self, token: &str) -> Result<TokenIdentity, TokenError> {
        self.verify(TokenKind::Refresh, token)
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn issue(&self, kind: TokenKind, user_id: Uuid, username: &str) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let now = Utc::now();
        let expiration = now + keys.ttl;

        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            iss: ISSUER.to_string(),
            typ: kind,
            jti: Uuid::new_v4(),
        };

        encode(&Header::default(), &claims, &keys.encoding).map_err(TokenError::Signing)
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Result<TokenIdentity, TokenError> {
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map_err(TokenError::Invalid)?;

        if data.claims.typ != kind {
            return Err(TokenError::WrongType);
        }

        Ok(TokenIdentity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&AuthConfig::new("access_secret", "refresh_secret"))
    }

    #[test]
    fn test_refresh_roundtrip() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let token = issuer.issue_refresh_token(user_id, "alice").unwrap();
        let identity = issuer.verify_refresh_token(&token).unwrap();

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn access_token_is_not_a_refresh_token() {
        let issuer = issuer();
        let token = issuer.issue_access_token(Uuid::new_v4(), "alice").unwrap();

        assert!(issuer.verify_refresh_token(&token).is_err());
        assert!(issuer.verify_access_token(&token).is_ok());
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let issuer = issuer();
        let token = issuer.issue_refresh_token(Uuid::new_v4(), "alice").unwrap();

        assert!(issuer.verify_access_token(&token).is_err());
    }

    #[test]
    fn expired_refresh_token_is_rejected() {
        let mut config = AuthConfig::new("access_secret", "refresh_secret");
        config.refresh_ttl = Duration::seconds(-30);
        let issuer = TokenIssuer::new(&config);

        let token = issuer.issue_refresh_token(Uuid::new_v4(), "alice").unwrap();
        assert!(matches!(
            issuer.verify_refresh_token(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = TokenIssuer::new(&AuthConfig::new("other_access", "other_refresh"));
        let token = other.issue_refresh_token(Uuid::new_v4(), "alice").unwrap();

        assert!(issuer().verify_refresh_token(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(issuer().verify_refresh_token("not.a.jwt").is_err());
    }

    #[test]
    fn tokens_minted_together_are_distinct() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let first = issuer.issue_access_token(user_id, "alice").unwrap();
        let second = issuer.issue_access_token(user_id, "alice").unwrap();
        assert_ne!(first, second);
    }
}
