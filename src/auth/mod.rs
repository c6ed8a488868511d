//! Credential issuance and verification
//!
//! The gateway only needs two operations from its credential provider:
//! minting a token for a freshly logged-in user and verifying a presented
//! bearer token. [`JwtCredentials`] implements both with HS256 JWTs signed
//! by a secret taken from configuration.

use crate::config::JwtConfig;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity carried through a request once its token has been verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
}

impl From<&Claims> for AuthContext {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username.clone(),
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    /// Issuer
    pub iss: String,
    /// Subject (the username)
    pub sub: String,
    /// Expiration time (UTC timestamp)
    pub exp: i64,
    /// Issued at (UTC timestamp)
    pub iat: i64,
    /// Unique token id, so two logins in the same second still differ
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token lifetime of {0} hours is out of range")]
    Lifetime(i64),
}

/// Credential provider used by the authentication and login middlewares
pub trait Credentials: Send + Sync {
    /// Mint a token for a user
    fn issue(&self, user_id: i64, username: &str) -> Result<String, AuthError>;

    /// Verify a token and return its claims
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT credentials
pub struct JwtCredentials {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl JwtCredentials {
    pub fn new(secret: &str, issuer: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.required_spec_claims = ["exp", "iss", "sub"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // expiry is exact, no grace period
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: issuer.to_string(),
            ttl,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let ttl = Duration::try_hours(config.ttl_hours).ok_or(AuthError::Lifetime(config.ttl_hours))?;
        Ok(Self::new(&config.secret, &config.issuer, ttl))
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(AuthError::Sign)
    }
}

impl Credentials for JwtCredentials {
    fn issue(&self, user_id: i64, username: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.ttl)
            .ok_or(AuthError::Lifetime(self.ttl.num_hours()))?;
        let claims = Claims {
            user_id,
            username: username.to_string(),
            iss: self.issuer.clone(),
            sub: username.to_string(),
            exp: expires.timestamp(),
            iat: now.timestamp(),
            jti: format!("{:032x}", rand::random::<u128>()),
        };
        self.sign(&claims)
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::Invalid)
    }
}
