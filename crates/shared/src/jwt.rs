//! Verification of identity-provider bearer tokens.
//!
//! The engine does not authenticate users itself: an external identity
//! provider issues HS256 tokens whose `sub` claim is the stable, opaque
//! account ID. This module verifies signatures and expiry and hands the
//! subject to the ledger. Token issuance exists only for tooling and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AccountId;

/// Errors that can occur during token operations.
#[derive(Debug, Error)]
pub enum JwtError {
    /// Token encoding failed.
    #[error("failed to encode token: {0}")]
    EncodingError(String),

    /// Token has expired.
    #[error("token has expired")]
    Expired,

    /// Token is invalid.
    #[error("invalid token")]
    Invalid,
}

/// Claims carried by an identity-provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque account identifier (the authenticated user).
    pub sub: String,
    /// Expiration time as a Unix timestamp.
    pub exp: i64,
    /// Issued-at time as a Unix timestamp.
    pub iat: i64,
}

impl Claims {
    /// Creates claims for the given account, expiring after `ttl`.
    #[must_use]
    pub fn new(account_id: &AccountId, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: account_id.as_str().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Returns the account ID this token authenticates.
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        AccountId::new(self.sub.clone())
    }
}

/// Token verification service.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("encoding_key", &"[hidden]")
            .field("decoding_key", &"[hidden]")
            .finish()
    }
}

impl JwtService {
    /// Creates a new service from the shared signing secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issues a token for an account. Used by tooling and tests; in
    /// production, tokens come from the identity provider.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::EncodingError` if signing fails.
    pub fn issue(&self, account_id: &AccountId, ttl: Duration) -> Result<String, JwtError> {
        let claims = Claims::new(account_id, ttl);
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Expired` for expired tokens and
    /// `JwtError::Invalid` for anything else that fails validation.
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid,
            })
    }
}
