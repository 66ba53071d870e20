//! Player Identity
//!
//! Resolves the local player's identity. The identity provider itself is
//! external; this module either derives an anonymous id from a profile
//! name or validates a provider-issued JWT and derives the id from its
//! subject. Tokens are never issued here.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::hash::hash_with_domain;
use crate::game::state::PlayerId;

const ANONYMOUS_DOMAIN: &[u8] = b"TTT_RELAY_PROFILE_V1";
const SUBJECT_DOMAIN: &[u8] = b"TTT_RELAY_SUBJECT_V1";

/// Token validation settings.
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    /// Expected `iss` claim. Any issuer when unset.
    pub issuer: Option<String>,
    /// Expected `aud` claim. Audience unchecked when unset.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl IdentityConfig {
    /// Read from `TTT_AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("TTT_AUTH_ISSUER").ok(),
            audience: std::env::var("TTT_AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("TTT_AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("TTT_AUTH_SECRET").ok(),
            skip_expiry: std::env::var("TTT_AUTH_SKIP_EXPIRY")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        }
    }

    /// Whether any verification key is configured.
    pub fn has_key(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// Claims read from a provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Provider user id.
    pub sub: String,
    /// Expiry (Unix seconds). Zero when absent.
    #[serde(default)]
    pub exp: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Display name, if the provider supplies one.
    #[serde(default)]
    pub name: Option<String>,
}

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Token validation requested without a key.
    #[error("no verification key configured")]
    NoKey,

    /// Token is not a well-formed JWT.
    #[error("malformed token")]
    Malformed,

    /// Signature did not verify.
    #[error("invalid token signature")]
    BadSignature,

    /// Token has expired.
    #[error("token expired")]
    Expired,

    /// `iss` or `aud` did not match.
    #[error("token issued for another party")]
    WrongParty,

    /// `sub` is empty.
    #[error("token has no subject")]
    NoSubject,

    /// Any other decoding failure.
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => IdentityError::Malformed,
            ErrorKind::InvalidSignature => IdentityError::BadSignature,
            ErrorKind::ExpiredSignature => IdentityError::Expired,
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => IdentityError::WrongParty,
            _ => IdentityError::Rejected(err.to_string()),
        }
    }
}

/// Resolved local identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Stable player id.
    pub player_id: PlayerId,
    /// Name shown in the lobby.
    pub display_name: String,
}

impl LocalIdentity {
    /// Anonymous identity derived from a local profile name.
    ///
    /// The same profile always yields the same id, so two profiles on one
    /// machine act as two players.
    pub fn anonymous(profile: &str) -> Self {
        Self {
            player_id: derive_id(ANONYMOUS_DOMAIN, profile),
            display_name: profile.to_string(),
        }
    }

    /// Identity taken from a validated provider token.
    ///
    /// `fallback_name` is used when the token carries no display name.
    pub fn from_token(token: &str, config: &IdentityConfig, fallback_name: &str) -> Result<Self, IdentityError> {
        let claims = validate_token(token, config)?;
        let player_id = derive_id(SUBJECT_DOMAIN, &claims.sub);
        debug!(player = %player_id.short(), "token identity resolved");
        Ok(Self {
            player_id,
            display_name: claims.name.unwrap_or_else(|| fallback_name.to_string()),
        })
    }
}

/// Validate a provider token and return its claims.
pub fn validate_token(token: &str, config: &IdentityConfig) -> Result<Claims, IdentityError> {
    let claims = if let Some(pem) = &config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| IdentityError::Rejected(format!("bad public key: {e}")))?;
        decode::<Claims>(token, &key, &config.validation(Algorithm::RS256))?.claims
    } else if let Some(secret) = &config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode::<Claims>(token, &key, &config.validation(Algorithm::HS256))?.claims
    } else {
        return Err(IdentityError::NoKey);
    };

    if claims.sub.is_empty() {
        return Err(IdentityError::NoSubject);
    }
    Ok(claims)
}

fn derive_id(domain: &[u8], input: &str) -> PlayerId {
    let digest = hash_with_domain(domain, input.as_bytes());
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    PlayerId::new(id)
}
