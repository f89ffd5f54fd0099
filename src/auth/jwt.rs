//! Access and refresh token issuance and verification.

use base64::Engine;
use jwt_simple::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::{Environment, JwtConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessCustomClaims {
    email: String,
    roles: Vec<String>,
    permissions: Vec<String>,
    #[serde(rename = "type")]
    kind: TokenKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshCustomClaims {
    #[serde(rename = "type")]
    kind: TokenKind,
}

/// Verified access token contents. A snapshot taken at issue time.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub kind: TokenKind,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Invalid signing key: {0}")]
    Key(String),
}

#[derive(Clone)]
pub struct TokenService {
    key_pair: Arc<Ed25519KeyPair>,
    public_key: Arc<Ed25519PublicKey>,
    pub access_token_expiry: i64,
    pub refresh_token_expiry: i64,
    issuer: String,
    audience: String,
    leeway_secs: u64,
}

impl TokenService {
    /// Loads the signing key from config.
    ///
    /// Without a configured key an ephemeral one is generated, except in
    /// production where that is an error.
    pub fn from_config(config: &JwtConfig, environment: &Environment) -> Result<Self, TokenError> {
        let key_pair = match &config.private_key {
            Some(encoded) => {
                let key_bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| TokenError::Key(format!("JWT_PRIVATE_KEY is not base64: {e}")))?;
                Ed25519KeyPair::from_bytes(&key_bytes)
                    .map_err(|e| TokenError::Key(e.to_string()))?
            }
            None if environment.is_production() => {
                return Err(TokenError::Key(
                    "JWT_PRIVATE_KEY must be set in production".to_string(),
                ));
            }
            None => {
                warn!("JWT_PRIVATE_KEY not set, generating an ephemeral signing key");
                Ed25519KeyPair::generate()
            }
        };

        Ok(Self::new(key_pair, config))
    }

    pub fn new(key_pair: Ed25519KeyPair, config: &JwtConfig) -> Self {
        let public_key = key_pair.public_key();
        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            access_token_expiry: config.access_token_expiry_secs,
            refresh_token_expiry: config.refresh_token_expiry_secs,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway_secs: config.leeway_secs,
        }
    }

    /// Returns a fresh `(private, public)` key pair, both base64 encoded.
    pub fn generate_key_pair() -> (String, String) {
        let key_pair = Ed25519KeyPair::generate();
        let private_b64 = base64::engine::general_purpose::STANDARD.encode(key_pair.to_bytes());
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key_pair.public_key().to_bytes());
        (private_b64, public_b64)
    }

    fn claims_with_lifetime<C: Serialize + DeserializeOwned>(
        &self,
        custom: C,
        lifetime_secs: i64,
        subject: Uuid,
    ) -> JWTClaims<C> {
        let mut claims = Claims::with_custom_claims(
            custom,
            Duration::from_secs(lifetime_secs.max(0) as u64),
        )
        .with_subject(subject.to_string())
        .with_issuer(&self.issuer)
        .with_audience(&self.audience);

        // Negative lifetimes mint tokens that are already expired.
        if lifetime_secs < 0 {
            let back = Duration::from_secs(lifetime_secs.unsigned_abs());
            claims.expires_at = claims.issued_at.map(|iat| iat - back);
        }

        claims
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Result<String, TokenError> {
        let custom = AccessCustomClaims {
            email: email.to_string(),
            roles,
            permissions,
            kind: TokenKind::Access,
        };

        let claims = self.claims_with_lifetime(custom, self.access_token_expiry, user_id);
        self.key_pair
            .sign(claims)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        let custom = RefreshCustomClaims {
            kind: TokenKind::Refresh,
        };

        let claims = self.claims_with_lifetime(custom, self.refresh_token_expiry, user_id);
        self.key_pair
            .sign(claims)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn verification_options(&self) -> VerificationOptions {
        VerificationOptions {
            allowed_issuers: Some(HashSet::from([self.issuer.clone()])),
            allowed_audiences: Some(HashSet::from([self.audience.clone()])),
            time_tolerance: Some(Duration::from_secs(self.leeway_secs)),
            ..Default::default()
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let data = self
            .public_key
            .verify_token::<AccessCustomClaims>(token, Some(self.verification_options()))
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        if data.custom.kind != TokenKind::Access {
            return Err(TokenError::Invalid("not an access token".to_string()));
        }

        Ok(AccessClaims {
            sub: parse_subject(data.subject.as_deref())?,
            email: data.custom.email,
            roles: data.custom.roles,
            permissions: data.custom.permissions,
            exp: data.expires_at.map(|t| t.as_secs() as i64).unwrap_or(0),
            iat: data.issued_at.map(|t| t.as_secs() as i64).unwrap_or(0),
        })
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let data = self
            .public_key
            .verify_token::<RefreshCustomClaims>(token, Some(self.verification_options()))
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        if data.custom.kind != TokenKind::Refresh {
            return Err(TokenError::Invalid("not a refresh token".to_string()));
        }

        Ok(RefreshClaims {
            sub: parse_subject(data.subject.as_deref())?,
            kind: data.custom.kind,
            exp: data.expires_at.map(|t| t.as_secs() as i64).unwrap_or(0),
            iat: data.issued_at.map(|t| t.as_secs() as i64).unwrap_or(0),
        })
    }

    /// Reads the payload without checking the signature. Diagnostics only.
    pub fn decode(token: &str) -> Option<serde_json::Value> {
        let payload = token.split('.').nth(1)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

fn parse_subject(subject: Option<&str>) -> Result<Uuid, TokenError> {
    subject
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| TokenError::Invalid("missing or malformed subject".to_string()))
}
