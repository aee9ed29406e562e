//! JWT service for token generation and validation
//!
//! Access and refresh tokens are signed with HS256 using two distinct
//! secrets, so a refresh token can never pass as an access token and vice
//! versa. Claims are typed: a missing or renamed claim fails decoding instead
//! of surfacing later as an absent map entry.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identifier, RoleName, TokenContext, UserId};

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for signing access tokens
    pub access_secret: String,
    /// Secret for signing refresh tokens
    pub refresh_secret: String,
    /// Access token expiration time in seconds (default: 15 minutes)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 7 days)
    pub refresh_token_expiry: u64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `ACCESS_SECRET`: Secret for access tokens (required)
    /// - `REFRESH_SECRET`: Secret for refresh tokens (required)
    /// - `ACCESS_TOKEN_TTL`: Access token expiry in seconds (default: 900)
    /// - `REFRESH_TOKEN_TTL`: Refresh token expiry in seconds (default: 604800)
    pub fn from_env() -> Result<Self> {
        let access_secret = required_secret("ACCESS_SECRET")?;
        let refresh_secret = required_secret("REFRESH_SECRET")?;

        if access_secret == refresh_secret {
            anyhow::bail!("ACCESS_SECRET and REFRESH_SECRET must differ");
        }

        let access_token_expiry = std::env::var("ACCESS_TOKEN_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(900);

        let refresh_token_expiry = std::env::var("REFRESH_TOKEN_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(604800);

        Ok(JwtConfig {
            access_secret,
            refresh_secret,
            access_token_expiry,
            refresh_token_expiry,
        })
    }
}

fn required_secret(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    Ok(value)
}

/// Token verification and signing failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token is malformed")]
    MalformedToken,

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::ExpiredToken => "expired_token",
            TokenError::MalformedToken => "malformed_token",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Signing(_) => "token_signing_failed",
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, TokenError::Signing(_))
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::MalformedToken,
        }
    }
}

/// Token type enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// Access token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID
    pub sub: UserId,
    /// Identifier the user signed in with (phone, email or `max:<id>`)
    pub identifier: String,
    /// Primary role label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_unit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_unit: Option<i64>,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    pub token_type: TokenType,
}

impl AccessClaims {
    /// Scoping embedded at issuance, if any
    pub fn context(&self) -> Option<TokenContext> {
        let scope = TokenContext::new(self.unit, self.sub_unit, self.leaf_unit);
        (!scope.is_global()).then_some(scope)
    }
}

/// Refresh token claims: only what is needed to find the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Session key used for revocation
    pub jti: Uuid,
    /// User ID
    pub sub: UserId,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    pub token_type: TokenType,
}

impl RefreshClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// Result of a successful issuance
#[derive(Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_jti: Uuid,
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("refresh_jti", &self.refresh_jti)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// JWT service: mints and verifies access and refresh tokens
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        JwtService {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
            config,
        }
    }

    /// Issue an access/refresh pair
    ///
    /// The refresh token gets a fresh jti that the caller must register with
    /// the session registry before handing the tokens out.
    pub fn issue(
        &self,
        user_id: UserId,
        identifier: &Identifier,
        role: Option<RoleName>,
        context: Option<&TokenContext>,
    ) -> Result<IssuedTokens, TokenError> {
        let now = Utc::now();
        let iat = now.timestamp();
        let context = context.copied().unwrap_or_default();

        let access_claims = AccessClaims {
            sub: user_id,
            identifier: identifier.to_string(),
            role,
            unit: context.unit,
            sub_unit: context.sub_unit,
            leaf_unit: context.leaf_unit,
            iat,
            exp: iat + self.config.access_token_expiry as i64,
            token_type: TokenType::Access,
        };

        let refresh_expires_at = now + Duration::seconds(self.config.refresh_token_expiry as i64);
        let refresh_jti = Uuid::new_v4();
        let refresh_claims = RefreshClaims {
            jti: refresh_jti,
            sub: user_id,
            iat,
            exp: refresh_expires_at.timestamp(),
            token_type: TokenType::Refresh,
        };

        let header = Header::new(Algorithm::HS256);
        let access_token = encode(&header, &access_claims, &self.access_encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        let refresh_token = encode(&header, &refresh_claims, &self.refresh_encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            refresh_jti,
            refresh_expires_at,
        })
    }

    /// Validate an access token and return its claims
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims = decode::<AccessClaims>(token, &self.access_decoding, &self.validation)?.claims;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::MalformedToken);
        }
        Ok(claims)
    }

    /// Validate a refresh token and return its claims
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims =
            decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)?.claims;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::MalformedToken);
        }
        Ok(claims)
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }
}
