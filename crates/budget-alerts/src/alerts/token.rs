//! Stateless, expiring access tokens for budget deep links.
//!
//! Format: `base64url(canonical claims JSON) "." base64url(HMAC-SHA256(secret, claims bytes))`.
//! Verification depends only on the shared secret, the token bytes, and the
//! current time. Expiry is the only invalidation mechanism.

use std::fmt;
use std::sync::Once;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::domain::{BudgetId, RecipientId};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const MIN_TOKEN_TTL_SECONDS: i64 = 300;

const PLACEHOLDER_SECRET: &str = "budget-alerts-development-link-secret";

static PLACEHOLDER_WARNING: Once = Once::new();

/// Errors raised while constructing a codec or minting tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("link secret must not be empty")]
    MissingSecret,
    #[error("failed to encode token claims: {0}")]
    Encoding(String),
}

/// HMAC key material. `Debug` never prints the secret.
#[derive(Clone)]
pub struct LinkSecret {
    bytes: Vec<u8>,
    placeholder: bool,
}

impl LinkSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(TokenError::MissingSecret);
        }
        Ok(Self {
            bytes: secret.into_bytes(),
            placeholder: false,
        })
    }

    /// Uses the configured secret, or the well-known development placeholder.
    ///
    /// Falling back logs a warning once per process. Production configuration
    /// refuses to load without a secret, so only non-production paths get here.
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured.map(Self::new) {
            Some(Ok(secret)) => secret,
            _ => {
                PLACEHOLDER_WARNING.call_once(|| {
                    warn!("ALERT_LINK_SECRET is not configured; signing links with the insecure development placeholder");
                });
                Self {
                    bytes: PLACEHOLDER_SECRET.as_bytes().to_vec(),
                    placeholder: true,
                }
            }
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

impl fmt::Debug for LinkSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSecret")
            .field("placeholder", &self.placeholder)
            .finish_non_exhaustive()
    }
}

/// Whether the placeholder warning has been emitted by this process.
pub fn placeholder_warning_emitted() -> bool {
    PLACEHOLDER_WARNING.is_completed()
}

/// Signed claims carried by an access token. Field order is the canonical encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub budget_id: BudgetId,
    pub recipient_id: RecipientId,
    pub iat: i64,
    pub exp: i64,
}

/// Freshly minted token with its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRejection {
    Malformed,
    BadSignature,
    Expired,
}

impl TokenRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::BadSignature => "bad-signature",
            TokenRejection::Expired => "expired",
        }
    }
}

/// Typed verification result; verification never fails with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerification {
    Valid(TokenClaims),
    Rejected(TokenRejection),
}

impl TokenVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenVerification::Valid(_))
    }

    pub fn claims(&self) -> Option<&TokenClaims> {
        match self {
            TokenVerification::Valid(claims) => Some(claims),
            TokenVerification::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<TokenRejection> {
        match self {
            TokenVerification::Valid(_) => None,
            TokenVerification::Rejected(reason) => Some(*reason),
        }
    }
}

/// HMAC signer/verifier for access tokens.
#[derive(Debug, Clone)]
pub struct AccessTokenCodec {
    secret: LinkSecret,
    default_ttl_seconds: i64,
}

impl AccessTokenCodec {
    pub fn new(secret: LinkSecret, default_ttl_seconds: i64) -> Self {
        Self {
            secret,
            default_ttl_seconds: clamp_ttl(default_ttl_seconds),
        }
    }

    pub fn secret(&self) -> &LinkSecret {
        &self.secret
    }

    pub fn default_ttl_seconds(&self) -> i64 {
        self.default_ttl_seconds
    }

    /// Mints a token valid from `now` for `ttl_seconds` (default TTL when `None`).
    ///
    /// TTLs below [`MIN_TOKEN_TTL_SECONDS`] are raised to the floor.
    pub fn mint(
        &self,
        budget_id: BudgetId,
        recipient_id: RecipientId,
        ttl_seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<MintedToken, TokenError> {
        let ttl = clamp_ttl(ttl_seconds.unwrap_or(self.default_ttl_seconds));
        let iat = now.timestamp();
        let exp = iat.saturating_add(ttl);
        let claims = TokenClaims {
            budget_id,
            recipient_id,
            iat,
            exp,
        };

        let payload =
            serde_jcs::to_vec(&claims).map_err(|err| TokenError::Encoding(err.to_string()))?;
        let signature = self
            .sign(&payload)
            .ok_or_else(|| TokenError::Encoding("unable to initialise hmac".to_string()))?;

        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        );

        Ok(MintedToken {
            token,
            issued_at: timestamp_to_utc(iat),
            expires_at: timestamp_to_utc(exp),
        })
    }

    /// Checks the signature in constant time, then the expiry.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> TokenVerification {
        let mut segments = token.trim().split('.');
        let (Some(encoded_payload), Some(encoded_signature), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return TokenVerification::Rejected(TokenRejection::Malformed);
        };
        if encoded_payload.is_empty() {
            return TokenVerification::Rejected(TokenRejection::Malformed);
        }

        let Ok(payload) = URL_SAFE_NO_PAD.decode(encoded_payload) else {
            return TokenVerification::Rejected(TokenRejection::Malformed);
        };
        let Ok(provided) = URL_SAFE_NO_PAD.decode(encoded_signature) else {
            return TokenVerification::Rejected(TokenRejection::BadSignature);
        };
        let Some(expected) = self.sign(&payload) else {
            return TokenVerification::Rejected(TokenRejection::BadSignature);
        };
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return TokenVerification::Rejected(TokenRejection::BadSignature);
        }

        let Ok(claims) = serde_json::from_slice::<TokenClaims>(&payload) else {
            return TokenVerification::Rejected(TokenRejection::Malformed);
        };
        if now.timestamp() > claims.exp {
            return TokenVerification::Rejected(TokenRejection::Expired);
        }

        TokenVerification::Valid(claims)
    }

    fn sign(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.bytes).ok()?;
        mac.update(payload);
        Some(mac.finalize().into_bytes().to_vec())
    }
}

fn clamp_ttl(ttl_seconds: i64) -> i64 {
    ttl_seconds.max(MIN_TOKEN_TTL_SECONDS)
}

fn timestamp_to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
