//! Bearer-token validation.
//!
//! Tokens are compact JWS (`header.payload.signature`) signed with
//! HMAC-SHA256. Verification uses only pure-Rust primitives (`hmac`, `sha2`,
//! `base64`), the same signing stack used elsewhere in this codebase.
//!
//! The verified `sub` claim becomes the `user_id` for every tenant-scoped
//! operation. It is never read from a request body.
//!
//! When no secret is configured the validator fails closed unless
//! `auth.allow_unverified` is set, which accepts any well-formed token
//! without checking the signature. That mode exists for local development
//! against the desktop app only.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

pub struct TokenValidator {
    secret: Option<String>,
    allow_unverified: bool,
}

impl TokenValidator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.resolve_secret(),
            allow_unverified: config.allow_unverified,
        }
    }

    /// Validate a bearer token and return the authenticated user id.
    pub fn user_id(&self, token: &str) -> Result<String, ApiError> {
        let claims = self.decode(token, chrono::Utc::now().timestamp())?;
        match claims.sub {
            Some(sub) if !sub.is_empty() => Ok(sub),
            _ => Err(ApiError::Unauthorized(
                "token is missing a subject claim".to_string(),
            )),
        }
    }

    fn decode(&self, token: &str, now: i64) -> Result<Claims, ApiError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, sig_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => {
                    return Err(ApiError::Unauthorized(
                        "malformed token: expected three dot-separated segments".to_string(),
                    ))
                }
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| ApiError::Unauthorized("malformed token header".to_string()))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|_| ApiError::Unauthorized("malformed token header".to_string()))?;

        match &self.secret {
            Some(secret) => {
                if header.alg != "HS256" {
                    return Err(ApiError::Unauthorized(format!(
                        "unsupported token algorithm: {}",
                        header.alg
                    )));
                }
                let signature = URL_SAFE_NO_PAD
                    .decode(sig_b64)
                    .map_err(|_| ApiError::Unauthorized("malformed token signature".to_string()))?;
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|_| ApiError::Unauthorized("invalid signing secret".to_string()))?;
                mac.update(header_b64.as_bytes());
                mac.update(b".");
                mac.update(payload_b64.as_bytes());
                mac.verify_slice(&signature)
                    .map_err(|_| ApiError::Unauthorized("token signature mismatch".to_string()))?;
            }
            None if self.allow_unverified => {}
            None => {
                return Err(ApiError::Unauthorized(
                    "authentication secret not configured".to_string(),
                ))
            }
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| ApiError::Unauthorized("malformed token payload".to_string()))?;
        let claims: Claims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| ApiError::Unauthorized("malformed token payload".to_string()))?;

        if let Some(exp) = claims.exp {
            if exp <= now {
                return Err(ApiError::Unauthorized("token has expired".to_string()));
            }
        }

        Ok(claims)
    }
}

/// Mint an HS256 token for the given subject. Used by `edx token` for
/// local development and by the test suite.
pub fn sign_token(sub: &str, ttl_secs: i64, secret: &str) -> anyhow::Result<String> {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let exp = chrono::Utc::now().timestamp() + ttl_secs;
    let payload = serde_json::json!({ "sub": sub, "exp": exp });

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing secret: {e}"))?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{header_b64}.{payload_b64}.{sig_b64}"))
}
