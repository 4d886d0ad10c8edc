//! HMAC-SHA256 webhook signatures
//!
//! Outbound deliveries carry `X-Webhook-Signature: sha256=<hex>` computed over
//! the exact request body with the subscription secret.
//!
//! Inbound Stripe deliveries carry
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]` where each `v1` is an
//! HMAC over `"{t}.{body}"`. Verification checks the timestamp tolerance first,
//! then accepts if any `v1` matches any configured secret in constant time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the outbound signature header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

fn hmac_bytes(secret: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SignatureError::MalformedHeader(format!("invalid key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex HMAC-SHA256 of `body`
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    hmac_bytes(secret.as_bytes(), &[body]).map(hex::encode)
}

/// Outbound header value: `sha256=<hex>`
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    sign_payload(secret, body).map(|sig| format!("{SIGNATURE_PREFIX}{sig}"))
}

/// Fresh subscription secret: 32 random bytes, hex encoded
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Check an outbound-style `sha256=<hex>` header against `body`.
///
/// Subscribers use this to authenticate deliveries.
pub fn verify_payload(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let hex_sig = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| SignatureError::MalformedHeader("missing sha256= prefix".to_string()))?;
    let provided = hex::decode(hex_sig)
        .map_err(|e| SignatureError::MalformedHeader(format!("invalid hex: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::MalformedHeader(format!("invalid key: {e}")))?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

// ============================================================================
// Stripe-Signature
// ============================================================================

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignatureHeader {
    /// Signing timestamp (unix seconds)
    pub timestamp: i64,
    /// Every `v1` signature, decoded
    pub signatures: Vec<Vec<u8>>,
}

impl StripeSignatureHeader {
    /// Parse `t=...,v1=...`. Unknown schemes (`v0`) are skipped.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(SignatureError::MalformedHeader(format!(
                    "expected key=value, got {part:?}"
                )));
            };
            match key {
                "t" => {
                    let parsed = value.parse::<i64>().map_err(|_| {
                        SignatureError::MalformedHeader(format!("invalid timestamp {value:?}"))
                    })?;
                    timestamp = Some(parsed);
                }
                "v1" => {
                    let decoded = hex::decode(value).map_err(|_| {
                        SignatureError::MalformedHeader("v1 signature is not hex".to_string())
                    })?;
                    signatures.push(decoded);
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| SignatureError::MalformedHeader("missing t=".to_string()))?;
        if signatures.is_empty() {
            return Err(SignatureError::MalformedHeader("missing v1=".to_string()));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies inbound Stripe signatures
#[derive(Debug, Clone)]
pub struct StripeVerifier {
    secrets: Vec<String>,
    tolerance: Duration,
}

impl StripeVerifier {
    /// Verifier for `secret` accepting signatures up to `tolerance` old
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self::with_secrets(vec![secret.into()], tolerance)
    }

    /// Verifier accepting a signature made with any of `secrets`
    pub fn with_secrets(secrets: Vec<String>, tolerance: Duration) -> Self {
        Self { secrets, tolerance }
    }

    /// Whether at least one secret is configured
    pub fn is_configured(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Verify against the current clock
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(body, header, Utc::now())
    }

    /// Verify against an explicit clock
    pub fn verify_at(
        &self,
        body: &[u8],
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::MissingHeader)?;
        let parsed = StripeSignatureHeader::parse(header)?;

        // Untrusted timestamp: an age that does not fit is out of tolerance
        let age_secs = now
            .timestamp()
            .checked_sub(parsed.timestamp)
            .ok_or(SignatureError::TimestampOutOfTolerance { age_secs: i64::MAX })?;
        if age_secs.unsigned_abs() > self.tolerance.as_secs() {
            return Err(SignatureError::TimestampOutOfTolerance { age_secs });
        }

        let timestamp = parsed.timestamp.to_string();
        let mut matched = false;
        for secret in &self.secrets {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| SignatureError::MalformedHeader(format!("invalid key: {e}")))?;
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(body);
            matched |= parsed
                .signatures
                .iter()
                .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        }
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Build a valid header for `body` at `timestamp` with the first secret
    pub fn sign(&self, body: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let secret = self
            .secrets
            .first()
            .ok_or_else(|| SignatureError::MalformedHeader("no signing secret".to_string()))?;
        let t = timestamp.to_string();
        let sig = hmac_bytes(secret.as_bytes(), &[t.as_bytes(), b".", body])?;
        Ok(format!("t={t},v1={}", hex::encode(sig)))
    }
}
