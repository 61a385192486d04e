// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token claim decoding and expiry classification.
//!
//! Tokens are `header.payload.signature` with a base64url JSON payload. The
//! client cannot verify signatures; it only reads claims to decide when to
//! refresh. Anything that fails to decode is treated as expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SessionError;

/// Claims read from a token payload. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedClaims {
    /// Expiry as epoch seconds (`exp`).
    pub expires_at: u64,
    /// `user_id`, falling back to `sub`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// `access` or `refresh` when the backend stamps it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Remaining claims, read-only for authorization checks elsewhere.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl DecodedClaims {
    /// Time left until expiry, or `None` if already expired at `now`.
    pub fn expires_in(&self, now: u64) -> Option<Duration> {
        self.expires_at.checked_sub(now).filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// Validity of a token relative to now plus a safety skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Valid,
    /// Still accepted by the server but within the skew window.
    NearExpiry,
    /// Past expiry or undecodable.
    Expired,
}

/// Decode a token's payload claims.
pub fn decode(token: &str) -> Result<DecodedClaims, SessionError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SessionError::MalformedToken("expected three dot-separated segments".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::MalformedToken(format!("payload is not base64url: {e}")))?;
    let mut claims: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not a JSON object: {e}")))?;

    let expires_at = match claims.remove("exp") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| SessionError::MalformedToken(format!("invalid exp claim: {n}")))?,
        Some(other) => {
            return Err(SessionError::MalformedToken(format!("invalid exp claim: {other}")));
        }
        None => return Err(SessionError::MalformedToken("missing exp claim".into())),
    };

    let user_id = take_string(&mut claims, "user_id").or_else(|| take_string(&mut claims, "sub"));
    let role = take_string(&mut claims, "role");
    let token_type = take_string(&mut claims, "token_type");
    let jti = take_string(&mut claims, "jti");

    Ok(DecodedClaims { expires_at, user_id, role, token_type, jti, extra: claims })
}

/// Remove a claim and render it as a string (numeric ids included).
fn take_string(claims: &mut Map<String, Value>, key: &str) -> Option<String> {
    match claims.remove(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        other => {
            claims.insert(key.to_owned(), other);
            None
        }
    }
}

/// Classify a token against an explicit `now` (epoch seconds).
pub fn classify_at(token: &str, skew: Duration, now: u64) -> Freshness {
    match decode(token) {
        Ok(claims) if claims.expires_at <= now => Freshness::Expired,
        Ok(claims) if claims.expires_at <= now.saturating_add(skew.as_secs()) => {
            Freshness::NearExpiry
        }
        Ok(_) => Freshness::Valid,
        Err(_) => Freshness::Expired,
    }
}

pub fn classify(token: &str, skew: Duration) -> Freshness {
    classify_at(token, skew, epoch_secs())
}

/// True if the token is undecodable or expires within `skew` of `now`.
pub fn is_expired_at(token: &str, skew: Duration, now: u64) -> bool {
    classify_at(token, skew, now) != Freshness::Valid
}

pub fn is_expired(token: &str, skew: Duration) -> bool {
    is_expired_at(token, skew, epoch_secs())
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
