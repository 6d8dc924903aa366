//! Access token inspection.
//!
//! Access tokens are JWTs (`header.payload.signature`). The client never
//! verifies signatures; it only reads the payload to learn when the token
//! expires so that stale credentials are not sent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Expiry, Unix seconds
    pub exp: i64,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub iat: Option<i64>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    /// Expired when `exp` (converted to milliseconds) is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.saturating_mul(1000) <= now.timestamp_millis()
    }
}

/// Payload claims as sent by the backend.
#[derive(Deserialize)]
struct Payload {
    #[serde(default, deserialize_with = "numeric_date")]
    exp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(default, deserialize_with = "numeric_date")]
    iat: Option<i64>,
}

/// Unix seconds, integer or float. Any other value reads as absent.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Other(IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(secs) => Some(secs),
        Raw::Float(secs) => Some(secs.floor() as i64),
        Raw::Other(_) => None,
    })
}

/// Strings as-is, numeric ids as their decimal form.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
        Other(IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => Some(s),
        Raw::Num(n) => Some(n.to_string()),
        Raw::Other(_) => None,
    })
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token does not have three segments")]
    Shape,

    #[error("token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("token payload is not valid JSON: {0}")]
    Json(String),

    #[error("token payload has no numeric exp claim")]
    MissingExp,
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(DecodeError::Shape);
    };
    if header.is_empty() || payload.is_empty() {
        return Err(DecodeError::Shape);
    }

    // Some issuers pad their segments
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let payload: Payload =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    Ok(Claims {
        exp: payload.exp.ok_or(DecodeError::MissingExp)?,
        sub: payload.sub,
        email: payload.email,
        iat: payload.iat,
    })
}

/// Returns true if the token is expired or cannot be decoded.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.is_expired_at(now),
        Err(_) => true,
    }
}

/// Expiry time of a token, if it can be decoded.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token).ok().and_then(|c| c.expires_at())
}
