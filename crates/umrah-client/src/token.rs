//! Local, structural token inspection.
//!
//! JWTs are decoded without verifying the signature and their `exp` claim
//! checked against the clock. Opaque tokens (e.g. `12|abcdef`) carry no
//! expiry and are given a fixed validity window from the moment they are
//! resolved, after which they are revalidated against the backend.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

use crate::error::AuthError;

/// Validity window assumed for tokens without an expiry claim.
pub const OPAQUE_TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// The `exp` claim of a JWT, `None` for opaque tokens or JWTs without one.
pub fn expiry_claim(token: &str) -> Result<Option<DateTime<Utc>>, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedToken("empty".into()));
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Ok(None);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&payload).map_err(|e| AuthError::MalformedToken(e.to_string()))?;

    match claims.exp {
        Some(exp) => Utc
            .timestamp_opt(exp, 0)
            .single()
            .map(Some)
            .ok_or_else(|| AuthError::MalformedToken(format!("exp out of range: {exp}"))),
        None => Ok(None),
    }
}

/// Effective expiry of `token` as seen at `now`.
pub fn effective_expiry(token: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
    match expiry_claim(token)? {
        Some(exp) if exp <= now => Err(AuthError::Expired),
        Some(exp) => Ok(exp),
        None => Ok(now + Duration::seconds(OPAQUE_TOKEN_TTL_SECS)),
    }
}

pub fn is_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    effective_expiry(token, now).is_ok()
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"5","exp":{}}}"#, exp.timestamp()));
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_expiry() {
        let now = Utc::now();
        let live = jwt_with_exp(now + Duration::minutes(5));
        let dead = jwt_with_exp(now - Duration::seconds(10));

        assert!(is_valid_at(&live, now));
        assert_eq!(effective_expiry(&dead, now), Err(AuthError::Expired));
    }

    #[test]
    fn test_opaque_token_gets_window() {
        let now = Utc::now();
        let expiry = effective_expiry("12|abcdef", now).unwrap();
        assert_eq!(expiry, now + Duration::seconds(OPAQUE_TOKEN_TTL_SECS));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(expiry_claim(""), Err(AuthError::MalformedToken(_))));
        assert!(matches!(
            expiry_claim("a.!!!.c"),
            Err(AuthError::MalformedToken(_))
        ));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode(b"nope"));
        assert!(!is_valid_at(&not_json, Utc::now()));
    }
}
