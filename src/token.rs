//! Token Codec
//!
//! Mints and parses the three credential shapes this crate works with: the
//! opaque authenticated session token, the anonymous JWT, and the
//! public-data token. Random-token generation and hashing use plain
//! unsalted SHA-256; base64 encoding uses `base64ct` for constant-time,
//! allocation-light encode/decode.

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::SessionError;
use crate::models::{AnonymousJwtClaims, AnonymousSessionPayload, PublicData};
use crate::secrets;

/// Separator between the four session-token parts. Guaranteed not to appear
/// in any part: handles and nonces are alphanumeric-with-dashes, the
/// public-data hash is lowercase hex, and the version is a fixed literal.
const TOKEN_SEPARATOR: char = ';';

/// The only session-token version this codec mints or accepts.
pub const TOKEN_VERSION: &str = "v0";

const JWT_ISSUER: &str = "blitzjs";
const JWT_AUDIENCE: &str = "blitzjs";
const JWT_SUBJECT: &str = "anonymous";

/// Generates a cryptographically random, URL-safe string of length `n`.
pub fn new_random_token(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// Lowercase hex SHA-256 digest of `s`.
pub fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time string comparison, used wherever a secret-derived token
/// (session-token hash, anti-CSRF token) is checked against a
/// client-presented value.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The parsed form of an opaque session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenParts {
    pub handle: String,
    pub nonce: String,
    pub hashed_public_data: String,
    pub version: String,
}

/// Mints a new opaque session token:
/// `base64url(handle;nonce;sha256Hex(JSON(publicData));v0)`.
pub fn new_session_token(handle: &str, public_data: &PublicData) -> String {
    let nonce = new_random_token(32);
    let hashed_public_data = sha256_hex(&public_data.to_json_string());
    let raw = format!(
        "{handle}{TOKEN_SEPARATOR}{nonce}{TOKEN_SEPARATOR}{hashed_public_data}{TOKEN_SEPARATOR}{TOKEN_VERSION}"
    );
    Base64UrlUnpadded::encode_string(raw.as_bytes())
}

/// Parses an opaque session token into its four parts.
///
/// # Errors
/// `SessionError::MalformedToken` if the token isn't valid base64, doesn't
/// split into exactly four parts, or any part is empty. Callers (the
/// resolver) treat this as "no credential".
pub fn parse_session_token(token: &str) -> Result<SessionTokenParts, SessionError> {
    let raw = Base64UrlUnpadded::decode_vec(token)
        .map_err(|_| SessionError::MalformedToken("invalid base64".into()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| SessionError::MalformedToken("invalid utf-8".into()))?;

    let parts: Vec<&str> = raw.split(TOKEN_SEPARATOR).collect();
    if parts.len() != 4 {
        return Err(SessionError::MalformedToken(format!(
            "expected 4 parts, found {}",
            parts.len()
        )));
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(SessionError::MalformedToken("empty token part".into()));
    }

    Ok(SessionTokenParts {
        handle: parts[0].to_string(),
        nonce: parts[1].to_string(),
        hashed_public_data: parts[2].to_string(),
        version: parts[3].to_string(),
    })
}

/// Mints an HS256 JWT carrying `payload` under the `blitzjs` namespace key,
/// valid for `expiry_minutes` from now.
pub fn new_anonymous_jwt(
    payload: AnonymousSessionPayload,
    expiry_minutes: i64,
) -> Result<String, SessionError> {
    let exp = (chrono::Utc::now() + chrono::Duration::minutes(expiry_minutes)).timestamp();
    let exp = usize::try_from(exp)
        .map_err(|_| SessionError::InvalidConfig("JWT expiry timestamp out of range".into()))?;

    let claims = AnonymousJwtClaims {
        iss: JWT_ISSUER.to_string(),
        aud: JWT_AUDIENCE.to_string(),
        sub: JWT_SUBJECT.to_string(),
        exp,
        blitzjs: payload,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secrets::secret_bytes()),
    )
    .map_err(|e| SessionError::InvalidConfig(format!("failed to sign anonymous JWT: {e}")))
}

/// Parses an anonymous JWT. Never propagates an error: any signature, claim,
/// or expiry mismatch yields `None`.
pub fn parse_anonymous_jwt(token: &str) -> Option<AnonymousSessionPayload> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[JWT_ISSUER]);
    validation.set_audience(&[JWT_AUDIENCE]);

    match decode::<AnonymousJwtClaims>(
        token,
        &DecodingKey::from_secret(secrets::secret_bytes()),
        &validation,
    ) {
        Ok(data) => {
            if data.claims.sub != JWT_SUBJECT {
                tracing::debug!("anonymous JWT subject mismatch");
                return None;
            }
            Some(data.claims.blitzjs)
        }
        Err(e) => {
            tracing::debug!(error = %e, "anonymous JWT failed validation");
            None
        }
    }
}

/// Base64-encodes `publicData` as JSON, for the client-readable
/// public-data cookie.
pub fn new_public_data_token(public_data: &PublicData) -> String {
    Base64UrlUnpadded::encode_string(public_data.to_json_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublicData;

    fn init_secret() {
        let _ = crate::secrets::test_secret_or_init(
            "unit-test-secret-value-at-least-32-bytes-long!!",
        );
    }

    #[test]
    fn random_token_has_requested_length() {
        assert_eq!(new_random_token(32).len(), 32);
        assert_eq!(new_random_token(8).len(), 8);
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn constant_time_eq_matches_and_rejects() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn session_token_roundtrip() {
        let pd = PublicData::anonymous();
        let token = new_session_token("h-anonymous-jwt", &pd);
        let parts = parse_session_token(&token).unwrap();
        assert_eq!(parts.handle, "h-anonymous-jwt");
        assert_eq!(parts.version, TOKEN_VERSION);
        assert_eq!(parts.hashed_public_data, sha256_hex(&pd.to_json_string()));
    }

    #[test]
    fn session_token_tamper_is_rejected() {
        let pd = PublicData::anonymous();
        let mut token = new_session_token("h-opaque-token-simple", &pd);
        token.push('x');
        assert!(parse_session_token(&token).is_err());
    }

    #[test]
    fn malformed_session_token_parts() {
        let bad = Base64UrlUnpadded::encode_string(b"only;three;parts");
        assert!(parse_session_token(&bad).is_err());
    }

    #[test]
    fn anonymous_jwt_roundtrip() {
        init_secret();
        let payload = AnonymousSessionPayload {
            is_anonymous: true,
            handle: "h-anonymous-jwt".into(),
            public_data: PublicData::anonymous(),
            anti_csrf_token: "csrf".into(),
        };
        let jwt = new_anonymous_jwt(payload.clone(), 5).unwrap();
        let parsed = parse_anonymous_jwt(&jwt).unwrap();
        assert_eq!(parsed.handle, payload.handle);
        assert_eq!(parsed.anti_csrf_token, payload.anti_csrf_token);
    }

    #[test]
    fn anonymous_jwt_tamper_yields_none() {
        init_secret();
        let payload = AnonymousSessionPayload {
            is_anonymous: true,
            handle: "h".into(),
            public_data: PublicData::anonymous(),
            anti_csrf_token: "csrf".into(),
        };
        let mut jwt = new_anonymous_jwt(payload, 5).unwrap();
        jwt.push('z');
        assert!(parse_anonymous_jwt(&jwt).is_none());
    }

    #[test]
    fn public_data_token_is_base64_json() {
        let pd = PublicData::anonymous();
        let token = new_public_data_token(&pd);
        let decoded = Base64UrlUnpadded::decode_vec(&token).unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert_eq!(decoded, pd.to_json_string());
    }
}
