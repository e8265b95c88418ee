//! Compact Token Codec
//!
//! Bearer tokens in the HS256 JWT layout:
//! `base64url(header).base64url(claims).base64url(hmac_sha256(header.claims))`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";

/// Errors that can occur while encoding or decoding a token
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Invalid signing key")]
    InvalidKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: String,
}

/// Serialize `claims` and sign them with `secret`
pub fn encode<C: Serialize>(claims: &C, secret: &[u8]) -> Result<String, TokenError> {
    let header = Header {
        alg: ALGORITHM.to_string(),
        typ: TOKEN_TYPE.to_string(),
    };
    let header = serde_json::to_vec(&header).map_err(|e| TokenError::Malformed(e.to_string()))?;
    let claims = serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Check the signature of `token` against `secret` and deserialize its claims.
///
/// The signature is checked before the claims segment is parsed, so a
/// tampered token is always reported as [`TokenError::BadSignature`].
pub fn decode<C: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<C, TokenError> {
    let mut segments = token.split('.');
    let (header, claims, signature) =
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(TokenError::Malformed("expected three segments".to_string())),
        };

    let header: Header = serde_json::from_slice(&decode_segment(header)?)
        .map_err(|e| TokenError::Malformed(format!("header: {}", e)))?;
    if header.alg != ALGORITHM {
        return Err(TokenError::UnsupportedAlgorithm(header.alg));
    }

    let signature = decode_segment(signature)?;
    let signing_input = token
        .rsplit_once('.')
        .map(|(input, _)| input)
        .unwrap_or_default();
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    serde_json::from_slice(&decode_segment(claims)?)
        .map_err(|e| TokenError::Malformed(format!("claims: {}", e)))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn claims() -> Claims {
        Claims {
            sub: "alice".to_string(),
            exp: 1_700_000_000,
        }
    }

    #[test]
    fn test_encode_decode() {
        let token = encode(&claims(), b"secret").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded: Claims = decode(&token, b"secret").unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode(&claims(), b"secret").unwrap();
        let result = decode::<Claims>(&token, b"other-secret");
        assert!(matches!(result, Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let token = encode(&claims(), b"secret").unwrap();
        let mut segments: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"mallory","exp":1700000000}"#);
        segments[1] = &forged;
        let forged_token = segments.join(".");

        let result = decode::<Claims>(&forged_token, b"secret");
        assert!(matches!(result, Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            decode::<Claims>("not-a-token", b"secret"),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            decode::<Claims>("a.b.c.d", b"secret"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice","exp":1}"#);
        let token = format!("{}.{}.", header, body);

        let result = decode::<Claims>(&token, b"secret");
        assert!(matches!(result, Err(TokenError::UnsupportedAlgorithm(alg)) if alg == "none"));
    }
}
