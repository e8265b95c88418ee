//! Authorization Grants
//!
//! Issues and verifies the bearer tokens that admit a peer to a room,
//! including the optional post-quantum key advertisement.
//!
//! The PQ fields travel as ordinary claims under the same HMAC-SHA256
//! signature as the room grant. The signature proves that whoever holds the
//! shared secret bound the advertised key to the identity; it gives no
//! post-quantum integrity of its own.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::token::{self, TokenError};

/// Lifetime of an advertised PQ key, counted from issuance
pub const PQ_KEY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Token validity used when the caller does not pick one
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Grant-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("Authorization failed: {0}")]
    Auth(String),
    #[error("Token expired: {0}")]
    Expired(String),
    #[error("Grant configuration error: {0}")]
    Config(String),
}

impl From<TokenError> for GrantError {
    fn from(err: TokenError) -> Self {
        GrantError::Auth(err.to_string())
    }
}

/// Room capabilities carried by a grant.
///
/// Unrecognized fields are kept in `extra` and survive a sign/verify cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_join: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish_data: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomGrant {
    /// Grant that lets the holder join `room` and publish/subscribe
    pub fn join(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            room_join: true,
            can_publish: Some(true),
            can_subscribe: Some(true),
            ..Default::default()
        }
    }
}

/// A verified (or freshly issued) grant.
///
/// Absent PQ fields are empty strings and a zero expiry; a grant without a
/// PQ key is a plain classical grant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationGrant {
    pub identity: String,
    pub room_grant: RoomGrant,
    /// Standard base64 of the advertised PQ public key
    pub pq_public_key: String,
    pub pq_algorithm: String,
    /// Unix seconds; zero when no PQ key is advertised
    pub pq_key_expiry: i64,
    pub issued_at: i64,
    pub not_before: i64,
    pub expires_at: i64,
    pub audience: Option<String>,
    /// Top-level claims this service does not interpret
    pub extra_claims: Map<String, Value>,
}

impl AuthorizationGrant {
    pub fn has_pq_key(&self) -> bool {
        !self.pq_public_key.is_empty()
    }

    /// Raw bytes of the advertised PQ key, if any
    pub fn pq_public_key_bytes(&self) -> Result<Option<Vec<u8>>, GrantError> {
        if !self.has_pq_key() {
            return Ok(None);
        }
        STANDARD
            .decode(&self.pq_public_key)
            .map(Some)
            .map_err(|e| GrantError::Auth(format!("pqPublicKey is not valid base64: {}", e)))
    }

    /// Whether the advertised PQ key is past its own expiry at `now` (unix seconds)
    pub fn pq_key_expired(&self, now: i64) -> bool {
        self.has_pq_key() && now >= self.pq_key_expiry
    }

    /// Reject a grant whose PQ key has expired.
    ///
    /// `verify` does not call this; the PQ expiry is informational unless a
    /// caller opts in.
    pub fn ensure_pq_key_fresh(&self, now: i64) -> Result<(), GrantError> {
        if self.pq_key_expired(now) {
            return Err(GrantError::Expired(format!(
                "post-quantum key for {} expired at {}",
                self.identity, self.pq_key_expiry
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantClaims {
    iss: String,
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aud: Option<String>,
    iat: i64,
    nbf: i64,
    exp: i64,
    #[serde(default)]
    video: RoomGrant,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pq_public_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pq_algorithm: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pq_key_expiry: i64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Builder for a single token
pub struct AccessToken {
    api_key: String,
    secret: Vec<u8>,
    identity: String,
    grant: RoomGrant,
    ttl: Duration,
    audience: Option<String>,
    pq_public_key: Option<Vec<u8>>,
    pq_algorithm: String,
    extra: Map<String, Value>,
}

impl AccessToken {
    pub fn new(api_key: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            identity: String::new(),
            grant: RoomGrant::default(),
            ttl: DEFAULT_TOKEN_TTL,
            audience: None,
            pq_public_key: None,
            pq_algorithm: String::new(),
            extra: Map::new(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_grant(mut self, grant: RoomGrant) -> Self {
        self.grant = grant;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Advertise a PQ public key; its expiry is set at signing time
    pub fn with_post_quantum_key(mut self, public_key: &[u8], algorithm: impl Into<String>) -> Self {
        self.pq_public_key = Some(public_key.to_vec());
        self.pq_algorithm = algorithm.into();
        self
    }

    /// Attach an extra top-level claim, carried through verification untouched
    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn to_token(self) -> Result<String, GrantError> {
        self.to_token_at(Utc::now().timestamp())
    }

    /// Sign the token as if issued at `now` (unix seconds)
    pub fn to_token_at(self, now: i64) -> Result<String, GrantError> {
        Ok(self.sign_at(now)?.0)
    }

    fn sign_at(self, now: i64) -> Result<(String, AuthorizationGrant), GrantError> {
        if self.identity.is_empty() {
            return Err(GrantError::Config("identity is required".to_string()));
        }
        if self.secret.is_empty() {
            return Err(GrantError::Config("signing secret is empty".to_string()));
        }

        let ttl = if self.ttl.is_zero() {
            DEFAULT_TOKEN_TTL
        } else {
            self.ttl
        };
        let expires_at = offset(now, ttl)
            .ok_or_else(|| GrantError::Config("ttl out of range".to_string()))?;
        let (pq_public_key, pq_key_expiry) = match &self.pq_public_key {
            Some(key) => (
                STANDARD.encode(key),
                offset(now, PQ_KEY_LIFETIME)
                    .ok_or_else(|| GrantError::Config("pq key expiry out of range".to_string()))?,
            ),
            None => (String::new(), 0),
        };
        let pq_algorithm = if self.pq_public_key.is_some() {
            self.pq_algorithm
        } else {
            String::new()
        };

        let claims = GrantClaims {
            iss: self.api_key,
            sub: self.identity,
            aud: self.audience,
            iat: now,
            nbf: now,
            exp: expires_at,
            video: self.grant,
            pq_public_key,
            pq_algorithm,
            pq_key_expiry,
            extra: self.extra,
        };
        let token = token::encode(&claims, &self.secret)?;
        Ok((token, claims.into()))
    }
}

/// `now + span` in unix seconds, or `None` if it does not fit
fn offset(now: i64, span: Duration) -> Option<i64> {
    i64::try_from(span.as_secs())
        .ok()
        .and_then(|secs| now.checked_add(secs))
}

impl From<GrantClaims> for AuthorizationGrant {
    fn from(claims: GrantClaims) -> Self {
        Self {
            identity: claims.sub,
            room_grant: claims.video,
            pq_public_key: claims.pq_public_key,
            pq_algorithm: claims.pq_algorithm,
            pq_key_expiry: claims.pq_key_expiry,
            issued_at: claims.iat,
            not_before: claims.nbf,
            expires_at: claims.exp,
            audience: claims.aud,
            extra_claims: claims.extra,
        }
    }
}

/// Issues and verifies grants under one API key and shared secret
#[derive(Clone)]
pub struct GrantAuthority {
    api_key: String,
    secret: Vec<u8>,
}

impl fmt::Debug for GrantAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantAuthority")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl GrantAuthority {
    pub fn new(api_key: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self, GrantError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(GrantError::Config("signing secret is empty".to_string()));
        }
        Ok(Self {
            api_key: api_key.into(),
            secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Start a token builder bound to this authority's key and secret
    pub fn token(&self) -> AccessToken {
        AccessToken::new(self.api_key.clone(), self.secret.clone())
    }

    /// Issue a signed token for `identity`
    pub fn issue(
        &self,
        identity: &str,
        room_grant: RoomGrant,
        ttl: Duration,
        pq_public_key: Option<&[u8]>,
        pq_algorithm: Option<&str>,
    ) -> Result<String, GrantError> {
        self.issue_at(identity, room_grant, ttl, pq_public_key, pq_algorithm, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        identity: &str,
        room_grant: RoomGrant,
        ttl: Duration,
        pq_public_key: Option<&[u8]>,
        pq_algorithm: Option<&str>,
        now: i64,
    ) -> Result<String, GrantError> {
        let mut builder = self
            .token()
            .with_identity(identity)
            .with_grant(room_grant)
            .with_ttl(ttl);
        if let Some(key) = pq_public_key {
            builder = builder.with_post_quantum_key(key, pq_algorithm.unwrap_or_default());
        }

        let (token, grant) = builder.sign_at(now)?;
        log::debug!(
            "Issued grant for {} (pq: {}, expires {})",
            grant.identity,
            grant.has_pq_key(),
            grant.expires_at
        );
        Ok(token)
    }

    /// Verify `token` and return the grant it carries
    pub fn verify(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<AuthorizationGrant, GrantError> {
        self.verify_at(token, expected_audience, Utc::now().timestamp())
    }

    /// Verify `token` against the clock value `now` (unix seconds).
    ///
    /// Signature failures and issuer/audience mismatches are [`GrantError::Auth`];
    /// a token outside `[nbf, exp)` is [`GrantError::Expired`]. The PQ key
    /// expiry is not checked here.
    pub fn verify_at(
        &self,
        token: &str,
        expected_audience: Option<&str>,
        now: i64,
    ) -> Result<AuthorizationGrant, GrantError> {
        let claims: GrantClaims = token::decode(token, &self.secret)?;

        if claims.iss != self.api_key {
            return Err(GrantError::Auth(format!("unknown issuer {}", claims.iss)));
        }
        if let Some(expected) = expected_audience {
            if claims.aud.as_deref() != Some(expected) {
                return Err(GrantError::Auth(format!(
                    "audience mismatch, expected {}",
                    expected
                )));
            }
        }
        if now >= claims.exp {
            return Err(GrantError::Expired(format!("token expired at {}", claims.exp)));
        }
        if now < claims.nbf {
            return Err(GrantError::Expired(format!(
                "token not valid before {}",
                claims.nbf
            )));
        }
        if claims.sub.is_empty() {
            return Err(GrantError::Auth("token has no identity".to_string()));
        }

        Ok(claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kyber::PqKeyPair;

    const NOW: i64 = 1_760_000_000;

    fn authority() -> GrantAuthority {
        GrantAuthority::new("api-key", "shared-secret").unwrap()
    }

    #[test]
    fn test_issue_and_verify_with_pq_key() {
        let authority = authority();
        let key = b"pq-public-key-bytes".to_vec();
        let token = authority
            .issue_at(
                "alice",
                RoomGrant::join("lobby"),
                Duration::from_secs(600),
                Some(&key),
                Some("ML-KEM-768"),
                NOW,
            )
            .unwrap();

        let grant = authority.verify_at(&token, None, NOW + 10).unwrap();
        assert_eq!(grant.identity, "alice");
        assert_eq!(grant.room_grant.room.as_deref(), Some("lobby"));
        assert_eq!(grant.pq_algorithm, "ML-KEM-768");
        assert_eq!(grant.pq_public_key, STANDARD.encode(&key));
        assert_eq!(grant.pq_public_key_bytes().unwrap(), Some(key));
        assert_eq!(grant.pq_key_expiry, NOW + 24 * 60 * 60);
        assert_eq!(grant.expires_at, NOW + 600);
    }

    #[test]
    fn test_classical_grant_has_empty_pq_fields() {
        let authority = authority();
        let token = authority
            .issue_at("bob", RoomGrant::join("lobby"), Duration::from_secs(600), None, None, NOW)
            .unwrap();

        let grant = authority.verify_at(&token, None, NOW).unwrap();
        assert_eq!(grant.identity, "bob");
        assert!(!grant.has_pq_key());
        assert_eq!(grant.pq_public_key, "");
        assert_eq!(grant.pq_algorithm, "");
        assert_eq!(grant.pq_key_expiry, 0);
        assert_eq!(grant.pq_public_key_bytes().unwrap(), None);
        assert!(!grant.pq_key_expired(NOW + 1_000_000));
    }

    #[test]
    fn test_empty_identity_is_config_error() {
        let result = authority().issue_at("", RoomGrant::default(), Duration::from_secs(60), None, None, NOW);
        assert!(matches!(result, Err(GrantError::Config(_))));
    }

    #[test]
    fn test_ttl_out_of_range_is_config_error() {
        let authority = authority();
        for secs in [u64::MAX, i64::MAX as u64] {
            let result = authority.issue_at(
                "alice",
                RoomGrant::default(),
                Duration::from_secs(secs),
                None,
                None,
                NOW,
            );
            assert!(matches!(result, Err(GrantError::Config(_))), "ttl {}", secs);
        }

        // Largest ttl that still fits is accepted and verifies
        let token = authority
            .issue_at(
                "alice",
                RoomGrant::default(),
                Duration::from_secs((i64::MAX - NOW) as u64),
                None,
                None,
                NOW,
            )
            .unwrap();
        assert_eq!(authority.verify_at(&token, None, NOW).unwrap().expires_at, i64::MAX);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            GrantAuthority::new("api-key", ""),
            Err(GrantError::Config(_))
        ));
    }

    #[test]
    fn test_wrong_secret_is_auth_error() {
        let token = authority()
            .issue_at("alice", RoomGrant::default(), Duration::from_secs(60), None, None, NOW)
            .unwrap();
        let other = GrantAuthority::new("api-key", "another-secret").unwrap();

        assert!(matches!(other.verify_at(&token, None, NOW), Err(GrantError::Auth(_))));
    }

    #[test]
    fn test_unknown_issuer_is_auth_error() {
        let token = AccessToken::new("someone-else", "shared-secret")
            .with_identity("alice")
            .to_token_at(NOW)
            .unwrap();

        assert!(matches!(authority().verify_at(&token, None, NOW), Err(GrantError::Auth(_))));
    }

    #[test]
    fn test_expired_token() {
        let authority = authority();
        let token = authority
            .issue_at("alice", RoomGrant::default(), Duration::from_secs(60), None, None, NOW)
            .unwrap();

        assert!(authority.verify_at(&token, None, NOW + 59).is_ok());
        assert!(matches!(
            authority.verify_at(&token, None, NOW + 60),
            Err(GrantError::Expired(_))
        ));
        assert!(matches!(
            authority.verify_at(&token, None, NOW - 5),
            Err(GrantError::Expired(_))
        ));
    }

    #[test]
    fn test_pq_key_expiry_is_informational() {
        let authority = authority();
        let token = authority
            .issue_at(
                "alice",
                RoomGrant::default(),
                Duration::from_secs(48 * 60 * 60),
                Some(b"key"),
                Some("ML-KEM-768"),
                NOW,
            )
            .unwrap();

        let later = NOW + 25 * 60 * 60;
        let grant = authority.verify_at(&token, None, later).unwrap();
        assert!(grant.pq_key_expired(later));
        assert!(matches!(grant.ensure_pq_key_fresh(later), Err(GrantError::Expired(_))));
        assert!(grant.ensure_pq_key_fresh(NOW + 60).is_ok());
    }

    #[test]
    fn test_audience_check() {
        let authority = authority();
        let token = authority
            .token()
            .with_identity("alice")
            .with_audience("signaling")
            .to_token_at(NOW)
            .unwrap();

        assert!(authority.verify_at(&token, Some("signaling"), NOW).is_ok());
        assert!(authority.verify_at(&token, None, NOW).is_ok());
        assert!(matches!(
            authority.verify_at(&token, Some("media"), NOW),
            Err(GrantError::Auth(_))
        ));
    }

    #[test]
    fn test_unknown_claims_pass_through() {
        let authority = authority();
        let mut grant = RoomGrant::join("lobby");
        grant.extra.insert("hidden".to_string(), Value::Bool(true));
        let token = authority
            .token()
            .with_identity("alice")
            .with_grant(grant.clone())
            .with_claim("metadata", Value::String("{\"role\":\"host\"}".to_string()))
            .to_token_at(NOW)
            .unwrap();

        let verified = authority.verify_at(&token, None, NOW).unwrap();
        assert_eq!(verified.room_grant, grant);
        assert_eq!(
            verified.extra_claims.get("metadata"),
            Some(&Value::String("{\"role\":\"host\"}".to_string()))
        );
    }

    #[test]
    fn test_generated_kyber_key_round_trip() {
        let authority = authority();
        let keypair = PqKeyPair::generate();
        let token = authority
            .issue_at(
                "carol",
                RoomGrant::join("lobby"),
                Duration::from_secs(600),
                Some(&keypair.public_key_bytes()),
                Some(PqKeyPair::ALGORITHM),
                NOW,
            )
            .unwrap();

        let grant = authority.verify_at(&token, None, NOW).unwrap();
        assert_eq!(grant.pq_algorithm, PqKeyPair::ALGORITHM);
        assert_eq!(grant.pq_public_key_bytes().unwrap(), Some(keypair.public_key_bytes()));
    }
}
