//! Signed bearer token codec.
//!
//! HS256 only, with a separate secret and lifetime per [`TokenKind`]. Expiry
//! is checked against the injected [`Clock`] rather than the library's own
//! wall-clock check, so tests can move time.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::models::auth::{TokenClaims, TokenKind, TokenSubject};
use crate::uuid::opaque_id;

/// Token encode/verify failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("jwt encode: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token expired")]
    Expired,

    #[error("expected {expected} token, got {actual}")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
}

/// A freshly signed token and the values the caller needs to log it.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("jti", &self.jti)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Keys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Issues and verifies access and refresh tokens.
pub struct TokenCodec {
    access: Keys,
    refresh: Keys,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access: Keys::new(&config.access_secret, config.access_ttl),
            refresh: Keys::new(&config.refresh_secret, config.refresh_ttl),
            clock,
        }
    }

    fn keys(&self, kind: TokenKind) -> &Keys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Lifetime of tokens of `kind`.
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        self.keys(kind).ttl
    }

    /// Sign a token of `kind` for `subject` with a fresh jti.
    pub fn issue(&self, subject: &TokenSubject, kind: TokenKind) -> Result<IssuedToken, TokenError> {
        let keys = self.keys(kind);
        let now = self.clock.now();
        let expires_at = now + keys.ttl;
        let jti = opaque_id().to_string();

        let claims = TokenClaims {
            user_id: subject.user_id,
            username: subject.username.clone(),
            email: subject.email.clone(),
            jti: jti.clone(),
            typ: kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(TokenError::Encode)?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Check signature, algorithm, kind and expiry; return the claims.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<TokenClaims>(token, &self.keys(kind).decoding, &validation)
            .map_err(TokenError::Invalid)?
            .claims;

        if claims.typ != kind {
            return Err(TokenError::WrongKind {
                expected: kind,
                actual: claims.typ,
            });
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn codec() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = AuthConfig::new("access-secret", "refresh-secret", "http://localhost");
        (TokenCodec::new(&config, clock.clone()), clock)
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 42,
            username: "alice".into(),
            email: "alice@example.com".into(),
        }
    }

    #[test]
    fn issue_then_verify() {
        let (codec, _) = codec();
        let issued = codec.issue(&subject(), TokenKind::Access).unwrap();
        let claims = codec.verify(&issued.token, TokenKind::Access).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn every_token_gets_a_fresh_jti() {
        let (codec, _) = codec();
        let a = codec.issue(&subject(), TokenKind::Refresh).unwrap();
        let b = codec.issue(&subject(), TokenKind::Refresh).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (codec, _) = codec();
        let refresh = codec.issue(&subject(), TokenKind::Refresh).unwrap();
        // Signed with the other secret, so the signature check fails first.
        assert!(matches!(
            codec.verify(&refresh.token, TokenKind::Access),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn typ_claim_must_match_even_with_right_secret() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = AuthConfig::new("same", "same", "");
        let codec = TokenCodec::new(&config, clock);
        let refresh = codec.issue(&subject(), TokenKind::Refresh).unwrap();
        assert!(matches!(
            codec.verify(&refresh.token, TokenKind::Access),
            Err(TokenError::WrongKind {
                expected: TokenKind::Access,
                actual: TokenKind::Refresh
            })
        ));
    }

    #[test]
    fn other_hmac_algorithms_are_rejected() {
        let (codec, clock) = codec();
        let now = clock.now();
        let claims = TokenClaims {
            user_id: 42,
            username: "alice".into(),
            email: "alice@example.com".into(),
            jti: "forged".into(),
            typ: TokenKind::Access,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
        };
        let forged = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();
        assert!(matches!(
            codec.verify(&forged, TokenKind::Access),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expiry_follows_the_clock() {
        let (codec, clock) = codec();
        let issued = codec.issue(&subject(), TokenKind::Access).unwrap();

        clock.advance(Duration::minutes(14));
        assert!(codec.verify(&issued.token, TokenKind::Access).is_ok());

        clock.advance(Duration::minutes(1));
        assert!(matches!(
            codec.verify(&issued.token, TokenKind::Access),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let (codec, _) = codec();
        assert!(matches!(
            codec.verify("not.a.jwt", TokenKind::Refresh),
            Err(TokenError::Invalid(_))
        ));
    }
}
