use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, RefreshClaims, TokenKind};
use crate::{config::JwtConfig, error::AppError};

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = cfg.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((ttl_minutes.max(0) as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes.max(0) as u64) * 60),
        }
    }

    fn window(&self, kind: TokenKind) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AppError> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }

    pub fn sign_access(&self, email: &str, user_id: Uuid, is_admin: bool) -> Result<String, AppError> {
        let (iat, exp) = self.window(TokenKind::Access);
        let token = self.sign(&Claims {
            sub: user_id,
            email: email.to_string(),
            is_admin,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        })?;
        debug!(user_id = %user_id, "access jwt signed");
        Ok(token)
    }

    pub fn sign_refresh(&self) -> Result<String, AppError> {
        let (iat, exp) = self.window(TokenKind::Refresh);
        self.sign(&RefreshClaims {
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        })
    }

    pub fn issue_pair(&self, email: &str, user_id: Uuid, is_admin: bool) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.sign_access(email, user_id, is_admin)?,
            refresh_token: self.sign_refresh()?,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    /// Validates an access token and returns its identity claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation()).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::MalformedToken,
            }
        })?;
        if data.claims.kind != TokenKind::Access {
            return Err(AppError::MalformedToken);
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 180,
            refresh_ttl_minutes: 4320,
        })
    }

    #[test]
    fn access_token_roundtrips_identity() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let pair = keys.issue_pair("ada@example.com", user_id, true).expect("issue pair");
        let claims = keys.verify(&pair.access_token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "ada@example.com");
        assert!(claims.is_admin);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 180 * 60);
    }

    #[test]
    fn refresh_token_outlives_access_and_is_not_an_access_token() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let pair = keys.issue_pair("a@b.io", Uuid::new_v4(), false).unwrap();

        let refresh =
            decode::<RefreshClaims>(&pair.refresh_token, &keys.decoding, &keys.validation())
                .unwrap();
        assert_eq!(refresh.claims.kind, TokenKind::Refresh);
        assert_eq!(refresh.claims.exp - refresh.claims.iat, 4320 * 60);

        assert!(matches!(keys.verify(&pair.refresh_token), Err(AppError::MalformedToken)));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let token = keys
            .sign(&Claims {
                sub: Uuid::new_v4(),
                email: "old@b.io".into(),
                is_admin: false,
                iat: now - 7200,
                exp: now - 60,
                iss: "iss".into(),
                aud: "aud".into(),
                kind: TokenKind::Access,
            })
            .unwrap();
        assert!(matches!(keys.verify(&token), Err(AppError::ExpiredToken)));
    }

    #[test]
    fn verify_rejects_foreign_secret_issuer_or_garbage() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let other_claims = make_keys("same-secret", "bad-iss", "bad-aud");
        let other_secret = make_keys("other-secret", "good-iss", "good-aud");
        let token = good.sign_access("a@b.io", Uuid::new_v4(), false).unwrap();

        assert!(matches!(other_claims.verify(&token), Err(AppError::MalformedToken)));
        assert!(matches!(other_secret.verify(&token), Err(AppError::MalformedToken)));
        assert!(matches!(good.verify("not.a.jwt"), Err(AppError::MalformedToken)));
    }
}
