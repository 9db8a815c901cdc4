use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::token_store::{ConsumeOutcome, RefreshEntry, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub jti: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::invalid_token("subject is not a valid user id"))
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

/// Stateless issuance and validation of signed token pairs, backed by the
/// refresh-token registry and access-token blacklist in the [`TokenStore`].
///
/// Key modes follow the deployment's configuration:
/// 1. RS256 full (private + public key): can sign and verify
/// 2. RS256 verify-only (public key only): gateway-only deployments
/// 3. HS256 (shared secret): can sign and verify
pub struct TokenService {
    /// None if this instance only verifies tokens (verify-only mode)
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_ttl_mins: i64,
    refresh_ttl_days: i64,
    store: Arc<dyn TokenStore>,
}

impl TokenService {
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> anyhow::Result<Self> {
        let is_valid_key = |key: &Option<String>| -> bool {
            key.as_ref().map(|k| !k.trim().is_empty()).unwrap_or(false)
        };

        let has_private_key = is_valid_key(&config.jwt_private_key);
        let has_public_key = is_valid_key(&config.jwt_public_key);
        let has_secret = !config.jwt_secret.is_empty();

        let (algorithm, encoding_key, decoding_key) = if has_private_key && has_public_key {
            tracing::info!("Initializing tokens with RS256 (full mode: sign and verify)");

            let private_key = config.jwt_private_key.as_ref().unwrap();
            let public_key = config.jwt_public_key.as_ref().unwrap();
            let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
                .map_err(|e| anyhow::anyhow!("failed to parse JWT_PRIVATE_KEY as RSA PEM: {e}"))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())
                .map_err(|e| anyhow::anyhow!("failed to parse JWT_PUBLIC_KEY as RSA PEM: {e}"))?;

            (Algorithm::RS256, Some(encoding_key), decoding_key)
        } else if has_public_key {
            tracing::info!("Initializing tokens with RS256 (verify-only mode: no private key)");

            let public_key = config.jwt_public_key.as_ref().unwrap();
            let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())
                .map_err(|e| anyhow::anyhow!("failed to parse JWT_PUBLIC_KEY as RSA PEM: {e}"))?;

            (Algorithm::RS256, None, decoding_key)
        } else if has_secret {
            tracing::info!("Initializing tokens with HS256 shared secret");

            (
                Algorithm::HS256,
                Some(EncodingKey::from_secret(config.jwt_secret.as_bytes())),
                DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            )
        } else {
            anyhow::bail!(
                "No token key configuration provided. Set either:\n\
                - JWT_PUBLIC_KEY (verify-only mode)\n\
                - JWT_PRIVATE_KEY + JWT_PUBLIC_KEY (RS256 full mode)\n\
                - JWT_SECRET (HS256 mode)"
            );
        };

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            access_ttl_mins: config.access_token_ttl_mins,
            refresh_ttl_days: config.refresh_token_ttl_days,
            store,
        })
    }

    /// Issues an access/refresh pair and registers the refresh token.
    pub async fn issue_token_pair(&self, user_id: Uuid, role: &str) -> AppResult<TokenPair> {
        let encoding_key = self.encoding_key.as_ref().ok_or_else(|| {
            AppError::Config("cannot issue tokens in verify-only mode".to_string())
        })?;

        let now = Utc::now();
        let access_exp = now + Duration::minutes(self.access_ttl_mins);
        let refresh_exp = now + Duration::days(self.refresh_ttl_days);
        let refresh_jti = Uuid::new_v4().to_string();

        let access_claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            jti: Uuid::new_v4().to_string(),
            kind: TokenKind::Access,
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let refresh_claims = Claims {
            jti: refresh_jti.clone(),
            kind: TokenKind::Refresh,
            exp: refresh_exp.timestamp(),
            ..access_claims.clone()
        };

        let header = Header::new(self.algorithm);
        let access_token = encode(&header, &access_claims, encoding_key)?;
        let refresh_token = encode(&header, &refresh_claims, encoding_key)?;

        self.store
            .register(RefreshEntry {
                jti: refresh_jti,
                user_id,
                created_at: now.timestamp(),
                expires_at: refresh_exp.timestamp(),
                revoked: false,
            })
            .await;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: access_exp.timestamp(),
            refresh_expires_at: refresh_exp.timestamp(),
        })
    }

    /// Validates an access token: algorithm allowlist, blacklist lookup on
    /// the untrusted claims, then signature/issuer/audience/expiry and token
    /// kind.
    pub async fn validate_access(&self, token: &str) -> AppResult<Claims> {
        self.check_algorithm(token)?;

        let unverified = self.peek_claims(token)?;
        if self.store.is_blacklisted(&unverified.jti).await {
            return Err(AppError::invalid_token("token is blacklisted"));
        }

        self.verify(token, TokenKind::Access)
    }

    /// Validates a refresh token; the id must additionally resolve to an
    /// active registry entry.
    pub async fn validate_refresh(&self, token: &str) -> AppResult<Claims> {
        self.check_algorithm(token)?;
        let claims = self.verify(token, TokenKind::Refresh)?;

        match self.store.get(&claims.jti).await {
            Some(entry) if entry.is_active(Utc::now().timestamp()) => Ok(claims),
            Some(_) | None => Err(AppError::invalid_token("refresh token is not active")),
        }
    }

    /// Single-use rotation: consumes the presented refresh token and issues a
    /// fresh pair. Presenting an already-rotated token fails with
    /// [`AppError::RefreshReuseDetected`] (rendered to the caller as an
    /// ordinary invalid-token rejection).
    pub async fn rotate(&self, refresh_token: &str) -> AppResult<TokenPair> {
        self.check_algorithm(refresh_token)?;
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;

        match self.store.consume(&claims.jti).await {
            ConsumeOutcome::Consumed(entry) => {
                self.issue_token_pair(entry.user_id, &claims.role).await
            }
            ConsumeOutcome::AlreadyRevoked => {
                let err = AppError::RefreshReuseDetected;
                err.log();
                Err(err)
            }
            ConsumeOutcome::Missing => Err(AppError::invalid_token("unknown refresh token")),
        }
    }

    /// Flips one registry entry's revoked flag.
    pub async fn revoke_one(&self, jti: &str) -> bool {
        self.store.revoke(jti).await
    }

    /// Revokes every registry entry for the user ("log out everywhere",
    /// password reset).
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> usize {
        self.store.revoke_all_for_user(user_id).await
    }

    /// Rejects the access token before its natural expiry (logout). The
    /// blacklist entry mirrors the token's own expiry so the sweep can prune
    /// it.
    pub async fn blacklist_access_token(&self, token: &str) -> AppResult<()> {
        self.check_algorithm(token)?;
        let claims = self.verify(token, TokenKind::Access)?;
        self.store.blacklist(&claims.jti, claims.exp).await;
        Ok(())
    }

    /// Best-effort subject extraction from an unverified token, used only to
    /// key rate-limit counters before full validation.
    pub fn peek_subject(&self, token: &str) -> Option<String> {
        self.peek_claims(token).ok().map(|claims| claims.sub)
    }

    fn check_algorithm(&self, token: &str) -> AppResult<()> {
        let header = decode_header(token)
            .map_err(|_| AppError::invalid_token("malformed token header"))?;
        if header.alg != self.algorithm {
            return Err(AppError::invalid_token("unsupported signing algorithm"));
        }
        Ok(())
    }

    /// Decodes claims without trusting the signature. Only used to look up
    /// the blacklist and to key rate limiting; never grants access.
    fn peek_claims(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::invalid_token(e.to_string()))?;
        Ok(data.claims)
    }

    fn verify(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.set_audience(&[self.audience.clone()]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::invalid_token(e.to_string()),
            }
        })?;

        if data.claims.kind != kind {
            return Err(AppError::invalid_token("token kind mismatch"));
        }

        Ok(data.claims)
    }
}
