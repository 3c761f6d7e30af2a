use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::state::AppState;

/// Claim asserting that its subject may confirm their account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmClaim {
    pub confirm: Uuid,
}

/// Claim asserting that its subject may set a new password. The token is the
/// whole authorization; there is no authenticated caller on this path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetClaim {
    pub reset: Uuid,
}

/// Claim asserting that its subject may move to `new_email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEmailClaim {
    pub change_email: Uuid,
    pub new_email: String,
}

/// Session claim for the HTTP layer's Bearer token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SessionClaim {
    sub: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct Timestamped<C> {
    iat: usize,
    exp: usize,
    #[serde(flatten)]
    claim: C,
}

/// Signs and verifies the opaque token strings. Pure over (payload, secret,
/// clock); the secret is process-wide and constant for the process lifetime.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_ttl: Duration,
    session_ttl: Duration,
}

impl FromRef<AppState> for TokenSigner {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.token)
    }
}

impl TokenSigner {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret_key.as_bytes()),
            default_ttl: Duration::from_secs(config.ttl_secs.max(0) as u64),
            session_ttl: Duration::from_secs(config.session_ttl_secs.max(0) as u64),
        }
    }

    /// Sign `claim` with an embedded issued-at and expiry. `ttl` falls back
    /// to the configured default (3600 s).
    fn sign<C: Serialize>(&self, claim: C, ttl: Option<Duration>) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let timestamped = Timestamped {
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            claim,
        };
        let token = encode(&Header::default(), &timestamped, &self.encoding)?;
        Ok(token)
    }

    /// Decode and verify a token as claim kind `C`. Tampering, truncation,
    /// malformed encoding, a missing or wrong-typed claim key, and expiry all
    /// come back as the same opaque failure; callers must not tell them
    /// apart.
    fn verify<C: DeserializeOwned>(&self, token: &str) -> anyhow::Result<C> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.validate_aud = false;
        let data = decode::<Timestamped<C>>(token, &self.decoding, &validation)?;
        Ok(data.claims.claim)
    }

    pub fn issue_confirm(&self, user_id: Uuid, ttl: Option<Duration>) -> anyhow::Result<String> {
        let token = self.sign(ConfirmClaim { confirm: user_id }, ttl)?;
        debug!(user_id = %user_id, "confirm token issued");
        Ok(token)
    }

    pub fn decode_confirm(&self, token: &str) -> anyhow::Result<ConfirmClaim> {
        self.verify(token)
    }

    pub fn issue_reset(&self, user_id: Uuid, ttl: Option<Duration>) -> anyhow::Result<String> {
        let token = self.sign(ResetClaim { reset: user_id }, ttl)?;
        debug!(user_id = %user_id, "reset token issued");
        Ok(token)
    }

    pub fn decode_reset(&self, token: &str) -> anyhow::Result<ResetClaim> {
        self.verify(token)
    }

    pub fn issue_change_email(
        &self,
        user_id: Uuid,
        new_email: &str,
        ttl: Option<Duration>,
    ) -> anyhow::Result<String> {
        let token = self.sign(
            ChangeEmailClaim {
                change_email: user_id,
                new_email: new_email.to_string(),
            },
            ttl,
        )?;
        debug!(user_id = %user_id, new_email = %new_email, "change-email token issued");
        Ok(token)
    }

    pub fn decode_change_email(&self, token: &str) -> anyhow::Result<ChangeEmailClaim> {
        self.verify(token)
    }

    pub fn sign_session(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign(SessionClaim { sub: user_id }, Some(self.session_ttl))
    }

    pub fn verify_session(&self, token: &str) -> anyhow::Result<Uuid> {
        let claim: SessionClaim = self.verify(token)?;
        Ok(claim.sub)
    }
}
