//! Verification flow: throttle, mint, verify.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::VerigateConfig;
use crate::error::{Result, VerigateError};
use crate::ratelimit::CompositeRateLimiter;
use crate::token::{TokenCodec, TokenError, DELIMITER};

/// A freshly minted verification token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a verification request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// Too many requests for this address or identity
    #[error("Too many requests, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    /// The token could not be minted
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Issues and redeems verification tokens behind the composite rate limiter.
pub struct VerificationGate {
    codec: TokenCodec,
    limiter: CompositeRateLimiter,
    clock: Arc<dyn Clock>,
    link_ttl: chrono::Duration,
}

impl VerificationGate {
    /// Assemble a gate. Fails if `link_ttl` is zero or too large to add to a timestamp.
    pub fn new(
        codec: TokenCodec,
        limiter: CompositeRateLimiter,
        clock: Arc<dyn Clock>,
        link_ttl: Duration,
    ) -> Result<Self> {
        let link_ttl = chrono::Duration::from_std(link_ttl)
            .ok()
            .filter(|ttl| *ttl > chrono::Duration::zero() && *ttl <= chrono::Duration::days(365))
            .ok_or_else(|| {
                VerigateError::Config(format!("link TTL {link_ttl:?} is out of range"))
            })?;

        Ok(Self {
            codec,
            limiter,
            clock,
            link_ttl,
        })
    }

    /// Build the gate described by `config`.
    pub async fn from_config(config: &VerigateConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let codec = TokenCodec::new(&config.token.secret)?;
        let limiter = CompositeRateLimiter::from_config(config, Arc::clone(&clock)).await?;
        Self::new(codec, limiter, clock, config.link_ttl())
    }

    /// Mint a token for `identity` unless the pair is throttled.
    ///
    /// Identities the token format cannot carry are rejected before they
    /// consume any quota.
    pub async fn request(
        &self,
        address: &str,
        identity: &str,
    ) -> std::result::Result<IssuedToken, GateError> {
        if identity.contains(DELIMITER) {
            return Err(GateError::Token(TokenError::MalformedPayload));
        }

        let decision = self.limiter.allow(address, identity).await;
        if !decision.allowed {
            debug!(address = %address, retry_after = ?decision.retry_after, "Verification throttled");
            return Err(GateError::Throttled {
                retry_after: decision.retry_after,
            });
        }

        let expires_at = self.clock.now() + self.link_ttl;
        let token = self.codec.mint(identity, expires_at)?;

        info!(address = %address, expires_at = %expires_at, "Issued verification token");
        Ok(IssuedToken { token, expires_at })
    }

    /// Redeem a token, returning the identity it proves.
    pub fn complete(&self, token: &str) -> std::result::Result<String, TokenError> {
        self.codec.verify(token, self.clock.now())
    }
}
