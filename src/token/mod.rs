//! Signed, expiring verification tokens.
//!
//! A token is `identity:expiry:signature` where `expiry` is Unix seconds and
//! `signature` is an HMAC-SHA256 over `identity:expiry`, encoded as unpadded
//! URL-safe base64. Verification needs only the shared secret.

mod codec;

pub use codec::{generate_secret, mint, verify, TokenCodec, DELIMITER};

use thiserror::Error;

/// Reasons a token cannot be minted or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The identity contains the field delimiter.
    #[error("payload must not contain the '{}' delimiter", DELIMITER)]
    MalformedPayload,

    /// Structure or signature is wrong. Deliberately says nothing more.
    #[error("token is invalid or has been tampered with")]
    Invalid,

    /// Signature is intact but the expiry has passed.
    #[error("token has expired")]
    Expired,

    /// The signing secret is empty or a known placeholder.
    #[error("signing secret is empty or a known placeholder")]
    WeakSecret,
}

impl TokenError {
    /// Short tag safe to hand back to end users.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::MalformedPayload => "malformed_payload",
            TokenError::Invalid => "invalid_or_tampered",
            TokenError::Expired => "expired",
            TokenError::WeakSecret => "weak_secret",
        }
    }
}
