//! HMAC token minting and verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use super::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the identity, expiry and signature fields.
pub const DELIMITER: char = ':';

/// Secrets that must never be used to sign anything.
const PLACEHOLDER_SECRETS: &[&str] = &["changeme"];

/// Build the keyed MAC over `identity:expiry`.
fn signed_message(secret: &[u8], identity: &str, expiry: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(identity.as_bytes());
    mac.update(&[DELIMITER as u8]);
    mac.update(expiry.as_bytes());
    mac
}

/// Mint a token binding `identity` to `expiry`.
///
/// The expiry is stored with second resolution; any sub-second part is
/// truncated.
pub fn mint(identity: &str, expiry: DateTime<Utc>, secret: &[u8]) -> Result<String, TokenError> {
    if identity.contains(DELIMITER) {
        return Err(TokenError::MalformedPayload);
    }

    let expiry = expiry.timestamp().to_string();
    let signature = signed_message(secret, identity, &expiry)
        .finalize()
        .into_bytes();

    Ok(format!(
        "{identity}{DELIMITER}{expiry}{DELIMITER}{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verify a token and return the identity it was minted for.
///
/// The signature is checked (in constant time) before the expiry field is
/// even parsed, so a forged expiry can only ever produce [`TokenError::Invalid`].
pub fn verify(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<String, TokenError> {
    let fields: Vec<&str> = token.split(DELIMITER).collect();
    let [identity, expiry, signature] = fields.as_slice() else {
        return Err(TokenError::Invalid);
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Invalid)?;

    signed_message(secret, identity, expiry)
        .verify_slice(&signature)
        .map_err(|_| TokenError::Invalid)?;

    let expires_at = expiry
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or(TokenError::Invalid)?;

    if now >= expires_at {
        trace!(%expires_at, "Rejecting expired token");
        return Err(TokenError::Expired);
    }

    Ok((*identity).to_string())
}

/// Generate a fresh random signing secret (32 bytes, URL-safe base64).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Token codec bound to one server secret.
///
/// Cloning is cheap; clones share the secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec, refusing empty or placeholder secrets.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        let blank = secret.iter().all(u8::is_ascii_whitespace);
        let placeholder = PLACEHOLDER_SECRETS
            .iter()
            .any(|p| p.as_bytes() == secret);

        if blank || placeholder {
            return Err(TokenError::WeakSecret);
        }

        Ok(Self {
            secret: Arc::from(secret),
        })
    }

    /// Mint a token for `identity` expiring at `expiry`.
    pub fn mint(&self, identity: &str, expiry: DateTime<Utc>) -> Result<String, TokenError> {
        mint(identity, expiry, &self.secret)
    }

    /// Verify `token` as of `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        verify(token, &self.secret, now)
    }
}
