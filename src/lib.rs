//! Verigate - Verification Links with Abuse Rate Limiting
//!
//! This crate guards "prove you own this email address" flows. It mints
//! stateless, HMAC-signed verification tokens that expire, and throttles how
//! often a network address or a target identity may trigger new ones using
//! fixed-window counters kept in process memory or in Redis.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod token;
pub mod verification;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::VerigateConfig;
pub use error::{Result, VerigateError};
pub use ratelimit::{CompositeRateLimiter, Decision, WindowRateLimiter};
pub use token::{TokenCodec, TokenError};
pub use verification::{GateError, IssuedToken, VerificationGate};
