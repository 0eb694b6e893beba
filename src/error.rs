//! Error types for Verigate.

use thiserror::Error;

use crate::ratelimit::StoreError;
use crate::token::TokenError;

/// Main error type for Verigate operations.
#[derive(Error, Debug)]
pub enum VerigateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token minting or verification errors
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Verigate operations.
pub type Result<T> = std::result::Result<T, VerigateError>;
