//! Port for drawing fresh access tokens.

use crate::domain::{TokenValue, TokenWidth};

use super::define_port_error;

define_port_error! {
    /// Errors raised by token generators.
    pub enum TokenGeneratorError {
        /// Entropy source failed.
        Unavailable { message: String } => "token generator unavailable: {message}",
    }
}

/// Source of uniformly distributed fixed-width numeric tokens.
#[cfg_attr(test, mockall::automock)]
pub trait TokenGenerator: Send + Sync {
    /// Draw one token of `width` digits.
    fn generate(&self, width: TokenWidth) -> Result<TokenValue, TokenGeneratorError>;
}
