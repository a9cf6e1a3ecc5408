//! Access token generator backed by the operating system CSPRNG.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::domain::ports::{TokenGenerator, TokenGeneratorError};
use crate::domain::{TokenValue, TokenWidth};

/// Draws tokens from [`OsRng`] without modulo bias.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngTokenGenerator;

impl OsRngTokenGenerator {
    fn draw(space: u64) -> Result<u64, TokenGeneratorError> {
        // Largest multiple of `space` that fits; draws at or above it are
        // rejected so every residue is equally likely.
        let zone = u64::MAX - (u64::MAX % space);
        loop {
            let mut bytes = [0_u8; 8];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|err| TokenGeneratorError::unavailable(err.to_string()))?;
            let candidate = u64::from_le_bytes(bytes);
            if candidate < zone {
                return Ok(candidate % space);
            }
        }
    }
}

impl TokenGenerator for OsRngTokenGenerator {
    fn generate(&self, width: TokenWidth) -> Result<TokenValue, TokenGeneratorError> {
        Self::draw(width.space()).map(|number| TokenValue::from_number(number, width))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(4)]
    #[case(6)]
    #[case(12)]
    fn tokens_have_the_requested_width(#[case] digits: u8) {
        let width = TokenWidth::new(digits).expect("width");
        let token = OsRngTokenGenerator.generate(width).expect("token");

        assert_eq!(token.as_str().len(), usize::from(digits));
        assert!(token.as_str().bytes().all(|b| b.is_ascii_digit()));
    }

    #[rstest]
    fn draws_spread_across_the_space() {
        let width = TokenWidth::default();
        let distinct: HashSet<String> = (0..64)
            .map(|_| {
                OsRngTokenGenerator
                    .generate(width)
                    .expect("token")
                    .as_str()
                    .to_owned()
            })
            .collect();

        assert!(distinct.len() > 48, "only {} distinct tokens", distinct.len());
    }
}
