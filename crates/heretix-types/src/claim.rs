use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Maximum size of a claim's text, in bytes. Mirrors the cap the prompt
/// packet builder enforces when it budgets a request against a provider's
/// context window.
pub const MAX_CLAIM_BYTES: usize = 4096;

/// A natural-language assertion to be checked.
///
/// `Claim` is a validated newtype rather than a bare `String` so that every
/// downstream component (sampler, cache key, seed derivation) can assume the
/// text is non-empty and within size bounds without re-checking it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claim(String);

impl Claim {
    pub fn new(text: impl Into<String>) -> Result<Self, TypesError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyClaim);
        }
        if trimmed.len() > MAX_CLAIM_BYTES {
            return Err(TypesError::ClaimTooLong {
                max: MAX_CLAIM_BYTES,
                actual: trimmed.len(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Claim {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Claim::new(s)
    }
}
