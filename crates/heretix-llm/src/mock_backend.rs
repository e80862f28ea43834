//! Deterministic mock backend: derives a probability from the prompt's hash
//! instead of calling a provider. Selected when a run configures
//! `mock = true`; never touches the network and never consults a
//! [`crate::LlmBackend`] rate limiter.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::error::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};

const MEAN: f64 = 0.25;
const STD_DEV: f64 = 0.02;
const MIN_PROB: f64 = 0.05;
const MAX_PROB: f64 = 0.95;

/// Draws a deterministic probability from `N(0.25, 0.02^2)`, clipped to
/// `[0.05, 0.95]`, seeded from the SHA-256 of the invocation's full prompt
/// text (system and user messages concatenated in order, which together
/// carry both the template and the claim).
pub struct MockBackend;

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn prompt_seed(inv: &LlmInvocation) -> u64 {
    let mut hasher = Sha256::new();
    for message in &inv.messages {
        hasher.update(message.content.as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("sha256 digest is at least 8 bytes"))
}

/// Box-Muller transform over two uniform draws from a seeded RNG, scaled to
/// `N(MEAN, STD_DEV^2)` and clipped to `[MIN_PROB, MAX_PROB]`.
fn draw_probability(seed: u64) -> f64 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    let standard_normal = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    (MEAN + STD_DEV * standard_normal).clamp(MIN_PROB, MAX_PROB)
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let seed = prompt_seed(&inv);
        let probability = draw_probability(seed);
        let raw_response = format!(r#"{{"probability": {probability:.6}, "has_citation_or_url": false}}"#);
        Ok(LlmResult::new(raw_response, "mock", inv.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use std::time::Duration;

    fn invocation(claim: &str) -> LlmInvocation {
        LlmInvocation::new(
            "mock-model",
            Duration::from_secs(1),
            vec![Message::system("judge this claim"), Message::user(claim)],
        )
    }

    #[tokio::test]
    async fn same_prompt_yields_the_same_probability() {
        let backend = MockBackend::new();
        let first = backend.invoke(invocation("the sky is blue")).await.unwrap();
        let second = backend.invoke(invocation("the sky is blue")).await.unwrap();
        assert_eq!(first.raw_response, second.raw_response);
    }

    #[tokio::test]
    async fn different_claims_yield_different_probabilities() {
        let backend = MockBackend::new();
        let a = backend.invoke(invocation("the sky is blue")).await.unwrap();
        let b = backend.invoke(invocation("the sky is green")).await.unwrap();
        assert_ne!(a.raw_response, b.raw_response);
    }

    #[tokio::test]
    async fn probability_stays_within_the_clipped_range() {
        let backend = MockBackend::new();
        for claim in ["a", "bb", "ccc", "dddd", "eeeee", "ffffff"] {
            let result = backend.invoke(invocation(claim)).await.unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&result.raw_response).unwrap();
            let p = parsed["probability"].as_f64().unwrap();
            assert!((MIN_PROB..=MAX_PROB).contains(&p), "probability {p} out of range for claim {claim}");
        }
    }

    #[tokio::test]
    async fn response_reports_the_mock_provider() {
        let backend = MockBackend::new();
        let result = backend.invoke(invocation("claim")).await.unwrap();
        assert_eq!(result.provider, "mock");
        assert_eq!(result.model_used, "mock-model");
    }
}
