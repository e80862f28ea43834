use serde::{Deserialize, Serialize};

/// A single model elicitation for one (template, replicate) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub template_hash: String,
    pub replicate_idx: u32,
    /// Extracted probability in `[0, 1]`.
    pub prob: f64,
    pub has_citation_or_url: bool,
    pub raw_response: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// What is stored on disk/in the content-addressed cache for a sample,
/// keyed by `(claim, template_hash, replicate_idx, provider, model, seed)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSample {
    pub cache_key: String,
    pub sample: Sample,
    pub created_at_unix_ms: i64,
}
