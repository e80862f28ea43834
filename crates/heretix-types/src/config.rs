use serde::{Deserialize, Serialize};

/// Which evidence lens (or both) a run should exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lens {
    /// Raw Prior Lens: model-sampling + bootstrap aggregation only.
    Rpl,
    /// Web-Evidence Lens: retrieval + fusion only.
    Wel,
    /// Both lenses, combined via logit-space fusion.
    Both,
}

impl Default for Lens {
    fn default() -> Self {
        Lens::Both
    }
}

/// Declares what a provider/model pairing supports, loaded from the
/// provider-capabilities YAML file described in the external interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_concurrency: u32,
    pub supports_json_mode: bool,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub cost_per_1k_input_tokens_usd: Option<f64>,
    #[serde(default)]
    pub cost_per_1k_output_tokens_usd: Option<f64>,
}

/// Configuration for a single claim-verification run.
///
/// Populated by `heretix-config`'s discovery chain (CLI > env > file >
/// defaults) before being handed to `heretix-pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub lens: Lens,
    /// Number of distinct prompt templates/paraphrases, "K" in the sampler.
    pub k_templates: usize,
    /// Replicates per template, "R" in the sampler.
    pub r_replicates: usize,
    /// Bootstrap resample count for the clustered aggregator.
    pub bootstrap_iters: usize,
    /// Explicit seed override. When absent, the seed is derived
    /// deterministically from claim + template hashes + provider identity.
    #[serde(default)]
    pub seed: Option<u64>,
    pub provider: String,
    pub model: String,
    /// Maximum worker concurrency for sampling fan-out.
    pub max_concurrency: usize,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
    /// Number of distinct web documents to retrieve for WEL.
    #[serde(default = "default_web_docs")]
    pub web_doc_count: usize,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub artifact_dir: Option<String>,
    /// Upper bound on a single rendered template's character length
    /// (system + user text combined). `None` means unbounded.
    #[serde(default)]
    pub max_prompt_chars: Option<usize>,
    /// Cap on tokens requested from the provider per sample; folded into
    /// the per-sample cache key since a shorter/longer completion for the
    /// same prompt is a distinct cached entity.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Bypasses both reads and writes against the sample cache for this
    /// run. Cache statistics are still observable (a fully bypassed run
    /// reports `cache_hit_rate = 0.0`).
    #[serde(default)]
    pub no_cache: bool,
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_web_docs() -> usize {
    8
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lens: Lens::default(),
            k_templates: 5,
            r_replicates: 3,
            bootstrap_iters: 2000,
            seed: None,
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet".to_string(),
            max_concurrency: 8,
            request_timeout_ms: 30_000,
            web_doc_count: default_web_docs(),
            cache_dir: None,
            artifact_dir: None,
            max_prompt_chars: None,
            max_output_tokens: default_max_output_tokens(),
            no_cache: false,
        }
    }
}
