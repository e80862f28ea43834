use serde::{Deserialize, Serialize};

use crate::claim::Claim;
use crate::doc::Doc;

/// Output of the clustered bootstrap aggregator: a point estimate in
/// probability space plus a confidence interval and dispersion metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub prob: f64,
    pub ci95: [f64; 2],
    pub iqr_logit: f64,
    pub stability_score: f64,
    pub stability_band: String,
    pub n_samples: usize,
    pub n_valid: usize,
    /// Fraction of the plan's draws that both parsed and carried no
    /// URL-like token (the glossary's "compliance rate").
    pub rpl_compliance_rate: f64,
    /// Fraction of the plan's draws served from the sample cache rather
    /// than a live provider call.
    pub cache_hit_rate: f64,
}

/// The RPL half of a [`RunRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorBlock {
    pub aggregation: AggregationResult,
    pub seed: u64,
    pub k_templates: usize,
    pub r_replicates: usize,
}

/// The WEL half of a [`RunRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebBlock {
    pub prob: f64,
    pub ci95: [f64; 2],
    pub docs: Vec<Doc>,
    pub resolved: Option<bool>,
    pub resolution_reason: Option<String>,
    /// How much this lens should count against the model prior during
    /// fusion: the mean recency/strength weight across judged replicates,
    /// or `1.0` when `resolved` is set (the resolver bypasses fusion
    /// entirely).
    pub web_weight: f64,
}

/// The fused result of prior and web blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedBlock {
    pub prob: f64,
    pub ci95: [f64; 2],
    pub prior_weight: f64,
    pub web_weight: f64,
}

/// The canonical, content-addressable artifact produced by one run.
///
/// Serialized with RFC 8785 JSON Canonicalization (see
/// `heretix_store::emit_jcs`) so that two runs with identical inputs and
/// seeds produce byte-identical records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub claim: Claim,
    pub provider: String,
    pub model: String,
    pub prior: Option<PriorBlock>,
    pub web: Option<WebBlock>,
    pub combined: Option<CombinedBlock>,
    /// A longer narrative walking through the evidence; `None` when
    /// generation was skipped (mock mode, high cache-hit rate) or failed and
    /// fell back to a deterministic template without one.
    pub reasoning_paragraph: Option<String>,
    /// A short, user-facing summary of the verdict.
    pub simple_explanation: Option<String>,
    pub cost_estimate_usd: Option<f64>,
    pub started_at_unix_ms: i64,
    pub finished_at_unix_ms: i64,
}

pub const RUN_RECORD_SCHEMA_VERSION: u32 = 1;
