use serde::{Deserialize, Serialize};

/// A retrieved web document used as evidence for the Web-Evidence Lens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doc {
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub page_text: Option<String>,
    pub snippet: String,
    /// Publication/update date, when extractable, as a Unix day count.
    pub published_at_unix_ms: Option<i64>,
    pub date_confidence: f64,
}

/// One judged shard of a doc against the claim, the WEL analogue of
/// [`crate::Sample`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebReplicate {
    pub doc_url: String,
    pub shard_idx: u32,
    /// Judged probability the claim is true given this shard's text.
    pub stance_prob_true: f64,
    pub recency_score: f64,
    pub strength_score: f64,
    pub weight: f64,
}
