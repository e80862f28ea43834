//! Web-Evidence Lens: retrieve documents, score each one's stance toward a
//! claim across replicate shards, aggregate the replicates into a fused
//! probability, and attempt a hard resolution when evidence is lopsided
//! enough.

pub mod aggregate;
pub mod date_extract;
pub mod resolver;
pub mod retrieval;
pub mod scorer;

use async_trait::async_trait;
use chrono::Utc;
use heretix_fusion::{agreement_from_dispersion, logit, recency_score, strength_score};
use heretix_types::{Doc, WebBlock, WebReplicate};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use aggregate::{WeightedReplicate, aggregate_web_replicates};
use resolver::{Resolution, ScoredDoc, try_resolve_fact};
use retrieval::{RetrievalError, WebRetriever};

#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error("no documents available to judge")]
    NoDocuments,
    #[error("stance judge failed: {0}")]
    Judge(String),
}

/// Judges a single retrieved document's stance toward a claim. The seam
/// exists so this crate doesn't need to depend on `heretix-llm` directly;
/// the pipeline crate wires a concrete LLM-backed judge in.
#[async_trait]
pub trait StanceJudge: Send + Sync {
    async fn judge(&self, claim: &str, doc: &Doc) -> Result<f64, WebError>;
}

/// `p`/`ci95` pinned onto a resolved-true claim, per the resolved-pin
/// policy: resolution is a stronger signal than the fused probability, so a
/// resolved claim reports near-certain bounds rather than whatever the
/// fused estimate happened to land on.
pub const RESOLVED_TRUE_PROB: f64 = 0.95;
pub const RESOLVED_TRUE_CI95: [f64; 2] = [0.92, 0.98];
pub const RESOLVED_FALSE_PROB: f64 = 0.05;
pub const RESOLVED_FALSE_CI95: [f64; 2] = [0.02, 0.08];

/// Runs the full Web-Evidence Lens: retrieve up to `max_docs` documents,
/// score each one's stance across replicate shards, weight by recency and
/// evidence strength, aggregate in logit space, and attempt a hard
/// resolution.
pub async fn run_wel(
    claim: &str,
    retriever: &dyn WebRetriever,
    judge: &dyn StanceJudge,
    max_docs: usize,
) -> Result<WebBlock, WebError> {
    let docs = retriever.retrieve(claim, max_docs).await?;
    if docs.is_empty() {
        return Err(WebError::NoDocuments);
    }

    let distinct_domains = docs.iter().map(|d| d.domain.as_str()).collect::<std::collections::HashSet<_>>().len();
    let is_timely = is_timely_claim(claim);

    let mut shards_by_doc = Vec::with_capacity(docs.len());
    let mut doc_stance_logits = Vec::with_capacity(docs.len());
    for doc in &docs {
        let shards = scorer::score_doc(claim, doc, judge).await?;
        let doc_stance_mean = shards.iter().map(|s| s.stance_prob_true).sum::<f64>() / shards.len().max(1) as f64;
        doc_stance_logits.push(logit(doc_stance_mean));
        shards_by_doc.push((doc, shards, doc_stance_mean));
    }
    let dispersion = logit_iqr(&mut doc_stance_logits);
    let agreement = agreement_from_dispersion(dispersion);
    // WEL scoring here always either produces a judged stance or propagates
    // an error (no `json_valid = false` fallback path yet), so every scored
    // document counts as valid evidence.
    let strength = strength_score(docs.len(), distinct_domains, agreement, 1.0);

    let mut replicates: Vec<WebReplicate> = Vec::new();
    let mut scored_docs = Vec::with_capacity(docs.len());
    for (doc, shards, doc_stance_mean) in shards_by_doc {
        let age_days = age_in_days(doc);
        let recency = recency_score(is_timely, age_days);
        let weight = heretix_fusion::web_weight(recency, strength);

        for shard in shards {
            replicates.push(WebReplicate {
                doc_url: shard.doc_url,
                shard_idx: shard.shard_idx,
                stance_prob_true: shard.stance_prob_true,
                recency_score: recency,
                strength_score: strength,
                weight,
            });
        }
        scored_docs.push((doc.domain.clone(), age_days, doc_stance_mean));
    }

    let weighted: Vec<WeightedReplicate> =
        replicates.iter().map(|r| WeightedReplicate { stance_prob_true: r.stance_prob_true, weight: r.weight }).collect();
    let fused = aggregate_web_replicates(&weighted).expect("docs is non-empty so replicates is non-empty");

    let scored: Vec<ScoredDoc> = scored_docs
        .iter()
        .map(|(domain, age_days, stance_prob)| ScoredDoc {
            domain,
            age_days: *age_days,
            supports: *stance_prob > 0.5,
            has_quote: false,
        })
        .collect();
    let resolution: Option<Resolution> = try_resolve_fact(&scored);

    let (prob, ci95, web_weight) = match &resolution {
        Some(Resolution { resolved: true, .. }) => (RESOLVED_TRUE_PROB, RESOLVED_TRUE_CI95, 1.0),
        Some(Resolution { resolved: false, .. }) => (RESOLVED_FALSE_PROB, RESOLVED_FALSE_CI95, 1.0),
        None => {
            let mean_weight = replicates.iter().map(|r| r.weight).sum::<f64>() / replicates.len().max(1) as f64;
            (fused.prob, fused.ci95, mean_weight)
        }
    };

    Ok(WebBlock {
        prob,
        ci95,
        docs,
        resolved: resolution.as_ref().map(|r| r.resolved),
        resolution_reason: resolution.map(|r| r.reason),
        web_weight,
    })
}

fn age_in_days(doc: &Doc) -> f64 {
    match doc.published_at_unix_ms {
        Some(ms) => {
            let now_ms = Utc::now().timestamp_millis();
            ((now_ms - ms).max(0) as f64) / 86_400_000.0
        }
        None => 365.0, // undated documents are treated as stale, not timely
    }
}

/// Interquartile range of a (mutably sorted) slice of logits, 0.0 for fewer
/// than two values.
fn logit_iqr(logits: &mut [f64]) -> f64 {
    if logits.len() < 2 {
        return 0.0;
    }
    logits.sort_by(|a, b| a.partial_cmp(b).expect("logits must not be NaN"));
    let percentile = |pct: f64| -> f64 {
        let rank = pct / 100.0 * (logits.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            logits[lo]
        } else {
            let frac = rank - lo as f64;
            logits[lo] * (1.0 - frac) + logits[hi] * frac
        }
    };
    percentile(75.0) - percentile(25.0)
}

static TIMELY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(today|yesterday|this week|this month|this year|currently|now|breaking|latest|recent(ly)?|ongoing|20[0-9]{2})\b")
        .expect("static timeliness pattern is valid")
});

/// Heuristic check for whether a claim concerns a fast-changing topic:
/// matches explicit recency language or a bare four-digit year.
fn is_timely_claim(claim: &str) -> bool {
    TIMELY_RE.is_match(claim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrieval::FixedRetriever;

    fn doc(url: &str, domain: &str) -> Doc {
        Doc {
            url: url.to_string(),
            domain: domain.to_string(),
            title: None,
            page_text: None,
            snippet: String::new(),
            published_at_unix_ms: Some(Utc::now().timestamp_millis()),
            date_confidence: 0.9,
        }
    }

    struct FixedJudge(f64);

    #[async_trait]
    impl StanceJudge for FixedJudge {
        async fn judge(&self, _claim: &str, _doc: &Doc) -> Result<f64, WebError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn run_wel_fuses_consistent_stances_tightly() {
        let docs = vec![doc("a", "wikipedia.org"), doc("b", "nytimes.com")];
        let retriever = FixedRetriever::new(docs);
        let judge = FixedJudge(0.7);
        let block = run_wel("claim", &retriever, &judge, 8).await.unwrap();
        assert!(block.prob > 0.6);
        assert!(block.ci95[1] - block.ci95[0] < 0.5);
    }

    #[tokio::test]
    async fn run_wel_errors_on_no_documents() {
        let retriever = FixedRetriever::new(vec![]);
        let judge = FixedJudge(0.5);
        let err = run_wel("claim", &retriever, &judge, 8).await.unwrap_err();
        assert!(matches!(err, WebError::NoDocuments));
    }

    #[tokio::test]
    async fn run_wel_applies_resolved_true_pin() {
        let docs = vec![doc("a", "us.gov"), doc("b", "who.int")];
        let retriever = FixedRetriever::new(docs);
        let judge = FixedJudge(0.9);
        let block = run_wel("claim", &retriever, &judge, 8).await.unwrap();
        assert_eq!(block.resolved, Some(true));
        assert_eq!(block.prob, RESOLVED_TRUE_PROB);
        assert_eq!(block.ci95, RESOLVED_TRUE_CI95);
    }
}
