//! Domain-weighted resolver: when web evidence is lopsided and broad enough,
//! pin the claim to a hard true/false instead of reporting a middling
//! fused probability.
//!
//! Grounded on `heretix_wel/resolved_engine.py`: authoritative domains carry
//! more weight, evidence recency decays exponentially, and resolution only
//! fires once a minimum number of distinct domains have weighed in.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Score a claim must reach, on the support side, before it is pinned true.
pub const THRESH_SUPPORT: f64 = 2.0;
/// Score a claim must reach, on the contradiction side, before it is pinned
/// false. Lower than [`THRESH_SUPPORT`] because a single authoritative
/// retraction is treated as stronger evidence than general corroboration.
pub const THRESH_OPPOSE: f64 = 0.5;
/// Minimum number of distinct source domains required to attempt
/// resolution at all; otherwise a single echoed source could resolve a
/// claim on its own.
pub const MIN_DISTINCT_DOMAINS: usize = 2;
/// Recency decay time constant, in days, for resolver scoring (separate
/// from and coarser than the fusion lens's recency half-life since
/// resolution cares more about "is this still current" than ranking).
pub const RECENCY_TAU_DAYS: f64 = 14.0;

static DOMAIN_WEIGHTS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("us.gov", 2.0),
        ("whitehouse.gov", 2.0),
        ("congress.gov", 2.0),
        ("supremecourt.gov", 2.0),
        ("apnews.com", 1.5),
        ("reuters.com", 1.5),
        ("bbc.com", 1.3),
        ("nytimes.com", 1.2),
        ("wsj.com", 1.2),
        ("who.int", 1.8),
        ("un.org", 1.5),
        ("wikipedia.org", 1.0),
    ])
});

/// One piece of scored evidence the resolver considers.
#[derive(Debug, Clone, Copy)]
pub struct ScoredDoc<'a> {
    pub domain: &'a str,
    pub age_days: f64,
    /// `true` if this document supports the claim, `false` if it
    /// contradicts it.
    pub supports: bool,
    /// Whether the doc verdict carried a direct quote backing its stance;
    /// quoted evidence counts for slightly more than an unquoted assertion.
    pub has_quote: bool,
}

/// Multiplier applied when a doc verdict is backed by a direct quote.
pub const QUOTE_BONUS: f64 = 1.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub resolved: bool,
    pub reason: String,
}

fn domain_weight(domain: &str) -> f64 {
    DOMAIN_WEIGHTS.get(domain).copied().unwrap_or(1.0)
}

fn recency_weight(age_days: f64) -> f64 {
    (-age_days.max(0.0) / RECENCY_TAU_DAYS).exp()
}

fn score_doc(doc: &ScoredDoc) -> f64 {
    let quote_factor = if doc.has_quote { QUOTE_BONUS } else { 1.0 };
    domain_weight(doc.domain) * recency_weight(doc.age_days) * quote_factor
}

fn distinct_domain_count(docs: &[ScoredDoc]) -> usize {
    docs.iter().map(|d| d.domain).collect::<std::collections::HashSet<_>>().len()
}

fn should_attempt_resolution(docs: &[ScoredDoc]) -> bool {
    distinct_domain_count(docs) >= MIN_DISTINCT_DOMAINS
}

/// Attempts to resolve a claim to a hard true/false from scored web
/// evidence. Returns `None` when evidence is too thin, too few domains are
/// represented, or support/contradiction scores don't clear threshold.
pub fn try_resolve_fact(docs: &[ScoredDoc]) -> Option<Resolution> {
    if !should_attempt_resolution(docs) {
        return None;
    }

    let support_score: f64 = docs.iter().filter(|d| d.supports).map(score_doc).sum();
    let oppose_score: f64 = docs.iter().filter(|d| !d.supports).map(score_doc).sum();

    if oppose_score >= THRESH_OPPOSE && support_score <= THRESH_OPPOSE {
        return Some(Resolution {
            resolved: false,
            reason: format!(
                "contradiction score {oppose_score:.2} clears threshold with support score {support_score:.2} held to {THRESH_OPPOSE} across {} domains",
                distinct_domain_count(docs)
            ),
        });
    }
    if support_score >= THRESH_SUPPORT && oppose_score <= THRESH_OPPOSE {
        return Some(Resolution {
            resolved: true,
            reason: format!(
                "support score {support_score:.2} clears threshold with contradiction score {oppose_score:.2} held to {THRESH_OPPOSE} across {} domains",
                distinct_domain_count(docs)
            ),
        });
    }
    None
}
