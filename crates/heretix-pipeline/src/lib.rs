//! Pipeline orchestrator: runs the Raw Prior Lens and, when requested, the
//! Web-Evidence Lens, fuses both estimates in logit space, attaches a
//! narrative explanation, and persists one [`RunRecord`].
//!
//! Composition mirrors the teacher's orchestrator pattern (`RplRunner`
//! itself, one level down): a struct owning its collaborators by `Arc`,
//! built once per process and shared across concurrent runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use heretix_cache::SampleCache;
use heretix_error_reporter::HeretixError;
use heretix_fusion::{fuse_probabilities, label_for_prob};
use heretix_json::extract_judgement;
use heretix_llm::{LlmBackend, LlmInvocation, Message};
use heretix_lock::{FileLock, HeretixLock, RunContext};
use heretix_prompt_template::wel_judge_template;
use heretix_ratelimit::RateLimiter;
use heretix_rpl::RplRunner;
use heretix_store::ArtifactStore;
use heretix_types::{Claim, CombinedBlock, Doc, Lens, PriorBlock, RunConfig, RunRecord, WebBlock, RUN_RECORD_SCHEMA_VERSION};
use heretix_validation::validate_run_config;
use heretix_web::retrieval::WebRetriever;
use heretix_web::{StanceJudge, WebError, run_wel};

/// Below this cache-hit rate, a run is novel enough to justify spending two
/// extra provider calls on narrative explanation text; above it, the run is
/// mostly replaying cached samples and gets the deterministic template.
pub const EXPLANATION_CACHE_HIT_THRESHOLD: f64 = 0.999;

/// LLM-backed [`StanceJudge`]: renders the WEL judge template for a
/// document's text and extracts a probability the same way the RPL runner
/// extracts one from a sample response.
pub struct LlmStanceJudge {
    backend: Arc<dyn LlmBackend>,
    limiter: Arc<RateLimiter>,
    model: String,
    timeout: Duration,
}

impl LlmStanceJudge {
    pub fn new(backend: Arc<dyn LlmBackend>, limiter: Arc<RateLimiter>, model: String, timeout: Duration) -> Self {
        Self { backend, limiter, model, timeout }
    }
}

#[async_trait::async_trait]
impl StanceJudge for LlmStanceJudge {
    async fn judge(&self, claim: &str, doc: &Doc) -> Result<f64, WebError> {
        let shard_text = doc.page_text.as_deref().unwrap_or(&doc.snippet);
        let template = wel_judge_template(claim, shard_text);

        self.limiter
            .acquire_with_timeout(self.timeout)
            .await
            .map_err(|e| WebError::Judge(e.to_string()))?;

        let invocation = LlmInvocation::new(
            self.model.clone(),
            self.timeout,
            vec![Message::system(template.system), Message::user(template.user)],
        );
        let result = self.backend.invoke(invocation).await.map_err(|e| WebError::Judge(e.to_string()))?;
        let judgement = extract_judgement(&result.raw_response).map_err(|e| WebError::Judge(e.to_string()))?;
        Ok(judgement.prob)
    }
}

/// Owns every collaborator a run needs: the model backend, a rate limiter,
/// an optional sample cache, an optional web retriever (absent disables the
/// Web-Evidence Lens regardless of `RunConfig::lens`), and an artifact
/// store. `mock` mirrors the pipeline's mock mode: it suppresses narrative
/// explanation calls the same way a near-saturated cache does.
pub struct Pipeline {
    backend: Arc<dyn LlmBackend>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<SampleCache>>,
    retriever: Option<Arc<dyn WebRetriever>>,
    store: Arc<dyn ArtifactStore>,
    mock: bool,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        limiter: Arc<RateLimiter>,
        cache: Option<Arc<SampleCache>>,
        retriever: Option<Arc<dyn WebRetriever>>,
        store: Arc<dyn ArtifactStore>,
        mock: bool,
    ) -> Self {
        Self { backend, limiter, cache, retriever, store, mock }
    }

    /// Builds a variant of this pipeline with `backend` and `mock` swapped,
    /// sharing every other collaborator. Used by the HTTP surface to honor a
    /// per-request `mock` flag without rebuilding the rate limiter, cache, or
    /// artifact store.
    pub fn with_backend(&self, backend: Arc<dyn LlmBackend>, mock: bool) -> Pipeline {
        Pipeline {
            backend,
            limiter: Arc::clone(&self.limiter),
            cache: self.cache.clone(),
            retriever: self.retriever.clone(),
            store: Arc::clone(&self.store),
            mock,
        }
    }

    /// Runs one claim-verification pass end to end and persists the result.
    pub async fn run(&self, claim_text: &str, config: &RunConfig) -> Result<RunRecord, HeretixError> {
        validate_run_config(config).map_err(|mut errors| HeretixError::from(errors.remove(0)))?;
        let claim = Claim::new(claim_text)?;
        let _run_lock = self.acquire_run_lock(&claim, config);
        let started_at_unix_ms = Utc::now().timestamp_millis();

        let prior = self.run_prior(&claim, config).await?;
        let web = self.run_web(&claim, config).await;

        let combined = combine(prior.as_ref(), web.as_ref());

        let cache_hit_rate = self.cache.as_ref().map(|c| c.stats().hit_ratio()).unwrap_or(0.0);
        let should_generate = !self.mock && cache_hit_rate < EXPLANATION_CACHE_HIT_THRESHOLD;

        let (reasoning_paragraph, simple_explanation) = match &combined {
            None => (None, None),
            Some(c) => {
                if should_generate {
                    match self.generate_narrative(&claim, &config.model, &prior, &web, c).await {
                        Ok((reasoning, simple)) => (Some(reasoning), Some(simple)),
                        Err(e) => {
                            tracing::warn!(error = %e, "narrative generation failed, falling back to deterministic template");
                            let (reasoning, simple) = deterministic_explanation(&claim, c);
                            (Some(reasoning), Some(simple))
                        }
                    }
                } else {
                    let (reasoning, simple) = deterministic_explanation(&claim, c);
                    (Some(reasoning), Some(simple))
                }
            }
        };

        let finished_at_unix_ms = Utc::now().timestamp_millis();

        let record = RunRecord {
            schema_version: RUN_RECORD_SCHEMA_VERSION,
            claim,
            provider: config.provider.clone(),
            model: config.model.clone(),
            prior,
            web,
            combined,
            reasoning_paragraph,
            simple_explanation,
            cost_estimate_usd: None,
            started_at_unix_ms,
            finished_at_unix_ms,
        };

        self.persist(&record)?;
        Ok(record)
    }

    async fn run_prior(&self, claim: &Claim, config: &RunConfig) -> Result<Option<PriorBlock>, HeretixError> {
        if matches!(config.lens, Lens::Wel) {
            return Ok(None);
        }
        let provider_mode = if self.mock { "MOCK" } else { "LIVE" };
        let runner =
            RplRunner::with_mode(Arc::clone(&self.backend), Arc::clone(&self.limiter), self.cache.clone(), provider_mode);
        Ok(Some(runner.run(claim, config).await?))
    }

    /// Runs the Web-Evidence Lens when both `config.lens` calls for it and a
    /// retriever is configured. Per the error-propagation policy, a WEL
    /// failure never aborts the run — it falls back to a prior-only result.
    async fn run_web(&self, claim: &Claim, config: &RunConfig) -> Option<WebBlock> {
        if matches!(config.lens, Lens::Rpl) {
            return None;
        }
        let retriever = self.retriever.as_ref()?;
        let judge = LlmStanceJudge::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.limiter),
            config.model.clone(),
            Duration::from_millis(config.request_timeout_ms),
        );
        match run_wel(claim.as_str(), retriever.as_ref(), &judge, config.web_doc_count).await {
            Ok(block) => Some(block),
            Err(e) => {
                tracing::warn!(error = %e, "web-evidence lens failed, continuing prior-only");
                None
            }
        }
    }

    async fn generate_narrative(
        &self,
        claim: &Claim,
        model: &str,
        prior: &Option<PriorBlock>,
        web: &Option<WebBlock>,
        combined: &CombinedBlock,
    ) -> Result<(String, String), HeretixError> {
        let context = narrative_context(claim, prior, web, combined);
        let timeout = Duration::from_secs(30);

        self.limiter.acquire_with_timeout(timeout).await?;
        let reasoning_inv = LlmInvocation::new(
            model.to_string(),
            timeout,
            vec![
                Message::system(
                    "You write a short, careful paragraph explaining why a claim-verification run reached its \
                     conclusion, citing the prior and web-evidence signals it was given. Plain prose, no JSON.",
                ),
                Message::user(context.clone()),
            ],
        );
        let reasoning = self.backend.invoke(reasoning_inv).await?;

        self.limiter.acquire_with_timeout(timeout).await?;
        let simple_inv = LlmInvocation::new(
            model.to_string(),
            timeout,
            vec![
                Message::system(
                    "Summarize a claim-verification verdict in one or two plain sentences for a general reader. \
                     Plain prose, no JSON.",
                ),
                Message::user(context),
            ],
        );
        let simple = self.backend.invoke(simple_inv).await?;

        Ok((reasoning.raw_response.trim().to_string(), simple.raw_response.trim().to_string()))
    }

    /// Takes an advisory lock over the cache directory for this claim's run
    /// key, warning (but never failing the run) on provider/model drift
    /// against a prior pin or on lock acquisition failure. Returns `None`
    /// when no cache is configured, since there's nothing shared to guard.
    fn acquire_run_lock(&self, claim: &Claim, config: &RunConfig) -> Option<FileLock> {
        self.cache.as_ref()?;
        let run_key = heretix_cache::make_run_cache_key(claim.as_str(), &config.provider, &config.model, config.seed.unwrap_or(0));

        let current = RunContext { provider: config.provider.clone(), model: config.model.clone(), schema_version: "1".to_string() };
        if let Ok(Some(existing)) = HeretixLock::load(&run_key) {
            if let Some(drift) = existing.detect_drift(&current) {
                tracing::warn!(?drift, run_key = %run_key, "cache directory was last pinned to a different provider/model");
            }
        }

        match FileLock::acquire(&run_key, false, None) {
            Ok(lock) => {
                if let Err(e) = HeretixLock::new(config.provider.clone(), config.model.clone()).save(&run_key) {
                    tracing::warn!(error = %e, "failed to persist cache pin");
                }
                Some(lock)
            }
            Err(e) => {
                tracing::warn!(error = %e, run_key = %run_key, "failed to acquire run lock, continuing without it");
                None
            }
        }
    }

    fn persist(&self, record: &RunRecord) -> Result<(), HeretixError> {
        let run_id = run_id_for(record);
        self.store.write_run_record(&format!("runs/{run_id}.json"), record).map_err(HeretixError::from)
    }
}

/// Fuses a prior and web block into a [`CombinedBlock`], or degenerates to
/// whichever single block is present. `prior_weight + web_weight == 1.0` in
/// every branch, satisfying the combiner invariant even when only one lens
/// ran.
fn combine(prior: Option<&PriorBlock>, web: Option<&WebBlock>) -> Option<CombinedBlock> {
    match (prior, web) {
        (Some(p), Some(w)) => {
            let (prob, ci95) = fuse_probabilities(p.aggregation.prob, p.aggregation.ci95, w.prob, w.ci95, w.web_weight);
            Some(CombinedBlock { prob, ci95, prior_weight: 1.0 - w.web_weight, web_weight: w.web_weight })
        }
        (Some(p), None) => Some(CombinedBlock { prob: p.aggregation.prob, ci95: p.aggregation.ci95, prior_weight: 1.0, web_weight: 0.0 }),
        (None, Some(w)) => Some(CombinedBlock { prob: w.prob, ci95: w.ci95, prior_weight: 0.0, web_weight: 1.0 }),
        (None, None) => None,
    }
}

/// `run_id` identity: stable across re-runs of the same claim/model/lens so
/// re-submission overwrites rather than accumulates duplicate artifacts.
fn run_id_for(record: &RunRecord) -> String {
    use sha2::{Digest, Sha256};
    let identity = format!("{}|{}|{}", record.claim.as_str(), record.provider, record.model);
    let digest = Sha256::digest(identity.as_bytes());
    let mut hex = String::with_capacity(24);
    use std::fmt::Write;
    for b in &digest[..12] {
        write!(hex, "{:02x}", b).expect("writing to String cannot fail");
    }
    format!("heretix-{hex}")
}

fn narrative_context(claim: &Claim, prior: &Option<PriorBlock>, web: &Option<WebBlock>, combined: &CombinedBlock) -> String {
    let mut lines = vec![format!("Claim: {}", claim.as_str())];
    if let Some(p) = prior {
        lines.push(format!(
            "Model prior: p={:.3}, ci95=[{:.3}, {:.3}], stability={}",
            p.aggregation.prob, p.aggregation.ci95[0], p.aggregation.ci95[1], p.aggregation.stability_band
        ));
    }
    if let Some(w) = web {
        lines.push(format!(
            "Web evidence: p={:.3}, ci95=[{:.3}, {:.3}], resolved={:?}, docs={}",
            w.prob,
            w.ci95[0],
            w.ci95[1],
            w.resolved,
            w.docs.len()
        ));
    }
    lines.push(format!(
        "Combined: p={:.3}, weight_prior={:.2}, weight_web={:.2}, label={}",
        combined.prob,
        combined.prior_weight,
        combined.web_weight,
        label_for_prob(combined.prob)
    ));
    lines.join("\n")
}

/// Deterministic fallback narrative, used whenever explanation generation is
/// skipped or fails. Never calls out to a provider.
fn deterministic_explanation(claim: &Claim, combined: &CombinedBlock) -> (String, String) {
    let label = label_for_prob(combined.prob);
    let reasoning = format!(
        "Based on a weighted combination of model prior ({:.0}% weight) and web evidence ({:.0}% weight), the claim \
         \"{}\" was assigned a probability of {:.2} with a 95% interval of [{:.2}, {:.2}], which reads as {}.",
        combined.prior_weight * 100.0,
        combined.web_weight * 100.0,
        claim.as_str(),
        combined.prob,
        combined.ci95[0],
        combined.ci95[1],
        label.to_lowercase()
    );
    let simple = format!("{label}: the claim is estimated at {:.0}% likely true.", combined.prob * 100.0);
    (reasoning, simple)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use heretix_llm::{LlmError, LlmResult};
    use heretix_store::DisabledArtifactStore;
    use heretix_web::retrieval::RetrievalError;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockBackend {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(LlmResult::new(r#"{"probability": 0.62, "has_citation_or_url": false}"#, "mock", inv.model))
        }
    }

    struct EmptyRetriever;

    #[async_trait]
    impl WebRetriever for EmptyRetriever {
        async fn retrieve(&self, _claim: &str, _max_docs: usize) -> Result<Vec<Doc>, RetrievalError> {
            Err(RetrievalError::NoResults)
        }
    }

    fn pipeline(retriever: Option<Arc<dyn WebRetriever>>, mock: bool) -> Pipeline {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockBackend { calls: AtomicU64::new(0) });
        let limiter = Arc::new(RateLimiter::new(6000));
        let store: Arc<dyn ArtifactStore> = Arc::new(DisabledArtifactStore);
        Pipeline::new(backend, limiter, None, retriever, store, mock)
    }

    fn config() -> RunConfig {
        RunConfig { lens: Lens::Rpl, k_templates: 3, r_replicates: 2, bootstrap_iters: 200, ..RunConfig::default() }
    }

    #[tokio::test]
    async fn rpl_only_run_produces_a_combined_block_with_full_prior_weight() {
        let pipeline = pipeline(None, false);
        let record = pipeline.run("the sky is blue", &config()).await.unwrap();
        assert!(record.prior.is_some());
        assert!(record.web.is_none());
        let combined = record.combined.unwrap();
        assert_eq!(combined.prior_weight, 1.0);
        assert_eq!(combined.web_weight, 0.0);
    }

    #[tokio::test]
    async fn narrative_is_generated_when_not_mocked() {
        let pipeline = pipeline(None, false);
        let record = pipeline.run("the sky is blue", &config()).await.unwrap();
        assert!(record.reasoning_paragraph.is_some());
        assert!(record.simple_explanation.is_some());
    }

    #[tokio::test]
    async fn narrative_falls_back_to_deterministic_template_in_mock_mode() {
        let pipeline = pipeline(None, true);
        let record = pipeline.run("the sky is blue", &config()).await.unwrap();
        let expl = record.simple_explanation.unwrap();
        assert!(expl.contains('%'));
    }

    #[tokio::test]
    async fn web_lens_failure_degrades_to_prior_only_instead_of_aborting() {
        let retriever: Arc<dyn WebRetriever> = Arc::new(EmptyRetriever);
        let cfg = RunConfig { lens: Lens::Both, ..config() };
        let pipeline = pipeline(Some(retriever), false);
        let record = pipeline.run("the sky is blue", &cfg).await.unwrap();
        assert!(record.prior.is_some());
        assert!(record.web.is_none());
    }

    #[test]
    fn run_id_is_stable_for_identical_identity() {
        let claim = Claim::new("the sky is blue").unwrap();
        let record = |provider: &str| RunRecord {
            schema_version: RUN_RECORD_SCHEMA_VERSION,
            claim: claim.clone(),
            provider: provider.to_string(),
            model: "m".to_string(),
            prior: None,
            web: None,
            combined: None,
            reasoning_paragraph: None,
            simple_explanation: None,
            cost_estimate_usd: None,
            started_at_unix_ms: 0,
            finished_at_unix_ms: 0,
        };
        assert_eq!(run_id_for(&record("anthropic")), run_id_for(&record("anthropic")));
        assert_ne!(run_id_for(&record("anthropic")), run_id_for(&record("openrouter")));
    }
}
