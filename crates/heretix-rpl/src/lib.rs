//! Raw Prior Lens runner.
//!
//! Composes the rate limiter, provider registry, sample cache, sampler, seed
//! derivation, and clustered-bootstrap aggregator into one `async fn run(...)`
//! entry point, following the teacher's orchestrator composition style: a
//! runner struct owning its dependencies by `Arc`, fanning sample draws out
//! over a bounded worker pool, and returning a typed result.

use std::sync::Arc;
use std::time::Duration;

use heretix_aggregate::aggregate_clustered;
use heretix_cache::{SampleCache, make_cache_key};
use heretix_error_reporter::HeretixError;
use heretix_fusion::{stability_band_from_iqr, stability_from_iqr};
use heretix_json::extract_judgement;
use heretix_llm::{LlmBackend, LlmInvocation, Message};
use heretix_prompt_template::{PROMPT_VERSION, rpl_bundle};
use heretix_ratelimit::RateLimiter;
use heretix_sampler::build_plan;
use heretix_seed::{SeedParams, resolve_seed};
use heretix_types::{AggregationResult, Claim, PriorBlock, RunConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Fixed RPL bootstrap parameters; the trim fraction and center statistic are
/// pinned by `heretix-aggregate`, not configurable per run.
pub const CENTER: &str = "trimmed_mean";
pub const TRIM: f64 = 0.2;

/// Per-draw result of the sampling fan-out: either an accepted sample
/// (parsed, no URL-like token) feeding the aggregator, or a non-compliant
/// draw (backend failure, unparseable output, citation/URL present, rate
/// limit timeout, or panic) that only counts against the compliance rate.
enum DrawOutcome {
    Accepted { template_idx: usize, prob: f64, from_cache: bool },
    NonCompliant,
}

/// Owns the dependencies a RPL run needs: a provider backend, a rate
/// limiter, and an optional sample cache. Constructed once per provider at
/// pipeline startup and shared (via `Arc`) across concurrent runs.
pub struct RplRunner {
    backend: Arc<dyn LlmBackend>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<SampleCache>>,
    /// `"MOCK"` or `"LIVE"`, folded into every sample's cache key per the
    /// glossary's provider-mode distinction so mock and live draws never
    /// collide in the cache.
    provider_mode: &'static str,
}

impl RplRunner {
    pub fn new(backend: Arc<dyn LlmBackend>, limiter: Arc<RateLimiter>, cache: Option<Arc<SampleCache>>) -> Self {
        Self::with_mode(backend, limiter, cache, "LIVE")
    }

    pub fn with_mode(
        backend: Arc<dyn LlmBackend>,
        limiter: Arc<RateLimiter>,
        cache: Option<Arc<SampleCache>>,
        provider_mode: &'static str,
    ) -> Self {
        Self { backend, limiter, cache, provider_mode }
    }

    /// Runs the full K×R sampling plan for `claim` under `config`, aggregates
    /// the valid samples in logit space, and reports a calibrated stability
    /// score alongside the point estimate and CI.
    pub async fn run(&self, claim: &Claim, config: &RunConfig) -> Result<PriorBlock, HeretixError> {
        let bundle = rpl_bundle(claim.as_str());
        bundle.validate()?;

        if let Some(max_chars) = config.max_prompt_chars {
            let longest = bundle
                .templates
                .iter()
                .map(|t| t.system.len() + t.user.len())
                .max()
                .unwrap_or(0);
            if longest > max_chars {
                return Err(heretix_types::TypesError::PromptTooLong { max: max_chars, actual: longest }.into());
            }
        }

        let template_hashes: Vec<String> = bundle.templates.iter().map(|t| t.hash.clone()).collect();
        let seed = resolve_seed(
            config.seed,
            claim.as_str(),
            &config.provider,
            &config.model,
            PROMPT_VERSION,
            &template_hashes,
            SeedParams {
                k: config.k_templates as u32,
                r: config.r_replicates as u32,
                center: CENTER,
                trim: TRIM,
                b: config.bootstrap_iters as u32,
            },
        );

        let n_draws = config.k_templates * config.r_replicates;
        let plan = build_plan(claim.as_str(), &config.model, PROMPT_VERSION, bundle.templates.len(), n_draws);
        let total_draws = plan.len();

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let timeout = Duration::from_millis(config.request_timeout_ms);

        let mut join_set: JoinSet<DrawOutcome> = JoinSet::new();
        for draw in plan {
            let template = bundle.templates[draw.template_idx].clone();
            let backend = Arc::clone(&self.backend);
            let limiter = Arc::clone(&self.limiter);
            let cache = self.cache.clone();
            let semaphore = Arc::clone(&semaphore);
            let claim_text = claim.as_str().to_string();
            let provider = config.provider.clone();
            let model = config.model.clone();
            let provider_mode = self.provider_mode;
            let max_output_tokens = config.max_output_tokens;
            let no_cache = config.no_cache;
            let template_idx = draw.template_idx;
            let replicate_idx = draw.replicate_idx;

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return DrawOutcome::NonCompliant;
                };

                let cache_key = make_cache_key(
                    &claim_text,
                    &model,
                    PROMPT_VERSION,
                    &template.hash,
                    replicate_idx,
                    max_output_tokens,
                    &provider,
                    provider_mode,
                );
                if !no_cache {
                    if let Some(cache) = &cache {
                        match cache.get(&cache_key) {
                            Ok(Some(sample)) => {
                                return if sample.has_citation_or_url {
                                    DrawOutcome::NonCompliant
                                } else {
                                    DrawOutcome::Accepted { template_idx, prob: sample.prob, from_cache: true }
                                };
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!(error = %e, "cache read failed, sampling live"),
                        }
                    }
                }

                if let Err(e) = limiter.acquire_with_timeout(timeout).await {
                    tracing::warn!(error = %e, template_idx, replicate_idx, "rate limit timed out, dropping draw");
                    return DrawOutcome::NonCompliant;
                }

                let invocation = LlmInvocation::new(
                    model.clone(),
                    timeout,
                    vec![Message::system(template.system.clone()), Message::user(template.user.clone())],
                );
                let result = match backend.invoke(invocation).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, template_idx, replicate_idx, "sample invocation failed, counted non-compliant");
                        return DrawOutcome::NonCompliant;
                    }
                };

                let judgement = match extract_judgement(&result.raw_response) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::warn!(error = %e, template_idx, replicate_idx, "sample output unparseable, counted non-compliant");
                        return DrawOutcome::NonCompliant;
                    }
                };

                if !no_cache {
                    if let Some(cache) = &cache {
                        let sample = heretix_types::Sample {
                            template_hash: template.hash.clone(),
                            replicate_idx,
                            prob: judgement.prob,
                            has_citation_or_url: judgement.has_citation_or_url,
                            raw_response: result.raw_response.clone(),
                            prompt_tokens: result.tokens_input.map(|t| t as u32),
                            completion_tokens: result.tokens_output.map(|t| t as u32),
                        };
                        if let Err(e) = cache.put(&cache_key, &sample) {
                            tracing::warn!(error = %e, "failed to write sample to cache");
                        }
                    }
                }

                // A sample is accepted iff it parsed AND its JSON carries no
                // URL-like token; citation/URL-bearing output still counts
                // as a served (possibly cached) draw but is non-compliant.
                if judgement.has_citation_or_url {
                    DrawOutcome::NonCompliant
                } else {
                    DrawOutcome::Accepted { template_idx, prob: judgement.prob, from_cache: false }
                }
            });
        }

        let mut clusters: Vec<Vec<f64>> = vec![Vec::new(); bundle.templates.len()];
        let mut n_samples = 0usize;
        let mut n_compliant = 0usize;
        let mut n_cache_hits = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(DrawOutcome::Accepted { template_idx, prob, from_cache }) => {
                    clusters[template_idx].push(prob);
                    n_samples += 1;
                    n_compliant += 1;
                    if from_cache {
                        n_cache_hits += 1;
                    }
                }
                Ok(DrawOutcome::NonCompliant) => {}
                Err(e) => tracing::warn!(error = %e, "sample task panicked, counted non-compliant"),
            }
        }

        let rpl_compliance_rate = if total_draws == 0 { 0.0 } else { n_compliant as f64 / total_draws as f64 };
        let cache_hit_rate = if total_draws == 0 { 0.0 } else { n_cache_hits as f64 / total_draws as f64 };

        let aggregated = aggregate_clustered(&clusters, config.bootstrap_iters, seed)?;
        let stability_score = stability_score_for(&aggregated);
        let stability_band = stability_band_from_iqr(aggregated.iqr_logit).to_string();

        Ok(PriorBlock {
            aggregation: AggregationResult {
                prob: aggregated.prob,
                ci95: aggregated.ci95,
                iqr_logit: aggregated.iqr_logit,
                stability_score,
                stability_band,
                n_samples,
                n_valid: aggregated.n_samples,
                rpl_compliance_rate,
                cache_hit_rate,
            },
            seed,
            k_templates: config.k_templates,
            r_replicates: config.r_replicates,
        })
    }
}

/// Stability score from a clustered-bootstrap aggregate: computed from
/// template-mean logit dispersion, but `0.0` with fewer than 2 contributing
/// templates since there's no cross-template spread to measure.
fn stability_score_for(aggregated: &heretix_aggregate::AggregateOutput) -> f64 {
    if aggregated.n_templates < 2 {
        0.0
    } else {
        stability_from_iqr(aggregated.iqr_logit)
    }
}

/// Compliance rate: fraction of attempted draws that both parsed and carried
/// no URL-like token, per the glossary definition. `non_compliant` counts
/// samples that parsed but contained a citation/URL; failed-to-parse draws
/// are already excluded from `total`.
pub fn compliance_rate(total: usize, non_compliant: usize) -> f64 {
    if total == 0 { 0.0 } else { (total - non_compliant.min(total)) as f64 / total as f64 }
}
