//! Clustered bootstrap aggregation of RPL samples.
//!
//! Grounded on `heretix/aggregate.py`'s `aggregate_clustered`: probabilities
//! are aggregated in logit space using a trimmed mean, and confidence
//! intervals come from a two-stage cluster bootstrap that resamples
//! templates first and then resamples each resampled template's replicates,
//! preserving the template/replicate clustering instead of treating every
//! sample as independent.

use rand::SeedableRng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Minimum number of valid (extractable) samples required to aggregate.
/// Below this, the estimate is too noisy to report; mirrors the
/// `valid_count < 3` guard in `heretix/rpl.py`.
pub const MIN_VALID_SAMPLES: usize = 3;

const EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("need at least {min} valid samples, got {actual}")]
    TooFewSamples { min: usize, actual: usize },
    #[error("no non-empty template clusters to aggregate")]
    EmptyClusters,
}

#[derive(Debug, Clone)]
pub struct AggregateOutput {
    pub prob: f64,
    pub ci95: [f64; 2],
    pub iqr_logit: f64,
    pub n_samples: usize,
    /// Number of distinct templates that contributed at least one sample.
    /// Stability calibration (§4.9) is only meaningful with ≥2 templates.
    pub n_templates: usize,
}

fn clamp01(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp01(p);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Trimmed mean: sorts `values`, drops `floor(n * trim_fraction / 2)`
/// elements from each tail, and averages what remains. Falls back to the
/// plain mean when trimming would remove everything.
///
/// Kept for callers centering over a flat pool of values (tests, callers
/// outside the per-template aggregation path). The aggregator itself
/// centers over per-template means via `trimmed_center`, below.
pub fn trimmed_mean(values: &[f64], trim_fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("aggregation values must not be NaN"));
    let n = sorted.len();
    let trim = ((n as f64) * trim_fraction / 2.0).floor() as usize;
    if trim * 2 >= n {
        return sorted.iter().sum::<f64>() / n as f64;
    }
    let slice = &sorted[trim..n - trim];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Centers a set of per-template means: sorts them and drops
/// `floor(T * trim_fraction)` elements from *each* end (not split across
/// both tails), then averages what remains. Falls back to the plain mean
/// when that would remove every element. This is the "trimmed" center
/// statistic applied across templates, not across pooled samples.
fn trimmed_center(template_means: &[f64], trim_fraction: f64) -> f64 {
    if template_means.is_empty() {
        return 0.0;
    }
    let mut sorted = template_means.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("template means must not be NaN"));
    let n = sorted.len();
    let trim = ((n as f64) * trim_fraction).floor() as usize;
    if trim * 2 >= n {
        return sorted.iter().sum::<f64>() / n as f64;
    }
    let slice = &sorted[trim..n - trim];
    slice.iter().sum::<f64>() / slice.len() as f64
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Aggregates clustered prior samples.
///
/// `clusters` groups raw probabilities by template: `clusters[i]` is every
/// replicate's probability for template `i`. Trimming is 20% (10% per
/// tail), matching the Python reference's default.
pub fn aggregate_clustered(
    clusters: &[Vec<f64>],
    bootstrap_iters: usize,
    seed: u64,
) -> Result<AggregateOutput, AggregateError> {
    let non_empty: Vec<&Vec<f64>> = clusters.iter().filter(|c| !c.is_empty()).collect();
    if non_empty.is_empty() {
        return Err(AggregateError::EmptyClusters);
    }
    let n_samples: usize = non_empty.iter().map(|c| c.len()).sum();
    if n_samples < MIN_VALID_SAMPLES {
        return Err(AggregateError::TooFewSamples {
            min: MIN_VALID_SAMPLES,
            actual: n_samples,
        });
    }

    let logit_clusters: Vec<Vec<f64>> = non_empty
        .iter()
        .map(|c| c.iter().map(|&p| logit(p)).collect())
        .collect();

    let template_means: Vec<f64> = logit_clusters.iter().map(|c| mean(c)).collect();
    let point_logit = trimmed_center(&template_means, 0.2);
    let point = sigmoid(point_logit);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut boot_stats = Vec::with_capacity(bootstrap_iters);
    let t = logit_clusters.len();
    for _ in 0..bootstrap_iters {
        let mut resampled_means = Vec::with_capacity(t);
        for _ in 0..t {
            let cluster = logit_clusters
                .choose(&mut rng)
                .expect("logit_clusters is non-empty");
            let m = cluster.len();
            let mut resampled = Vec::with_capacity(m);
            for _ in 0..m {
                let v = cluster.choose(&mut rng).expect("cluster is non-empty");
                resampled.push(*v);
            }
            resampled_means.push(mean(&resampled));
        }
        boot_stats.push(trimmed_center(&resampled_means, 0.2));
    }
    boot_stats.sort_by(|a, b| a.partial_cmp(b).expect("bootstrap stats must not be NaN"));

    let lo_logit = percentile(&boot_stats, 2.5);
    let hi_logit = percentile(&boot_stats, 97.5);

    let mut sorted_template_means = template_means.clone();
    sorted_template_means.sort_by(|a, b| a.partial_cmp(b).expect("template means must not be NaN"));
    let iqr_logit = percentile(&sorted_template_means, 75.0) - percentile(&sorted_template_means, 25.0);

    let mut lo = sigmoid(lo_logit);
    let mut hi = sigmoid(hi_logit);
    lo = lo.min(point);
    hi = hi.max(point);

    Ok(AggregateOutput {
        prob: point,
        ci95: [lo, hi],
        iqr_logit,
        n_samples,
        n_templates: template_means.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logit_sigmoid_roundtrip() {
        for p in [0.01, 0.25, 0.5, 0.75, 0.99] {
            let back = sigmoid(logit(p));
            assert!((back - p).abs() < 1e-6);
        }
    }

    #[test]
    fn trimmed_mean_drops_outliers() {
        let values = vec![0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 100.0];
        let m = trimmed_mean(&values, 0.2);
        assert!(m < 2.0, "trimmed mean should drop the 100.0 outlier, got {m}");
    }

    #[test]
    fn trimmed_center_drops_one_template_from_each_end() {
        let means = vec![0.0, 1.0, 2.0, 3.0, 4.0, 100.0];
        // T=6, trim=0.2 -> floor(6*0.2)=1 dropped from each end, leaving [1,2,3,4].
        assert_eq!(trimmed_center(&means, 0.2), 2.5);
    }

    #[test]
    fn too_few_samples_errors() {
        let clusters = vec![vec![0.5], vec![0.6]];
        let err = aggregate_clustered(&clusters, 100, 1).unwrap_err();
        assert!(matches!(err, AggregateError::TooFewSamples { .. }));
    }

    #[test]
    fn ci_always_contains_point() {
        let clusters = vec![vec![0.6, 0.62, 0.58], vec![0.55, 0.57], vec![0.7, 0.65, 0.6]];
        let out = aggregate_clustered(&clusters, 500, 7).unwrap();
        assert!(out.ci95[0] <= out.prob);
        assert!(out.ci95[1] >= out.prob);
    }

    #[test]
    fn aggregation_is_deterministic_given_seed() {
        let clusters = vec![vec![0.6, 0.62, 0.58], vec![0.55, 0.57], vec![0.7, 0.65, 0.6]];
        let a = aggregate_clustered(&clusters, 500, 7).unwrap();
        let b = aggregate_clustered(&clusters, 500, 7).unwrap();
        assert_eq!(a.prob, b.prob);
        assert_eq!(a.ci95, b.ci95);
    }

    /// An extreme outlier template shifts the trimmed point estimate by less
    /// than it would shift a plain mean, given at least 5 templates and
    /// `trim = 0.2`.
    #[test]
    fn trimmed_mean_is_less_sensitive_to_an_outlier_than_plain_mean() {
        let base = vec![-0.2, -0.1, 0.0, 0.1, 0.2];
        let outlier_logit = 10.0;
        let mut with_outlier = base.clone();
        with_outlier.push(outlier_logit);

        let base_trimmed = trimmed_mean(&base, 0.2);
        let base_plain = base.iter().sum::<f64>() / base.len() as f64;

        let trimmed_shift = (trimmed_mean(&with_outlier, 0.2) - base_trimmed).abs();
        let plain_shift = (with_outlier.iter().sum::<f64>() / with_outlier.len() as f64 - base_plain).abs();

        assert!(trimmed_shift <= plain_shift, "trimmed shift {trimmed_shift} should be <= plain shift {plain_shift}");
    }

    #[test]
    fn iqr_logit_is_computed_over_template_means_not_bootstrap_draws() {
        // One replicate per template so each template mean is just that
        // replicate's logit -- no within-template averaging to obscure the
        // expected spread.
        let probs = [0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let clusters: Vec<Vec<f64>> = probs.iter().map(|&p| vec![p]).collect();
        let mut logits: Vec<f64> = probs.iter().map(|&p| logit(p)).collect();
        logits.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected_iqr = percentile(&logits, 75.0) - percentile(&logits, 25.0);

        let out = aggregate_clustered(&clusters, 500, 11).unwrap();
        assert!(
            (out.iqr_logit - expected_iqr).abs() < 1e-9,
            "expected iqr_logit {expected_iqr}, got {}",
            out.iqr_logit
        );
    }

    #[test]
    fn n_templates_counts_only_non_empty_clusters() {
        let clusters = vec![vec![0.5, 0.55], vec![], vec![0.6, 0.62], vec![0.58]];
        let out = aggregate_clustered(&clusters, 200, 3).unwrap();
        assert_eq!(out.n_templates, 3);
    }

    proptest::proptest! {
        #[test]
        fn logit_sigmoid_roundtrip_property(p in 1e-6f64..(1.0 - 1e-6)) {
            let back = sigmoid(logit(p));
            proptest::prop_assert!((back - p).abs() < 1e-9);
        }

        #[test]
        fn aggregate_output_always_respects_probability_bounds(
            a in proptest::collection::vec(0.05f64..0.95, 1..6),
            b in proptest::collection::vec(0.05f64..0.95, 1..6),
            c in proptest::collection::vec(0.05f64..0.95, 1..6),
            seed in 0u64..10_000,
        ) {
            let clusters = vec![a, b, c];
            if let Ok(out) = aggregate_clustered(&clusters, 200, seed) {
                proptest::prop_assert!(out.prob >= 0.0 && out.prob <= 1.0);
                proptest::prop_assert!(out.ci95[0] <= out.prob && out.prob <= out.ci95[1]);
            }
        }
    }
}
