//! WEL replicate aggregation: combine every judged shard's
//! `stance_prob_true` into one probability and confidence interval.
//!
//! Unlike the RPL aggregator's cluster bootstrap (`heretix-aggregate`), WEL
//! replicates are weighted by recency and source strength rather than
//! resampled, so the aggregate here is a weighted mean in logit space with
//! a normal-approximation confidence interval, plus the logit-space IQR as
//! a dispersion/stability signal.

use heretix_fusion::{logit, sigmoid};

use crate::scorer::StanceReplicate;

/// One replicate plus the weight it should carry in aggregation (recency x
/// source-strength, as computed by the fusion crate).
#[derive(Debug, Clone, Copy)]
pub struct WeightedReplicate {
    pub stance_prob_true: f64,
    pub weight: f64,
}

impl WeightedReplicate {
    #[must_use]
    pub fn new(replicate: &StanceReplicate, weight: f64) -> Self {
        Self { stance_prob_true: replicate.stance_prob_true, weight }
    }
}

/// Aggregated WEL evidence: point estimate, 95% CI, and logit-space IQR.
#[derive(Debug, Clone, Copy)]
pub struct WebAggregate {
    pub prob: f64,
    pub ci95: [f64; 2],
    pub iqr_logit: f64,
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

/// Aggregates weighted replicates into a single probability with a
/// normal-approximation 95% CI (`mean_logit +/- 1.96 * weighted_se`) and
/// the logit-space interquartile range as a dispersion metric. Returns
/// `None` if `replicates` is empty.
pub fn aggregate_web_replicates(replicates: &[WeightedReplicate]) -> Option<WebAggregate> {
    if replicates.is_empty() {
        return None;
    }

    let logits: Vec<f64> = replicates.iter().map(|r| logit(r.stance_prob_true)).collect();
    let total_weight: f64 = replicates.iter().map(|r| r.weight).sum();

    let mean_logit = if total_weight > 0.0 {
        replicates.iter().zip(&logits).map(|(r, &l)| r.weight * l).sum::<f64>() / total_weight
    } else {
        logits.iter().sum::<f64>() / logits.len() as f64
    };

    let variance = if total_weight > 0.0 && replicates.len() > 1 {
        replicates
            .iter()
            .zip(&logits)
            .map(|(r, &l)| r.weight * (l - mean_logit).powi(2))
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };
    let effective_n = if total_weight > 0.0 {
        total_weight.powi(2) / replicates.iter().map(|r| r.weight.powi(2)).sum::<f64>().max(1e-9)
    } else {
        replicates.len() as f64
    };
    let se = (variance / effective_n.max(1.0)).sqrt();

    let point = sigmoid(mean_logit);
    let lo = sigmoid(mean_logit - 1.96 * se).min(point);
    let hi = sigmoid(mean_logit + 1.96 * se).max(point);

    let mut sorted_logits = logits;
    sorted_logits.sort_by(|a, b| a.partial_cmp(b).expect("logits must not be NaN"));
    let iqr_logit = percentile(&sorted_logits, 75.0) - percentile(&sorted_logits, 25.0);

    Some(WebAggregate { prob: point, ci95: [lo, hi], iqr_logit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_replicates_yields_none() {
        assert!(aggregate_web_replicates(&[]).is_none());
    }

    #[test]
    fn consistent_high_confidence_replicates_fuse_tight_and_high() {
        let reps = [
            WeightedReplicate { stance_prob_true: 0.9, weight: 1.0 },
            WeightedReplicate { stance_prob_true: 0.92, weight: 1.0 },
            WeightedReplicate { stance_prob_true: 0.88, weight: 1.0 },
        ];
        let agg = aggregate_web_replicates(&reps).unwrap();
        assert!(agg.prob > 0.8);
        assert!(agg.ci95[1] - agg.ci95[0] < 0.4);
    }

    #[test]
    fn ci_bounds_straddle_the_point_estimate() {
        let reps = [
            WeightedReplicate { stance_prob_true: 0.2, weight: 1.0 },
            WeightedReplicate { stance_prob_true: 0.9, weight: 1.0 },
        ];
        let agg = aggregate_web_replicates(&reps).unwrap();
        assert!(agg.ci95[0] <= agg.prob);
        assert!(agg.ci95[1] >= agg.prob);
    }

    #[test]
    fn higher_weight_pulls_the_estimate_toward_it() {
        let low_weighted = [
            WeightedReplicate { stance_prob_true: 0.9, weight: 5.0 },
            WeightedReplicate { stance_prob_true: 0.1, weight: 1.0 },
        ];
        let agg = aggregate_web_replicates(&low_weighted).unwrap();
        assert!(agg.prob > 0.5);
    }
}
