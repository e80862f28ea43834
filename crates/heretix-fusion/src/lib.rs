//! Logit-space fusion of the Raw Prior Lens and Web-Evidence Lens estimates,
//! plus the stability calibration applied to the prior's bootstrap
//! dispersion.
//!
//! Grounded on `heretix_wel/weights.py`: recency and evidence-strength
//! scores combine into a bounded web weight, evidence is fused with the
//! model prior in logit space using inverse-variance weighting, and
//! `heretix/metrics.py`'s `stability_from_iqr` converts a bootstrap IQR into
//! a calibrated `[0, 1]` stability score and a human-readable band.

const EPSILON: f64 = 1e-6;

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

/// How quickly a document's relevance decays with age, in days. Grounded on
/// `heretix_wel/weights.py`'s recency half-life constant.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Recency component of a document's web weight: a blend of whether the
/// claim itself concerns a "timely" (fast-changing) topic and an
/// exponential decay of the document's own age.
pub fn recency_score(is_timely_claim: bool, age_days: f64) -> f64 {
    let timely_component = if is_timely_claim { 1.0 } else { 0.0 };
    0.3 * timely_component + 0.7 * (-age_days.max(0.0) / RECENCY_HALF_LIFE_DAYS).exp()
}

/// Strength of a web evidence set: rewards broad source coverage, domain
/// diversity, and internal agreement between documents, each normalized to
/// `[0, 1]` before blending, then scaled down by how much of that evidence
/// actually parsed (`json_valid_rate`).
pub fn strength_score(doc_count: usize, distinct_domains: usize, agreement: f64, json_valid_rate: f64) -> f64 {
    let coverage = 1.0 - (-(doc_count as f64) / 12.0).exp();
    let diversity = (distinct_domains as f64 / 6.0).min(1.0);
    let agreement = agreement.clamp(0.0, 1.0);
    let blended = (0.5 * coverage + 0.3 * diversity + 0.2 * agreement).clamp(0.0, 1.0);
    blended * json_valid_rate.clamp(0.0, 1.0)
}

/// `1 - min(1, dispersion / 0.25)`, the agreement term fed into
/// [`strength_score`]: replicate dispersion (logit-space IQR) near zero
/// means the evidence agrees; dispersion at or above `0.25` means no
/// agreement credit.
pub fn agreement_from_dispersion(dispersion: f64) -> f64 {
    1.0 - (dispersion / 0.25).min(1.0)
}

/// Combines recency and strength into a bounded weight for how much the web
/// evidence lens should count against the model's prior.
pub fn web_weight(recency: f64, strength: f64) -> f64 {
    (0.6 * recency + 0.4 * strength).clamp(0.20, 0.90)
}

/// Approximates the variance of a logit-space estimate from its probability
/// confidence interval, assuming the CI is roughly symmetric in logit space.
/// A tighter CI implies lower variance and therefore more fusion weight.
pub fn var_from_ci_prob(prob: f64, ci95: [f64; 2]) -> f64 {
    let half_width_logit = (logit(ci95[1]) - logit(ci95[0])).abs() / 2.0;
    // 1.96 is the normal-approximation z-score for a 95% interval.
    let sd = (half_width_logit / 1.96).max(1e-3);
    let _ = prob;
    sd * sd
}

/// Fuses a prior estimate and a web-evidence estimate in logit space: a
/// straight `web_weight`-weighted average of the two logits, with variance
/// combined the same way (`(1-w)² v_prior + w² v_web`) rather than by
/// inverse-variance precision — the web weight already encodes how much the
/// evidence should count, so it isn't re-derived from the CIs.
pub fn fuse_probabilities(
    prior_prob: f64,
    prior_ci95: [f64; 2],
    web_prob: f64,
    web_ci95: [f64; 2],
    web_weight: f64,
) -> (f64, [f64; 2]) {
    let web_weight = web_weight.clamp(0.0, 1.0);
    let prior_weight = 1.0 - web_weight;

    let var_prior = var_from_ci_prob(prior_prob, prior_ci95);
    let var_web = var_from_ci_prob(web_prob, web_ci95);

    let fused_logit = prior_weight * logit(prior_prob) + web_weight * logit(web_prob);
    let fused_var = prior_weight.powi(2) * var_prior + web_weight.powi(2) * var_web;
    let fused_sd = fused_var.sqrt();

    let lo = sigmoid(fused_logit - 1.96 * fused_sd);
    let hi = sigmoid(fused_logit + 1.96 * fused_sd);
    let point = sigmoid(fused_logit);

    (point, [lo.min(point), hi.max(point)])
}

/// Scale parameter in `stability_from_iqr`: an IQR at this magnitude yields
/// a stability score of 0.5.
pub const STABILITY_SCALE: f64 = 0.2;
/// Steepness of the stability falloff curve.
pub const STABILITY_ALPHA: f64 = 1.7;

/// Converts a bootstrap logit-space IQR into a `[0, 1]` stability score:
/// `1 / (1 + (iqr / scale)^alpha)`. Tighter bootstrap distributions (smaller
/// IQR) score closer to 1.
pub fn stability_from_iqr(iqr: f64) -> f64 {
    let iqr = iqr.max(0.0);
    1.0 / (1.0 + (iqr / STABILITY_SCALE).powf(STABILITY_ALPHA))
}

/// IQR threshold below which stability is reported as the "high" band.
pub const STABILITY_HIGH_MAX_IQR: f64 = 0.05;
/// IQR threshold below which stability is reported as the "medium" band;
/// anything at or above it is "low".
pub const STABILITY_MEDIUM_MAX_IQR: f64 = 0.30;

/// Verdict label thresholds for a fused probability: `p ≥ 0.60` reads as
/// likely true, `p ≤ 0.40` as likely false, everything between as
/// uncertain.
pub fn label_for_prob(prob: f64) -> &'static str {
    if prob >= 0.60 {
        "Likely true"
    } else if prob <= 0.40 {
        "Likely false"
    } else {
        "Uncertain"
    }
}

/// Human-readable stability band for a bootstrap IQR.
pub fn stability_band_from_iqr(iqr: f64) -> &'static str {
    if iqr < STABILITY_HIGH_MAX_IQR {
        "high"
    } else if iqr < STABILITY_MEDIUM_MAX_IQR {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_decays_with_age() {
        let fresh = recency_score(false, 0.0);
        let old = recency_score(false, 30.0);
        assert!(fresh > old);
    }

    #[test]
    fn strength_score_is_scaled_down_by_json_valid_rate() {
        let full = strength_score(12, 6, 1.0, 1.0);
        let half_valid = strength_score(12, 6, 1.0, 0.5);
        assert!((half_valid - full / 2.0).abs() < 1e-9);
    }

    #[test]
    fn agreement_from_dispersion_is_bounded_and_decreasing() {
        assert_eq!(agreement_from_dispersion(0.0), 1.0);
        assert_eq!(agreement_from_dispersion(0.25), 0.0);
        assert_eq!(agreement_from_dispersion(1.0), 0.0);
    }

    #[test]
    fn web_weight_is_bounded() {
        assert!(web_weight(0.0, 0.0) >= 0.20);
        assert!(web_weight(1.0, 1.0) <= 0.90);
    }

    #[test]
    fn fusion_result_lies_between_inputs_when_weights_balanced() {
        let (point, ci) = fuse_probabilities(0.3, [0.2, 0.4], 0.8, [0.7, 0.9], 0.5);
        assert!(point > 0.3 && point < 0.8);
        assert!(ci[0] <= point && ci[1] >= point);
    }

    #[test]
    fn higher_web_weight_pulls_fusion_toward_web_estimate() {
        let (low_w, _) = fuse_probabilities(0.3, [0.2, 0.4], 0.8, [0.75, 0.85], 0.2);
        let (high_w, _) = fuse_probabilities(0.3, [0.2, 0.4], 0.8, [0.75, 0.85], 0.8);
        assert!(high_w > low_w);
    }

    #[test]
    fn stability_is_high_for_tight_iqr_and_low_for_wide_iqr() {
        assert_eq!(stability_band_from_iqr(0.01), "high");
        assert_eq!(stability_band_from_iqr(0.15), "medium");
        assert_eq!(stability_band_from_iqr(0.5), "low");
        assert!(stability_from_iqr(0.01) > stability_from_iqr(0.5));
    }

    #[test]
    fn label_thresholds_match_spec_boundaries() {
        assert_eq!(label_for_prob(0.399), "Likely false");
        assert_eq!(label_for_prob(0.40), "Likely false");
        assert_eq!(label_for_prob(0.50), "Uncertain");
        assert_eq!(label_for_prob(0.60), "Likely true");
        assert_eq!(label_for_prob(0.601), "Likely true");
    }

    #[test]
    fn stability_score_is_bounded() {
        for iqr in [0.0, 0.01, 0.2, 1.0, 10.0] {
            let s = stability_from_iqr(iqr);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    proptest::proptest! {
        #[test]
        fn logit_sigmoid_roundtrip_property(p in 1e-6f64..(1.0 - 1e-6)) {
            proptest::prop_assert!((sigmoid(logit(p)) - p).abs() < 1e-9);
        }

        #[test]
        fn stability_monotonicity_property(a in 0.0f64..2.0, b in 0.0f64..2.0) {
            if a < b {
                proptest::prop_assert!(stability_from_iqr(a) > stability_from_iqr(b));
                let band_rank = |band: &str| match band { "high" => 2, "medium" => 1, _ => 0 };
                proptest::prop_assert!(band_rank(stability_band_from_iqr(a)) >= band_rank(stability_band_from_iqr(b)));
            }
        }
    }
}
