//! Balanced template/replicate sampling plan.
//!
//! Grounded on `heretix/sampler.py`'s `balanced_indices_with_rotation` and
//! `planned_counts`: when the number of requested draws isn't an exact
//! multiple of the number of available templates, spread the remainder as
//! evenly as possible and rotate which templates absorb it so repeated runs
//! against the same claim don't always shortchange the same template.

use heretix_seed::rotation_offset;

/// One planned draw: which template to use and which replicate index it
/// represents *for that template* (used to build a unique cache key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedDraw {
    pub template_idx: usize,
    pub replicate_idx: u32,
}

/// Computes how many draws each of `t` templates should receive to reach
/// `n` total draws, balanced as evenly as possible and with the remainder
/// assigned starting at `offset`.
pub fn planned_counts(t: usize, n: usize, offset: usize) -> Vec<usize> {
    if t == 0 {
        return Vec::new();
    }
    let base = n / t;
    let remainder = n % t;
    let mut counts = vec![base; t];
    for i in 0..remainder {
        counts[(offset + i) % t] += 1;
    }
    counts
}

/// Builds the full sampling plan: `n` draws across `t` templates, rotated by
/// a deterministic offset derived from `claim`, `model`, and `prompt_version`
/// (independent of the bootstrap seed, so rotation doesn't circularly depend
/// on the seed it helps produce), interleaved round-robin (rather than
/// grouped by template) so a truncated run still samples a spread of
/// templates.
pub fn build_plan(claim: &str, model: &str, prompt_version: &str, t: usize, n: usize) -> Vec<PlannedDraw> {
    if t == 0 || n == 0 {
        return Vec::new();
    }
    let offset = rotation_offset(claim, model, prompt_version, t);
    let counts = planned_counts(t, n, offset);

    let mut remaining = counts.clone();
    let mut next_replicate = vec![0u32; t];
    let mut plan = Vec::with_capacity(n);
    let mut cursor = offset;
    while plan.len() < n {
        if remaining[cursor] > 0 {
            plan.push(PlannedDraw {
                template_idx: cursor,
                replicate_idx: next_replicate[cursor],
            });
            next_replicate[cursor] += 1;
            remaining[cursor] -= 1;
        }
        cursor = (cursor + 1) % t;
    }
    plan
}

/// Ratio of the most-sampled to least-sampled template count, used as a
/// sanity check that the plan stayed balanced (an imbalance ratio much
/// above 1.0 signals a bug in `planned_counts`).
pub fn imbalance_ratio(counts: &[usize]) -> f64 {
    let max = counts.iter().copied().max().unwrap_or(0);
    let min = counts.iter().copied().filter(|&c| c > 0).min().unwrap_or(1);
    if min == 0 {
        return f64::INFINITY;
    }
    max as f64 / min as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_counts_sum_to_n() {
        for t in 1..8 {
            for n in 0..30 {
                let counts = planned_counts(t, n, 0);
                assert_eq!(counts.iter().sum::<usize>(), n);
            }
        }
    }

    #[test]
    fn planned_counts_are_balanced() {
        let counts = planned_counts(5, 13, 2);
        assert!(imbalance_ratio(&counts) <= 2.0);
    }

    #[test]
    fn build_plan_has_n_draws() {
        let plan = build_plan("the sky is blue", "claude-3-5-sonnet", "v1", 5, 17);
        assert_eq!(plan.len(), 17);
    }

    #[test]
    fn build_plan_replicate_indices_unique_per_template() {
        let plan = build_plan("claim", "claude-3-5-sonnet", "v1", 4, 23);
        let mut seen = std::collections::HashSet::new();
        for draw in &plan {
            assert!(seen.insert((draw.template_idx, draw.replicate_idx)));
        }
    }

    #[test]
    fn build_plan_is_deterministic() {
        let a = build_plan("claim", "claude-3-5-sonnet", "v1", 4, 23);
        let b = build_plan("claim", "claude-3-5-sonnet", "v1", 4, 23);
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn balanced_sequence_property_holds(t in 1usize..12, n in 0usize..80, offset in 0usize..12) {
            let counts = planned_counts(t, n, offset % t.max(1));
            let active: Vec<usize> = counts.into_iter().filter(|&c| c > 0).collect();
            if let (Some(&max), Some(&min)) = (active.iter().max(), active.iter().min()) {
                proptest::prop_assert!(max - min <= 1);
            }
        }

        #[test]
        fn plan_always_has_exactly_n_draws(
            claim in ".{0,30}",
            t in 1usize..10,
            n in 0usize..40,
        ) {
            let plan = build_plan(&claim, "model", "v1", t, n);
            proptest::prop_assert_eq!(plan.len(), n);
        }
    }
}
