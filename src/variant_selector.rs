//! Weighted variant selection
//!
//! Prefix-sum scan over the policy in declared order. Variant counts are
//! small, so the scan is linear and runs once per request.

use rand::Rng;

use crate::policy::Policy;

/// Pick the variant whose cumulative weight first exceeds `draw`.
///
/// `draw` is expected in `[0, policy.total_weight())`. A policy whose weights
/// sum to zero selects `fallback`. Selection never fails: if the scan finds
/// nothing the first declared variant is returned.
pub fn select<'a>(policy: &'a Policy, draw: u64, fallback: &'a str) -> &'a str {
    if policy.total_weight() == 0 {
        return fallback;
    }

    let mut cumulative: u64 = 0;
    for (name, weight) in policy.iter() {
        cumulative += weight;
        if draw < cumulative {
            return name;
        }
    }

    // Only reachable with an out-of-range draw.
    tracing::warn!(draw, total = policy.total_weight(), "selection draw outside policy range");
    policy.iter().next().map(|(name, _)| name).unwrap_or(fallback)
}

/// Draw uniformly from `[0, total_weight)` and select.
pub fn choose<'a, R: Rng>(policy: &'a Policy, fallback: &'a str, rng: &mut R) -> &'a str {
    let total = policy.total_weight();
    if total == 0 {
        return fallback;
    }
    let draw = rng.random_range(0..total);
    select(policy, draw, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const FALLBACK: &str = "training";

    #[test]
    fn draw_boundaries_follow_declared_order() {
        let policy = Policy::new([("A", 1), ("B", 3)]).unwrap();
        assert_eq!(select(&policy, 0, FALLBACK), "A");
        assert_eq!(select(&policy, 1, FALLBACK), "B");
        assert_eq!(select(&policy, 2, FALLBACK), "B");
        assert_eq!(select(&policy, 3, FALLBACK), "B");
    }

    #[test]
    fn same_draw_same_variant() {
        let policy = Policy::new([("x", 5), ("y", 5), ("z", 5)]).unwrap();
        for draw in 0..15 {
            let first = select(&policy, draw, FALLBACK);
            for _ in 0..10 {
                assert_eq!(select(&policy, draw, FALLBACK), first);
            }
        }
    }

    #[test]
    fn zero_weight_variants_are_never_selected() {
        let policy = Policy::new([("off", 0), ("on", 2), ("also_off", 0)]).unwrap();
        for draw in 0..2 {
            assert_eq!(select(&policy, draw, FALLBACK), "on");
        }
    }

    #[test]
    fn empty_and_all_zero_policies_use_fallback() {
        let empty = Policy::empty();
        let zeros = Policy::new([("A", 0), ("B", 0)]).unwrap();
        for draw in [0, 1, 17, u64::MAX] {
            assert_eq!(select(&empty, draw, FALLBACK), FALLBACK);
            assert_eq!(select(&zeros, draw, FALLBACK), FALLBACK);
        }

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(choose(&zeros, FALLBACK, &mut rng), FALLBACK);
    }

    #[test]
    fn out_of_range_draw_still_returns_a_policy_variant() {
        let policy = Policy::new([("A", 1), ("B", 1)]).unwrap();
        assert_eq!(select(&policy, 99, FALLBACK), "A");
    }

    #[test]
    fn empirical_split_converges_to_weights() {
        let policy = Policy::new([("a", 1), ("b", 2), ("c", 7)]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let n = 200_000;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..n {
            *counts.entry(choose(&policy, FALLBACK, &mut rng)).or_default() += 1;
        }

        for (name, weight) in policy.iter() {
            let expected = weight as f64 / policy.total_weight() as f64;
            let observed = counts.get(name).copied().unwrap_or(0) as f64 / n as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "{name}: observed {observed:.4}, expected {expected:.4}"
            );
        }
    }
}
