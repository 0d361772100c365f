//! Weighted selection of synthetic event types.
//!
//! Both the load test and the noise generator send activity events whose types
//! follow a fixed, realistic distribution: views dominate, joins and shares are
//! rare. The selector is a pure function over an injected random source so it
//! can be exercised deterministically with a seeded generator.

use rand::Rng;

/// Event categories and their relative weights. The weights sum to 100.
pub const EVENT_TYPES: &[(&str, u32)] = &[
    ("view", 40),
    ("join", 5),
    ("post", 10),
    ("comment", 20),
    ("reaction", 25),
    ("share", 5),
];

/// Select one category from a weighted table.
///
/// Draws a uniform integer `r` in `[1, total]` and returns the first category
/// whose cumulative weight is at least `r`.
///
/// # Example
/// ```rust
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
/// use pulse_loadtest::event::select_weighted;
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let table = [("only", 3)];
/// assert_eq!(select_weighted(&table, &mut rng), "only");
/// ```
pub fn select_weighted<'a, R: Rng + ?Sized>(table: &[(&'a str, u32)], rng: &mut R) -> &'a str {
    let total: u32 = table.iter().map(|(_, weight)| weight).sum();
    let first = table.first().map(|(category, _)| *category).unwrap_or_default();
    if total == 0 {
        return first;
    }

    let r = rng.random_range(1..=total);
    let mut cumulative = 0;
    for (category, weight) in table {
        cumulative += weight;
        if r <= cumulative {
            return *category;
        }
    }

    // Cumulative weight always reaches `total`, so the loop returns.
    debug_assert!(false, "weighted draw {} exceeded total {}", r, total);
    first
}

/// Select an event type using the fixed [`EVENT_TYPES`] distribution.
pub fn weighted_event<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    select_weighted(EVENT_TYPES, rng)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn weights_total_one_hundred() {
        let total: u32 = EVENT_TYPES.iter().map(|(_, w)| w).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let table = [
            ("A", 40),
            ("B", 5),
            ("C", 10),
            ("D", 20),
            ("E", 25),
            ("F", 5),
        ];
        let samples = 100_000;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..samples {
            *counts.entry(select_weighted(&table, &mut rng)).or_insert(0) += 1;
        }

        for (category, weight) in table.iter() {
            let observed = *counts.get(category).unwrap_or(&0) as f64 / samples as f64;
            let expected = *weight as f64 / 100.0;
            assert!(
                (observed - expected).abs() < 0.02,
                "{} observed {} expected {}",
                category,
                observed,
                expected
            );
        }
    }

    #[test]
    fn seeded_draws_are_repeatable() {
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        let a: Vec<&str> = (0..50).map(|_| weighted_event(&mut first)).collect();
        let b: Vec<&str> = (0..50).map(|_| weighted_event(&mut second)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_weight_categories_never_selected() {
        let table = [("never", 0), ("always", 1), ("also_never", 0)];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert_eq!(select_weighted(&table, &mut rng), "always");
        }
    }
}
