//! Sticky Target Selection
//!
//! Chooses the next published set from the current one, the live candidates
//! and the desired size, preferring to keep what is already published.
//! All choices follow endpoint order (host, then port), so the same inputs
//! always produce the same target.

use std::collections::BTreeSet;

use crate::changelog::ChangeEvent;
use crate::endpoint::Endpoint;

/// Compute the target membership
///
/// Starts from `published ∩ candidates`. A surplus is cut from the end of
/// the endpoint order; a shortfall is filled from the remaining candidates
/// in endpoint order. The result never exceeds `candidates.len()`.
pub fn select_target(
    published: &BTreeSet<Endpoint>,
    candidates: &BTreeSet<Endpoint>,
    desired_size: usize,
) -> BTreeSet<Endpoint> {
    // Published instances are kept so a weight change alone never shows up as churn
    let mut target: BTreeSet<Endpoint> = published
        .iter()
        .filter(|ep| candidates.contains(*ep))
        .take(desired_size)
        .cloned()
        .collect();

    if target.len() < desired_size {
        let shortfall = desired_size - target.len();
        let additions: Vec<Endpoint> = candidates
            .iter()
            .filter(|ep| !target.contains(*ep))
            .take(shortfall)
            .cloned()
            .collect();
        target.extend(additions);
    }

    target
}

/// Minimal diff from `published` to `target`: removals first, then additions
pub fn diff(published: &BTreeSet<Endpoint>, target: &BTreeSet<Endpoint>) -> Vec<ChangeEvent> {
    let removals = published
        .difference(target)
        .cloned()
        .map(ChangeEvent::Rem);
    let additions = target
        .difference(published)
        .cloned()
        .map(ChangeEvent::Add);
    removals.chain(additions).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps(range: std::ops::Range<u16>) -> BTreeSet<Endpoint> {
        range.map(|i| Endpoint::new(format!("cache-{:02}", i), 11211)).collect()
    }

    #[test]
    fn test_grow_fills_in_endpoint_order() {
        let published = eps(0..3);
        let candidates = eps(0..8);
        let target = select_target(&published, &candidates, 5);
        assert_eq!(target, eps(0..5));
    }

    #[test]
    fn test_shrink_drops_tail_of_order() {
        let published = eps(0..6);
        let candidates = eps(0..6);
        let target = select_target(&published, &candidates, 4);
        assert_eq!(target, eps(0..4));
    }

    #[test]
    fn test_selection_is_sticky() {
        // Published holds the upper half; growth must not reshuffle it
        let published = eps(4..8);
        let candidates = eps(0..8);
        let target = select_target(&published, &candidates, 6);
        assert!(published.is_subset(&target));
        assert_eq!(target.len(), 6);
        assert!(target.contains(&Endpoint::new("cache-00", 11211)));
        assert!(target.contains(&Endpoint::new("cache-01", 11211)));
    }

    #[test]
    fn test_departed_endpoints_are_dropped_first() {
        let published = eps(0..10);
        let mut candidates = eps(0..10);
        candidates.remove(&Endpoint::new("cache-03", 11211));
        candidates.remove(&Endpoint::new("cache-07", 11211));

        let target = select_target(&published, &candidates, 8);
        assert_eq!(target, candidates);

        let events = diff(&published, &target);
        assert_eq!(
            events,
            vec![
                ChangeEvent::Rem(Endpoint::new("cache-03", 11211)),
                ChangeEvent::Rem(Endpoint::new("cache-07", 11211)),
            ]
        );
    }

    #[test]
    fn test_target_capped_by_candidates() {
        let target = select_target(&BTreeSet::new(), &eps(0..3), 10);
        assert_eq!(target.len(), 3);
        assert!(select_target(&eps(0..3), &BTreeSet::new(), 3).is_empty());
    }

    #[test]
    fn test_diff_orders_removals_before_additions() {
        let events = diff(&eps(0..2), &eps(1..3));
        assert_eq!(
            events,
            vec![
                ChangeEvent::Rem(Endpoint::new("cache-00", 11211)),
                ChangeEvent::Add(Endpoint::new("cache-02", 11211)),
            ]
        );
        assert!(diff(&eps(0..4), &eps(0..4)).is_empty());
    }
}
