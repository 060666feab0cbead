//! Brute-force descriptor matching with a mutual-nearest-neighbour check.

use crate::features::Descriptor;

/// A pairing of a reference keypoint with a comparison keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Index into the reference image's keypoints.
    pub reference: usize,
    /// Index into the comparison image's keypoints.
    pub comparison: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Index and distance of the nearest descriptor in `candidates`.
///
/// Ties go to the lowest index.
fn nearest(query: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, query.hamming(c)))
        .min_by_key(|&(i, d)| (d, i))
}

/// Match every reference descriptor to its nearest comparison descriptor,
/// keeping only pairs where the relation holds in both directions.
///
/// The result is sorted by ascending distance (best first); equal
/// distances keep reference order.
#[must_use]
pub fn cross_check_match(reference: &[Descriptor], comparison: &[Descriptor]) -> Vec<Match> {
    let backward: Vec<Option<usize>> = comparison
        .iter()
        .map(|d| nearest(d, reference).map(|(i, _)| i))
        .collect();

    let mut matches: Vec<Match> = reference
        .iter()
        .enumerate()
        .filter_map(|(r, d)| {
            let (c, distance) = nearest(d, comparison)?;
            (backward[c] == Some(r)).then_some(Match {
                reference: r,
                comparison: c,
                distance,
            })
        })
        .collect();

    matches.sort_by_key(|m| (m.distance, m.reference));
    matches
}

/// Number of matches to keep: `fraction` of `total`, but never fewer than
/// the four a homography needs (nor more than `total`).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn retained_count(total: usize, fraction: f64) -> usize {
    let kept = (total as f64 * fraction) as usize;
    kept.max(crate::homography::MIN_CORRESPONDENCES).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(bits: u64) -> Descriptor {
        Descriptor([bits, 0, 0, 0])
    }

    #[test]
    fn empty_inputs_produce_no_matches() {
        assert!(cross_check_match(&[], &[d(1)]).is_empty());
        assert!(cross_check_match(&[d(1)], &[]).is_empty());
    }

    #[test]
    fn identical_sets_match_one_to_one() {
        let set = [d(0b0001), d(0b1110_0000), d(0xFFFF_0000)];
        let matches = cross_check_match(&set, &set);
        assert_eq!(matches.len(), 3);
        for m in &matches {
            assert_eq!(m.reference, m.comparison);
            assert_eq!(m.distance, 0);
        }
    }

    #[test]
    fn non_mutual_pairs_are_dropped() {
        // Both reference descriptors are nearest to comparison[0], but
        // comparison[0] only prefers reference[0].
        let reference = [d(0b0000), d(0b0011)];
        let comparison = [d(0b0001), d(u64::MAX)];
        let matches = cross_check_match(&reference, &comparison);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].reference, 0);
        assert_eq!(matches[0].comparison, 0);
    }

    #[test]
    fn matches_are_sorted_by_distance() {
        let reference = [d(0b1111), d(0b0000_0001)];
        let comparison = [d(0b0111), d(0b0000_0001)];
        let matches = cross_check_match(&reference, &comparison);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].distance <= matches[1].distance);
        assert_eq!(matches[0].reference, 1);
    }

    #[test]
    fn retained_count_respects_floor_and_ceiling() {
        assert_eq!(retained_count(100, 0.15), 15);
        assert_eq!(retained_count(10, 0.15), 4);
        assert_eq!(retained_count(3, 0.15), 3);
        assert_eq!(retained_count(0, 0.15), 0);
        assert_eq!(retained_count(20, 1.0), 20);
    }
}
