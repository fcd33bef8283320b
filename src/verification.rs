//! Spatial verification: geometry-based re-ranking of top candidates.

use crate::descriptor::FeatureGeometry;

/// Feature correspondences between the query image and one candidate:
/// a query keypoint paired with the candidate keypoints that landed in
/// the same visual word.
#[derive(Debug, Clone)]
pub struct GeometryMatch {
    pub query: FeatureGeometry,
    pub candidates: Vec<FeatureGeometry>,
}

/// Turns a set of geometric feature matches into a refined similarity
/// score for one candidate image. Consumed as a black box by
/// `query_with_verification`; implementations must be pure so candidates
/// can be verified concurrently.
pub trait SpatialVerifier: Send + Sync {
    fn verify(&self, matches: &[GeometryMatch]) -> f32;
}

/// Hough-style voting over similarity transforms.
///
/// Each query/candidate keypoint pair votes for a (scale ratio,
/// orientation difference) bin; geometrically consistent images
/// concentrate their votes in few bins, so the strongest bin's vote count
/// is the refined score. A bounded-cost stand-in for full spatial
/// verification, in the spirit of vote-and-verify re-ranking.
#[derive(Debug, Clone)]
pub struct VotingVerifier {
    num_scale_bins: usize,
    num_orientation_bins: usize,
}

impl Default for VotingVerifier {
    fn default() -> Self {
        Self {
            num_scale_bins: 8,
            num_orientation_bins: 12,
        }
    }
}

impl VotingVerifier {
    pub fn new(num_scale_bins: usize, num_orientation_bins: usize) -> Self {
        Self {
            num_scale_bins: num_scale_bins.max(1),
            num_orientation_bins: num_orientation_bins.max(1),
        }
    }

    fn scale_bin(&self, query_scale: f32, candidate_scale: f32) -> Option<usize> {
        if query_scale <= 0.0 || candidate_scale <= 0.0 {
            return None;
        }
        // log2 scale ratios in [-4, 4) map onto the bin range.
        let log_ratio = (candidate_scale / query_scale).log2().clamp(-4.0, 3.999);
        let normalized = (log_ratio + 4.0) / 8.0;
        Some(((normalized * self.num_scale_bins as f32) as usize).min(self.num_scale_bins - 1))
    }

    fn orientation_bin(&self, query_orientation: f32, candidate_orientation: f32) -> usize {
        use std::f32::consts::TAU;
        let diff = (candidate_orientation - query_orientation).rem_euclid(TAU);
        let normalized = diff / TAU;
        ((normalized * self.num_orientation_bins as f32) as usize)
            .min(self.num_orientation_bins - 1)
    }
}

impl SpatialVerifier for VotingVerifier {
    fn verify(&self, matches: &[GeometryMatch]) -> f32 {
        if matches.is_empty() {
            return 0.0;
        }

        let mut votes = vec![0u32; self.num_scale_bins * self.num_orientation_bins];
        for geometry_match in matches {
            for candidate in &geometry_match.candidates {
                let Some(scale_bin) = self.scale_bin(geometry_match.query.scale, candidate.scale)
                else {
                    continue;
                };
                let orientation_bin =
                    self.orientation_bin(geometry_match.query.orientation, candidate.orientation);
                votes[scale_bin * self.num_orientation_bins + orientation_bin] += 1;
            }
        }

        votes.iter().copied().max().unwrap_or(0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn keypoint(scale: f32, orientation: f32) -> FeatureGeometry {
        FeatureGeometry::new(0.0, 0.0, scale, orientation)
    }

    #[test]
    fn test_empty_matches_score_zero() {
        let verifier = VotingVerifier::default();
        assert_relative_eq!(verifier.verify(&[]), 0.0);
    }

    #[test]
    fn test_consistent_matches_concentrate_votes() {
        let verifier = VotingVerifier::default();
        // All candidates agree on the same transform: scale x2, rotated 0.5 rad.
        let consistent: Vec<GeometryMatch> = (0..10)
            .map(|i| GeometryMatch {
                query: keypoint(1.0, i as f32 * 0.1),
                candidates: vec![keypoint(2.0, i as f32 * 0.1 + 0.5)],
            })
            .collect();
        assert_relative_eq!(verifier.verify(&consistent), 10.0);

        // Scattered transforms spread votes across bins.
        let scattered: Vec<GeometryMatch> = (0..10)
            .map(|i| GeometryMatch {
                query: keypoint(1.0, 0.0),
                candidates: vec![keypoint(1.5f32.powi(i - 5), i as f32 * 0.6)],
            })
            .collect();
        assert!(verifier.verify(&scattered) < verifier.verify(&consistent));
    }

    #[test]
    fn test_degenerate_scales_are_ignored() {
        let verifier = VotingVerifier::default();
        let matches = vec![GeometryMatch {
            query: keypoint(0.0, 0.0),
            candidates: vec![keypoint(1.0, 0.0)],
        }];
        assert_relative_eq!(verifier.verify(&matches), 0.0);
    }
}
