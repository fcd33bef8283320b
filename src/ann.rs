//! ANN-search trait for pluggable nearest-word backends

use crate::descriptor::{squared_l2, Descriptors};
use crate::error::Result;

/// A nearest-neighbor search structure over a fixed set of `u8` vectors.
///
/// Implementations are built once over the visual-word centroids and are
/// read-only afterwards, so `knn` takes `&self` and may be called from
/// multiple threads concurrently. `checks` bounds the search effort for
/// approximate backends; exact backends may ignore it.
pub trait AnnSearch: Send + Sync {
    /// The number of indexed vectors.
    fn num_points(&self) -> usize;

    /// Find the `k` nearest indexed vectors to `query`.
    /// Returns `(index, squared_distance)` pairs sorted by distance
    /// ascending, ties broken by ascending index. At most
    /// `min(k, num_points)` results are returned.
    fn knn(&self, query: &[u8], k: usize, checks: usize) -> Result<Vec<(u32, f32)>>;
}

/// Exact brute-force search — O(n) per query.
///
/// Used as the reference backend in tests; the vocabulary tree must agree
/// with it on well-separated data.
#[derive(Debug)]
pub struct BruteForceSearch {
    points: Descriptors,
}

impl BruteForceSearch {
    pub fn new(points: Descriptors) -> Self {
        Self { points }
    }
}

impl AnnSearch for BruteForceSearch {
    fn num_points(&self) -> usize {
        self.points.len()
    }

    fn knn(&self, query: &[u8], k: usize, _checks: usize) -> Result<Vec<(u32, f32)>> {
        let mut results: Vec<(u32, f32)> = self
            .points
            .rows()
            .enumerate()
            .map(|(i, row)| (i as u32, squared_l2(query, row)))
            .collect();

        results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }
}
