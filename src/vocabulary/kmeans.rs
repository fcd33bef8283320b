//! K-means clustering primitives for the vocabulary build.
//!
//! Operates on subsets of a `u8` descriptor matrix with `f32` centroids.
//! All randomness flows through a caller-provided seeded RNG and the
//! parallel assignment pass is an order-preserving map, so clustering is
//! deterministic for a fixed seed regardless of thread count.

use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use crate::descriptor::{squared_l2_f32, Descriptors};

/// Result of one k-means run over a subset of points.
#[derive(Debug)]
pub(crate) struct KMeansResult {
    /// Cluster centroids; empty clusters have been dropped.
    pub centroids: Vec<Vec<f32>>,
    /// For each subset position, the index of its centroid.
    pub assignments: Vec<usize>,
}

/// Mean of a subset of rows, as `f32`.
pub(crate) fn centroid_of(points: &Descriptors, subset: &[u32]) -> Vec<f32> {
    let dim = points.dim();
    let mut sums = vec![0.0f64; dim];
    for &i in subset {
        for (s, &v) in sums.iter_mut().zip(points.row(i as usize)) {
            *s += v as f64;
        }
    }
    let n = subset.len().max(1) as f64;
    sums.into_iter().map(|s| (s / n) as f32).collect()
}

/// Index of the nearest centroid to a row, ties broken by lowest index.
fn nearest_centroid(row: &[u8], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let dist = squared_l2_f32(row, centroid);
        if dist < best.1 {
            best = (c, dist);
        }
    }
    best
}

/// K-means++ seeding: the first center is drawn uniformly, each further
/// center with probability proportional to squared distance from the
/// nearest chosen center.
fn seed_centroids(
    points: &Descriptors,
    subset: &[u32],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let first = subset[rng.gen_range(0..subset.len())];
    let mut centroids = vec![points.row(first as usize).iter().map(|&v| v as f32).collect::<Vec<f32>>()];

    let mut min_dists: Vec<f32> = subset
        .iter()
        .map(|&i| squared_l2_f32(points.row(i as usize), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_dists.iter().map(|&d| d as f64).sum();
        if total <= 0.0 {
            // All remaining points coincide with chosen centers.
            break;
        }
        let mut r = rng.gen::<f64>() * total;
        let mut chosen = subset.len() - 1;
        for (pos, &d) in min_dists.iter().enumerate() {
            r -= d as f64;
            if r <= 0.0 {
                chosen = pos;
                break;
            }
        }
        let next: Vec<f32> = points
            .row(subset[chosen] as usize)
            .iter()
            .map(|&v| v as f32)
            .collect();
        for (pos, &i) in subset.iter().enumerate() {
            let dist = squared_l2_f32(points.row(i as usize), &next);
            if dist < min_dists[pos] {
                min_dists[pos] = dist;
            }
        }
        centroids.push(next);
    }

    centroids
}

/// Run Lloyd's iterations over `subset`, returning at most `k` non-empty
/// clusters. `k` must be at least 1 and at most `subset.len()`.
pub(crate) fn kmeans(
    points: &Descriptors,
    subset: &[u32],
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> KMeansResult {
    debug_assert!(k >= 1 && k <= subset.len());

    let mut centroids = seed_centroids(points, subset, k, rng);
    let mut assignments = vec![0usize; subset.len()];

    for _ in 0..iterations.max(1) {
        // Assignment pass (order-preserving parallel map).
        let assigned: Vec<usize> = subset
            .par_iter()
            .map(|&i| nearest_centroid(points.row(i as usize), &centroids).0)
            .collect();

        // Update pass.
        let dim = points.dim();
        let mut sums = vec![vec![0.0f64; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (pos, &i) in subset.iter().enumerate() {
            let c = assigned[pos];
            counts[c] += 1;
            for (s, &v) in sums[c].iter_mut().zip(points.row(i as usize)) {
                *s += v as f64;
            }
        }

        let mut new_centroids = Vec::with_capacity(centroids.len());
        for (c, count) in counts.iter().enumerate() {
            if *count > 0 {
                new_centroids.push(
                    sums[c]
                        .iter()
                        .map(|&s| (s / *count as f64) as f32)
                        .collect::<Vec<f32>>(),
                );
            } else {
                // Re-seed an empty cluster on the point currently furthest
                // from its centroid, among clusters with more than one member.
                let mut worst: Option<(usize, f32)> = None;
                for (pos, &i) in subset.iter().enumerate() {
                    if counts[assigned[pos]] <= 1 {
                        continue;
                    }
                    let dist = squared_l2_f32(points.row(i as usize), &centroids[assigned[pos]]);
                    if worst.map(|(_, w)| dist > w).unwrap_or(true) {
                        worst = Some((pos, dist));
                    }
                }
                match worst {
                    Some((pos, _)) => new_centroids.push(
                        points
                            .row(subset[pos] as usize)
                            .iter()
                            .map(|&v| v as f32)
                            .collect(),
                    ),
                    // Fewer distinct points than clusters; drop the cluster.
                    None => continue,
                }
            }
        }

        let converged = new_centroids == centroids;
        centroids = new_centroids;
        assignments = assigned;
        if converged {
            break;
        }
    }

    // Final assignment against the last centroid update, then drop any
    // clusters that ended up empty so callers see a dense cluster set.
    let assigned: Vec<usize> = subset
        .par_iter()
        .map(|&i| nearest_centroid(points.row(i as usize), &centroids).0)
        .collect();
    let mut counts = vec![0usize; centroids.len()];
    for &c in &assigned {
        counts[c] += 1;
    }
    let mut remap = vec![usize::MAX; centroids.len()];
    let mut dense = Vec::with_capacity(centroids.len());
    for (c, centroid) in centroids.into_iter().enumerate() {
        if counts[c] > 0 {
            remap[c] = dense.len();
            dense.push(centroid);
        }
    }
    assignments
        .iter_mut()
        .zip(assigned)
        .for_each(|(slot, c)| *slot = remap[c]);

    KMeansResult {
        centroids: dense,
        assignments,
    }
}
