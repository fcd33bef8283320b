//! Visual vocabulary: hierarchical k-means quantization of descriptor
//! space and the approximate search structure over the resulting words.

pub mod kmeans;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ann::AnnSearch;
use crate::descriptor::{squared_l2, squared_l2_f32, Descriptors};
use crate::error::{Result, RetrievalError};
use crate::parallel::with_thread_pool;

use kmeans::{centroid_of, kmeans};

/// Marker for tree nodes that are not leaves.
const NO_WORD: u32 = u32::MAX;

/// Fixed seed so that identical training data and parameters always
/// produce the identical vocabulary.
const BUILD_SEED: u64 = 0x5649_4458;

/// Parameters for building the vocabulary (see `BuildOptions` for the
/// caller-facing defaults).
#[derive(Debug, Clone)]
pub struct VocabularyParams {
    /// Desired number of leaf clusters; the actual count may be less.
    pub num_visual_words: usize,
    /// Fan-out of the hierarchical k-means tree.
    pub branching: usize,
    /// Refinement passes per k-means run.
    pub num_iterations: usize,
    /// Accuracy/speed trade-off of later word lookups, in (0, 1].
    pub target_precision: f64,
}

/// A node of the vocabulary tree. Internal nodes carry the `f32` cluster
/// centroid used during descent; leaves additionally name a visual word.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeNode {
    centroid: Vec<f32>,
    children: Vec<u32>,
    word_id: u32,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Best-bin-first search over the hierarchical k-means tree.
///
/// Unexplored branches sit in a priority queue keyed by centroid distance;
/// leaves are inspected in ascending-bound order until the `checks` budget
/// is spent. Approximate by design: ties are broken by node order and the
/// true nearest word can be missed when the budget is small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabTree {
    nodes: Vec<TreeNode>,
    root: u32,
    num_words: usize,
    /// Lower bound on leaves visited per lookup, derived from the build's
    /// target precision.
    min_checks: usize,
}

/// Priority-queue entry ordered so that the smallest distance (then the
/// smallest node id) pops first from a max-heap.
#[derive(PartialEq)]
struct Candidate {
    dist: f32,
    node: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl VocabTree {
    /// The number of leaf words in the tree.
    pub fn num_words(&self) -> usize {
        self.num_words
    }

    fn effective_checks(&self, checks: usize) -> usize {
        checks.max(self.min_checks).min(self.num_words.max(1))
    }

    fn knn_words(&self, words: &Descriptors, query: &[u8], k: usize, checks: usize) -> Vec<(u32, f32)> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }

        let budget = self.effective_checks(checks).max(k);
        let mut frontier = BinaryHeap::new();
        frontier.push(Candidate {
            dist: 0.0,
            node: self.root,
        });

        let mut visited_leaves = 0usize;
        let mut results: Vec<(u32, f32)> = Vec::with_capacity(budget);

        while let Some(Candidate { node, .. }) = frontier.pop() {
            let tree_node = &self.nodes[node as usize];
            if tree_node.is_leaf() {
                // Rank leaves on the exact quantized word centroid so that
                // lookups agree bit-for-bit with the stored vocabulary.
                let dist = squared_l2(query, words.row(tree_node.word_id as usize));
                results.push((tree_node.word_id, dist));
                visited_leaves += 1;
                if visited_leaves >= budget {
                    break;
                }
            } else {
                for &child in &tree_node.children {
                    let dist = squared_l2_f32(query, &self.nodes[child as usize].centroid);
                    frontier.push(Candidate { dist, node: child });
                }
            }
        }

        results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        results
    }
}

/// The visual vocabulary: quantized word centroids plus the search tree
/// used to assign descriptors to their nearest word(s).
///
/// Built once from training descriptors and read-only afterwards, so
/// lookups may run concurrently without synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quantizer {
    words: Descriptors,
    tree: VocabTree,
}

impl Quantizer {
    /// Quantize the descriptor space into up to `num_visual_words` words
    /// via hierarchical k-means over the training set.
    ///
    /// Converging to fewer non-empty leaves than requested is an accepted
    /// outcome, not an error.
    pub fn build(training: &Descriptors, params: &VocabularyParams) -> Result<Self> {
        if params.branching < 2 {
            return Err(RetrievalError::invalid_option(
                "branching",
                format!("must be at least 2, got {}", params.branching),
            ));
        }
        if params.num_visual_words < params.branching {
            return Err(RetrievalError::invalid_option(
                "num_visual_words",
                format!(
                    "must be at least the branching factor {}, got {}",
                    params.branching, params.num_visual_words
                ),
            ));
        }
        if params.num_iterations == 0 {
            return Err(RetrievalError::invalid_option(
                "num_iterations",
                "must be positive",
            ));
        }
        if !(params.target_precision > 0.0 && params.target_precision <= 1.0) {
            return Err(RetrievalError::invalid_option(
                "target_precision",
                format!("must lie in (0, 1], got {}", params.target_precision),
            ));
        }
        if training.len() < params.num_visual_words {
            return Err(RetrievalError::invalid_option(
                "num_visual_words",
                format!(
                    "training set has {} descriptors for {} requested words",
                    training.len(),
                    params.num_visual_words
                ),
            ));
        }

        let mut rng = StdRng::seed_from_u64(BUILD_SEED);
        let mut nodes = Vec::new();
        let mut leaf_centroids: Vec<Vec<f32>> = Vec::new();
        let subset: Vec<u32> = (0..training.len() as u32).collect();
        let root = build_node(
            training,
            subset,
            params,
            params.num_visual_words,
            &mut rng,
            &mut nodes,
            &mut leaf_centroids,
        );

        // Quantize leaf centroids to u8, as in the training descriptors.
        let dim = training.dim();
        let mut word_data = Vec::with_capacity(leaf_centroids.len() * dim);
        for centroid in &leaf_centroids {
            word_data.extend(centroid.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8));
        }
        let words = Descriptors::new(word_data, dim)?;

        let num_words = words.len();
        let min_checks = (params.target_precision * (num_words as f64).sqrt()).ceil() as usize;
        let tree = VocabTree {
            nodes,
            root,
            num_words,
            min_checks: min_checks.max(1),
        };

        Ok(Self { words, tree })
    }

    /// The number of visual words in the vocabulary.
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// The descriptor dimensionality the vocabulary was trained on.
    pub fn dim(&self) -> usize {
        self.words.dim()
    }

    /// The word centroids, row `i` being word `i`.
    pub fn words(&self) -> &Descriptors {
        &self.words
    }

    /// For each input descriptor, its `num_neighbors` nearest visual words
    /// by ascending distance (fewer when the vocabulary is smaller than
    /// `num_neighbors`). Parallel across descriptors.
    pub fn find_nearest_words(
        &self,
        descriptors: &Descriptors,
        num_neighbors: usize,
        num_checks: usize,
        num_threads: i32,
    ) -> Result<Vec<Vec<u32>>> {
        if num_neighbors == 0 {
            return Err(RetrievalError::invalid_option(
                "num_neighbors",
                "must be positive",
            ));
        }
        if num_checks == 0 {
            return Err(RetrievalError::invalid_option(
                "num_checks",
                "must be positive",
            ));
        }
        if descriptors.dim() != self.dim() && !descriptors.is_empty() {
            return Err(RetrievalError::invalid_option(
                "descriptors",
                format!(
                    "dimensionality {} does not match vocabulary dimensionality {}",
                    descriptors.dim(),
                    self.dim()
                ),
            ));
        }
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        with_thread_pool(num_threads, || {
            Ok((0..descriptors.len())
                .into_par_iter()
                .map(|i| {
                    self.tree
                        .knn_words(&self.words, descriptors.row(i), num_neighbors, num_checks)
                        .into_iter()
                        .map(|(word_id, _)| word_id)
                        .collect()
                })
                .collect())
        })
    }
}

/// Recursively cluster `subset`, producing at most `budget` leaves.
/// Returns the id of the created node. Leaves claim word ids in creation
/// (depth-first) order.
fn build_node(
    points: &Descriptors,
    subset: Vec<u32>,
    params: &VocabularyParams,
    budget: usize,
    rng: &mut StdRng,
    nodes: &mut Vec<TreeNode>,
    leaf_centroids: &mut Vec<Vec<f32>>,
) -> u32 {
    let centroid = centroid_of(points, &subset);

    let k = params.branching.min(subset.len()).min(budget);
    if budget <= 1 || subset.len() <= 1 || k <= 1 {
        return push_leaf(centroid, nodes, leaf_centroids);
    }

    let clustering = kmeans(points, &subset, k, params.num_iterations, rng);
    if clustering.centroids.len() <= 1 {
        // All points coincide; further splitting cannot make progress.
        return push_leaf(centroid, nodes, leaf_centroids);
    }

    // Partition the subset by cluster, preserving point order.
    let num_clusters = clustering.centroids.len();
    let mut partitions: Vec<Vec<u32>> = vec![Vec::new(); num_clusters];
    for (pos, &i) in subset.iter().enumerate() {
        partitions[clustering.assignments[pos]].push(i);
    }

    let budgets = split_budget(budget, &partitions);

    let mut children = Vec::with_capacity(num_clusters);
    for (partition, child_budget) in partitions.into_iter().zip(budgets) {
        children.push(build_node(
            points,
            partition,
            params,
            child_budget,
            rng,
            nodes,
            leaf_centroids,
        ));
    }

    let id = nodes.len() as u32;
    nodes.push(TreeNode {
        centroid,
        children,
        word_id: NO_WORD,
    });
    id
}

fn push_leaf(centroid: Vec<f32>, nodes: &mut Vec<TreeNode>, leaf_centroids: &mut Vec<Vec<f32>>) -> u32 {
    let word_id = leaf_centroids.len() as u32;
    leaf_centroids.push(centroid.clone());
    let id = nodes.len() as u32;
    nodes.push(TreeNode {
        centroid,
        children: Vec::new(),
        word_id,
    });
    id
}

/// Split a leaf budget across partitions proportionally to their sizes.
/// Every partition receives at least one leaf and never more leaves than
/// points.
fn split_budget(budget: usize, partitions: &[Vec<u32>]) -> Vec<usize> {
    let total: usize = partitions.iter().map(|p| p.len()).sum();
    let mut budgets: Vec<usize> = partitions
        .iter()
        .map(|p| ((budget * p.len()) / total).clamp(1, p.len()))
        .collect();

    // Rebalance rounding drift, largest headroom first for additions and
    // largest surplus first for removals; ties go to the lower index.
    let mut assigned: usize = budgets.iter().sum();
    while assigned < budget {
        let candidate = (0..budgets.len())
            .filter(|&i| budgets[i] < partitions[i].len())
            .max_by_key(|&i| partitions[i].len() - budgets[i]);
        match candidate {
            Some(i) => {
                budgets[i] += 1;
                assigned += 1;
            }
            None => break,
        }
    }
    while assigned > budget {
        let candidate = (0..budgets.len()).filter(|&i| budgets[i] > 1).max_by_key(|&i| budgets[i]);
        match candidate {
            Some(i) => {
                budgets[i] -= 1;
                assigned -= 1;
            }
            None => break,
        }
    }

    budgets
}

impl AnnSearch for Quantizer {
    fn num_points(&self) -> usize {
        self.num_words()
    }

    fn knn(&self, query: &[u8], k: usize, checks: usize) -> Result<Vec<(u32, f32)>> {
        Ok(self.tree.knn_words(&self.words, query, k, checks.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::BruteForceSearch;

    fn params(num_visual_words: usize, branching: usize) -> VocabularyParams {
        VocabularyParams {
            num_visual_words,
            branching,
            num_iterations: 10,
            target_precision: 0.9,
        }
    }

    fn clustered_training() -> Descriptors {
        let mut rows = Vec::new();
        for &(cx, cy) in &[(10u8, 10u8), (200, 10), (10, 200), (200, 200)] {
            for dx in 0..4u8 {
                for dy in 0..4u8 {
                    rows.push(vec![cx + dx, cy + dy]);
                }
            }
        }
        Descriptors::from_rows(&rows).unwrap()
    }

    #[test]
    fn test_build_produces_words() {
        let training = clustered_training();
        let quantizer = Quantizer::build(&training, &params(4, 2)).unwrap();
        assert_eq!(quantizer.num_words(), 4);
        assert_eq!(quantizer.dim(), 2);
    }

    #[test]
    fn test_build_rejects_bad_options() {
        let training = clustered_training();
        assert!(matches!(
            Quantizer::build(&training, &params(4, 1)),
            Err(RetrievalError::InvalidOption { .. })
        ));
        assert!(matches!(
            Quantizer::build(&training, &params(2, 4)),
            Err(RetrievalError::InvalidOption { .. })
        ));
        let mut bad = params(4, 2);
        bad.target_precision = 1.5;
        assert!(matches!(
            Quantizer::build(&training, &bad),
            Err(RetrievalError::InvalidOption { .. })
        ));
        // More words than training descriptors.
        assert!(matches!(
            Quantizer::build(&training, &params(1000, 2)),
            Err(RetrievalError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_build_deterministic() {
        let training = clustered_training();
        let a = Quantizer::build(&training, &params(8, 2)).unwrap();
        let b = Quantizer::build(&training, &params(8, 2)).unwrap();
        assert_eq!(a.words(), b.words());
    }

    #[test]
    fn test_nearest_words_match_brute_force() {
        let training = clustered_training();
        let quantizer = Quantizer::build(&training, &params(4, 2)).unwrap();
        let brute = BruteForceSearch::new(quantizer.words().clone());

        for query in [[12u8, 12u8], [198, 12], [12, 198], [198, 198]] {
            let tree_result = quantizer.knn(&query, 1, 256).unwrap();
            let brute_result = brute.knn(&query, 1, 0).unwrap();
            assert_eq!(tree_result[0].0, brute_result[0].0);
        }
    }

    #[test]
    fn test_find_nearest_words_shapes() {
        let training = clustered_training();
        let quantizer = Quantizer::build(&training, &params(4, 2)).unwrap();

        let queries = Descriptors::from_rows(&[vec![10, 10], vec![200, 200]]).unwrap();
        let word_ids = quantizer.find_nearest_words(&queries, 2, 256, -1).unwrap();
        assert_eq!(word_ids.len(), 2);
        assert_eq!(word_ids[0].len(), 2);
        assert_ne!(word_ids[0][0], word_ids[0][1]);

        // More neighbors than words: rows are clipped, not padded.
        let word_ids = quantizer.find_nearest_words(&queries, 16, 256, -1).unwrap();
        assert_eq!(word_ids[0].len(), 4);
    }

    #[test]
    fn test_find_nearest_words_rejects_bad_input() {
        let training = clustered_training();
        let quantizer = Quantizer::build(&training, &params(4, 2)).unwrap();

        let queries = Descriptors::from_rows(&[vec![10, 10]]).unwrap();
        assert!(quantizer.find_nearest_words(&queries, 0, 256, -1).is_err());
        assert!(quantizer.find_nearest_words(&queries, 1, 0, -1).is_err());

        let wrong_dim = Descriptors::from_rows(&[vec![1, 2, 3]]).unwrap();
        assert!(quantizer.find_nearest_words(&wrong_dim, 1, 256, -1).is_err());
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let training = clustered_training();
        let quantizer = Quantizer::build(&training, &params(8, 2)).unwrap();
        let queries = training.clone();

        let one = quantizer.find_nearest_words(&queries, 3, 64, 1).unwrap();
        let many = quantizer.find_nearest_words(&queries, 3, 64, 4).unwrap();
        assert_eq!(one, many);
    }
}
