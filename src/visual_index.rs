//! The visual index: orchestrates quantization, Hamming embedding,
//! inverted-index scoring and optional spatial re-ranking.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rayon::prelude::*;

use crate::descriptor::{Descriptors, FeatureGeometry};
use crate::embedding::{BinaryCode, HammingEmbedder, DEFAULT_CODE_WIDTH};
use crate::error::{Result, RetrievalError};
use crate::inverted_index::{GaussianKernel, ImageScore, InvertedIndex, ScoringKernel};
use crate::parallel::with_thread_pool;
use crate::persistence::{self, SerializedIndex};
use crate::stats::IndexStats;
use crate::verification::{GeometryMatch, SpatialVerifier, VotingVerifier};
use crate::vocabulary::{Quantizer, VocabularyParams};

/// Options for adding images to the index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// The number of nearest visual words each descriptor is assigned to
    /// (soft assignment). Must be positive.
    pub num_neighbors: usize,
    /// Search effort of the nearest-word lookup. Must be positive.
    pub num_checks: usize,
    /// Worker threads; non-positive means default parallelism.
    pub num_threads: i32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            num_neighbors: 1,
            num_checks: 256,
            num_threads: -1,
        }
    }
}

/// Options for querying the index.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum number of images to retrieve; non-positive means all.
    pub max_num_images: i32,
    /// Number of top candidates to spatially verify and re-rank;
    /// non-positive means all retrieved candidates.
    pub max_num_verifications: i32,
    /// The number of nearest visual words each query descriptor is
    /// assigned to. Must be positive.
    pub num_neighbors: usize,
    /// Search effort of the nearest-word lookup. Must be positive.
    pub num_checks: usize,
    /// Worker threads; non-positive means default parallelism.
    pub num_threads: i32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_num_images: -1,
            max_num_verifications: -1,
            num_neighbors: 5,
            num_checks: 256,
            num_threads: -1,
        }
    }
}

/// Options for building the vocabulary.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Desired number of visual words (leaf clusters); the actual count
    /// may be less if clustering converges to fewer non-empty leaves.
    pub num_visual_words: usize,
    /// Branching factor of the hierarchical k-means tree.
    pub branching: usize,
    /// Refinement passes per k-means run.
    pub num_iterations: usize,
    /// Accuracy/speed trade-off of the word search structure, in (0, 1].
    pub target_precision: f64,
    /// Search effort for the Hamming-embedding training lookups.
    pub num_checks: usize,
    /// Worker threads; non-positive means default parallelism.
    pub num_threads: i32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            num_visual_words: 256 * 256,
            branching: 256,
            num_iterations: 11,
            target_precision: 0.9,
            num_checks: 256,
            num_threads: -1,
        }
    }
}

/// Image-retrieval index over a visual vocabulary with Hamming embedding.
///
/// Lifecycle: `build` (or `read`) creates the vocabulary and embedder,
/// `add` accumulates inverted-index entries, `prepare` finalizes weights,
/// then `query`/`query_with_verification` rank candidate images. Adding
/// after `prepare` marks the index stale; queries fail with `NotPrepared`
/// until `prepare` runs again.
pub struct VisualIndex {
    quantizer: Option<Quantizer>,
    embedder: Option<HammingEmbedder>,
    inverted_index: InvertedIndex,
    image_ids: HashSet<u32>,
    prepared: bool,
    kernel: Box<dyn ScoringKernel>,
    verifier: Box<dyn SpatialVerifier>,
}

impl std::fmt::Debug for VisualIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualIndex")
            .field("num_visual_words", &self.num_visual_words())
            .field("num_images", &self.image_ids.len())
            .field("num_entries", &self.inverted_index.num_entries())
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl Default for VisualIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualIndex {
    /// Create an empty index with no vocabulary.
    pub fn new() -> Self {
        Self {
            quantizer: None,
            embedder: None,
            inverted_index: InvertedIndex::new(0),
            image_ids: HashSet::new(),
            prepared: false,
            kernel: Box::new(GaussianKernel::for_code_width(DEFAULT_CODE_WIDTH)),
            verifier: Box::new(VotingVerifier::default()),
        }
    }

    /// The number of visual words, zero before build/read.
    pub fn num_visual_words(&self) -> usize {
        self.quantizer.as_ref().map(|q| q.num_words()).unwrap_or(0)
    }

    /// The number of indexed images.
    pub fn num_images(&self) -> usize {
        self.image_ids.len()
    }

    /// Whether the index is prepared for querying.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// The quantizer, if the index has been built.
    pub fn quantizer(&self) -> Option<&Quantizer> {
        self.quantizer.as_ref()
    }

    /// Replace the scoring kernel (defaults to a Gaussian over Hamming
    /// distance, parametrized by the code width).
    pub fn set_scoring_kernel(&mut self, kernel: Box<dyn ScoringKernel>) {
        self.kernel = kernel;
    }

    /// Replace the spatial verifier used for re-ranking.
    pub fn set_verifier(&mut self, verifier: Box<dyn SpatialVerifier>) {
        self.verifier = verifier;
    }

    /// Build the vocabulary and Hamming embedding from training
    /// descriptors. Fails with `AlreadyBuilt` if a vocabulary exists;
    /// on error the index is left unchanged.
    pub fn build(&mut self, options: &BuildOptions, descriptors: &Descriptors) -> Result<()> {
        if self.quantizer.is_some() {
            return Err(RetrievalError::AlreadyBuilt);
        }
        if options.num_checks == 0 {
            return Err(RetrievalError::invalid_option(
                "num_checks",
                "must be positive",
            ));
        }

        let params = VocabularyParams {
            num_visual_words: options.num_visual_words,
            branching: options.branching,
            num_iterations: options.num_iterations,
            target_precision: options.target_precision,
        };

        let (quantizer, embedder) = with_thread_pool(options.num_threads, || {
            let quantizer = Quantizer::build(descriptors, &params)?;

            // Learn the embedding from single nearest-word assignments.
            let word_ids = quantizer.find_nearest_words(descriptors, 1, options.num_checks, 0)?;
            let assigned: Vec<u32> = word_ids.iter().map(|row| row[0]).collect();
            let embedder = HammingEmbedder::build(
                descriptors,
                &assigned,
                quantizer.num_words(),
                DEFAULT_CODE_WIDTH,
            )?;
            Ok((quantizer, embedder))
        })?;

        self.kernel = Box::new(GaussianKernel::for_code_width(embedder.code_width()));
        self.inverted_index = InvertedIndex::new(quantizer.num_words());
        self.image_ids.clear();
        self.prepared = false;
        self.quantizer = Some(quantizer);
        self.embedder = Some(embedder);
        Ok(())
    }

    /// Add one image's features to the index.
    ///
    /// Each descriptor is soft-assigned to its `num_neighbors` nearest
    /// words and contributes one inverted-index entry per assigned word.
    /// A duplicate `image_id` is rejected and leaves the index unchanged.
    pub fn add(
        &mut self,
        options: &IndexOptions,
        image_id: u32,
        geometries: &[FeatureGeometry],
        descriptors: &Descriptors,
    ) -> Result<()> {
        let quantizer = self.quantizer.as_ref().ok_or(RetrievalError::NotBuilt)?;
        let embedder = self.embedder.as_ref().ok_or(RetrievalError::NotBuilt)?;
        if self.image_ids.contains(&image_id) {
            return Err(RetrievalError::DuplicateImage { image_id });
        }
        if geometries.len() != descriptors.len() {
            return Err(RetrievalError::ShapeMismatch {
                geometries: geometries.len(),
                descriptors: descriptors.len(),
            });
        }

        // Compute all entries before touching the inverted index so that
        // a failed add leaves the index unchanged.
        let entries = if descriptors.is_empty() {
            Vec::new()
        } else {
            let word_ids = quantizer.find_nearest_words(
                descriptors,
                options.num_neighbors,
                options.num_checks,
                options.num_threads,
            )?;
            with_thread_pool(options.num_threads, || {
                (0..descriptors.len())
                    .into_par_iter()
                    .map(|i| {
                        word_ids[i]
                            .iter()
                            .map(|&word_id| {
                                let code = embedder.embed(descriptors.row(i), word_id)?;
                                Ok((word_id, code, geometries[i]))
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()
            })?
            .into_iter()
            .flatten()
            .collect()
        };

        for (word_id, code, geometry) in entries {
            self.inverted_index.add(word_id, image_id, code, geometry)?;
        }
        self.image_ids.insert(image_id);
        self.prepared = false;
        Ok(())
    }

    /// Finalize inverted-index weights after adding images. Idempotent;
    /// must be re-run after further adds before querying.
    pub fn prepare(&mut self) -> Result<()> {
        if self.quantizer.is_none() {
            return Err(RetrievalError::NotBuilt);
        }
        self.inverted_index.prepare(self.image_ids.len());
        self.prepared = true;
        Ok(())
    }

    /// Query for the most similar indexed images, ranked by descending
    /// score with ties broken by ascending image id. Querying with zero
    /// descriptors returns an empty list.
    pub fn query(&self, options: &QueryOptions, descriptors: &Descriptors) -> Result<Vec<ImageScore>> {
        let mut scores = self.score_candidates(options, descriptors)?;
        truncate_scores(&mut scores, options.max_num_images);
        Ok(scores)
    }

    /// Query, then spatially verify and re-rank the top
    /// `max_num_verifications` candidates using keypoint geometry.
    ///
    /// Verified candidates take the maximum of their original and refined
    /// scores and are re-sorted; candidates beyond the verification cutoff
    /// keep their original score and relative order after the verified
    /// prefix.
    pub fn query_with_verification(
        &self,
        options: &QueryOptions,
        geometries: &[FeatureGeometry],
        descriptors: &Descriptors,
    ) -> Result<Vec<ImageScore>> {
        if geometries.len() != descriptors.len() {
            return Err(RetrievalError::ShapeMismatch {
                geometries: geometries.len(),
                descriptors: descriptors.len(),
            });
        }

        let mut scores = self.score_candidates(options, descriptors)?;

        let num_verifications = if options.max_num_verifications > 0 {
            scores.len().min(options.max_num_verifications as usize)
        } else {
            scores.len()
        };
        if num_verifications == 0 {
            truncate_scores(&mut scores, options.max_num_images);
            return Ok(scores);
        }

        let candidates: HashSet<u32> = scores[..num_verifications]
            .iter()
            .map(|s| s.image_id)
            .collect();

        // Mine matches from the inverted lists using each query
        // descriptor's single nearest word.
        let quantizer = self.quantizer.as_ref().ok_or(RetrievalError::NotBuilt)?;
        let word_ids =
            quantizer.find_nearest_words(descriptors, 1, options.num_checks, options.num_threads)?;

        let mut image_matches: HashMap<u32, Vec<GeometryMatch>> = HashMap::new();
        for (i, row) in word_ids.iter().enumerate() {
            let word_id = row[0];
            let mut per_image: HashMap<u32, Vec<FeatureGeometry>> = HashMap::new();
            for (image_id, geometry) in self.inverted_index.find_matches(word_id, &candidates) {
                per_image.entry(image_id).or_default().push(geometry);
            }
            for (image_id, candidate_geometries) in per_image {
                image_matches
                    .entry(image_id)
                    .or_default()
                    .push(GeometryMatch {
                        query: geometries[i],
                        candidates: candidate_geometries,
                    });
            }
        }

        for score in scores[..num_verifications].iter_mut() {
            if let Some(matches) = image_matches.get(&score.image_id) {
                let refined = self.verifier.verify(matches);
                score.score = score.score.max(refined);
            }
        }
        sort_scores(&mut scores[..num_verifications]);

        truncate_scores(&mut scores, options.max_num_images);
        Ok(scores)
    }

    /// Statistics over the current index contents.
    pub fn stats(&self) -> IndexStats {
        IndexStats::collect(
            self.num_visual_words(),
            self.image_ids.len(),
            &self.inverted_index,
        )
    }

    /// Write the index to a single file. Valid with or without indexed
    /// images; a vocabulary-only index is a distributable artifact.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let quantizer = self.quantizer.as_ref().ok_or(RetrievalError::NotBuilt)?;
        let embedder = self.embedder.as_ref().ok_or(RetrievalError::NotBuilt)?;

        let mut image_ids: Vec<u32> = self.image_ids.iter().copied().collect();
        image_ids.sort_unstable();

        persistence::save(
            path,
            &SerializedIndex {
                quantizer: quantizer.clone(),
                embedder: embedder.clone(),
                image_ids,
                inverted_index: self.inverted_index.clone(),
                prepared: self.prepared,
            },
        )
    }

    /// Read an index written by `write`. All-or-nothing: a corrupt or
    /// truncated file fails without yielding a partially loaded index.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let serialized = persistence::load(path)?;
        let code_width = serialized.embedder.code_width();
        Ok(Self {
            quantizer: Some(serialized.quantizer),
            embedder: Some(serialized.embedder),
            inverted_index: serialized.inverted_index,
            image_ids: serialized.image_ids.into_iter().collect(),
            prepared: serialized.prepared,
            kernel: Box::new(GaussianKernel::for_code_width(code_width)),
            verifier: Box::new(VotingVerifier::default()),
        })
    }

    /// Assign query descriptors to words, score against the inverted
    /// index and sort. Shared by both query paths.
    fn score_candidates(
        &self,
        options: &QueryOptions,
        descriptors: &Descriptors,
    ) -> Result<Vec<ImageScore>> {
        let quantizer = self.quantizer.as_ref().ok_or(RetrievalError::NotBuilt)?;
        let embedder = self.embedder.as_ref().ok_or(RetrievalError::NotBuilt)?;
        if !self.prepared {
            return Err(RetrievalError::NotPrepared);
        }
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        let word_ids = quantizer.find_nearest_words(
            descriptors,
            options.num_neighbors,
            options.num_checks,
            options.num_threads,
        )?;

        let mut query_words: Vec<(u32, BinaryCode)> =
            Vec::with_capacity(descriptors.len() * options.num_neighbors);
        for (i, row) in word_ids.iter().enumerate() {
            for &word_id in row {
                query_words.push((word_id, embedder.embed(descriptors.row(i), word_id)?));
            }
        }

        let mut scores = with_thread_pool(options.num_threads, || {
            self.inverted_index.query(&query_words, self.kernel.as_ref())
        })?;
        sort_scores(&mut scores);
        Ok(scores)
    }
}

/// Descending by score, ties broken by ascending image id for
/// deterministic rankings.
fn sort_scores(scores: &mut [ImageScore]) {
    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.image_id.cmp(&b.image_id))
    });
}

fn truncate_scores(scores: &mut Vec<ImageScore>, max_num_images: i32) {
    if max_num_images > 0 {
        scores.truncate(max_num_images as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_descriptors() -> Descriptors {
        let mut rows = Vec::new();
        for &(cx, cy) in &[(10u8, 10u8), (200, 10), (10, 200), (200, 200)] {
            for dx in 0..3u8 {
                for dy in 0..3u8 {
                    rows.push(vec![cx + dx * 2, cy + dy * 2]);
                }
            }
        }
        Descriptors::from_rows(&rows).unwrap()
    }

    fn build_options() -> BuildOptions {
        BuildOptions {
            num_visual_words: 4,
            branching: 2,
            num_iterations: 10,
            ..BuildOptions::default()
        }
    }

    fn geometries(n: usize) -> Vec<FeatureGeometry> {
        (0..n)
            .map(|i| FeatureGeometry::new(i as f32, i as f32, 1.0, 0.0))
            .collect()
    }

    fn cluster_descriptors(cx: u8, cy: u8, n: usize) -> Descriptors {
        let rows: Vec<Vec<u8>> = (0..n as u8).map(|i| vec![cx + i, cy + i]).collect();
        Descriptors::from_rows(&rows).unwrap()
    }

    fn built_index() -> VisualIndex {
        let mut index = VisualIndex::new();
        index.build(&build_options(), &training_descriptors()).unwrap();
        index
    }

    #[test]
    fn test_empty_index() {
        let index = VisualIndex::new();
        assert_eq!(index.num_visual_words(), 0);
        assert_eq!(index.num_images(), 0);
        assert!(!index.is_prepared());
    }

    #[test]
    fn test_build_twice_fails() {
        let mut index = built_index();
        assert!(matches!(
            index.build(&build_options(), &training_descriptors()),
            Err(RetrievalError::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_add_before_build_fails() {
        let mut index = VisualIndex::new();
        let descs = cluster_descriptors(10, 10, 3);
        assert!(matches!(
            index.add(&IndexOptions::default(), 1, &geometries(3), &descs),
            Err(RetrievalError::NotBuilt)
        ));
    }

    #[test]
    fn test_query_before_prepare_fails() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        index
            .add(&IndexOptions::default(), 1, &geometries(3), &descs)
            .unwrap();
        assert!(matches!(
            index.query(&QueryOptions::default(), &descs),
            Err(RetrievalError::NotPrepared)
        ));
    }

    #[test]
    fn test_duplicate_image_rejected_without_mutation() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        index
            .add(&IndexOptions::default(), 1, &geometries(3), &descs)
            .unwrap();
        let entries_before = index.inverted_index.num_entries();

        let result = index.add(&IndexOptions::default(), 1, &geometries(3), &descs);
        assert!(matches!(
            result,
            Err(RetrievalError::DuplicateImage { image_id: 1 })
        ));
        assert_eq!(index.inverted_index.num_entries(), entries_before);
        assert_eq!(index.num_images(), 1);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        assert!(matches!(
            index.add(&IndexOptions::default(), 1, &geometries(2), &descs),
            Err(RetrievalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_add_after_prepare_marks_stale() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        index
            .add(&IndexOptions::default(), 1, &geometries(3), &descs)
            .unwrap();
        index.prepare().unwrap();
        assert!(index.is_prepared());

        let descs2 = cluster_descriptors(200, 200, 3);
        index
            .add(&IndexOptions::default(), 2, &geometries(3), &descs2)
            .unwrap();
        assert!(!index.is_prepared());
        assert!(matches!(
            index.query(&QueryOptions::default(), &descs),
            Err(RetrievalError::NotPrepared)
        ));

        index.prepare().unwrap();
        assert!(index.query(&QueryOptions::default(), &descs).is_ok());
    }

    #[test]
    fn test_empty_image_add_is_legal() {
        let mut index = built_index();
        index
            .add(&IndexOptions::default(), 7, &[], &Descriptors::empty(2))
            .unwrap();
        assert_eq!(index.num_images(), 1);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        index
            .add(&IndexOptions::default(), 1, &geometries(3), &descs)
            .unwrap();
        index.prepare().unwrap();

        let scores = index
            .query(&QueryOptions::default(), &Descriptors::empty(2))
            .unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_soft_assignment_monotonicity() {
        let descs = cluster_descriptors(10, 10, 4);

        let mut narrow = built_index();
        let mut wide = built_index();
        narrow
            .add(
                &IndexOptions {
                    num_neighbors: 1,
                    ..IndexOptions::default()
                },
                1,
                &geometries(4),
                &descs,
            )
            .unwrap();
        wide.add(
            &IndexOptions {
                num_neighbors: 3,
                ..IndexOptions::default()
            },
            1,
            &geometries(4),
            &descs,
        )
        .unwrap();

        // More neighbors can only add entries, never remove them.
        assert!(wide.inverted_index.num_entries() >= narrow.inverted_index.num_entries());
        for word_id in 0..narrow.num_visual_words() as u32 {
            assert!(
                wide.inverted_index.list_len(word_id) >= narrow.inverted_index.list_len(word_id)
            );
        }
    }

    #[test]
    fn test_invalid_options_fail_fast() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 3);
        let bad = IndexOptions {
            num_neighbors: 0,
            ..IndexOptions::default()
        };
        assert!(matches!(
            index.add(&bad, 1, &geometries(3), &descs),
            Err(RetrievalError::InvalidOption { .. })
        ));
        assert_eq!(index.num_images(), 0);
    }

    #[test]
    fn test_single_image_is_retrievable() {
        let mut index = built_index();
        let descs = cluster_descriptors(10, 10, 4);
        index
            .add(&IndexOptions::default(), 9, &geometries(4), &descs)
            .unwrap();
        index.prepare().unwrap();

        // Every word the sole image occupies occurs in all images, so its
        // weight must survive preparation for the image to be found.
        let scores = index.query(&QueryOptions::default(), &descs).unwrap();
        assert!(!scores.is_empty());
        assert_eq!(scores[0].image_id, 9);
        assert!(scores[0].score > 0.0);
    }

    #[test]
    fn test_end_to_end_ranking() {
        let mut index = built_index();
        let image1 = cluster_descriptors(10, 10, 4);
        let image2 = cluster_descriptors(200, 200, 4);
        index
            .add(&IndexOptions::default(), 1, &geometries(4), &image1)
            .unwrap();
        index
            .add(&IndexOptions::default(), 2, &geometries(4), &image2)
            .unwrap();
        index.prepare().unwrap();

        let query = cluster_descriptors(11, 11, 3);
        let scores = index
            .query(
                &QueryOptions {
                    num_neighbors: 1,
                    ..QueryOptions::default()
                },
                &query,
            )
            .unwrap();

        assert!(!scores.is_empty());
        assert_eq!(scores[0].image_id, 1);
        assert!(scores[0].score > 0.0);
        if let Some(second) = scores.get(1) {
            assert!(scores[0].score >= second.score);
        }
    }

    #[test]
    fn test_max_num_images_truncates() {
        let mut index = built_index();
        for (image_id, (cx, cy)) in [(1u32, (10u8, 10u8)), (2, (200, 10)), (3, (10, 200))]
            .into_iter()
        {
            let descs = cluster_descriptors(cx, cy, 4);
            index
                .add(&IndexOptions::default(), image_id, &geometries(4), &descs)
                .unwrap();
        }
        index.prepare().unwrap();

        let query = cluster_descriptors(11, 11, 3);
        let options = QueryOptions {
            max_num_images: 1,
            ..QueryOptions::default()
        };
        let scores = index.query(&options, &query).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].image_id, 1);
    }

    #[test]
    fn test_query_with_verification_reranks() {
        let mut index = built_index();
        let image1 = cluster_descriptors(10, 10, 4);
        let image2 = cluster_descriptors(200, 200, 4);
        index
            .add(&IndexOptions::default(), 1, &geometries(4), &image1)
            .unwrap();
        index
            .add(&IndexOptions::default(), 2, &geometries(4), &image2)
            .unwrap();
        index.prepare().unwrap();

        let query = cluster_descriptors(11, 11, 3);
        let scores = index
            .query_with_verification(
                &QueryOptions {
                    num_neighbors: 1,
                    max_num_verifications: 2,
                    ..QueryOptions::default()
                },
                &geometries(3),
                &query,
            )
            .unwrap();

        assert!(!scores.is_empty());
        assert_eq!(scores[0].image_id, 1);
        // Verification can only raise scores.
        let plain = index
            .query(
                &QueryOptions {
                    num_neighbors: 1,
                    ..QueryOptions::default()
                },
                &query,
            )
            .unwrap();
        assert!(scores[0].score >= plain[0].score);
    }

    #[test]
    fn test_query_results_deterministic_across_threads() {
        let mut index = built_index();
        let image1 = cluster_descriptors(10, 10, 4);
        let image2 = cluster_descriptors(200, 200, 4);
        index
            .add(&IndexOptions::default(), 1, &geometries(4), &image1)
            .unwrap();
        index
            .add(&IndexOptions::default(), 2, &geometries(4), &image2)
            .unwrap();
        index.prepare().unwrap();

        let query = cluster_descriptors(12, 12, 4);
        let mut options = QueryOptions::default();
        options.num_threads = 1;
        let single = index.query(&options, &query).unwrap();
        options.num_threads = 4;
        let multi = index.query(&options, &query).unwrap();
        assert_eq!(single, multi);
    }
}
