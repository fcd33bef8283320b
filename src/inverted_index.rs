//! Inverted index: per-word entry lists with IDF weighting and
//! Hamming-distance scoring.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::FeatureGeometry;
use crate::embedding::BinaryCode;
use crate::error::{Result, RetrievalError};

/// A scored candidate image — the query output record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageScore {
    pub image_id: u32,
    pub score: f32,
}

/// Maps a Hamming distance to a similarity contribution in `[0, 1]`.
/// A return value of `0.0` excludes the entry from scoring.
pub trait ScoringKernel: Send + Sync {
    fn similarity(&self, hamming_distance: u32) -> f32;
}

/// Gaussian decay over Hamming distance with a hard cutoff:
/// `exp(-d^2 / (2 sigma^2))` for `d <= max_distance`, else `0`.
///
/// Unrelated codes sit at an expected distance of half the code width,
/// so the cutoff must stay well below that or cross-word noise drowns
/// out true matches.
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    table: Vec<f32>,
}

impl GaussianKernel {
    pub fn new(sigma: f32, max_distance: u32) -> Self {
        let table = (0..=max_distance)
            .map(|d| {
                let d = d as f32;
                (-d * d / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        Self { table }
    }

    /// The default parametrization for a given code width:
    /// `sigma = width / 6`, cutoff at `3 * width / 8`.
    pub fn for_code_width(code_width: usize) -> Self {
        let sigma = (code_width as f32 / 6.0).max(1.0);
        let max_distance = (code_width * 3 / 8).max(1) as u32;
        Self::new(sigma, max_distance)
    }
}

impl ScoringKernel for GaussianKernel {
    fn similarity(&self, hamming_distance: u32) -> f32 {
        self.table
            .get(hamming_distance as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

/// One posting: an image's descriptor under a visual word.
/// Appended during add, never updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvertedListEntry {
    pub image_id: u32,
    pub code: BinaryCode,
    /// Per-entry weight contribution; currently `1.0` at insertion and
    /// folded into both scoring and the per-image normalizer.
    pub weight: f32,
    pub geometry: FeatureGeometry,
}

/// Mapping from visual word to the entries that were assigned that word,
/// dense-indexed by word id.
///
/// `prepare` computes per-word IDF weights (rarer words are more
/// discriminative) and per-image self-norms; both are required before
/// scoring and must be recomputed after further adds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvertedIndex {
    lists: Vec<Vec<InvertedListEntry>>,
    idf_weights: Vec<f32>,
    /// L2 tf-idf self-norm per image, used to make scores comparable
    /// across images with different feature counts.
    normalizers: HashMap<u32, f32>,
    num_entries: u64,
    finalized: bool,
}

impl InvertedIndex {
    /// Create an empty index over a fixed number of visual words.
    pub fn new(num_words: usize) -> Self {
        Self {
            lists: vec![Vec::new(); num_words],
            idf_weights: vec![0.0; num_words],
            normalizers: HashMap::new(),
            num_entries: 0,
            finalized: false,
        }
    }

    pub fn num_words(&self) -> usize {
        self.lists.len()
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// The number of entries under one word.
    pub fn list_len(&self, word_id: u32) -> usize {
        self.lists
            .get(word_id as usize)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append one entry to the list for `word_id`. O(1) amortized;
    /// invalidates any previously computed weights.
    pub fn add(
        &mut self,
        word_id: u32,
        image_id: u32,
        code: BinaryCode,
        geometry: FeatureGeometry,
    ) -> Result<()> {
        let list = self
            .lists
            .get_mut(word_id as usize)
            .ok_or_else(|| {
                RetrievalError::invalid_option(
                    "word_id",
                    format!("word id {} out of range", word_id),
                )
            })?;
        list.push(InvertedListEntry {
            image_id,
            code,
            weight: 1.0,
            geometry,
        });
        self.num_entries += 1;
        self.finalized = false;
        Ok(())
    }

    /// Compute per-word IDF weights and per-image normalizers over the
    /// current entries. Idempotent for a fixed entry set; must be re-run
    /// after new adds. `num_images` is the total number of indexed images.
    pub fn prepare(&mut self, num_images: usize) {
        // Accumulate in word-id and image-id order so float summation is
        // reproducible across runs and thread counts.
        let mut norms: BTreeMap<u32, f32> = BTreeMap::new();
        for (word_id, list) in self.lists.iter().enumerate() {
            let mut tf: BTreeMap<u32, f32> = BTreeMap::new();
            for entry in list {
                *tf.entry(entry.image_id).or_insert(0.0) += entry.weight;
            }

            // Smoothed IDF: strictly positive for any populated word, so
            // a word occurring in every image (including the single-image
            // case) still contributes instead of being discarded.
            let idf = if tf.is_empty() || num_images == 0 {
                0.0
            } else {
                (1.0 + num_images as f32 / tf.len() as f32).ln()
            };
            self.idf_weights[word_id] = idf;

            if idf > 0.0 {
                for (&image_id, &count) in &tf {
                    *norms.entry(image_id).or_insert(0.0) += idf * count * count;
                }
            }
        }

        self.normalizers = norms
            .into_iter()
            .map(|(image_id, sum)| {
                let norm = sum.sqrt();
                (image_id, if norm > 0.0 { norm } else { 1.0 })
            })
            .collect();
        self.finalized = true;
    }

    /// The finalized IDF weight of a word (zero before `prepare`).
    pub fn idf_weight(&self, word_id: u32) -> f32 {
        self.idf_weights
            .get(word_id as usize)
            .copied()
            .unwrap_or(0.0)
    }

    /// Score all entries under `word_id` against a query code.
    ///
    /// Each returned contribution is `idf * entry_weight * kernel(d)`;
    /// entries whose kernel value is zero are excluded. Order follows the
    /// list's insertion order.
    pub fn score(
        &self,
        word_id: u32,
        query_code: BinaryCode,
        kernel: &dyn ScoringKernel,
    ) -> Result<Vec<(u32, f32)>> {
        if !self.finalized {
            return Err(RetrievalError::NotPrepared);
        }
        let list = self.lists.get(word_id as usize).ok_or_else(|| {
            RetrievalError::invalid_option("word_id", format!("word id {} out of range", word_id))
        })?;

        let idf = self.idf_weights[word_id as usize];
        if idf <= 0.0 {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .filter_map(|entry| {
                let similarity = kernel.similarity(query_code.hamming_distance(entry.code));
                if similarity > 0.0 {
                    Some((entry.image_id, idf * entry.weight * similarity))
                } else {
                    None
                }
            })
            .collect())
    }

    /// Accumulate scores for a whole query: one `(word, code)` pair per
    /// (descriptor, assigned word). Contributions are summed per image and
    /// divided by the image's self-norm. The result is unsorted.
    ///
    /// Per-word scoring runs in parallel; accumulation is sequential in
    /// query order so float summation is independent of thread count.
    pub fn query(
        &self,
        query_words: &[(u32, BinaryCode)],
        kernel: &dyn ScoringKernel,
    ) -> Result<Vec<ImageScore>> {
        if !self.finalized {
            return Err(RetrievalError::NotPrepared);
        }

        let contributions: Vec<Vec<(u32, f32)>> = query_words
            .par_iter()
            .map(|&(word_id, code)| self.score(word_id, code, kernel))
            .collect::<Result<_>>()?;

        let mut accumulated: HashMap<u32, f32> = HashMap::new();
        for word_contributions in &contributions {
            for &(image_id, contribution) in word_contributions {
                *accumulated.entry(image_id).or_insert(0.0) += contribution;
            }
        }

        Ok(accumulated
            .into_iter()
            .map(|(image_id, score)| ImageScore {
                image_id,
                score: score / self.normalizers.get(&image_id).copied().unwrap_or(1.0),
            })
            .collect())
    }

    /// Entries under `word_id` belonging to candidate images, used to mine
    /// feature matches for spatial verification.
    pub fn find_matches(
        &self,
        word_id: u32,
        image_ids: &HashSet<u32>,
    ) -> Vec<(u32, FeatureGeometry)> {
        self.lists
            .get(word_id as usize)
            .map(|list| {
                list.iter()
                    .filter(|entry| image_ids.contains(&entry.image_id))
                    .map(|entry| (entry.image_id, entry.geometry))
                    .collect()
            })
            .unwrap_or_default()
    }
}
