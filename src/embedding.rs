//! Hamming embedding: per-word binary refinement of quantized descriptors.
//!
//! A descriptor assigned to a visual word is projected onto a shared set
//! of direction vectors; comparing each projection against the word's
//! per-bit median threshold yields a compact binary code. Codes of
//! descriptors assigned to the same word are bit-comparable, and their
//! Hamming distance approximates relative similarity within the word's
//! cluster.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptors;
use crate::error::{Result, RetrievalError};

/// Default code width: one full 64-bit word per code.
pub const DEFAULT_CODE_WIDTH: usize = 64;

/// Fixed seed for projection generation; identical builds must yield
/// identical embeddings.
const PROJECTION_SEED: u64 = 0x4845_4d42;

/// A fixed-width binary code, at most 64 bits wide. The width is a
/// property of the embedder that produced the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinaryCode(u64);

impl BinaryCode {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// The number of differing bits between two codes.
    pub fn hamming_distance(self, other: BinaryCode) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Per-word binary embedding of descriptors.
///
/// Holds one shared projection matrix plus per-word per-bit thresholds,
/// estimated as medians over the training descriptors assigned to each
/// word. Read-only after build.
///
/// Each bit records only which side of a threshold the projection falls
/// on, so codes separate descriptors by direction, not magnitude: scalar
/// multiples of a descriptor project onto the same ray and can share a
/// code even when their L2 distance is large.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HammingEmbedder {
    code_width: usize,
    dim: usize,
    num_words: usize,
    /// Row-major `code_width x dim` direction vectors.
    projection: Vec<f32>,
    /// Row-major `num_words x code_width` thresholds.
    thresholds: Vec<f32>,
}

impl HammingEmbedder {
    /// Learn the embedding from training descriptors and their assigned
    /// (single nearest) visual words.
    ///
    /// Words with no assigned training descriptors keep zero thresholds;
    /// this is a documented degenerate case, not a failure.
    pub fn build(
        training: &Descriptors,
        assigned_word_ids: &[u32],
        num_words: usize,
        code_width: usize,
    ) -> Result<Self> {
        if code_width == 0 || code_width > 64 {
            return Err(RetrievalError::invalid_option(
                "code_width",
                format!("must lie in 1..=64, got {code_width}"),
            ));
        }
        if num_words == 0 {
            return Err(RetrievalError::invalid_option(
                "num_words",
                "must be positive",
            ));
        }
        if assigned_word_ids.len() != training.len() {
            return Err(RetrievalError::invalid_option(
                "assigned_word_ids",
                format!(
                    "{} assignments for {} training descriptors",
                    assigned_word_ids.len(),
                    training.len()
                ),
            ));
        }

        let dim = training.dim();
        let mut rng = StdRng::seed_from_u64(PROJECTION_SEED);
        let projection: Vec<f32> = (0..code_width * dim)
            .map(|_| rng.gen::<f32>() * 2.0 - 1.0)
            .collect();

        let embedder_shell = Self {
            code_width,
            dim,
            num_words,
            projection,
            thresholds: vec![0.0; num_words * code_width],
        };

        // Project all training descriptors, then take per-word medians.
        let projected: Vec<Vec<f32>> = (0..training.len())
            .into_par_iter()
            .map(|i| embedder_shell.project(training.row(i)))
            .collect();

        let mut per_word: Vec<Vec<usize>> = vec![Vec::new(); num_words];
        for (i, &word_id) in assigned_word_ids.iter().enumerate() {
            let word_id = word_id as usize;
            if word_id >= num_words {
                return Err(RetrievalError::invalid_option(
                    "assigned_word_ids",
                    format!("word id {word_id} out of range for {num_words} words"),
                ));
            }
            per_word[word_id].push(i);
        }

        let mut thresholds = vec![0.0f32; num_words * code_width];
        for (word_id, members) in per_word.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            for bit in 0..code_width {
                let mut values: Vec<f32> =
                    members.iter().map(|&i| projected[i][bit]).collect();
                values.sort_by(f32::total_cmp);
                thresholds[word_id * code_width + bit] = median_of_sorted(&values);
            }
        }

        Ok(Self {
            thresholds,
            ..embedder_shell
        })
    }

    /// The code width in bits.
    pub fn code_width(&self) -> usize {
        self.code_width
    }

    /// The descriptor dimensionality the embedding was trained on.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    fn project(&self, descriptor: &[u8]) -> Vec<f32> {
        (0..self.code_width)
            .map(|bit| {
                let row = &self.projection[bit * self.dim..(bit + 1) * self.dim];
                row.iter()
                    .zip(descriptor)
                    .map(|(&p, &d)| p * d as f32)
                    .sum()
            })
            .collect()
    }

    /// Binarize a descriptor under the projection of its assigned word.
    /// Pure and deterministic.
    pub fn embed(&self, descriptor: &[u8], word_id: u32) -> Result<BinaryCode> {
        let word_id = word_id as usize;
        if word_id >= self.num_words {
            return Err(RetrievalError::invalid_option(
                "word_id",
                format!("word id {word_id} out of range for {} words", self.num_words),
            ));
        }
        if descriptor.len() != self.dim {
            return Err(RetrievalError::invalid_option(
                "descriptor",
                format!(
                    "length {} does not match embedding dimensionality {}",
                    descriptor.len(),
                    self.dim
                ),
            ));
        }

        let thresholds = &self.thresholds[word_id * self.code_width..(word_id + 1) * self.code_width];
        let mut bits = 0u64;
        for (bit, &threshold) in thresholds.iter().enumerate() {
            let row = &self.projection[bit * self.dim..(bit + 1) * self.dim];
            let value: f32 = row
                .iter()
                .zip(descriptor)
                .map(|(&p, &d)| p * d as f32)
                .sum();
            if value > threshold {
                bits |= 1 << bit;
            }
        }
        Ok(BinaryCode(bits))
    }

}

fn median_of_sorted(values: &[f32]) -> f32 {
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
