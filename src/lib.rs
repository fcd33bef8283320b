//! # visual-index
//!
//! An image-retrieval index over local feature descriptors.
//!
//! This library provides:
//! - A visual vocabulary built by hierarchical k-means quantization
//! - Per-word Hamming-embedding binary codes refining each descriptor
//! - An inverted index with IDF weighting and Hamming-distance scoring
//! - Optional geometry-based re-ranking of top candidates
//! - Single-file persistence with checksummed loading
//!
//! ## Example
//!
//! ```rust,no_run
//! use visual_index::{
//!     BuildOptions, Descriptors, FeatureGeometry, IndexOptions, QueryOptions, VisualIndex,
//! };
//!
//! # fn main() -> visual_index::Result<()> {
//! # let training = Descriptors::empty(128);
//! # let descriptors = Descriptors::empty(128);
//! # let geometries: Vec<FeatureGeometry> = Vec::new();
//! let mut index = VisualIndex::new();
//! index.build(&BuildOptions::default(), &training)?;
//!
//! index.add(&IndexOptions::default(), 1, &geometries, &descriptors)?;
//! index.prepare()?;
//!
//! let scores = index.query(&QueryOptions::default(), &descriptors)?;
//! # Ok(())
//! # }
//! ```

pub mod ann;
pub mod descriptor;
pub mod embedding;
pub mod error;
pub mod inverted_index;
pub mod stats;
pub mod verification;
pub mod visual_index;
pub mod vocabulary;

mod parallel;
mod persistence;

pub use descriptor::{Descriptors, FeatureGeometry};
pub use embedding::{BinaryCode, HammingEmbedder, DEFAULT_CODE_WIDTH};
pub use error::{Result, RetrievalError};
pub use inverted_index::{GaussianKernel, ImageScore, InvertedIndex, ScoringKernel};
pub use stats::IndexStats;
pub use verification::{GeometryMatch, SpatialVerifier, VotingVerifier};
pub use visual_index::{BuildOptions, IndexOptions, QueryOptions, VisualIndex};
pub use vocabulary::Quantizer;
