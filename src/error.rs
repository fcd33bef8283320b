//! Error types for the retrieval index

use thiserror::Error;

/// Result type alias for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Error types that can occur in retrieval-index operations
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Index has not been built: no visual vocabulary")]
    NotBuilt,

    #[error("Index has not been prepared for querying; call prepare() after adding images")]
    NotPrepared,

    #[error("Index already holds a vocabulary; load a new index instead of rebuilding")]
    AlreadyBuilt,

    #[error("Image {image_id} is already indexed")]
    DuplicateImage { image_id: u32 },

    #[error("Shape mismatch: {geometries} geometries for {descriptors} descriptors")]
    ShapeMismatch {
        geometries: usize,
        descriptors: usize,
    },

    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("ANN backend error: {0}")]
    AnnBackend(String),
}

impl RetrievalError {
    pub(crate) fn invalid_option(name: &'static str, reason: impl Into<String>) -> Self {
        RetrievalError::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}
