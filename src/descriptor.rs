//! Feature descriptors and keypoint geometry

use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};

/// A row-major matrix of fixed-length `u8` feature descriptors.
///
/// One row per detected feature point. Descriptors are immutable once
/// extracted and are borrowed by the index during add/query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptors {
    data: Vec<u8>,
    dim: usize,
}

impl Descriptors {
    /// Create a descriptor matrix from row-major data.
    ///
    /// `data.len()` must be a multiple of `dim` (zero rows is allowed).
    pub fn new(data: Vec<u8>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(RetrievalError::invalid_option(
                "dim",
                "descriptor dimensionality must be positive",
            ));
        }
        if data.len() % dim != 0 {
            return Err(RetrievalError::invalid_option(
                "data",
                format!("data length {} is not a multiple of dim {}", data.len(), dim),
            ));
        }
        Ok(Self { data, dim })
    }

    /// Create an empty matrix with the given dimensionality.
    pub fn empty(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            dim: dim.max(1),
        }
    }

    /// Build a matrix from a slice of equally-sized rows.
    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(1);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(RetrievalError::invalid_option(
                    "rows",
                    format!("row length {} differs from first row {}", row.len(), dim),
                ));
            }
            data.extend_from_slice(row);
        }
        Descriptors::new(data, dim)
    }

    /// The number of descriptors (rows).
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The descriptor dimensionality (columns).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Access row `i` as a slice.
    pub fn row(&self, i: usize) -> &[u8] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Iterate over all rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.chunks_exact(self.dim)
    }

    /// The raw row-major bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Squared L2 distance between two `u8` descriptor rows.
#[inline]
pub fn squared_l2(a: &[u8], b: &[u8]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f32 - y as f32;
            d * d
        })
        .sum()
}

/// Squared L2 distance between a `u8` row and an `f32` centroid.
#[inline]
pub fn squared_l2_f32(a: &[u8], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f32 - y;
            d * d
        })
        .sum()
}

/// Spatial attributes of one feature point: position, scale, orientation.
///
/// Opaque to the scoring core; stored per inverted-index entry and handed
/// to the spatial verifier during re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureGeometry {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub orientation: f32,
}

impl FeatureGeometry {
    pub fn new(x: f32, y: f32, scale: f32, orientation: f32) -> Self {
        Self {
            x,
            y,
            scale,
            orientation,
        }
    }
}
