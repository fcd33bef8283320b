//! Single-file persistence for the visual index.
//!
//! Layout: a fixed header (magic, format version, payload length, CRC32 of
//! the payload) followed by a bincode payload. The CRC catches truncated
//! and corrupted files before any state is constructed, so loading is
//! all-or-nothing. Centroid bytes and float parameters round-trip
//! bit-exactly, so a reloaded index answers identical queries.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embedding::HammingEmbedder;
use crate::error::{Result, RetrievalError};
use crate::inverted_index::InvertedIndex;
use crate::vocabulary::Quantizer;

const MAGIC: &[u8; 4] = b"VVIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// The persisted index state, in file order: vocabulary, embedder,
/// indexed image ids, inverted index, prepared flag.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SerializedIndex {
    pub quantizer: Quantizer,
    pub embedder: HammingEmbedder,
    /// Sorted for a canonical byte representation.
    pub image_ids: Vec<u32>,
    pub inverted_index: InvertedIndex,
    pub prepared: bool,
}

pub(crate) fn save(path: impl AsRef<Path>, index: &SerializedIndex) -> Result<()> {
    let payload =
        bincode::serialize(index).map_err(|e| RetrievalError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);

    fs::write(path, bytes)?;
    Ok(())
}

pub(crate) fn load(path: impl AsRef<Path>) -> Result<SerializedIndex> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(RetrievalError::Serialization(
            "file too short to hold an index header".to_string(),
        ));
    }

    if &bytes[0..4] != MAGIC {
        return Err(RetrievalError::Serialization(
            "bad magic; not a visual-index file".to_string(),
        ));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(RetrievalError::Serialization(format!(
            "unsupported format version {version} (expected {FORMAT_VERSION})",
        )));
    }
    let payload_len = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    let expected_crc = u32::from_le_bytes(bytes[16..20].try_into().unwrap());

    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + payload_len)
        .ok_or_else(|| RetrievalError::Serialization("truncated index payload".to_string()))?;
    if crc32fast::hash(payload) != expected_crc {
        return Err(RetrievalError::Serialization(
            "payload checksum mismatch; file is corrupt".to_string(),
        ));
    }

    bincode::deserialize(payload).map_err(|e| RetrievalError::Serialization(e.to_string()))
}
