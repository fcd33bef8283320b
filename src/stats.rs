//! Index statistics: word/image/entry counts and inverted-list fill.

use crate::inverted_index::InvertedIndex;

/// A snapshot of the index contents, cheap to compute on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub num_visual_words: usize,
    pub num_images: usize,
    pub num_entries: u64,
    /// Number of words with at least one entry.
    pub num_used_words: usize,
    pub min_list_len: usize,
    pub max_list_len: usize,
    pub mean_list_len: f64,
}

impl IndexStats {
    pub(crate) fn collect(
        num_visual_words: usize,
        num_images: usize,
        inverted_index: &InvertedIndex,
    ) -> Self {
        let mut num_used_words = 0usize;
        let mut min_list_len = usize::MAX;
        let mut max_list_len = 0usize;
        for word_id in 0..inverted_index.num_words() as u32 {
            let len = inverted_index.list_len(word_id);
            if len > 0 {
                num_used_words += 1;
            }
            min_list_len = min_list_len.min(len);
            max_list_len = max_list_len.max(len);
        }
        if inverted_index.num_words() == 0 {
            min_list_len = 0;
        }

        let mean_list_len = if inverted_index.num_words() > 0 {
            inverted_index.num_entries() as f64 / inverted_index.num_words() as f64
        } else {
            0.0
        };

        Self {
            num_visual_words,
            num_images,
            num_entries: inverted_index.num_entries(),
            num_used_words,
            min_list_len,
            max_list_len,
            mean_list_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FeatureGeometry;
    use crate::embedding::BinaryCode;
    use approx::assert_relative_eq;

    #[test]
    fn test_stats_empty_index() {
        let index = InvertedIndex::new(0);
        let stats = IndexStats::collect(0, 0, &index);
        assert_eq!(stats.num_entries, 0);
        assert_eq!(stats.min_list_len, 0);
        assert_relative_eq!(stats.mean_list_len, 0.0);
    }

    #[test]
    fn test_stats_counts_lists() {
        let mut index = InvertedIndex::new(4);
        let geometry = FeatureGeometry::default();
        index.add(0, 1, BinaryCode::default(), geometry).unwrap();
        index.add(0, 2, BinaryCode::default(), geometry).unwrap();
        index.add(2, 1, BinaryCode::default(), geometry).unwrap();

        let stats = IndexStats::collect(4, 2, &index);
        assert_eq!(stats.num_entries, 3);
        assert_eq!(stats.num_used_words, 2);
        assert_eq!(stats.min_list_len, 0);
        assert_eq!(stats.max_list_len, 2);
        assert_relative_eq!(stats.mean_list_len, 0.75);
    }
}
