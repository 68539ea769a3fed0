//! Feature-hashing embedder.
//!
//! Maps every lowercased word to a bucket with FNV-1a and L2-normalizes the
//! counts. It needs no model weights, so the in-memory search backend can
//! answer the vector signal offline. Similar wording yields similar vectors;
//! it does not capture meaning beyond shared vocabulary.

use crate::vector::l2_normalize;
use async_trait::async_trait;
use lorekeeper_core::error::SearchError;
use lorekeeper_core::search::Embedder;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Synchronous embedding, shared by the trait impl and indexers.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for word in tokenize(text) {
            let bucket = (fnv1a(word.as_bytes()) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_text(text))
    }
}

/// Lowercased alphanumeric words.
pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn embedding_is_unit_length() {
        let v = HashingEmbedder::new(64).embed_text("Sullivan owes the Syndicate money");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = HashingEmbedder::new(16).embed_text("  ...  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let e = HashingEmbedder::default();
        let query = e.embed_text("the debt Sullivan owes");
        let related = e.embed_text("Sullivan still owes a debt to the docks");
        let unrelated = e.embed_text("rain falls over quiet rooftops");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn case_insensitive() {
        let e = HashingEmbedder::default();
        assert_eq!(e.embed_text("Neon Docks"), e.embed_text("neon DOCKS"));
    }
}
