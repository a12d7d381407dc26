//! Deterministic feature-hashing embedder
//!
//! Projects word unigrams and character trigrams into signed buckets and
//! L2-normalizes the result. No model files, no state. Texts sharing words
//! land close together, which is enough for degraded-mode search and tests.
//!
//! Vectors are persisted, so the hash function is fixed (FNV-1a 64) rather
//! than the process-seeded std hasher.

use super::{normalize, Embedder, EmbeddingError};
use crate::constants::EMBEDDING_DIMENSION;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;
const CHAR_WEIGHT: f32 = 0.25;

fn fnv1a(parts: &[&[u8]]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for &byte in *part {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
        }
    }

    fn add_feature(&self, vector: &mut [f32], kind: &[u8], feature: &[u8], weight: f32) {
        let hash = fnv1a(&[kind, feature]);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let mut features = 0usize;

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, b"w", word.as_bytes(), WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, b"t", trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
            features += 1;
        }

        if features == 0 {
            // Punctuation or symbols only
            for ch in lowered.chars().filter(|c| !c.is_whitespace()) {
                let mut buf = [0u8; 4];
                self.add_feature(&mut vector, b"c", ch.encode_utf8(&mut buf).as_bytes(), CHAR_WEIGHT);
                features += 1;
            }
        }

        if features == 0 {
            // Whitespace only: still a valid, distinct input
            self.add_feature(&mut vector, b"raw", text.as_bytes(), WORD_WEIGHT);
        }

        normalize(&mut vector)?;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn backend(&self) -> &'static str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_dimension_and_unit_norm() {
        let embedder = HashingEmbedder::new();
        for text in ["Hello world", "!!!", "   ", "語彙"] {
            let v = embedder.encode(text).unwrap();
            assert_eq!(v.len(), EMBEDDING_DIMENSION);
            assert!((norm(&v) - 1.0).abs() < 1e-5, "not normalized for {text:?}");
        }
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new();
        assert_eq!(
            embedder.encode("rust ownership").unwrap(),
            embedder.encode("rust ownership").unwrap()
        );
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashingEmbedder::new();
        let query = embedder.encode("favorite programming language").unwrap();
        let related = embedder.encode("My favorite programming language is Rust").unwrap();
        let unrelated = embedder.encode("Groceries: eggs, milk and bread").unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            HashingEmbedder::new().encode(""),
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[test]
    fn test_batch_matches_sequential() {
        let embedder = HashingEmbedder::new();
        let batch = embedder.encode_batch(&["one", "two"]).unwrap();
        assert_eq!(batch[0], embedder.encode("one").unwrap());
        assert_eq!(batch[1], embedder.encode("two").unwrap());
    }
}
