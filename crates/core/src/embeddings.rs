pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic bag of hashed character trigrams and word unigrams,
/// L2-normalised. Needs no model download.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let buckets = vector.len() as u64;
        for window in chars.windows(3) {
            let bucket = (fnv1a(window.iter().collect::<String>().as_bytes()) % buckets) as usize;
            vector[bucket] += 1.0;
        }

        // Whole words weigh more than any single trigram.
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = (fnv1a(word.as_bytes()) % buckets) as usize;
            vector[bucket] += 2.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Squared Euclidean distance; in `[0, 4]` for unit vectors.
pub fn squared_euclidean(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = f64::from(*a) - f64::from(*b);
            delta * delta
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed("Metoprolol 25 mg twice daily");
        let second = embedder.embed("Metoprolol 25 mg twice daily");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = HashingEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(embedder.embed("").len(), 32);
    }

    #[test]
    fn related_text_is_closer_than_unrelated_text() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("discharge medication list");
        let related = embedder.embed("Discharge medications: aspirin and metoprolol");
        let unrelated = embedder.embed("zzzz qqqq xxxx");
        assert!(squared_euclidean(&query, &related) < squared_euclidean(&query, &unrelated));
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let embedder = HashingEmbedder::default();
        let vector = embedder.embed("progress note");
        assert_eq!(squared_euclidean(&vector, &vector), 0.0);
    }
}
