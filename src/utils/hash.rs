use sha2::{Digest, Sha256};

/// SHA-256 over a stream of chunks, tracking the total size.
#[derive(Default)]
pub struct ChunkHasher {
    hasher: Sha256,
    size: u64,
}

impl ChunkHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Hex digest and byte count.
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_chunk_hasher_single_chunk() {
        let mut hasher = ChunkHasher::new();
        hasher.update(b"hello world");
        let (hash, size) = hasher.finalize();
        assert_eq!(hash, HELLO_WORLD_SHA256);
        assert_eq!(size, 11);
    }

    #[test]
    fn test_chunk_hasher_split_matches_whole_buffer() {
        let mut hasher = ChunkHasher::new();
        hasher.update(b"hello");
        hasher.update(b" ");
        hasher.update(b"world");
        let (hash, size) = hasher.finalize();
        assert_eq!(hash, HELLO_WORLD_SHA256);
        assert_eq!(size, 11);
    }

    #[test]
    fn test_chunk_hasher_empty() {
        let (hash, size) = ChunkHasher::new().finalize();
        // SHA-256 for empty string
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(size, 0);
    }
}
