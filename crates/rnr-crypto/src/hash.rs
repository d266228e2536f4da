use sha2::{Digest, Sha256};

/// 32-byte hash type
pub type Hash = [u8; 32];

/// SHA-256 hash function
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA-256 over the concatenation of two buffers, without an intermediate copy
pub fn sha256_pair(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256(b"hello world");
        assert_eq!(
            hex::encode(hash),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_pair_matches_concat() {
        let joined = sha256(b"hello world");
        assert_eq!(sha256_pair(b"hello ", b"world"), joined);
    }
}
