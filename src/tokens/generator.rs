use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a secure random token (32 bytes, hex encoded = 64 characters)
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// SHA-256 of a token plaintext, hex encoded. Only this value is persisted.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let token = generate_token();
        assert_eq!(token.len(), 64); // 32 bytes * 2 hex chars

        // Ensure randomness
        let token2 = generate_token();
        assert_ne!(token, token2);
    }

    #[test]
    fn test_hash_token() {
        let hash1 = hash_token("test_token");
        let hash2 = hash_token("test_token");
        assert_eq!(hash1, hash2); // Deterministic
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, "test_token");

        let hash3 = hash_token("different_token");
        assert_ne!(hash1, hash3);
    }
}
