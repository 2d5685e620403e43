use sha2::Digest;
use sha2::Sha256;

/// Lowercase hex SHA-256, the digest format stored in `base_digest` /
/// `after_digest` columns and checked by the safety manager.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
