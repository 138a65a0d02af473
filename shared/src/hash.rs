use sha2::{Digest, Sha256};

/// Digest of `data` combined with `nonce`; miners search for the nonce that
/// minimizes it.
pub fn hash(data: &str, nonce: u64) -> u64 {
    let digest = Sha256::digest(format!("{data} {nonce}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
