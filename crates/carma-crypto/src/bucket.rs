//! SHA-512 bucket assignment.
//!
//! ```text
//! bucket = BigUint::from_bytes_be(SHA-512(epoch_nonce || psn)) mod num_buckets
//! ```
//!
//! The digest is read as an unsigned big-endian integer, so every byte of
//! the 512-bit output takes part in the reduction.

use num_bigint::BigUint;
use sha2::{Digest, Sha512};

use crate::{CryptoError, Result};

/// SHA-512 digest length in bytes.
pub const DIGEST_SIZE: usize = 64;

/// SHA-512 over the concatenation of `parts`.
pub fn sha512(parts: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Reduce big-endian `bytes` modulo `modulus`.
pub fn reduce(bytes: &[u8], modulus: &BigUint) -> BigUint {
    BigUint::from_bytes_be(bytes) % modulus
}

/// Bucket of `psn` for the epoch identified by `epoch_nonce`.
pub fn bucket_index(epoch_nonce: &[u8], psn: &[u8], num_buckets: u32) -> Result<u32> {
    if num_buckets == 0 {
        return Err(CryptoError::InvalidInput("num_buckets is zero".into()));
    }
    let digest = sha512(&[epoch_nonce, psn]);
    let index = reduce(&digest, &BigUint::from(num_buckets));
    u32::try_from(&index).map_err(|_| CryptoError::InvalidInput("bucket out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_sha512_abc() {
        let expected = hex!(
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a"
            "2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
        assert_eq!(sha512(&[b"abc"]), expected);
        assert_eq!(sha512(&[b"a", b"bc"]), expected);
    }

    #[test]
    fn test_reduce_big_endian() {
        assert_eq!(reduce(&[0x01, 0x00], &BigUint::from(1000u32)), BigUint::from(256u32));
        assert_eq!(reduce(&[0xFF; 64], &BigUint::from(1u32)), BigUint::from(0u32));
    }

    #[test]
    fn test_bucket_is_deterministic_and_bounded() {
        for n in [1u32, 2, 7, 64] {
            let a = bucket_index(b"nonce", b"alice", n).expect("bucket");
            let b = bucket_index(b"nonce", b"alice", n).expect("bucket");
            assert_eq!(a, b);
            assert!(a < n);
        }
    }

    #[test]
    fn test_bucket_depends_on_nonce() {
        let psns: Vec<String> = (0..64).map(|i| format!("node{i}")).collect();
        let before: Vec<u32> = psns
            .iter()
            .map(|p| bucket_index(b"epoch-1", p.as_bytes(), 16).expect("bucket"))
            .collect();
        let after: Vec<u32> = psns
            .iter()
            .map(|p| bucket_index(b"epoch-2", p.as_bytes(), 16).expect("bucket"))
            .collect();
        assert_ne!(before, after);
    }

    #[test]
    fn test_zero_buckets_rejected() {
        assert!(bucket_index(b"n", b"p", 0).is_err());
    }
}
