//! # carma-crypto
//!
//! Cryptographic primitives for the CARMA overlay.
//!
//! The suite is fixed per deployment: the VRF backend is chosen once, from
//! the global parameters, and everything else is not negotiable.
//!
//! ## Modules
//!
//! - [`vrf`]: VRF shell, tickets and verifiable dice rolls
//! - [`bucket`]: SHA-512 bucket assignment
//! - [`x25519`]: node key agreement keys (RFC 7748)
//! - [`anon`]: anonymous public-key encryption to a node's key (X25519, ChaCha20-Poly1305)

pub mod anon;
pub mod bucket;
pub mod vrf;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// VRF key decoding or evaluation failed.
    #[error("VRF error: {0}")]
    Vrf(String),

    /// Unknown VRF backend name.
    #[error("unknown VRF backend: {0:?}")]
    UnknownVrf(String),

    /// Anonymous encryption framing error.
    #[error("anonymous encryption error: {0}")]
    Anon(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Check that `bytes` has exactly `expected` bytes.
pub(crate) fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(CryptoError::InvalidKeyLength {
            expected,
            actual: bytes.len(),
        })
    }
}
