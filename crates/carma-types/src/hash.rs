//! Short persona hashes.
//!
//! Messages refer to a node by a 16-byte hash of its PSN instead of the
//! PSN itself. The first byte is a type tag (`0x0F`), the other 15 are a
//! truncated `SHA-256(psn || "kestrel")`.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{Psn, Result, TypesError};

const TAG: u8 = 0x0F;
const SALT: &[u8] = b"kestrel";

/// Type-1 PSN hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PsnHash([u8; PsnHash::SIZE]);

impl PsnHash {
    /// Encoded size, tag included.
    pub const SIZE: usize = 16;

    pub fn new(psn: &Psn) -> Self {
        let digest = Sha256::new().chain_update(psn.as_bytes()).chain_update(SALT).finalize();
        let mut h = [0u8; Self::SIZE];
        h[0] = TAG;
        h[1..].copy_from_slice(&digest[..Self::SIZE - 1]);
        Self(h)
    }

    /// Decode a hash received on the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let h: [u8; Self::SIZE] = bytes
            .try_into()
            .map_err(|_| TypesError::InvalidHash(format!("expected {} bytes, got {}", Self::SIZE, bytes.len())))?;
        if h[0] != TAG {
            return Err(TypesError::InvalidHash(format!("unknown hash type 0x{:02X}", h[0])));
        }
        Ok(Self(h))
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

impl From<&Psn> for PsnHash {
    fn from(psn: &Psn) -> Self {
        Self::new(psn)
    }
}

impl fmt::Display for PsnHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PsnHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PsnHash({self})")
    }
}
