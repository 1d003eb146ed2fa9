//! X25519 node keys (RFC 7748).
//!
//! Every phonebook entry publishes one of these as `pk`; the owning node
//! keeps the matching `sk` in its local config.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{check_len, Result};

/// Key length shared by public and secret node keys.
pub const KEY_SIZE: usize = 32;

/// A node's long-lived secret key.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct NodeSecretKey {
    inner: StaticSecret,
}

/// A node's published public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodePublicKey {
    bytes: [u8; KEY_SIZE],
}

/// Raw DH output. Only ever fed to a KDF.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; KEY_SIZE],
}

impl NodeSecretKey {
    /// Generate a new random secret key.
    pub fn random() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Decode from wire bytes, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, KEY_SIZE)?;
        let mut raw = [0u8; KEY_SIZE];
        raw.copy_from_slice(bytes);
        let key = Self {
            inner: StaticSecret::from(raw),
        };
        raw.zeroize();
        Ok(key)
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.inner.to_bytes()
    }

    pub fn public_key(&self) -> NodePublicKey {
        NodePublicKey {
            bytes: PublicKey::from(&self.inner).to_bytes(),
        }
    }

    pub fn diffie_hellman(&self, their_public: &NodePublicKey) -> SharedSecret {
        let shared = self.inner.diffie_hellman(&PublicKey::from(their_public.bytes));
        SharedSecret {
            bytes: *shared.as_bytes(),
        }
    }
}

impl NodePublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Decode from wire bytes, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, KEY_SIZE)?;
        let mut raw = [0u8; KEY_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Self { bytes: raw })
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

/// Fresh `(public, secret)` pair for a new node.
pub fn keygen() -> (NodePublicKey, NodeSecretKey) {
    let secret = NodeSecretKey::random();
    (secret.public_key(), secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffie_hellman_agreement() {
        let (alice_pk, alice_sk) = keygen();
        let (bob_pk, bob_sk) = keygen();
        assert_eq!(
            alice_sk.diffie_hellman(&bob_pk).as_bytes(),
            bob_sk.diffie_hellman(&alice_pk).as_bytes()
        );
    }

    #[test]
    fn test_from_slice_checks_length() {
        assert!(NodeSecretKey::from_slice(&[7u8; 31]).is_err());
        assert!(NodePublicKey::from_slice(&[7u8; 33]).is_err());
        let sk = NodeSecretKey::from_slice(&[7u8; 32]).expect("secret");
        let restored = NodeSecretKey::from_slice(&sk.to_bytes()).expect("secret");
        assert_eq!(sk.public_key(), restored.public_key());
    }

    #[test]
    fn test_rfc7748_section6_1() {
        let alice_private =
            hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .expect("valid hex");
        let alice_public =
            hex::decode("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a")
                .expect("valid hex");
        let sk = NodeSecretKey::from_slice(&alice_private).expect("secret");
        assert_eq!(sk.public_key().to_bytes().to_vec(), alice_public);
    }
}
