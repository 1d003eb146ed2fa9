//! Anonymous public-key encryption to a node key.
//!
//! The sender is not identified; only the holder of the recipient's secret
//! key can decrypt.
//!
//! ```text
//! anon_encrypt(recipient_pk, plaintext):
//!   eph_sk <- random, eph_pk = X25519(eph_sk, G)
//!   shared = X25519(eph_sk, recipient_pk)
//!   key    = BLAKE3::derive_key(KEY_CONTEXT, shared || eph_pk || recipient_pk)
//!   nonce  = BLAKE3::derive_key(NONCE_CONTEXT, shared || eph_pk)[..12]
//!   return eph_pk || ChaCha20-Poly1305(key, nonce, plaintext, aad = eph_pk)
//! ```

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::x25519::{NodePublicKey, NodeSecretKey, SharedSecret, KEY_SIZE};
use crate::{CryptoError, Result};

const KEY_CONTEXT: &str = "CARMA v1 anon-encryption-key";
const NONCE_CONTEXT: &str = "CARMA v1 anon-encryption-nonce";

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Ciphertext length for a plaintext of `plaintext_len` bytes.
pub fn ciphertext_size(plaintext_len: usize) -> usize {
    KEY_SIZE + plaintext_len + TAG_SIZE
}

/// Encrypt `plaintext` so that only the owner of `recipient` can read it.
pub fn anon_encrypt(recipient: &NodePublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = NodeSecretKey::random();
    let eph_pk = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(recipient);
    let (key, nonce) = derive(&shared, eph_pk.as_bytes(), recipient.as_bytes());

    let sealed = ChaCha20Poly1305::new(Key::from_slice(&key))
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: eph_pk.as_bytes() })
        .map_err(|_| CryptoError::Anon("sealing failed".into()))?;
    let mut out = Vec::with_capacity(KEY_SIZE + sealed.len());
    out.extend_from_slice(eph_pk.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a ciphertext produced by [`anon_encrypt`].
pub fn anon_decrypt(recipient: &NodeSecretKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::Anon("ciphertext too short".into()));
    }
    let (eph_bytes, sealed) = ciphertext.split_at(KEY_SIZE);
    let eph_pk = NodePublicKey::from_slice(eph_bytes)?;
    let shared = recipient.diffie_hellman(&eph_pk);
    let (key, nonce) = derive(&shared, eph_pk.as_bytes(), recipient.public_key().as_bytes());
    ChaCha20Poly1305::new(Key::from_slice(&key))
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: sealed, aad: eph_pk.as_bytes() })
        .map_err(|_| CryptoError::AeadDecryption)
}

fn derive(shared: &SharedSecret, eph_pk: &[u8; KEY_SIZE], recipient_pk: &[u8; KEY_SIZE]) -> ([u8; 32], [u8; NONCE_SIZE]) {
    let mut key_material = Vec::with_capacity(3 * KEY_SIZE);
    key_material.extend_from_slice(shared.as_bytes());
    key_material.extend_from_slice(eph_pk);
    key_material.extend_from_slice(recipient_pk);
    let key = blake3::derive_key(KEY_CONTEXT, &key_material);

    let nonce_full = blake3::derive_key(NONCE_CONTEXT, &key_material[..2 * KEY_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&nonce_full[..NONCE_SIZE]);
    (key, nonce)
}
