//! Verifiable random function shell.
//!
//! The backend is a closed set chosen by name in the global parameters.
//! Every node derives the same backend from the same JSON, so there is no
//! process-wide registry.
//!
//! ## Tickets
//!
//! ```text
//! ticket_input(epoch_nonce) = 0x01 || epoch_nonce
//! ticket = eval(vrf_sk, ticket_input(epoch_nonce))
//! ```
//!
//! A ticket the node evaluated itself is trusted immediately. A ticket
//! received from elsewhere starts unverified and is checked against the
//! sender's VRF public key before use; a successful check is cached.

use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;
use schnorrkel::keys::{ExpansionMode, MiniSecretKey, PublicKey};
use schnorrkel::signing_context;
use schnorrkel::vrf::{VRFPreOut, VRFProof};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{bucket, check_len, CryptoError, Result};

/// Domain tag prepended to the epoch nonce for ticket evaluation.
pub const TICKET_DOMAIN_TAG: u8 = 0x01;

/// Transcript context for every sr25519 VRF evaluation.
const SR25519_CONTEXT: &[u8] = b"carma vrf";

/// Encoded length of an sr25519 VRF pre-output.
const SR25519_OUTPUT_LENGTH: usize = 32;

/// Available VRF backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VrfShell {
    /// sr25519 VRF over Ristretto255 (schnorrkel).
    #[default]
    Schnorrkel,
}

/// A freshly generated VRF keypair in wire encoding.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VrfKeypair {
    /// Public key bytes (`pk_size()` long).
    pub public: Vec<u8>,
    /// Secret key bytes (`sk_size()` long).
    pub secret: Vec<u8>,
}

impl VrfShell {
    /// Look up a backend by its JSON name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "schnorrkel" => Ok(VrfShell::Schnorrkel),
            other => Err(CryptoError::UnknownVrf(other.to_string())),
        }
    }

    /// JSON name of the backend.
    pub fn name(self) -> &'static str {
        match self {
            VrfShell::Schnorrkel => "schnorrkel",
        }
    }

    pub fn pk_size(self) -> usize {
        match self {
            VrfShell::Schnorrkel => schnorrkel::PUBLIC_KEY_LENGTH,
        }
    }

    pub fn sk_size(self) -> usize {
        match self {
            VrfShell::Schnorrkel => schnorrkel::MINI_SECRET_KEY_LENGTH,
        }
    }

    pub fn proof_size(self) -> usize {
        match self {
            VrfShell::Schnorrkel => schnorrkel::vrf::VRF_PROOF_LENGTH,
        }
    }

    pub fn output_size(self) -> usize {
        match self {
            VrfShell::Schnorrkel => SR25519_OUTPUT_LENGTH,
        }
    }

    /// Generate a new keypair from the OS RNG.
    pub fn keygen(self) -> VrfKeypair {
        match self {
            VrfShell::Schnorrkel => {
                let mini = MiniSecretKey::generate();
                let public = mini.expand_to_keypair(ExpansionMode::Uniform).public;
                VrfKeypair {
                    public: public.to_bytes().to_vec(),
                    secret: mini.to_bytes().to_vec(),
                }
            }
        }
    }

    /// Recompute the public key belonging to `sk`.
    pub fn public_from_secret(self, sk: &[u8]) -> Result<Vec<u8>> {
        match self {
            VrfShell::Schnorrkel => {
                let mini = sr25519_secret(sk)?;
                Ok(mini
                    .expand_to_keypair(ExpansionMode::Uniform)
                    .public
                    .to_bytes()
                    .to_vec())
            }
        }
    }

    /// Evaluate the VRF, returning `(proof, output)`.
    pub fn eval(self, sk: &[u8], input: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        match self {
            VrfShell::Schnorrkel => {
                let keypair = sr25519_secret(sk)?.expand_to_keypair(ExpansionMode::Uniform);
                let context = signing_context(SR25519_CONTEXT);
                let (inout, proof, _) = keypair.vrf_sign(context.bytes(input));
                Ok((proof.to_bytes().to_vec(), inout.to_preout().to_bytes().to_vec()))
            }
        }
    }

    /// Check that `(proof, output)` was produced by `eval` under the secret
    /// key matching `pk` on `input`. Malformed encodings verify as false.
    pub fn verify(self, pk: &[u8], input: &[u8], proof: &[u8], output: &[u8]) -> bool {
        match self {
            VrfShell::Schnorrkel => {
                if check_len(pk, self.pk_size()).is_err()
                    || check_len(proof, self.proof_size()).is_err()
                    || check_len(output, self.output_size()).is_err()
                {
                    return false;
                }
                let (Ok(public), Ok(proof), Ok(preout)) = (
                    PublicKey::from_bytes(pk),
                    VRFProof::from_bytes(proof),
                    VRFPreOut::from_bytes(output),
                ) else {
                    return false;
                };
                let context = signing_context(SR25519_CONTEXT);
                public.vrf_verify(context.bytes(input), &preout, &proof).is_ok()
            }
        }
    }

    /// Input bytes for an epoch ticket.
    pub fn ticket_input(epoch_nonce: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(1 + epoch_nonce.len());
        input.push(TICKET_DOMAIN_TAG);
        input.extend_from_slice(epoch_nonce);
        input
    }

    /// Evaluate a ticket with our own secret key. The result is trusted.
    pub fn ticket_eval(self, sk: &[u8], input: &[u8]) -> Result<EvalResult> {
        let (proof, output) = self.eval(sk, input)?;
        let result = EvalResult::unverified(proof, output);
        result.set_verified(true);
        Ok(result)
    }

    /// Verifiable random integer in `[0, modulus)`.
    ///
    /// The VRF output of `prefix || input` is a compressed curve point, so
    /// it is hashed to uniform bits before reduction.
    pub fn dice_roll(self, sk: &[u8], prefix: &[u8], input: &[u8], modulus: &BigUint) -> Result<BigUint> {
        if *modulus == BigUint::from(0u32) {
            return Err(CryptoError::InvalidInput("dice_roll modulus is zero".into()));
        }
        let mut message = Vec::with_capacity(prefix.len() + input.len());
        message.extend_from_slice(prefix);
        message.extend_from_slice(input);
        let (_, output) = self.eval(sk, &message)?;
        Ok(bucket::reduce(&bucket::sha512(&[&output]), modulus))
    }
}

fn sr25519_secret(sk: &[u8]) -> Result<MiniSecretKey> {
    check_len(sk, schnorrkel::MINI_SECRET_KEY_LENGTH)?;
    MiniSecretKey::from_bytes(sk).map_err(|e| CryptoError::Vrf(e.to_string()))
}

/// A VRF proof and output pair with a cached verification flag.
#[derive(Debug)]
pub struct EvalResult {
    proof: Vec<u8>,
    output: Vec<u8>,
    verified: AtomicBool,
}

impl EvalResult {
    /// Wrap a received pair. It must be verified before it is trusted.
    pub fn unverified(proof: Vec<u8>, output: Vec<u8>) -> Self {
        Self {
            proof,
            output,
            verified: AtomicBool::new(false),
        }
    }

    pub fn proof(&self) -> &[u8] {
        &self.proof
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    pub fn set_verified(&self, verified: bool) {
        self.verified.store(verified, Ordering::Release);
    }

    /// Verify against `pk` and `input` unless already verified.
    pub fn verify(&self, vrf: VrfShell, pk: &[u8], input: &[u8]) -> bool {
        if self.is_verified() {
            return true;
        }
        let ok = vrf.verify(pk, input, &self.proof, &self.output);
        if ok {
            self.set_verified(true);
        }
        ok
    }
}

impl Clone for EvalResult {
    fn clone(&self) -> Self {
        Self {
            proof: self.proof.clone(),
            output: self.output.clone(),
            verified: AtomicBool::new(self.is_verified()),
        }
    }
}

impl PartialEq for EvalResult {
    fn eq(&self, other: &Self) -> bool {
        self.proof == other.proof && self.output == other.output
    }
}

impl Eq for EvalResult {}
