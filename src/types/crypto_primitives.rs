/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use borsh::BorshSerialize;

use super::data_types::{CryptoHash, SignatureBytes, VerifyingKeyBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the bytes of the `VerifyingKey` of this `Keypair`, the form in which identities are stored in
    /// transactions, blocks and the stake table.
    pub fn identity(&self) -> VerifyingKeyBytes {
        VerifyingKeyBytes::new(self.0.verifying_key().to_bytes())
    }
}

/// Check that `signature` is a valid signature by `signer` over `message`.
///
/// Returns `false` if `signer` is not a valid Ed25519 point.
pub fn verify_signature(
    signer: &VerifyingKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    match VerifyingKey::from_bytes(&signer.bytes()) {
        Ok(verifying_key) => verifying_key
            .verify(message, &Signature::from_bytes(&signature.bytes()))
            .is_ok(),
        Err(_) => false,
    }
}

/// Get the borsh encoding of `value`.
///
/// Borsh encoding of the crate's own types never fails: they only hold integers, strings, byte arrays,
/// finite floats, and collections of these.
pub fn encode<T: BorshSerialize>(value: &T) -> Vec<u8> {
    value.try_to_vec().unwrap()
}

/// Hash the concatenation of `parts`, in order.
pub fn hash_parts(parts: &[Vec<u8>]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}
