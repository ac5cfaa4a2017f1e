/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: BLS12-381 signatures with public keys in G1 and signatures in G2,
//!    provided by the [`blst`] crate.
//!
//! BLS is used because signatures over the same message aggregate into one signature that verifies
//! against the signers' aggregated public keys, and because a quorum of signatures made with Shamir
//! shares of one secret key interpolates into a signature of that secret key
//! (see [`threshold`](crate::threshold)).

use rand_core::{OsRng, RngCore};

use super::data_types::{CryptoHash, DomainType, PublicKeyBytes, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature};
pub use blst::BLST_ERROR;

/// Ciphersuite tag for the proof-of-possession scheme with signatures in G2.
pub(crate) const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// A facade around [`SecretKey`] that implements methods for [`sign`](Self::sign)-ing messages as
/// well as a getter for the [`public`](Self::public) key associated with the secret key.
pub struct Keypair(SecretKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `secret_key`.
    pub fn new(secret_key: SecretKey) -> Keypair {
        Keypair(secret_key)
    }

    /// Derive a `Keypair` from at least 32 bytes of input keying material.
    pub fn from_seed(ikm: &[u8]) -> Result<Keypair, CryptoError> {
        SecretKey::key_gen(ikm, &[])
            .map(Keypair)
            .map_err(CryptoError::InvalidSecretKey)
    }

    /// Generate a fresh `Keypair` from the operating system's randomness source.
    pub fn generate() -> Result<Keypair, CryptoError> {
        let mut ikm = [0u8; 32];
        OsRng.fill_bytes(&mut ikm);
        Self::from_seed(&ikm)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message, DST, &[]).compress())
    }

    /// Get the compressed public key of this `Keypair`.
    pub fn public(&self) -> PublicKeyBytes {
        PublicKeyBytes::new(self.0.sk_to_pk().compress())
    }

    /// Get the wrapped secret key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.0
    }
}

/// Compute the root that is actually signed for an object with `root`: `SHA-256(root || domain)`.
pub fn signing_root(root: &CryptoHash, domain: DomainType) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(root.bytes());
    hasher.update(domain.bytes());
    CryptoHash::new(hasher.finalize().into())
}

/// Check that `signature` is a signature over `message` by the holder of `public_key`.
pub fn verify(signature: &SignatureBytes, message: &[u8], public_key: &PublicKeyBytes) -> bool {
    let Ok(signature) = Signature::from_bytes(&signature.bytes()) else {
        return false;
    };
    let Ok(public_key) = PublicKey::from_bytes(&public_key.bytes()) else {
        return false;
    };
    signature.verify(true, message, DST, &[], &public_key, true) == BLST_ERROR::BLST_SUCCESS
}

/// Check that `signature` is the aggregate of signatures over the same `message` by every holder of
/// `public_keys`.
pub fn fast_aggregate_verify(
    signature: &SignatureBytes,
    message: &[u8],
    public_keys: &[PublicKeyBytes],
) -> bool {
    if public_keys.is_empty() {
        return false;
    }
    let Ok(signature) = Signature::from_bytes(&signature.bytes()) else {
        return false;
    };
    let public_keys: Result<Vec<PublicKey>, BLST_ERROR> = public_keys
        .iter()
        .map(|public_key| PublicKey::from_bytes(&public_key.bytes()))
        .collect();
    let Ok(public_keys) = public_keys else {
        return false;
    };
    let public_key_refs: Vec<&PublicKey> = public_keys.iter().collect();
    signature.fast_aggregate_verify(true, message, DST, &public_key_refs)
        == BLST_ERROR::BLST_SUCCESS
}

/// Aggregate `signatures` into one signature.
pub fn aggregate_signatures(signatures: &[SignatureBytes]) -> Result<SignatureBytes, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::EmptyAggregate);
    }
    let signatures = signatures
        .iter()
        .map(|signature| Signature::from_bytes(&signature.bytes()))
        .collect::<Result<Vec<Signature>, BLST_ERROR>>()
        .map_err(CryptoError::InvalidSignature)?;
    let signature_refs: Vec<&Signature> = signatures.iter().collect();
    let aggregate = AggregateSignature::aggregate(&signature_refs, true)
        .map_err(CryptoError::InvalidSignature)?;
    Ok(SignatureBytes::new(aggregate.to_signature().compress()))
}

/// Check whether `signature` decodes into a point in the G2 subgroup.
pub fn is_valid_signature_encoding(signature: &SignatureBytes) -> bool {
    Signature::from_bytes(&signature.bytes())
        .map(|signature| signature.validate(true).is_ok())
        .unwrap_or(false)
}

/// Errors that arise when decoding or combining BLS keys and signatures.
#[derive(Debug)]
pub enum CryptoError {
    InvalidSignature(BLST_ERROR),
    InvalidPublicKey(BLST_ERROR),
    InvalidSecretKey(BLST_ERROR),
    EmptyAggregate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_signature_verifies_against_all_signers() {
        let keypairs: Vec<Keypair> = (0..3u8)
            .map(|i| Keypair::from_seed(&[i + 1; 32]).unwrap())
            .collect();
        let message = b"aggregate me";
        let signatures: Vec<SignatureBytes> =
            keypairs.iter().map(|keypair| keypair.sign(message)).collect();
        let public_keys: Vec<PublicKeyBytes> =
            keypairs.iter().map(|keypair| keypair.public()).collect();

        let aggregate = aggregate_signatures(&signatures).unwrap();
        assert!(fast_aggregate_verify(&aggregate, message, &public_keys));
        assert!(!fast_aggregate_verify(&aggregate, message, &public_keys[..2]));
        assert!(verify(&signatures[0], message, &public_keys[0]));
        assert!(!verify(&signatures[0], message, &public_keys[1]));
    }
}
