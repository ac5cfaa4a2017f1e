/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Post-consensus threshold signing.
//!
//! The validator's secret key is Shamir-shared among the committee ([`keys`]). Once an instance
//! decides, every operator signs the decided value's signing root with its share and broadcasts the
//! result in a [`PartialSignatureMessage`]. Each operator collects these in a
//! [`PartialSignatureState`](signature_state::PartialSignatureState), and as soon as it holds a quorum
//! of valid ones, interpolates them into the validator's full signature ([`reconstruction`]).

use crate::{
    networking::messages::PartialSignatureMessage,
    types::{
        committee::Share,
        crypto_primitives::{signing_root, CryptoError},
        data_types::{CryptoHash, DomainType, Height, OperatorID, Value},
        identifier::Identifier,
    },
};

pub mod keys;

pub mod reconstruction;

pub mod signature_state;

pub use keys::{generate_committee, split_secret_key};
pub use reconstruction::reconstruct_signature;
pub use signature_state::{CollectionStatus, PartialSignatureState, ReconstructedSignature};

/// The root that operators sign, with their shares, once `value` is decided.
pub fn duty_signing_root(value: &Value, domain: DomainType) -> CryptoHash {
    signing_root(&value.digest(), domain)
}

/// Sign the decided `value` with `share`'s secret-key share.
pub fn sign_partial(
    share: &Share,
    identifier: Identifier,
    height: Height,
    value: &Value,
    domain: DomainType,
) -> PartialSignatureMessage {
    let signing_root = duty_signing_root(value, domain);
    PartialSignatureMessage {
        identifier,
        height,
        signer: share.operator_id,
        signing_root,
        partial_signature: share.keypair.sign(&signing_root.bytes()),
    }
}

#[derive(Debug)]
pub enum ThresholdError {
    InvalidThreshold { threshold: usize, shares: usize },
    ZeroOperatorID,
    DuplicateOperatorID(OperatorID),
    InvalidSecretKey(CryptoError),
    NotEnoughPartials { collected: usize, required: usize },
    InvalidPartialEncoding { signer: OperatorID },
    UnknownSigner(OperatorID),
    UnexpectedSigningRoot { signer: OperatorID },
    InvalidPartialSignature(OperatorID),
    InvalidReconstructedSignature { height: Height },
    CollectionTimedOut { collected: usize, required: usize },
}
