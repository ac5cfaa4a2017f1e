/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shamir secret sharing of a BLS secret key.
//!
//! The secret is the constant term of a random polynomial `f` of degree `threshold - 1` over the scalar
//! field. Operator `i` receives `f(i)`, so any `threshold` shares determine `f(0)` and fewer reveal
//! nothing about it.

use std::collections::BTreeMap;

use blst::BLST_ERROR;
use blstrs::Scalar;
use ff::Field;
use rand_core::OsRng;

use crate::types::{
    committee::{Committee, Operator},
    crypto_primitives::{CryptoError, Keypair, SecretKey},
    data_types::OperatorID,
};

use super::ThresholdError;

/// Split `secret` into one share per operator in `operator_ids`, any `threshold` of which can
/// reconstruct signatures made with `secret`.
pub fn split_secret_key(
    secret: &SecretKey,
    threshold: usize,
    operator_ids: &[OperatorID],
) -> Result<BTreeMap<OperatorID, Keypair>, ThresholdError> {
    if threshold == 0 || threshold > operator_ids.len() {
        return Err(ThresholdError::InvalidThreshold {
            threshold,
            shares: operator_ids.len(),
        });
    }
    if operator_ids.iter().any(|id| id.int() == 0) {
        return Err(ThresholdError::ZeroOperatorID);
    }

    let constant_term = Option::<Scalar>::from(Scalar::from_bytes_be(&secret.to_bytes())).ok_or(
        ThresholdError::InvalidSecretKey(CryptoError::InvalidSecretKey(BLST_ERROR::BLST_BAD_SCALAR)),
    )?;
    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(constant_term);
    for _ in 1..threshold {
        coefficients.push(Scalar::random(OsRng));
    }

    let mut shares = BTreeMap::new();
    for id in operator_ids {
        let share = evaluate(&coefficients, &Scalar::from(id.int()));
        let secret_key = SecretKey::from_bytes(&share.to_bytes_be())
            .map_err(|err| ThresholdError::InvalidSecretKey(CryptoError::InvalidSecretKey(err)))?;
        if shares.insert(*id, Keypair::new(secret_key)).is_some() {
            return Err(ThresholdError::DuplicateOperatorID(*id));
        }
    }
    Ok(shares)
}

/// Split a freshly generated validator key among `operator_ids`, and return the committee that the
/// shares belong to together with each operator's share.
pub fn generate_committee(
    threshold: usize,
    operator_ids: &[OperatorID],
) -> Result<(Committee, BTreeMap<OperatorID, Keypair>), ThresholdError> {
    let validator = Keypair::generate().map_err(ThresholdError::InvalidSecretKey)?;
    let shares = split_secret_key(validator.secret_key(), threshold, operator_ids)?;
    let committee = Committee::new(
        validator.public(),
        shares.iter().map(|(id, keypair)| Operator {
            id: *id,
            share_public_key: keypair.public(),
        }),
    );
    Ok((committee, shares))
}

// Horner's rule.
fn evaluate(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::verify;

    fn ids(n: u64) -> Vec<OperatorID> {
        (1..=n).map(OperatorID::new).collect()
    }

    #[test]
    fn threshold_of_one_hands_out_the_secret() {
        let secret = Keypair::from_seed(&[9u8; 32]).unwrap();
        let shares = split_secret_key(secret.secret_key(), 1, &ids(4)).unwrap();
        for share in shares.values() {
            assert_eq!(share.public(), secret.public());
        }
    }

    #[test]
    fn shares_are_distinct_keys() {
        let secret = Keypair::from_seed(&[9u8; 32]).unwrap();
        let shares = split_secret_key(secret.secret_key(), 3, &ids(4)).unwrap();
        assert_eq!(shares.len(), 4);
        let publics: std::collections::HashSet<_> = shares.values().map(|k| k.public()).collect();
        assert_eq!(publics.len(), 4);
        assert!(!publics.contains(&secret.public()));

        let message = b"share";
        for share in shares.values() {
            assert!(verify(&share.sign(message), message, &share.public()));
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        let secret = Keypair::from_seed(&[9u8; 32]).unwrap();
        assert!(matches!(
            split_secret_key(secret.secret_key(), 5, &ids(4)),
            Err(ThresholdError::InvalidThreshold { threshold: 5, shares: 4 })
        ));
        assert!(matches!(
            split_secret_key(secret.secret_key(), 0, &ids(4)),
            Err(ThresholdError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            split_secret_key(secret.secret_key(), 1, &[OperatorID::new(0)]),
            Err(ThresholdError::ZeroOperatorID)
        ));
        assert!(matches!(
            split_secret_key(secret.secret_key(), 1, &[OperatorID::new(2), OperatorID::new(2)]),
            Err(ThresholdError::DuplicateOperatorID(_))
        ));
    }

    #[test]
    fn generated_committee_lists_share_public_keys() {
        let (committee, shares) = generate_committee(3, &ids(4)).unwrap();
        assert_eq!(committee.size(), 4);
        for (id, keypair) in &shares {
            assert_eq!(committee.share_public_key(id), Some(&keypair.public()));
        }
    }
}
