//! Committees and shares for tests.

use std::sync::Arc;

use qbft_rs::{
    threshold::split_secret_key,
    types::{
        committee::{Committee, Operator, Share},
        crypto_primitives::Keypair,
        data_types::{OperatorID, PublicKeyBytes},
        identifier::{Identifier, Role},
    },
};

/// A committee of `n` operators with IDs `1..=n`, sharing a validator key derived from `seed`, and the
/// share of every operator in it.
pub(crate) fn committee(n: u64, seed: u8) -> (Arc<Committee>, Vec<Share>) {
    let validator = Keypair::from_seed(&[seed; 32]).unwrap();
    let operator_ids: Vec<OperatorID> = (1..=n).map(OperatorID::new).collect();
    let threshold = quorum(n as usize);
    let keypairs = split_secret_key(validator.secret_key(), threshold, &operator_ids).unwrap();

    let committee = Arc::new(Committee::new(
        validator.public(),
        keypairs.iter().map(|(id, keypair)| Operator {
            id: *id,
            share_public_key: keypair.public(),
        }),
    ));
    let shares = keypairs
        .into_iter()
        .map(|(operator_id, keypair)| Share {
            committee: committee.clone(),
            operator_id,
            keypair: Arc::new(keypair),
        })
        .collect();
    (committee, shares)
}

pub(crate) fn attester(validator_public_key: &PublicKeyBytes) -> Identifier {
    Identifier::new(*validator_public_key, Role::Attester)
}

fn quorum(n: usize) -> usize {
    (2 * n + 2) / 3
}
