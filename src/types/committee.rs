/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The committee of operators that jointly hold shares of one validator's key.
//!
//! A [`Committee`] is created once, when the validator's duty assignment is known, and is never
//! mutated afterwards. Every [`Instance`](crate::instance::Instance) and
//! [`Controller`](crate::controller::Controller) for the validator holds a shared, read-only
//! reference to it.
//!
//! ## Quorums
//!
//! For a committee of `N` operators tolerating `f = ⌊(N - 1) / 3⌋` faulty operators:
//! - The **quorum** is the smallest signer count `F` such that `3F >= 2N`. Any two quorums intersect in
//!   at least one honest operator.
//! - The **partial quorum** is `f + 1`. Any partial quorum contains at least one honest operator.
//!
//! ## Leader selection
//!
//! The leader of `(height, round)` is the operator at index `(height + round - 1) mod N` in the
//! ID-sorted operator list.

use std::{collections::BTreeMap, sync::Arc};

use super::{
    crypto_primitives::Keypair,
    data_types::{Height, OperatorID, PublicKeyBytes, Round},
};

/// A single member of a [`Committee`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operator {
    pub id: OperatorID,
    pub share_public_key: PublicKeyBytes,
}

/// Immutable description of the operators that run consensus for one validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    validator_public_key: PublicKeyBytes,
    operators: BTreeMap<OperatorID, PublicKeyBytes>,
}

impl Committee {
    /// Create a `Committee` for the validator with `validator_public_key` from its `operators`.
    ///
    /// Duplicate operator IDs keep the last public-key share given.
    pub fn new(
        validator_public_key: PublicKeyBytes,
        operators: impl IntoIterator<Item = Operator>,
    ) -> Committee {
        Committee {
            validator_public_key,
            operators: operators
                .into_iter()
                .map(|operator| (operator.id, operator.share_public_key))
                .collect(),
        }
    }

    /// Get the full public key of the validator that this committee signs for.
    pub fn validator_public_key(&self) -> &PublicKeyBytes {
        &self.validator_public_key
    }

    /// Get the number of operators in the committee.
    pub fn size(&self) -> usize {
        self.operators.len()
    }

    /// Smallest signer count `F` such that `3F >= 2 * size()`.
    pub fn quorum(&self) -> usize {
        (2 * self.size() + 2) / 3
    }

    /// `f + 1`, where `f` is the number of faulty operators this committee tolerates.
    pub fn partial_quorum(&self) -> usize {
        self.size().saturating_sub(1) / 3 + 1
    }

    /// Whether `signers` distinct signers form a quorum.
    pub fn has_quorum(&self, signers: usize) -> bool {
        3 * signers >= 2 * self.size()
    }

    /// Whether `signers` distinct signers form a partial quorum.
    pub fn has_partial_quorum(&self, signers: usize) -> bool {
        signers >= self.partial_quorum()
    }

    /// Check whether `operator` is a member of this committee.
    pub fn contains(&self, operator: &OperatorID) -> bool {
        self.operators.contains_key(operator)
    }

    /// Get the public-key share of `operator`, if it is a member of this committee.
    pub fn share_public_key(&self, operator: &OperatorID) -> Option<&PublicKeyBytes> {
        self.operators.get(operator)
    }

    /// Iterate through the operators in ascending ID order.
    pub fn operators(&self) -> impl Iterator<Item = Operator> + '_ {
        self.operators
            .iter()
            .map(|(id, share_public_key)| Operator {
                id: *id,
                share_public_key: *share_public_key,
            })
    }

    /// Iterate through the operator IDs in ascending order.
    pub fn operator_ids(&self) -> impl Iterator<Item = &OperatorID> {
        self.operators.keys()
    }

    /// Deterministically select the leader of `round` at `height` by round robin.
    ///
    /// # Panics
    ///
    /// Panics if the committee is empty.
    pub fn leader(&self, height: Height, round: Round) -> OperatorID {
        let n = self.size() as u64;
        assert!(n > 0, "Cannot select a leader from an empty committee");
        let index = height
            .int()
            .wrapping_add(round.int())
            .wrapping_sub(1)
            % n;
        // Safety: index < n.
        *self.operators.keys().nth(index as usize).unwrap()
    }
}

/// This operator's view of one validator: the committee, its own ID in it, and its secret-key share.
#[derive(Clone)]
pub struct Share {
    pub committee: Arc<Committee>,
    pub operator_id: OperatorID,
    pub keypair: Arc<Keypair>,
}

impl Share {
    /// Create a new `Share`, failing if `committee` is empty or `operator_id` is not a member of it.
    pub fn new(
        committee: Committee,
        operator_id: OperatorID,
        keypair: Keypair,
    ) -> Result<Share, ShareError> {
        let share = Share {
            committee: Arc::new(committee),
            operator_id,
            keypair: Arc::new(keypair),
        };
        share.check()?;
        Ok(share)
    }

    /// Check that the committee can run consensus and that this operator is one of its members.
    pub fn check(&self) -> Result<(), ShareError> {
        if self.committee.size() == 0 {
            return Err(ShareError::EmptyCommittee);
        }
        if !self.committee.contains(&self.operator_id) {
            return Err(ShareError::NotAMember {
                operator: self.operator_id,
            });
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ShareError {
    EmptyCommittee,
    NotAMember { operator: OperatorID },
}
