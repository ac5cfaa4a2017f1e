/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identifiers that partition consensus state by validator and duty role.

use std::fmt::{self, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::PublicKeyBytes;

/// Kind of duty that a validator performs. Each role of each validator runs its own, independent
/// sequence of consensus instances.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub enum Role {
    Attester,
    Aggregator,
    Proposer,
    SyncCommittee,
    SyncCommitteeContribution,
}

impl Role {
    /// Every role, in tag order.
    pub const ALL: [Role; 5] = [
        Role::Attester,
        Role::Aggregator,
        Role::Proposer,
        Role::SyncCommittee,
        Role::SyncCommitteeContribution,
    ];

    /// Four-byte tag of this role used in the canonical encoding of an [`Identifier`].
    pub const fn tag(&self) -> [u8; 4] {
        match self {
            Role::Attester => [0, 0, 0, 0],
            Role::Aggregator => [1, 0, 0, 0],
            Role::Proposer => [2, 0, 0, 0],
            Role::SyncCommittee => [3, 0, 0, 0],
            Role::SyncCommitteeContribution => [4, 0, 0, 0],
        }
    }
}

/// The (validator public key, duty role) pair that partitions all consensus state.
///
/// Every identifier has exactly one [`Controller`](crate::controller::Controller), one sequence of
/// heights, and one storage namespace.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Identifier {
    pub validator_public_key: PublicKeyBytes,
    pub role: Role,
}

impl Identifier {
    /// Length of the output of [`to_bytes`](Self::to_bytes).
    pub const LEN: usize = 52;

    /// Create an `Identifier` for the `role` duties of the validator with `validator_public_key`.
    pub const fn new(validator_public_key: PublicKeyBytes, role: Role) -> Self {
        Self {
            validator_public_key,
            role,
        }
    }

    /// Get the canonical byte encoding of this identifier: the 48-byte validator public key followed by
    /// the 4-byte role tag.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[..48].copy_from_slice(&self.validator_public_key.bytes());
        bytes[48..].copy_from_slice(&self.role.tag());
        bytes
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.validator_public_key.bytes());
        write!(f, "{}/{:?}", &encoded[..7], self.role)
    }
}
