/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each storage variable is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Decided|([`Identifier`], [`Height`]) -> [`SignedMessage`]|Mapping between an identifier and height and the decided message (a Commit signed by a quorum) for that height. Only written if history is enabled.|
//! |Highest Decided|[`Identifier`] -> [`SignedMessage`]|The decided message with the highest height for each identifier.|
//! |Last Round Change|[`Identifier`] -> [`SignedMessage`]|The RoundChange with the highest (height, round) that this operator has seen for each identifier. Served to peers that sync round-change state.|
//!
//! # Persistence of state variables
//!
//! Each variable is stored as a **Borsh-serialized** value at a key formed by concatenating:
//! 1. The one-byte constant sharing the variable's name.
//! 2. The canonical [byte encoding](Identifier::to_bytes) of the identifier.
//! 3. For the "Decided" variable only, the big-endian encoding of the height, so that the keys of one
//!    identifier sort in height order.
//!
//! [`Identifier`]: crate::types::identifier::Identifier
//! [`Height`]: crate::types::data_types::Height
//! [`SignedMessage`]: crate::types::signed_messages::SignedMessage

use crate::types::{data_types::Height, identifier::Identifier};

// State variables
pub const DECIDED: [u8; 1] = [0];
pub const HIGHEST_DECIDED: [u8; 1] = [1];
pub const LAST_ROUND_CHANGE: [u8; 1] = [2];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

pub(crate) fn decided_key(identifier: &Identifier, height: Height) -> Vec<u8> {
    concat(
        &concat(&DECIDED, &identifier.to_bytes()),
        &height.to_be_bytes(),
    )
}

pub(crate) fn highest_decided_key(identifier: &Identifier) -> Vec<u8> {
    concat(&HIGHEST_DECIDED, &identifier.to_bytes())
}

pub(crate) fn last_round_change_key(identifier: &Identifier) -> Vec<u8> {
    concat(&LAST_ROUND_CHANGE, &identifier.to_bytes())
}
