/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Requests and responses exchanged between operators to catch up on decided and round-change state.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{data_types::Height, identifier::Identifier, signed_messages::SignedMessage};

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum SyncRequest {
    /// Ask for the peer's highest decided message for `identifier`.
    HighestDecided { identifier: Identifier },

    /// Ask for the peer's decided messages for `identifier` with heights in `[from, to]`.
    DecidedHistory {
        identifier: Identifier,
        from: Height,
        to: Height,
    },

    /// Ask for the peer's last round change for `identifier`.
    LastRoundChange { identifier: Identifier },
}

impl SyncRequest {
    pub fn identifier(&self) -> &Identifier {
        match self {
            SyncRequest::HighestDecided { identifier }
            | SyncRequest::DecidedHistory { identifier, .. }
            | SyncRequest::LastRoundChange { identifier } => identifier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum SyncResponse {
    /// Decided messages in ascending height order. Empty if the peer has none.
    Decided(Vec<SignedMessage>),

    /// The peer's last round change, if any.
    RoundChange(Option<SignedMessage>),

    /// The peer does not keep decided history.
    HistoryDisabled,

    /// The peer failed to read its own storage.
    Error,
}
