/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of every message variant sent over the [`Network`](super::network::Network).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{CryptoHash, Height, OperatorID, SignatureBytes},
    identifier::Identifier,
    signed_messages::SignedMessage,
};

/// All message variants broadcast between operators.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// A Proposal, Prepare, Commit, or RoundChange message, or a decided message.
    Consensus(SignedMessage),

    /// See [`PartialSignatureMessage`].
    PartialSignature(PartialSignatureMessage),
}

impl Message {
    /// Get the identifier of the inner message.
    pub fn identifier(&self) -> &Identifier {
        match self {
            Message::Consensus(msg) => msg.identifier(),
            Message::PartialSignature(msg) => &msg.identifier,
        }
    }

    /// Get the height of the inner message.
    pub fn height(&self) -> Height {
        match self {
            Message::Consensus(msg) => msg.height(),
            Message::PartialSignature(msg) => msg.height,
        }
    }
}

impl From<SignedMessage> for Message {
    fn from(value: SignedMessage) -> Self {
        Message::Consensus(value)
    }
}

impl From<PartialSignatureMessage> for Message {
    fn from(value: PartialSignatureMessage) -> Self {
        Message::PartialSignature(value)
    }
}

/// An operator's signature, made with its secret-key share, over the signing root of a decided value.
///
/// A quorum of these is interpolated into the validator's full signature.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PartialSignatureMessage {
    pub identifier: Identifier,
    pub height: Height,
    pub signer: OperatorID,
    pub signing_root: CryptoHash,
    pub partial_signature: SignatureBytes,
}
