/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus messages, their payloads, and signed (possibly aggregated) envelopes around them.
//!
//! ## Roots and signatures
//!
//! The **root** of a [`Message`] is the SHA-256 hash of its Borsh serialization. The bytes that are
//! actually signed are the [signing root](crate::types::crypto_primitives::signing_root) of the
//! message root under the configured [`DomainType`].
//!
//! ## Aggregation
//!
//! Because every signer of a given message signs the same signing root, a set of single-signer
//! [`SignedMessage`]s over the same `Message` can be [aggregated](SignedMessage::aggregate) into one
//! `SignedMessage` whose signature verifies against the aggregate of its signers' public-key shares.
//! The `signers` of a `SignedMessage` are always sorted in ascending order and free of duplicates.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    committee::Committee,
    crypto_primitives::{
        aggregate_signatures, fast_aggregate_verify, signing_root, CryptoError, Keypair,
    },
    data_types::{CryptoHash, DomainType, Height, OperatorID, PublicKeyBytes, Round, SignatureBytes, Value},
    identifier::Identifier,
};

/// The four kinds of consensus messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum MessageType {
    Proposal,
    Prepare,
    Commit,
    RoundChange,
}

/// The signed part of a consensus message.
///
/// `data` holds the Borsh serialization of the payload type matching `msg_type`:
/// - [`Proposal`](MessageType::Proposal): [`ProposalData`].
/// - [`Prepare`](MessageType::Prepare): [`PrepareData`].
/// - [`Commit`](MessageType::Commit): [`CommitData`].
/// - [`RoundChange`](MessageType::RoundChange): [`RoundChangeData`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub height: Height,
    pub round: Round,
    pub identifier: Identifier,
    pub data: Vec<u8>,
}

impl Message {
    /// Create a `Message` of `msg_type` carrying the serialization of `payload`.
    pub fn new<P: BorshSerialize>(
        msg_type: MessageType,
        height: Height,
        round: Round,
        identifier: Identifier,
        payload: &P,
    ) -> Result<Message, MessageError> {
        Ok(Message {
            msg_type,
            height,
            round,
            identifier,
            data: payload.try_to_vec().map_err(MessageError::SerializeError)?,
        })
    }

    /// Compute the root of this message: the SHA-256 hash of its Borsh serialization.
    pub fn root(&self) -> Result<CryptoHash, MessageError> {
        Ok(CryptoHash::sha256(
            &self.try_to_vec().map_err(MessageError::SerializeError)?,
        ))
    }

    /// Decode the payload of a [`Proposal`](MessageType::Proposal) message.
    pub fn proposal_data(&self) -> Result<ProposalData, MessageError> {
        self.payload(MessageType::Proposal)
    }

    /// Decode the payload of a [`Prepare`](MessageType::Prepare) message.
    pub fn prepare_data(&self) -> Result<PrepareData, MessageError> {
        self.payload(MessageType::Prepare)
    }

    /// Decode the payload of a [`Commit`](MessageType::Commit) message.
    pub fn commit_data(&self) -> Result<CommitData, MessageError> {
        self.payload(MessageType::Commit)
    }

    /// Decode the payload of a [`RoundChange`](MessageType::RoundChange) message.
    pub fn round_change_data(&self) -> Result<RoundChangeData, MessageError> {
        self.payload(MessageType::RoundChange)
    }

    /// Get the value carried by a Proposal, Prepare, or Commit message.
    ///
    /// RoundChange messages carry no value of their own and yield
    /// [`MessageError::UnexpectedType`].
    pub fn value(&self) -> Result<Value, MessageError> {
        match self.msg_type {
            MessageType::Proposal => Ok(self.proposal_data()?.value),
            MessageType::Prepare => Ok(self.prepare_data()?.value),
            MessageType::Commit => Ok(self.commit_data()?.value),
            MessageType::RoundChange => Err(MessageError::UnexpectedType {
                expected: MessageType::Commit,
                actual: MessageType::RoundChange,
            }),
        }
    }

    fn payload<P: BorshDeserialize>(&self, expected: MessageType) -> Result<P, MessageError> {
        if self.msg_type != expected {
            return Err(MessageError::UnexpectedType {
                expected,
                actual: self.msg_type,
            });
        }
        P::try_from_slice(&self.data).map_err(MessageError::DeserializeError)
    }
}

/// Payload of a Proposal.
///
/// For rounds after the first, `round_change_justification` must hold a quorum of RoundChange
/// messages for the proposal's round, and, if any of them claims a prepared state,
/// `prepare_justification` must hold a quorum of Prepare messages for the highest such state.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ProposalData {
    pub value: Value,
    pub round_change_justification: Vec<SignedMessage>,
    pub prepare_justification: Vec<SignedMessage>,
}

/// Payload of a Prepare.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PrepareData {
    pub value: Value,
}

/// Payload of a Commit.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct CommitData {
    pub value: Value,
}

/// Payload of a RoundChange: the sender's prepared state, if it reached one before timing out.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct RoundChangeData {
    pub prepared: Option<PreparedState>,
}

/// A round and value that were backed by a quorum of Prepare messages, together with those
/// messages as proof.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PreparedState {
    pub round: Round,
    pub value: Value,
    pub justification: Vec<SignedMessage>,
}

/// A [`Message`] together with an (aggregated) signature over it and the sorted set of its signers.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignedMessage {
    pub signature: SignatureBytes,
    pub signers: Vec<OperatorID>,
    pub message: Message,
}

impl SignedMessage {
    /// Sign `message` as `signer` with `keypair` under `domain`.
    pub fn sign(
        message: Message,
        signer: OperatorID,
        keypair: &Keypair,
        domain: DomainType,
    ) -> Result<SignedMessage, MessageError> {
        let signing_root = signing_root(&message.root()?, domain);
        Ok(SignedMessage {
            signature: keypair.sign(&signing_root.bytes()),
            signers: vec![signer],
            message,
        })
    }

    pub fn msg_type(&self) -> MessageType {
        self.message.msg_type
    }

    pub fn height(&self) -> Height {
        self.message.height
    }

    pub fn round(&self) -> Round {
        self.message.round
    }

    pub fn identifier(&self) -> &Identifier {
        &self.message.identifier
    }

    /// See [`Message::value`].
    pub fn value(&self) -> Result<Value, MessageError> {
        self.message.value()
    }

    /// Compute the bytes that every signer of this message signed.
    pub fn signing_root(&self, domain: DomainType) -> Result<CryptoHash, MessageError> {
        Ok(signing_root(&self.message.root()?, domain))
    }

    /// Check that every signer is a member of `committee`, and that the signature verifies against the
    /// aggregate of the signers' public-key shares over this message's signing root under `domain`.
    pub fn verify(&self, committee: &Committee, domain: DomainType) -> Result<(), MessageError> {
        if self.signers.is_empty() {
            return Err(MessageError::NoSigners);
        }
        let public_keys = self
            .signers
            .iter()
            .map(|signer| {
                committee
                    .share_public_key(signer)
                    .copied()
                    .ok_or(MessageError::UnknownSigner { signer: *signer })
            })
            .collect::<Result<Vec<PublicKeyBytes>, MessageError>>()?;
        let signing_root = self.signing_root(domain)?;
        if fast_aggregate_verify(&self.signature, &signing_root.bytes(), &public_keys) {
            Ok(())
        } else {
            Err(MessageError::InvalidSignature)
        }
    }

    /// Combine `self` and `other`, two signed copies of the same `Message` with disjoint signer sets,
    /// into one `SignedMessage` signed by the union of their signers.
    ///
    /// Neither input is modified. Fails with [`MessageError::DuplicateSigner`] if any operator signed
    /// both, and with [`MessageError::RootMismatch`] if they carry different messages.
    pub fn aggregate(&self, other: &SignedMessage) -> Result<SignedMessage, MessageError> {
        if let Some(signer) = self
            .signers
            .iter()
            .find(|signer| other.signers.binary_search(signer).is_ok())
        {
            return Err(MessageError::DuplicateSigner { signer: *signer });
        }
        if self.message.root()? != other.message.root()? {
            return Err(MessageError::RootMismatch);
        }

        let signature = aggregate_signatures(&[self.signature, other.signature])
            .map_err(MessageError::CryptoError)?;
        let mut signers: Vec<OperatorID> = self
            .signers
            .iter()
            .chain(other.signers.iter())
            .copied()
            .collect();
        signers.sort();

        Ok(SignedMessage {
            signature,
            signers,
            message: self.message.clone(),
        })
    }

    /// Fold [`aggregate`](Self::aggregate) over a non-empty slice of messages.
    pub fn aggregate_all(messages: &[SignedMessage]) -> Result<SignedMessage, MessageError> {
        let (first, rest) = messages.split_first().ok_or(MessageError::NoSigners)?;
        rest.iter()
            .try_fold(first.clone(), |aggregate, message| aggregate.aggregate(message))
    }

    /// Serialize into the wire encoding.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        self.try_to_vec().map_err(MessageError::SerializeError)
    }

    /// Deserialize from the wire encoding produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<SignedMessage, MessageError> {
        SignedMessage::try_from_slice(bytes).map_err(MessageError::DeserializeError)
    }
}

/// Errors that arise when building, encoding, decoding, verifying, or aggregating messages.
#[derive(Debug)]
pub enum MessageError {
    SerializeError(io::Error),
    DeserializeError(io::Error),
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },
    DuplicateSigner {
        signer: OperatorID,
    },
    RootMismatch,
    NoSigners,
    UnknownSigner {
        signer: OperatorID,
    },
    InvalidSignature,
    CryptoError(CryptoError),
}
