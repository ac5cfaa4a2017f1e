/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation of inbound signed messages, and the quorum and justification logic it depends on.
//!
//! Every [`SignedMessage`](crate::types::signed_messages::SignedMessage) that reaches an
//! [`Instance`](crate::instance::Instance) first goes through a [`Pipeline`](pipeline::Pipeline): an
//! ordered list of named checks that stops at the first failure. Pipelines are pure predicates. They
//! never mutate state; callers decide what to do with an accepted message.
//!
//! ## Order of checks
//!
//! Every pipeline runs the following checks, in order, before any type-specific check:
//! 1. The message is well-formed: it has at least one signer, its signers are sorted and distinct, its
//!    signature decodes into a valid point, and its payload decodes.
//! 2. Its type matches the pipeline.
//! 3. Its height equals the instance's height.
//! 4. Its identifier equals the instance's identifier.
//! 5. All of its signers are committee members and its signature verifies against their public-key
//!    shares over the message's signing root.
//!
//! The type-specific checks are listed in [`pipelines`].
//!
//! ## Protocol versions
//!
//! The set of pipelines used by an instance is selected once, at creation time, by its
//! [`ProtocolVersion`]. [`ProtocolVersion::V1`] adds a round cut-off check to every pipeline.

use std::sync::Arc;

use crate::types::{
    data_types::{Height, OperatorID, Round, Value},
    identifier::Identifier,
    signed_messages::{MessageError, MessageType},
};

pub mod checks;

pub mod justification;

pub mod pipeline;

pub mod pipelines;

/// Selects the closed set of validation pipelines an instance runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// The original rules.
    Genesis,

    /// The original rules, plus rejection of any message with a round above the configured
    /// maximum round.
    #[default]
    V1,
}

impl ProtocolVersion {
    /// Whether this version rejects messages with rounds above the maximum round.
    pub fn has_round_cut_off(&self) -> bool {
        matches!(self, ProtocolVersion::V1)
    }
}

/// User-provided check that a proposed value is acceptable for the duty of `identifier` at `height`.
pub type ValueCheck = Arc<dyn Fn(&Identifier, Height, &Value) -> bool + Send + Sync>;

/// Reasons why a message was rejected by a validation pipeline.
#[derive(Debug)]
pub enum ValidationError {
    /* ↓↓↓ Well-formedness ↓↓↓ */
    NoSigners,
    UnsortedOrDuplicateSigners,
    InvalidSignatureEncoding,
    UndecodablePayload(MessageError),
    MultipleSigners { count: usize },

    /* ↓↓↓ Addressing ↓↓↓ */
    WrongMessageType { expected: MessageType, actual: MessageType },
    WrongHeight { expected: Height, actual: Height },
    WrongIdentifier,

    /* ↓↓↓ Authorization ↓↓↓ */
    UnknownSigner { signer: OperatorID },
    InvalidSignature,

    /* ↓↓↓ Rounds ↓↓↓ */
    PastRound { current: Round, received: Round },
    WrongRound { expected: Round, actual: Round },
    RoundCutOff { round: Round, max_round: Round },

    /* ↓↓↓ Proposals ↓↓↓ */
    NotLeader { leader: OperatorID, sender: OperatorID },
    ProposalAlreadyAccepted { round: Round },
    InvalidProposalJustification(JustificationError),
    InvalidValue,

    /* ↓↓↓ Prepares and Commits ↓↓↓ */
    NoProposalAccepted { round: Round },
    ValueMismatch,

    /* ↓↓↓ Round changes ↓↓↓ */
    InvalidRoundChangeJustification(JustificationError),

    /* ↓↓↓ Decided messages ↓↓↓ */
    NotDecided { signers: usize, quorum: usize },
}

/// Reasons why a justification, attached to a proposal or a round change, does not prove what it
/// claims.
#[derive(Debug)]
pub enum JustificationError {
    QuorumNotReached { signers: usize, quorum: usize },
    PreparedRoundNotBelowMessageRound { prepared_round: Round, round: Round },
    UnexpectedMessage { reason: &'static str },
    DuplicateSigner { signer: OperatorID },
    ValueNotHighestPrepared,
    MissingPrepareJustification,
    InvalidMessage(Box<ValidationError>),
    MessageError(MessageError),
}

impl From<MessageError> for ValidationError {
    fn from(value: MessageError) -> Self {
        match value {
            MessageError::UnknownSigner { signer } => ValidationError::UnknownSigner { signer },
            MessageError::InvalidSignature => ValidationError::InvalidSignature,
            MessageError::NoSigners => ValidationError::NoSigners,
            other => ValidationError::UndecodablePayload(other),
        }
    }
}

impl From<MessageError> for JustificationError {
    fn from(value: MessageError) -> Self {
        JustificationError::MessageError(value)
    }
}

impl From<ValidationError> for JustificationError {
    fn from(value: ValidationError) -> Self {
        JustificationError::InvalidMessage(Box::new(value))
    }
}
