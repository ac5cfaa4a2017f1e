/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Individual message checks that [`pipelines`](super::pipelines) are assembled from.

use crate::types::{
    committee::Committee,
    crypto_primitives::is_valid_signature_encoding,
    data_types::{DomainType, Height, Round},
    identifier::Identifier,
    signed_messages::{MessageType, SignedMessage},
};

use super::ValidationError;

/// Check that `msg` has a non-empty, strictly ascending signer list, a signature that decodes into a
/// valid point, and a payload that decodes into the type its `msg_type` requires.
pub fn well_formed(msg: &SignedMessage) -> Result<(), ValidationError> {
    if msg.signers.is_empty() {
        return Err(ValidationError::NoSigners);
    }
    if !msg.signers.windows(2).all(|pair| pair[0] < pair[1]) {
        return Err(ValidationError::UnsortedOrDuplicateSigners);
    }
    if !is_valid_signature_encoding(&msg.signature) {
        return Err(ValidationError::InvalidSignatureEncoding);
    }
    let decoded = match msg.msg_type() {
        MessageType::Proposal => msg.message.proposal_data().map(|_| ()),
        MessageType::Prepare => msg.message.prepare_data().map(|_| ()),
        MessageType::Commit => msg.message.commit_data().map(|_| ()),
        MessageType::RoundChange => msg.message.round_change_data().map(|_| ()),
    };
    decoded.map_err(ValidationError::UndecodablePayload)
}

pub fn message_type(msg: &SignedMessage, expected: MessageType) -> Result<(), ValidationError> {
    if msg.msg_type() != expected {
        return Err(ValidationError::WrongMessageType {
            expected,
            actual: msg.msg_type(),
        });
    }
    Ok(())
}

pub fn height(msg: &SignedMessage, expected: Height) -> Result<(), ValidationError> {
    if msg.height() != expected {
        return Err(ValidationError::WrongHeight {
            expected,
            actual: msg.height(),
        });
    }
    Ok(())
}

pub fn identifier(msg: &SignedMessage, expected: &Identifier) -> Result<(), ValidationError> {
    if msg.identifier() != expected {
        return Err(ValidationError::WrongIdentifier);
    }
    Ok(())
}

/// Check that every signer of `msg` is a member of `committee` and that its (aggregated) signature
/// verifies against their public-key shares.
pub fn authorized_signature(
    msg: &SignedMessage,
    committee: &Committee,
    domain: DomainType,
) -> Result<(), ValidationError> {
    msg.verify(committee, domain).map_err(ValidationError::from)
}

pub fn single_signer(msg: &SignedMessage) -> Result<(), ValidationError> {
    if msg.signers.len() != 1 {
        return Err(ValidationError::MultipleSigners {
            count: msg.signers.len(),
        });
    }
    Ok(())
}

pub fn round_cut_off(msg: &SignedMessage, max_round: Round) -> Result<(), ValidationError> {
    if msg.round() > max_round {
        return Err(ValidationError::RoundCutOff {
            round: msg.round(),
            max_round,
        });
    }
    Ok(())
}

pub fn round_equals(msg: &SignedMessage, expected: Round) -> Result<(), ValidationError> {
    if msg.round() != expected {
        return Err(ValidationError::WrongRound {
            expected,
            actual: msg.round(),
        });
    }
    Ok(())
}

pub fn not_past_round(msg: &SignedMessage, current: Round) -> Result<(), ValidationError> {
    if msg.round() < current {
        return Err(ValidationError::PastRound {
            current,
            received: msg.round(),
        });
    }
    Ok(())
}

/// Check that the single signer of `msg` is the leader of its height and round.
pub fn sent_by_leader(msg: &SignedMessage, committee: &Committee) -> Result<(), ValidationError> {
    let leader = committee.leader(msg.height(), msg.round());
    match msg.signers.first() {
        Some(sender) if *sender == leader => Ok(()),
        Some(sender) => Err(ValidationError::NotLeader {
            leader,
            sender: *sender,
        }),
        None => Err(ValidationError::NoSigners),
    }
}

/// Check that `msg` is signed by a quorum of `committee`.
pub fn signed_by_quorum(msg: &SignedMessage, committee: &Committee) -> Result<(), ValidationError> {
    if !committee.has_quorum(msg.signers.len()) {
        return Err(ValidationError::NotDecided {
            signers: msg.signers.len(),
            quorum: committee.quorum(),
        });
    }
    Ok(())
}
