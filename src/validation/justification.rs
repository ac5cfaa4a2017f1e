/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pure functions that decide whether sets of messages form quorums, and whether justifications
//! attached to RoundChange and Proposal messages prove what they claim.
//!
//! ## Highest prepared wins
//!
//! A proposal for a round after the first must carry a quorum of RoundChange messages for that round.
//! If any of them claims a prepared state, the proposal must carry a quorum of Prepare messages for the
//! prepared state with the highest round among them, and must propose that state's value. Any two
//! quorums intersect in an honest operator, so a value that might have been decided in an earlier round
//! is always carried forward.

use std::collections::BTreeSet;

use crate::{
    instance::container::MessageContainer,
    types::{
        committee::Committee,
        data_types::{CryptoHash, DomainType, Height, OperatorID, Round, Value},
        identifier::Identifier,
        signed_messages::{MessageError, MessageType, PreparedState, ProposalData, SignedMessage},
    },
};

use super::{checks, JustificationError};

/// Check whether the messages in `container` for `round` whose payload has `digest` are signed by a
/// quorum of `committee`.
///
/// Returns `(has quorum, distinct signer count, committee size)`.
pub fn has_quorum(
    container: &MessageContainer,
    round: Round,
    digest: &CryptoHash,
    committee: &Committee,
) -> (bool, usize, usize) {
    let signers = container.signer_count(round, digest);
    (committee.has_quorum(signers), signers, committee.size())
}

/// Check whether the messages in `container` for `round`, irrespective of payload, are signed by a
/// quorum of `committee`.
pub fn has_round_quorum(container: &MessageContainer, round: Round, committee: &Committee) -> bool {
    committee.has_quorum(container.round_signer_count(round))
}

/// Collect the signers of `messages`, failing if any operator signed more than one of them.
pub fn distinct_signers(
    messages: &[SignedMessage],
) -> Result<BTreeSet<OperatorID>, JustificationError> {
    let mut signers = BTreeSet::new();
    for msg in messages {
        for signer in &msg.signers {
            if !signers.insert(*signer) {
                return Err(JustificationError::DuplicateSigner { signer: *signer });
            }
        }
    }
    Ok(signers)
}

fn require_quorum(
    messages: &[SignedMessage],
    committee: &Committee,
) -> Result<(), JustificationError> {
    let signers = distinct_signers(messages)?.len();
    if !committee.has_quorum(signers) {
        return Err(JustificationError::QuorumNotReached {
            signers,
            quorum: committee.quorum(),
        });
    }
    Ok(())
}

/// Check that `prepares` is a quorum of valid, single-signer Prepare messages for `prepared_value` in
/// `prepared_round` at `height` for `identifier`.
pub fn validate_prepare_justification(
    prepares: &[SignedMessage],
    height: Height,
    identifier: &Identifier,
    prepared_round: Round,
    prepared_value: &Value,
    committee: &Committee,
    domain: DomainType,
) -> Result<(), JustificationError> {
    for prepare in prepares {
        checks::well_formed(prepare)?;
        checks::message_type(prepare, MessageType::Prepare)?;
        checks::height(prepare, height)?;
        checks::identifier(prepare, identifier)?;
        checks::single_signer(prepare)?;
        if prepare.round() != prepared_round {
            return Err(JustificationError::UnexpectedMessage {
                reason: "prepare round is not the prepared round",
            });
        }
        if prepare.message.prepare_data()?.value != *prepared_value {
            return Err(JustificationError::UnexpectedMessage {
                reason: "prepare value is not the prepared value",
            });
        }
        checks::authorized_signature(prepare, committee, domain)?;
    }
    require_quorum(prepares, committee)
}

/// Check that the payload of `round_change` is internally consistent: if it claims a prepared state,
/// the prepared round is below the message's round and the attached Prepares prove it.
pub fn validate_round_change_justification(
    round_change: &SignedMessage,
    committee: &Committee,
    domain: DomainType,
) -> Result<(), JustificationError> {
    let data = round_change.message.round_change_data()?;
    let Some(prepared) = data.prepared else {
        return Ok(());
    };

    if prepared.round >= round_change.round() {
        return Err(JustificationError::PreparedRoundNotBelowMessageRound {
            prepared_round: prepared.round,
            round: round_change.round(),
        });
    }
    validate_prepare_justification(
        &prepared.justification,
        round_change.height(),
        round_change.identifier(),
        prepared.round,
        &prepared.value,
        committee,
        domain,
    )
}

/// Among the prepared states claimed by `round_changes`, get the one with the highest round. Ties are
/// broken in favor of the first one seen.
pub fn highest_prepared(
    round_changes: &[SignedMessage],
) -> Result<Option<PreparedState>, MessageError> {
    let mut highest: Option<PreparedState> = None;
    for round_change in round_changes {
        if let Some(prepared) = round_change.message.round_change_data()?.prepared {
            if highest
                .as_ref()
                .map_or(true, |highest| prepared.round > highest.round)
            {
                highest = Some(prepared);
            }
        }
    }
    Ok(highest)
}

/// Check that the justifications carried by `proposal` allow it to propose `data.value`.
///
/// Proposals for the first round need no justification. Proposals for later rounds need a quorum of
/// valid RoundChange messages for their round and, if any of those claims a prepared state, a quorum of
/// Prepares for the highest prepared state and a value equal to its value.
pub fn validate_proposal_justification(
    proposal: &SignedMessage,
    data: &ProposalData,
    committee: &Committee,
    domain: DomainType,
) -> Result<(), JustificationError> {
    if proposal.round() == Round::FIRST {
        return Ok(());
    }

    for round_change in &data.round_change_justification {
        checks::well_formed(round_change)?;
        checks::message_type(round_change, MessageType::RoundChange)?;
        checks::height(round_change, proposal.height())?;
        checks::identifier(round_change, proposal.identifier())?;
        checks::single_signer(round_change)?;
        if round_change.round() != proposal.round() {
            return Err(JustificationError::UnexpectedMessage {
                reason: "round change round is not the proposal round",
            });
        }
        checks::authorized_signature(round_change, committee, domain)?;
        validate_round_change_justification(round_change, committee, domain)?;
    }
    require_quorum(&data.round_change_justification, committee)?;

    let Some(highest) = highest_prepared(&data.round_change_justification)? else {
        return Ok(());
    };
    if data.prepare_justification.is_empty() {
        return Err(JustificationError::MissingPrepareJustification);
    }
    validate_prepare_justification(
        &data.prepare_justification,
        proposal.height(),
        proposal.identifier(),
        highest.round,
        &highest.value,
        committee,
        domain,
    )?;
    if data.value != highest.value {
        return Err(JustificationError::ValueNotHighestPrepared);
    }
    Ok(())
}
