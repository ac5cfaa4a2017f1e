/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Construction of the validation pipeline for each message type.
//!
//! After the [common checks](super#order-of-checks) (and, for [`ProtocolVersion::V1`], the round
//! cut-off check), each pipeline runs these type-specific checks:
//!
//! |Type|Checks|
//! |---|---|
//! |Proposal|Single signer. Round is not below the current round. Sender is the leader of the round. No proposal has been accepted for the current round yet. The [justification](super::justification::validate_proposal_justification) is valid. The value passes the user's [`ValueCheck`].|
//! |Prepare|Single signer. Round equals the current round. A proposal has been accepted for the current round and has the same value.|
//! |Commit|Same as Prepare.|
//! |RoundChange|Single signer. The [justification](super::justification::validate_round_change_justification) is valid. Any round is accepted.|
//!
//! Decided messages (Commits signed by a quorum) are validated with [`decided_pipeline`], which does not
//! depend on any instance state.

use crate::types::{
    committee::Committee,
    data_types::{DomainType, Height, Round},
    identifier::Identifier,
    signed_messages::{MessageType, SignedMessage},
};

use super::{
    checks, justification, pipeline::Pipeline, ProtocolVersion, ValidationError, ValueCheck,
};

/// The instance state that message validation depends on.
pub struct ValidationContext<'a> {
    pub committee: &'a Committee,
    pub domain: DomainType,
    pub identifier: &'a Identifier,
    pub height: Height,
    pub round: Round,
    pub max_round: Round,
    pub protocol_version: ProtocolVersion,
    /// The proposal accepted for `round`, if any.
    pub accepted_proposal: Option<&'a SignedMessage>,
    pub value_check: Option<&'a ValueCheck>,
}

impl<'a> ValidationContext<'a> {
    /// Run the pipeline matching the type of `msg`.
    pub fn validate(&'a self, msg: &SignedMessage) -> Result<(), ValidationError> {
        pipeline_for(self, msg.msg_type()).run(msg)
    }
}

/// Build the pipeline for messages of `msg_type`.
pub fn pipeline_for<'a>(ctx: &'a ValidationContext<'a>, msg_type: MessageType) -> Pipeline<'a> {
    match msg_type {
        MessageType::Proposal => proposal_pipeline(ctx),
        MessageType::Prepare => prepare_pipeline(ctx),
        MessageType::Commit => commit_pipeline(ctx),
        MessageType::RoundChange => round_change_pipeline(ctx),
    }
}

fn common_checks<'a>(ctx: &'a ValidationContext<'a>, msg_type: MessageType) -> Pipeline<'a> {
    Pipeline::new()
        .then("well-formed", checks::well_formed)
        .then("message type", move |msg| checks::message_type(msg, msg_type))
        .then("height", move |msg| checks::height(msg, ctx.height))
        .then("identifier", move |msg| checks::identifier(msg, ctx.identifier))
        .then("authorized signature", move |msg| {
            checks::authorized_signature(msg, ctx.committee, ctx.domain)
        })
        .then_if(
            ctx.protocol_version.has_round_cut_off(),
            "round cut-off",
            move |msg| checks::round_cut_off(msg, ctx.max_round),
        )
}

pub fn proposal_pipeline<'a>(ctx: &'a ValidationContext<'a>) -> Pipeline<'a> {
    common_checks(ctx, MessageType::Proposal)
        .then("single signer", checks::single_signer)
        .then("not past round", move |msg| checks::not_past_round(msg, ctx.round))
        .then("sent by leader", move |msg| checks::sent_by_leader(msg, ctx.committee))
        .then("first proposal of round", move |msg| {
            if msg.round() == ctx.round && ctx.accepted_proposal.is_some() {
                return Err(ValidationError::ProposalAlreadyAccepted { round: msg.round() });
            }
            Ok(())
        })
        .then("justification", move |msg| {
            let data = msg.message.proposal_data()?;
            justification::validate_proposal_justification(msg, &data, ctx.committee, ctx.domain)
                .map_err(ValidationError::InvalidProposalJustification)
        })
        .then("value check", move |msg| match ctx.value_check {
            Some(value_check) => {
                let value = msg.message.proposal_data()?.value;
                if value_check(ctx.identifier, msg.height(), &value) {
                    Ok(())
                } else {
                    Err(ValidationError::InvalidValue)
                }
            }
            None => Ok(()),
        })
}

fn matches_accepted_proposal(
    msg: &SignedMessage,
    accepted_proposal: Option<&SignedMessage>,
) -> Result<(), ValidationError> {
    let Some(proposal) = accepted_proposal else {
        return Err(ValidationError::NoProposalAccepted { round: msg.round() });
    };
    if msg.message.value()? != proposal.message.value()? {
        return Err(ValidationError::ValueMismatch);
    }
    Ok(())
}

pub fn prepare_pipeline<'a>(ctx: &'a ValidationContext<'a>) -> Pipeline<'a> {
    common_checks(ctx, MessageType::Prepare)
        .then("single signer", checks::single_signer)
        .then("current round", move |msg| checks::round_equals(msg, ctx.round))
        .then("matches accepted proposal", move |msg| {
            matches_accepted_proposal(msg, ctx.accepted_proposal)
        })
}

pub fn commit_pipeline<'a>(ctx: &'a ValidationContext<'a>) -> Pipeline<'a> {
    common_checks(ctx, MessageType::Commit)
        .then("single signer", checks::single_signer)
        .then("current round", move |msg| checks::round_equals(msg, ctx.round))
        .then("matches accepted proposal", move |msg| {
            matches_accepted_proposal(msg, ctx.accepted_proposal)
        })
}

pub fn round_change_pipeline<'a>(ctx: &'a ValidationContext<'a>) -> Pipeline<'a> {
    common_checks(ctx, MessageType::RoundChange)
        .then("single signer", checks::single_signer)
        .then("justification", move |msg| {
            justification::validate_round_change_justification(msg, ctx.committee, ctx.domain)
                .map_err(ValidationError::InvalidRoundChangeJustification)
        })
}

/// Build the pipeline for decided messages: Commits, at any height, signed by a quorum of `committee`.
pub fn decided_pipeline<'a>(
    committee: &'a Committee,
    domain: DomainType,
    identifier: &'a Identifier,
) -> Pipeline<'a> {
    Pipeline::new()
        .then("well-formed", checks::well_formed)
        .then("message type", |msg| checks::message_type(msg, MessageType::Commit))
        .then("identifier", move |msg| checks::identifier(msg, identifier))
        .then("signed by quorum", move |msg| checks::signed_by_quorum(msg, committee))
        .then("authorized signature", move |msg| {
            checks::authorized_signature(msg, committee, domain)
        })
}
