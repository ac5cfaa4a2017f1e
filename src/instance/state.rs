/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Mutable consensus state owned by one [`Instance`](super::Instance).

use crate::types::{
    data_types::{Height, Round, Value},
    signed_messages::SignedMessage,
};

/// Where an instance is in its lifecycle.
///
/// ```text
/// NotStarted -> Proposal -> Prepare -> Commit -> Decided
///                  ^___________|__________|
///                       round change
/// ```
///
/// Any stage can move to `Stopped`. `Decided` can only move to `Stopped`, and `Stopped` is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Proposal,
    Prepare,
    Commit,
    Decided,
    Stopped,
}

impl Stage {
    /// Whether the stage is `Decided` or `Stopped`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Decided | Stage::Stopped)
    }
}

/// A round and value backed by a quorum of Prepare messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepared {
    pub round: Round,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct ConsensusState {
    pub height: Height,
    pub round: Round,
    pub input_value: Option<Value>,
    /// The most recent round and value this instance saw a Prepare quorum for.
    pub prepared: Option<Prepared>,
    /// The proposal accepted for `round`.
    pub accepted_proposal: Option<SignedMessage>,
    pub decided_value: Option<Value>,
    pub stage: Stage,
}

impl ConsensusState {
    pub fn new(height: Height) -> Self {
        Self {
            height,
            round: Round::FIRST,
            input_value: None,
            prepared: None,
            accepted_proposal: None,
            decided_value: None,
            stage: Stage::NotStarted,
        }
    }
}
