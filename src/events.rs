/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of qbft-rs events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by
//! the runner threads and dispatched on a dedicated event bus thread to the handlers registered in the
//! [`NodeSpec`](crate::node::NodeSpec), and, if enabled, to the default [logging](crate::logging)
//! handlers.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{
    data_types::{Height, OperatorID, Round, SignatureBytes, Value},
    identifier::Identifier,
};

pub enum Event {
    // Events that start or end an instance.
    StartInstance(StartInstanceEvent),
    Decide(DecideEvent),
    StopInstance(StopInstanceEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    RoundChange(RoundChangeEvent),
    // Events that involve receiving a valid consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceivePrepare(ReceivePrepareEvent),
    ReceiveCommit(ReceiveCommitEvent),
    ReceiveRoundChange(ReceiveRoundChangeEvent),
    // Events that change instance state.
    UpdatePrepared(UpdatePreparedEvent),
    RoundTimeout(RoundTimeoutEvent),
    // Events that change persistent state.
    SaveDecided(SaveDecidedEvent),
    // Sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    // Post-consensus events.
    ReconstructSignature(ReconstructSignatureEvent),
    SignatureTimeout(SignatureTimeoutEvent),
}

impl Event {
    /// Send this event to the event bus, if there is one. Events published after the event bus has
    /// shut down are dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

pub struct StartInstanceEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub value: Value,
}

pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
    pub signers: Vec<OperatorID>,
}

pub struct StopInstanceEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct RoundChangeEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub prepared_round: Option<Round>,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: OperatorID,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct ReceivePrepareEvent {
    pub timestamp: SystemTime,
    pub origin: OperatorID,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct ReceiveCommitEvent {
    pub timestamp: SystemTime,
    pub origin: OperatorID,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct ReceiveRoundChangeEvent {
    pub timestamp: SystemTime,
    pub origin: OperatorID,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub prepared_round: Option<Round>,
}

pub struct UpdatePreparedEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
    pub value: Value,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub round: Round,
}

pub struct SaveDecidedEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub updated_highest: bool,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub from: Height,
    pub to: Height,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub synced: usize,
    pub highest_decided: Option<Height>,
}

pub struct ReconstructSignatureEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub signature: SignatureBytes,
}

pub struct SignatureTimeoutEvent {
    pub timestamp: SystemTime,
    pub identifier: Identifier,
    pub height: Height,
    pub collected: usize,
    pub required: usize,
}
