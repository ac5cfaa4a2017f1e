/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of one QBFT instance, as described in the [module-level docs](super).
//!
//! Main type: [`Instance`].

use std::{
    collections::HashSet,
    sync::mpsc::Sender,
    time::{Duration, Instant, SystemTime},
};

use borsh::BorshSerialize;

use crate::{
    events::{
        CommitEvent, DecideEvent, Event, PrepareEvent, ProposeEvent, ReceiveCommitEvent,
        ReceivePrepareEvent, ReceiveProposalEvent, ReceiveRoundChangeEvent, RoundChangeEvent,
        RoundTimeoutEvent, StartInstanceEvent, StopInstanceEvent, UpdatePreparedEvent,
    },
    networking::{
        network::{Network, NetworkError},
        sending::SenderHandle,
    },
    types::{
        committee::{Committee, Share},
        data_types::{CryptoHash, DomainType, Height, OperatorID, Round, Value},
        identifier::Identifier,
        signed_messages::{
            CommitData, Message, MessageError, MessageType, PrepareData, PreparedState,
            ProposalData, RoundChangeData, SignedMessage,
        },
    },
    validation::{
        justification, pipelines::ValidationContext, ProtocolVersion, ValidationError, ValueCheck,
    },
};

use super::{
    container::MessageContainer,
    round_timer::RoundTimer,
    state::{ConsensusState, Prepared, Stage},
};

/// Parameters shared by every instance that a controller creates.
#[derive(Clone, Copy, Debug)]
pub struct InstanceConfiguration {
    /// Mixed into every signing root.
    pub domain: DomainType,

    /// Selects the validation pipelines, once, when the instance is created.
    pub protocol_version: ProtocolVersion,

    /// How long the leader of the first round waits after starting before it proposes.
    pub proposal_delay: Duration,

    /// Timeout of the first round. Round `r` times out after `round_timeout * r`.
    pub round_timeout: Duration,

    /// Highest round an instance may reach under [`ProtocolVersion::V1`].
    pub max_round: Round,
}

/// Upon-rules that may fire at most once per round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum UponRule {
    PrepareQuorum,
    CommitQuorum,
    RoundChangeQuorum,
}

/// One QBFT agreement over the value for one height of one identifier.
///
/// # Usage
///
/// `Instance` is driven from a single thread through three entry points:
/// 1. [`start`](Self::start): called once, with this operator's input value.
/// 2. [`process_message`](Self::process_message): called for every consensus message received for the
///    instance's height.
/// 3. [`tick`](Self::tick): called whenever the current time passes [`next_deadline`](Self::next_deadline),
///    to fire the delayed first-round proposal and round timeouts.
///
/// Because all three take `&mut self`, message processing and timer expiry can never interleave.
pub struct Instance<N: Network> {
    config: InstanceConfiguration,
    share: Share,
    identifier: Identifier,
    state: ConsensusState,
    proposals: MessageContainer,
    prepares: MessageContainer,
    commits: MessageContainer,
    round_changes: MessageContainer,
    fired: HashSet<(Round, UponRule)>,
    round_timer: RoundTimer,
    pending_proposal: Option<(Round, Instant)>,
    decided_message: Option<SignedMessage>,
    value_check: Option<ValueCheck>,
    sender_handle: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> Instance<N> {
    /// Create an instance for `height` of `identifier` in the [`NotStarted`](Stage::NotStarted) stage.
    pub fn new(
        config: InstanceConfiguration,
        share: Share,
        identifier: Identifier,
        height: Height,
        network: N,
        value_check: Option<ValueCheck>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            share,
            identifier,
            state: ConsensusState::new(height),
            proposals: MessageContainer::new(),
            prepares: MessageContainer::new(),
            commits: MessageContainer::new(),
            round_changes: MessageContainer::new(),
            fired: HashSet::new(),
            round_timer: RoundTimer::new(config.round_timeout),
            pending_proposal: None,
            decided_message: None,
            value_check,
            sender_handle: SenderHandle::new(network),
            event_publisher,
        }
    }

    /// Start the first round with `value` as this operator's input value.
    ///
    /// If this operator leads the first round, its proposal is broadcast once `proposal_delay` has passed
    /// (by this call, if the delay is zero, otherwise by a later [`tick`](Self::tick)).
    pub fn start(&mut self, value: Value, now: Instant) -> Result<(), InstanceError> {
        match self.state.stage {
            Stage::NotStarted => (),
            Stage::Stopped => return Err(InstanceError::Stopped),
            _ => return Err(InstanceError::AlreadyStarted),
        }

        self.state.input_value = Some(value.clone());
        self.state.round = Round::FIRST;
        self.state.stage = Stage::Proposal;
        self.round_timer.start(Round::FIRST, now);

        Event::StartInstance(StartInstanceEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            value,
        })
        .publish(&self.event_publisher);

        if self.is_leader(Round::FIRST) {
            self.pending_proposal = Some((Round::FIRST, now + self.config.proposal_delay));
        }

        self.tick(now)
    }

    /// Fire the delayed first-round proposal and the round timer, if their deadlines have passed.
    ///
    /// A no-op on instances that have not started or have reached a terminal stage.
    pub fn tick(&mut self, now: Instant) -> Result<(), InstanceError> {
        if self.state.stage == Stage::NotStarted || self.state.stage.is_terminal() {
            return Ok(());
        }

        if let Some((round, deadline)) = self.pending_proposal {
            if now >= deadline {
                self.pending_proposal = None;
                if round == self.state.round && self.state.accepted_proposal.is_none() {
                    self.propose_input_value(round)?;
                }
            }
        }

        if self.round_timer.expired(now) {
            self.bump_round(now)?;
        }
        Ok(())
    }

    /// The earliest instant at which [`tick`](Self::tick) has something to do, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state.stage.is_terminal() {
            return None;
        }
        let proposal_deadline = self.pending_proposal.map(|(_, deadline)| deadline);
        match (proposal_deadline, self.round_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Validate `msg` and, if it is valid, record it and apply the matching upon-rule.
    ///
    /// Returns whether the instance became decided as a result. Messages received after the instance
    /// decided are ignored.
    pub fn process_message(
        &mut self,
        msg: SignedMessage,
        now: Instant,
    ) -> Result<bool, InstanceError> {
        match self.state.stage {
            Stage::NotStarted => return Err(InstanceError::NotStarted),
            Stage::Stopped => return Err(InstanceError::Stopped),
            Stage::Decided => return Ok(false),
            Stage::Proposal | Stage::Prepare | Stage::Commit => (),
        }

        {
            let ctx = ValidationContext {
                committee: &self.share.committee,
                domain: self.config.domain,
                identifier: &self.identifier,
                height: self.state.height,
                round: self.state.round,
                max_round: self.config.max_round,
                protocol_version: self.config.protocol_version,
                accepted_proposal: self.state.accepted_proposal.as_ref(),
                value_check: self.value_check.as_ref(),
            };
            ctx.validate(&msg).map_err(InstanceError::InvalidMessage)?;
        }

        match msg.msg_type() {
            MessageType::Proposal => self.upon_proposal(msg, now),
            MessageType::Prepare => self.upon_prepare(msg),
            MessageType::Commit => self.upon_commit(msg),
            MessageType::RoundChange => self.upon_round_change(msg, now),
        }
    }

    /// Mark this instance decided with `decided`, a decided message for its height that the caller has
    /// already validated. Returns whether the instance became decided as a result.
    pub fn process_decided(&mut self, decided: &SignedMessage) -> Result<bool, InstanceError> {
        if self.state.stage.is_terminal() || decided.height() != self.state.height {
            return Ok(false);
        }
        let value = decided.message.commit_data()?.value;
        self.decide(decided.clone(), value);
        Ok(true)
    }

    /// Move to [`Stopped`](Stage::Stopped) and disarm all timers. Calling this more than once has no
    /// further effect.
    pub fn stop(&mut self) {
        if self.state.stage == Stage::Stopped {
            return;
        }
        self.state.stage = Stage::Stopped;
        self.round_timer.cancel();
        self.pending_proposal = None;

        Event::StopInstance(StopInstanceEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
        })
        .publish(&self.event_publisher);
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    pub fn height(&self) -> Height {
        self.state.height
    }

    pub fn round(&self) -> Round {
        self.state.round
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    /// The aggregated Commit quorum that decided this instance, if it is decided.
    pub fn decided_message(&self) -> Option<&SignedMessage> {
        self.decided_message.as_ref()
    }

    pub fn proposals(&self) -> &MessageContainer {
        &self.proposals
    }

    pub fn prepares(&self) -> &MessageContainer {
        &self.prepares
    }

    pub fn commits(&self) -> &MessageContainer {
        &self.commits
    }

    pub fn round_changes(&self) -> &MessageContainer {
        &self.round_changes
    }

    fn committee(&self) -> &Committee {
        &self.share.committee
    }

    fn me(&self) -> OperatorID {
        self.share.operator_id
    }

    fn is_leader(&self, round: Round) -> bool {
        self.committee().leader(self.state.height, round) == self.me()
    }

    /* ↓↓↓ Upon-rules ↓↓↓ */

    fn upon_proposal(&mut self, proposal: SignedMessage, now: Instant) -> Result<bool, InstanceError> {
        let value = proposal.message.proposal_data()?.value;
        if proposal.round() > self.state.round {
            self.change_round(proposal.round(), now);
        }
        // Validated as single-signer.
        let origin = proposal.signers[0];
        self.proposals.add_first_for_signers(proposal.clone(), value.digest());

        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            identifier: self.identifier,
            height: self.state.height,
            round: proposal.round(),
            value: value.clone(),
        })
        .publish(&self.event_publisher);

        self.state.accepted_proposal = Some(proposal);
        self.state.stage = Stage::Prepare;
        self.pending_proposal = None;

        let round = self.state.round;
        let prepare = self.sign(MessageType::Prepare, round, &PrepareData { value: value.clone() })?;
        self.sender_handle.broadcast(prepare)?;

        Event::Prepare(PrepareEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round,
            value,
        })
        .publish(&self.event_publisher);

        Ok(false)
    }

    fn upon_prepare(&mut self, prepare: SignedMessage) -> Result<bool, InstanceError> {
        let value = prepare.message.prepare_data()?.value;
        let digest = value.digest();
        let round = prepare.round();
        let origin = prepare.signers[0];
        if !self.prepares.add_first_for_signers(prepare, digest) {
            return Ok(false);
        }

        Event::ReceivePrepare(ReceivePrepareEvent {
            timestamp: SystemTime::now(),
            origin,
            identifier: self.identifier,
            height: self.state.height,
            round,
            value: value.clone(),
        })
        .publish(&self.event_publisher);

        let (quorum, _, _) = justification::has_quorum(&self.prepares, round, &digest, self.committee());
        if !quorum || !self.fired.insert((round, UponRule::PrepareQuorum)) {
            return Ok(false);
        }

        self.state.prepared = Some(Prepared {
            round,
            value: value.clone(),
        });
        self.state.stage = Stage::Commit;

        Event::UpdatePrepared(UpdatePreparedEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round,
            value: value.clone(),
        })
        .publish(&self.event_publisher);

        let commit = self.sign(MessageType::Commit, round, &CommitData { value: value.clone() })?;
        self.sender_handle.broadcast(commit)?;

        Event::Commit(CommitEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round,
            value,
        })
        .publish(&self.event_publisher);

        Ok(false)
    }

    fn upon_commit(&mut self, commit: SignedMessage) -> Result<bool, InstanceError> {
        let value = commit.message.commit_data()?.value;
        let digest = value.digest();
        let round = commit.round();
        let origin = commit.signers[0];
        if !self.commits.add_first_for_signers(commit, digest) {
            return Ok(false);
        }

        Event::ReceiveCommit(ReceiveCommitEvent {
            timestamp: SystemTime::now(),
            origin,
            identifier: self.identifier,
            height: self.state.height,
            round,
            value: value.clone(),
        })
        .publish(&self.event_publisher);

        let (quorum, _, _) = justification::has_quorum(&self.commits, round, &digest, self.committee());
        if !quorum || !self.fired.insert((round, UponRule::CommitQuorum)) {
            return Ok(false);
        }

        let decided = SignedMessage::aggregate_all(&self.commits.messages_for_digest(round, &digest))?;
        self.decide(decided, value);
        Ok(true)
    }

    fn upon_round_change(
        &mut self,
        round_change: SignedMessage,
        now: Instant,
    ) -> Result<bool, InstanceError> {
        let prepared_round = round_change
            .message
            .round_change_data()?
            .prepared
            .map(|prepared| prepared.round);
        let round = round_change.round();
        let origin = round_change.signers[0];
        let digest = CryptoHash::sha256(&round_change.message.data);
        if !self.round_changes.add_first_for_signers(round_change, digest) {
            return Ok(false);
        }

        Event::ReceiveRoundChange(ReceiveRoundChangeEvent {
            timestamp: SystemTime::now(),
            origin,
            identifier: self.identifier,
            height: self.state.height,
            round,
            prepared_round,
        })
        .publish(&self.event_publisher);

        if self.propose_on_round_change_quorum(round)? {
            return Ok(false);
        }

        // Jump forward if a partial quorum is already in later rounds.
        let (signers_above, lowest_round_above) = self.round_changes.signers_above(self.state.round);
        if let Some(next_round) = lowest_round_above {
            if self.committee().has_partial_quorum(signers_above) {
                self.change_round(next_round, now);
                self.broadcast_round_change()?;
            }
        }
        Ok(false)
    }

    /// If the round changes for `round` form a quorum and this operator leads `round`, propose the
    /// highest prepared value among them, or the input value if none was prepared. Returns whether a
    /// proposal was broadcast.
    fn propose_on_round_change_quorum(&mut self, round: Round) -> Result<bool, InstanceError> {
        let leads_round = (round == self.state.round && self.state.accepted_proposal.is_none())
            || round > self.state.round;
        if !leads_round
            || !self.is_leader(round)
            || !justification::has_round_quorum(&self.round_changes, round, self.committee())
            || !self.fired.insert((round, UponRule::RoundChangeQuorum))
        {
            return Ok(false);
        }

        let round_change_justification = self.round_changes.messages_for_round(round).to_vec();
        let (value, prepare_justification) =
            match justification::highest_prepared(&round_change_justification)? {
                Some(highest) => (highest.value, highest.justification),
                None => (
                    self.state
                        .input_value
                        .clone()
                        .ok_or(InstanceError::NotStarted)?,
                    Vec::new(),
                ),
            };

        self.propose(
            round,
            ProposalData {
                value,
                round_change_justification,
                prepare_justification,
            },
        )?;
        Ok(true)
    }

    fn propose_input_value(&mut self, round: Round) -> Result<(), InstanceError> {
        let value = self
            .state
            .input_value
            .clone()
            .ok_or(InstanceError::NotStarted)?;
        self.propose(
            round,
            ProposalData {
                value,
                round_change_justification: Vec::new(),
                prepare_justification: Vec::new(),
            },
        )
    }

    fn propose(&mut self, round: Round, data: ProposalData) -> Result<(), InstanceError> {
        let value = data.value.clone();
        let proposal = self.sign(MessageType::Proposal, round, &data)?;
        self.sender_handle.broadcast(proposal)?;

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round,
            value,
        })
        .publish(&self.event_publisher);
        Ok(())
    }

    /* ↓↓↓ Round changes ↓↓↓ */

    /// Called when the round timer expires: move to the next round and broadcast a round change
    /// carrying this operator's prepared state. Under [`ProtocolVersion::V1`], moving past `max_round`
    /// stops the instance instead.
    fn bump_round(&mut self, now: Instant) -> Result<(), InstanceError> {
        let timed_out_round = self.state.round;
        Event::RoundTimeout(RoundTimeoutEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round: timed_out_round,
        })
        .publish(&self.event_publisher);

        let next_round = timed_out_round + 1;
        if self.config.protocol_version.has_round_cut_off() && next_round > self.config.max_round {
            log::debug!(
                "{}: round {} is past the cut-off at height {}, stopping",
                self.identifier,
                next_round,
                self.state.height
            );
            self.stop();
            return Ok(());
        }

        self.change_round(next_round, now);
        self.broadcast_round_change()
    }

    fn change_round(&mut self, round: Round, now: Instant) {
        self.state.round = round;
        self.state.accepted_proposal = None;
        self.state.stage = Stage::Proposal;
        self.pending_proposal = None;
        self.round_timer.start(round, now);
        self.fired.retain(|(fired_round, _)| *fired_round >= round);
    }

    fn broadcast_round_change(&mut self) -> Result<(), InstanceError> {
        let round = self.state.round;
        let prepared = self.state.prepared.as_ref().map(|prepared| PreparedState {
            round: prepared.round,
            value: prepared.value.clone(),
            justification: self
                .prepares
                .messages_for_digest(prepared.round, &prepared.value.digest()),
        });
        let prepared_round = prepared.as_ref().map(|prepared| prepared.round);

        let round_change = self.sign(MessageType::RoundChange, round, &RoundChangeData { prepared })?;
        self.sender_handle.broadcast(round_change)?;

        Event::RoundChange(RoundChangeEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round,
            prepared_round,
        })
        .publish(&self.event_publisher);
        Ok(())
    }

    /* ↓↓↓ Helpers ↓↓↓ */

    fn decide(&mut self, decided: SignedMessage, value: Value) {
        self.state.decided_value = Some(value.clone());
        self.state.stage = Stage::Decided;
        self.round_timer.cancel();
        self.pending_proposal = None;

        Event::Decide(DecideEvent {
            timestamp: SystemTime::now(),
            identifier: self.identifier,
            height: self.state.height,
            round: decided.round(),
            value,
            signers: decided.signers.clone(),
        })
        .publish(&self.event_publisher);

        self.decided_message = Some(decided);
    }

    fn sign<P: BorshSerialize>(
        &self,
        msg_type: MessageType,
        round: Round,
        payload: &P,
    ) -> Result<SignedMessage, InstanceError> {
        let message = Message::new(msg_type, self.state.height, round, self.identifier, payload)?;
        Ok(SignedMessage::sign(
            message,
            self.me(),
            &self.share.keypair,
            self.config.domain,
        )?)
    }
}

/// The different ways a call to a method of [`Instance`] can fail.
#[derive(Debug)]
pub enum InstanceError {
    /// The instance has not been [started](Instance::start) yet.
    NotStarted,

    /// [`start`](Instance::start) was called on an instance that was already started.
    AlreadyStarted,

    /// The instance was stopped.
    Stopped,

    /// The message was rejected by validation. The instance state is unchanged.
    InvalidMessage(ValidationError),

    MessageError(MessageError),

    /// A broadcast failed. The instance state is unchanged and it keeps waiting for messages and
    /// timeouts.
    NetworkError(NetworkError),
}

impl From<MessageError> for InstanceError {
    fn from(value: MessageError) -> Self {
        InstanceError::MessageError(value)
    }
}

impl From<NetworkError> for InstanceError {
    fn from(value: NetworkError) -> Self {
        InstanceError::NetworkError(value)
    }
}

impl From<ValidationError> for InstanceError {
    fn from(value: ValidationError) -> Self {
        InstanceError::InvalidMessage(value)
    }
}
