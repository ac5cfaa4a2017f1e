/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-identifier threads that drive a [`Controller`] and its post-consensus signature collection.
//!
//! Each identifier gets one runner thread, spawned the first time a message or a command for it shows
//! up. The runner owns the identifier's [`Controller`] and [`PartialSignatureState`], and serializes
//! everything that touches them: inbound messages, commands from the [`Node`](crate::node::Node), and
//! the expiry of the proposal delay, round timer, and signature-collection deadline.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    controller::{Controller, ControllerConfiguration, ControllerError},
    events::Event,
    instance::Stage,
    networking::{
        messages::{Message, PartialSignatureMessage},
        network::Network,
        sending::SenderHandle,
    },
    node::Submitter,
    storage::{decided_store::DecidedStore, pluggables::KVStore},
    threshold::{
        duty_signing_root, sign_partial, signature_state::Duty, PartialSignatureState,
        ThresholdError,
    },
    types::{
        committee::Share,
        data_types::{DomainType, Height, OperatorID, PublicKeyBytes, Value},
        identifier::Identifier,
        signed_messages::SignedMessage,
    },
    validation::ValueCheck,
};

/// Longest time a runner blocks waiting for input before it checks for shutdown again.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Heights ahead of the current duty for which early partial signatures are kept.
const EARLY_PARTIAL_HEIGHTS: u64 = 4;

/// Requests from the [`Node`](crate::node::Node) to the runner of one identifier.
pub(crate) enum Command {
    StartInstance {
        height: Height,
        value: Value,
        reply: Sender<Result<(), ControllerError>>,
    },
    CurrentStage {
        reply: Sender<Option<Stage>>,
    },
}

pub(crate) enum RunnerInput {
    Message(OperatorID, Message),
    Command(Command),
}

/// Parameters shared by every runner of a node.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunnerConfiguration {
    pub(crate) controller: ControllerConfiguration,
    pub(crate) signature_collection_timeout: Duration,
    pub(crate) history_enabled: bool,
}

/// The runners of a node, keyed by identifier, and everything needed to spawn a new one.
pub(crate) struct RunnerPool<K: KVStore, N: Network + 'static, S: Submitter> {
    config: RunnerConfiguration,
    shares: BTreeMap<PublicKeyBytes, Share>,
    kv_store: K,
    network: N,
    submitter: Arc<S>,
    value_check: Option<ValueCheck>,
    event_publisher: Option<Sender<Event>>,
    runners: HashMap<Identifier, RunnerHandle>,
}

struct RunnerHandle {
    inputs: Sender<RunnerInput>,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl<K: KVStore, N: Network + 'static, S: Submitter> RunnerPool<K, N, S> {
    pub(crate) fn new(
        config: RunnerConfiguration,
        shares: BTreeMap<PublicKeyBytes, Share>,
        kv_store: K,
        network: N,
        submitter: Arc<S>,
        value_check: Option<ValueCheck>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            shares,
            kv_store,
            network,
            submitter,
            value_check,
            event_publisher,
            runners: HashMap::new(),
        }
    }

    /// Hand `input` to the runner of `identifier`, spawning it if needed.
    ///
    /// Returns `false` if this operator holds no share of the identifier's validator, in which case
    /// `input` is dropped.
    pub(crate) fn dispatch(&mut self, identifier: Identifier, input: RunnerInput) -> bool {
        if !self.runners.contains_key(&identifier) {
            let Some(share) = self.shares.get(&identifier.validator_public_key) else {
                return false;
            };
            let handle = self.spawn(identifier, share.clone());
            self.runners.insert(identifier, handle);
        }

        match self.runners.get(&identifier) {
            Some(runner) => runner.inputs.send(input).is_ok(),
            None => false,
        }
    }

    fn spawn(&self, identifier: Identifier, share: Share) -> RunnerHandle {
        let (inputs, input_receiver) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();

        let controller = Controller::new(
            self.config.controller,
            share.clone(),
            identifier,
            DecidedStore::new(self.kv_store.clone(), self.config.history_enabled),
            self.network.clone(),
            self.value_check.clone(),
            self.event_publisher.clone(),
        );
        let runner = Runner {
            domain: self.config.controller.instance.domain,
            signature_collection_timeout: self.config.signature_collection_timeout,
            share: share.clone(),
            identifier,
            signatures: PartialSignatureState::new(
                share.committee.clone(),
                self.event_publisher.clone(),
            ),
            early_partials: BTreeMap::new(),
            controller,
            sender_handle: SenderHandle::new(self.network.clone()),
            submitter: self.submitter.clone(),
            inputs: input_receiver,
            shutdown_signal: shutdown_receiver,
        };

        log::debug!("{}: spawning runner", identifier);
        RunnerHandle {
            inputs,
            shutdown,
            thread: Some(runner.start()),
        }
    }
}

impl<K: KVStore, N: Network + 'static, S: Submitter> Drop for RunnerPool<K, N, S> {
    fn drop(&mut self) {
        for runner in self.runners.values_mut() {
            let _ = runner.shutdown.send(());
            if let Some(thread) = runner.thread.take() {
                if thread.join().is_err() {
                    log::error!("a runner thread panicked");
                }
            }
        }
    }
}

struct Runner<K: KVStore, N: Network + 'static, S: Submitter> {
    domain: DomainType,
    signature_collection_timeout: Duration,
    share: Share,
    identifier: Identifier,
    controller: Controller<K, N>,
    signatures: PartialSignatureState,
    early_partials: BTreeMap<Height, Vec<PartialSignatureMessage>>,
    sender_handle: SenderHandle<N>,
    submitter: Arc<S>,
    inputs: Receiver<RunnerInput>,
    shutdown_signal: Receiver<()>,
}

impl<K: KVStore, N: Network + 'static, S: Submitter> Runner<K, N, S> {
    fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = self.controller.init() {
                log::warn!("{}: failed to sync on startup: {:?}", self.identifier, err);
            }

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => (),
                }

                let now = Instant::now();
                let wait = self
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(now).min(IDLE_WAIT))
                    .unwrap_or(IDLE_WAIT);

                match self.inputs.recv_timeout(wait) {
                    Ok(RunnerInput::Message(origin, msg)) => self.on_message(origin, msg),
                    Ok(RunnerInput::Command(command)) => self.on_command(command),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return,
                }

                self.tick(Instant::now());
            }
        })
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.controller.next_deadline(), self.signatures.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn tick(&mut self, now: Instant) {
        if let Err(err) = self.controller.tick(now) {
            log::warn!("{}: {:?}", self.identifier, err);
        }
        if let Err(err) = self.signatures.tick(now) {
            log::warn!("{}: signature collection failed: {:?}", self.identifier, err);
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::StartInstance {
                height,
                value,
                reply,
            } => {
                let result = self.controller.start_instance(height, value, Instant::now());
                let _ = reply.send(result);
            }
            Command::CurrentStage { reply } => {
                let _ = reply.send(self.controller.current_stage());
            }
        }
    }

    fn on_message(&mut self, origin: OperatorID, msg: Message) {
        match msg {
            Message::Consensus(msg) => {
                let height = msg.height();
                match self.controller.process_message(msg, Instant::now()) {
                    Ok(Some(decided)) => self.on_decided(&decided),
                    Ok(None) => (),
                    Err(err) => log::debug!(
                        "{}: dropping message from {} at height {}: {:?}",
                        self.identifier,
                        origin,
                        height,
                        err
                    ),
                }
            }
            Message::PartialSignature(partial) => self.on_partial(partial),
        }
    }

    /// Start collecting partial signatures over the decided value, and contribute this operator's own.
    fn on_decided(&mut self, decided: &SignedMessage) {
        let value = match decided.value() {
            Ok(value) => value,
            Err(err) => {
                log::error!("{}: decided message carries no value: {:?}", self.identifier, err);
                return;
            }
        };
        let height = decided.height();
        let domain = self.domain;

        self.signatures.start(
            Duty {
                identifier: self.identifier,
                height,
                value: value.clone(),
                signing_root: duty_signing_root(&value, domain),
            },
            Instant::now() + self.signature_collection_timeout,
        );

        let partial = sign_partial(&self.share, self.identifier, height, &value, domain);
        if let Err(err) = self.sender_handle.broadcast(partial) {
            log::warn!(
                "{}: failed to broadcast partial signature at height {}: {:?}",
                self.identifier,
                height,
                err
            );
        }

        self.early_partials = self.early_partials.split_off(&height);
        if let Some(early) = self.early_partials.remove(&height) {
            for partial in early {
                self.on_partial(partial);
            }
        }
    }

    fn on_partial(&mut self, partial: PartialSignatureMessage) {
        let collecting_height = self.signatures.duty().map(|duty| duty.height);
        if collecting_height.map_or(true, |height| partial.height > height) {
            self.buffer_early_partial(partial);
            return;
        }

        match self.signatures.add_partial(&partial) {
            Ok(Some(reconstructed)) => {
                log::info!(
                    "{}: reconstructed signature at height {}",
                    self.identifier,
                    reconstructed.height
                );
                self.submitter.submit(reconstructed);
            }
            Ok(None) => (),
            Err(err @ ThresholdError::InvalidReconstructedSignature { .. }) => {
                log::error!("{}: {:?}", self.identifier, err)
            }
            Err(err) => log::debug!(
                "{}: dropping partial signature from {}: {:?}",
                self.identifier,
                partial.signer,
                err
            ),
        }
    }

    // Partials from operators that decided before this one.
    fn buffer_early_partial(&mut self, partial: PartialSignatureMessage) {
        let floor = self
            .signatures
            .duty()
            .map(|duty| duty.height)
            .or_else(|| self.controller.current_height())
            .unwrap_or(Height::new(0));
        if partial.height.int() > floor.int().saturating_add(EARLY_PARTIAL_HEIGHTS) {
            return;
        }
        let committee_size = self.share.committee.size();
        let buffered = self.early_partials.entry(partial.height).or_default();
        if buffered.len() < committee_size
            && !buffered.iter().any(|other| other.signer == partial.signer)
        {
            buffered.push(partial);
        }
    }
}
