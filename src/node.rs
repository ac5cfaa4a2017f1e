/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a node, and the handle that keeps it alive.
//!
//! A node is one operator's participation in the committees of any number of validators. For each
//! validator it holds a [`Share`]: the committee, this operator's ID in it, and this operator's
//! secret-key share. Every duty of a validator is identified by an
//! [`Identifier`](crate::types::identifier::Identifier), and the node runs an independent sequence of
//! consensus instances for each identifier.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [`NodeSpec`],
//! - The function to [start](NodeSpec::start) a [`Node`] given its specification,
//! - [The type](Node) which keeps the node alive and accepts duties from the scheduler.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .submitter(submitter)
//!     .shares(shares)
//!     .configuration(configuration)
//!     .on_decide(decide_handler)
//!     .build()
//!     .start();
//!
//! node.start_instance(identifier, Height::new(1), value)?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.submitter(...)`
//! - `.shares(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! - `.value_check(...)`
//! - `.on_start_instance(...)`
//! - `.on_decide(...)`
//! - `.on_stop_instance(...)`
//! - `.on_propose(...)`
//! - `.on_prepare(...)`
//! - `.on_commit(...)`
//! - `.on_round_change(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_prepare(...)`
//! - `.on_receive_commit(...)`
//! - `.on_receive_round_change(...)`
//! - `.on_update_prepared(...)`
//! - `.on_round_timeout(...)`
//! - `.on_save_decided(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//! - `.on_reconstruct_signature(...)`
//! - `.on_signature_timeout(...)`
//!
//! The node's [configuration](Configuration) can also be defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(OperatorID::new(1))
//!     .domain(DomainType::new([0, 0, 0, 1]))
//!     .protocol_version(ProtocolVersion::V1)
//!     .proposal_delay(Duration::ZERO)
//!     .round_timeout(Duration::from_secs(2))
//!     .max_round(Round::new(12))
//!     .signature_collection_timeout(Duration::from_secs(4))
//!     .history_enabled(true)
//!     .log_events(true)
//!     .build();
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    controller::{ControllerConfiguration, ControllerError},
    event_bus::*,
    events::*,
    instance::{InstanceConfiguration, Stage},
    networking::{network::Network, receiving::start_polling},
    runner::{Command, RunnerConfiguration, RunnerPool},
    storage::{
        decided_store::{DecidedStore, StorageError},
        pluggables::KVStore,
    },
    sync::server::{SyncServer, DEFAULT_REQUEST_LIMIT},
    threshold::ReconstructedSignature,
    types::{
        committee::Share,
        data_types::{DomainType, Height, OperatorID, PublicKeyBytes, Round, Value},
        identifier::Identifier,
        signed_messages::SignedMessage,
    },
    validation::{ProtocolVersion, ValueCheck},
};

/// The external collaborator that receives every reconstructed signature, typically to submit it to the
/// chain.
///
/// `submit` is called from a runner thread, exactly once per reconstructed signature, and should not
/// block for long.
pub trait Submitter: Send + Sync + 'static {
    fn submit(&self, signature: ReconstructedSignature);
}

/// Stores the user-defined parameters required to start the node.
///
/// ## Domain
///
/// The domain is mixed into the signing root of every message and partial signature, so that
/// signatures made for one network are never valid on another.
///
/// ## Round timeout
///
/// Round `r` of an instance times out `round_timeout * r` after it starts.
///
/// ## Log Events
///
/// qbft-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
/// onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder, Clone, Copy, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.domain(...)`
    - `.proposal_delay(...)`
    - `.round_timeout(...)`
    - `.max_round(...)`
    - `.signature_collection_timeout(...)`
    - `.history_enabled(...)`
    - `.log_events(...)`

    Optional:
    - `.protocol_version(...)`
    - `.sync_round_changes(...)`
    - `.sync_request_limit(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set this operator's ID. Shares for other operator IDs are ignored. Required."))]
    pub me: OperatorID,
    #[builder(setter(doc = "Set the domain mixed into every signing root. Required."))]
    pub domain: DomainType,
    #[builder(default, setter(doc = "Set the protocol version, which selects the validation pipelines. Defaults to `V1`. Optional."))]
    pub protocol_version: ProtocolVersion,
    #[builder(setter(doc = "Set how long the leader of the first round waits before proposing. Required."))]
    pub proposal_delay: Duration,
    #[builder(setter(doc = "Set the timeout of the first round, which later rounds multiply by their number. Required."))]
    pub round_timeout: Duration,
    #[builder(setter(doc = "Set the highest round an instance may reach. Required."))]
    pub max_round: Round,
    #[builder(setter(doc = "Set how long to wait for a quorum of partial signatures after deciding. Required."))]
    pub signature_collection_timeout: Duration,
    #[builder(setter(doc = "Keep every decided message, instead of only the highest one, so that peers can sync history. Required."))]
    pub history_enabled: bool,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
    #[builder(default = true, setter(doc = "Ask peers for their last round change after starting an instance. Defaults to true. Optional."))]
    pub sync_round_changes: bool,
    #[builder(default = DEFAULT_REQUEST_LIMIT, setter(doc = "Set the maximum number of decided messages served per sync request. Optional."))]
    pub sync_request_limit: u64,
}

impl From<Configuration> for RunnerConfiguration {
    fn from(config: Configuration) -> Self {
        RunnerConfiguration {
            controller: ControllerConfiguration {
                instance: InstanceConfiguration {
                    domain: config.domain,
                    protocol_version: config.protocol_version,
                    proposal_delay: config.proposal_delay,
                    round_timeout: config.round_timeout,
                    max_round: config.max_round,
                },
                sync_round_changes: config.sync_round_changes,
            },
            signature_collection_timeout: config.signature_collection_timeout,
            history_enabled: config.history_enabled,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run the [`Node`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.network(...)`
    - `.kv_store(...)`
    - `.submitter(...)`
    - `.shares(...)`
    - `.configuration(...)`

    Optional:
    - `.value_check(...)`
    - `.on_start_instance(...)`
    - `.on_decide(...)`
    - `.on_stop_instance(...)`
    - `.on_propose(...)`
    - `.on_prepare(...)`
    - `.on_commit(...)`
    - `.on_round_change(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_prepare(...)`
    - `.on_receive_commit(...)`
    - `.on_receive_round_change(...)`
    - `.on_update_prepared(...)`
    - `.on_round_timeout(...)`
    - `.on_save_decided(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_reconstruct_signature(...)`
    - `.on_signature_timeout(...)`
"))]
pub struct NodeSpec<K: KVStore, N: Network + 'static, S: Submitter> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the node's Key-Value store. The argument must implement the [KVStore](crate::storage::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the collaborator that receives reconstructed signatures. Required."))]
    submitter: S,
    #[builder(setter(doc = "Set this operator's shares, one per validator. Required."))]
    shares: Vec<Share>,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |check: impl Fn(&Identifier, Height, &Value) -> bool + Send + Sync + 'static| Some(Arc::new(check) as ValueCheck),
    doc = "Register a check that proposed values must pass to be accepted. Optional."))]
    value_check: Option<ValueCheck>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartInstanceEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartInstanceEvent>),
    doc = "Register a handler closure to be invoked after an instance is started. Optional."))]
    on_start_instance: Option<HandlerPtr<StartInstanceEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after an instance decides. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StopInstanceEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StopInstanceEvent>),
    doc = "Register a handler closure to be invoked after an instance is stopped. Optional."))]
    on_stop_instance: Option<HandlerPtr<StopInstanceEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after this operator broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after this operator broadcasts a prepare. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitEvent>),
    doc = "Register a handler closure to be invoked after this operator broadcasts a commit. Optional."))]
    on_commit: Option<HandlerPtr<CommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundChangeEvent>),
    doc = "Register a handler closure to be invoked after this operator broadcasts a round change. Optional."))]
    on_round_change: Option<HandlerPtr<RoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after a valid proposal is accepted. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrepareEvent>),
    doc = "Register a handler closure to be invoked after a valid prepare is accepted. Optional."))]
    on_receive_prepare: Option<HandlerPtr<ReceivePrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveCommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveCommitEvent>),
    doc = "Register a handler closure to be invoked after a valid commit is accepted. Optional."))]
    on_receive_commit: Option<HandlerPtr<ReceiveCommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveRoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveRoundChangeEvent>),
    doc = "Register a handler closure to be invoked after a valid round change is accepted. Optional."))]
    on_receive_round_change: Option<HandlerPtr<ReceiveRoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePreparedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePreparedEvent>),
    doc = "Register a handler closure to be invoked after an instance updates its prepared round and value. Optional."))]
    on_update_prepared: Option<HandlerPtr<UpdatePreparedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a round times out. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SaveDecidedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SaveDecidedEvent>),
    doc = "Register a handler closure to be invoked after a decided message is written to storage. Optional."))]
    on_save_decided: Option<HandlerPtr<SaveDecidedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after this operator starts syncing decided messages from its peers. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after this operator finishes syncing decided messages. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReconstructSignatureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReconstructSignatureEvent>),
    doc = "Register a handler closure to be invoked after a quorum of partial signatures is reconstructed into a full signature. Optional."))]
    on_reconstruct_signature: Option<HandlerPtr<ReconstructSignatureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SignatureTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SignatureTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the collection of partial signatures times out. Optional."))]
    on_signature_timeout: Option<HandlerPtr<SignatureTimeoutEvent>>,
}

impl<K: KVStore, N: Network + 'static, S: Submitter> NodeSpec<K, N, S> {
    /// Starts all threads and channels associated with running a node, and returns the handles to them in
    /// a [`Node`] struct.
    pub fn start(self) -> Node<K> {
        let configuration = self.configuration;
        let me = configuration.me;
        let shares: BTreeMap<PublicKeyBytes, Share> = self
            .shares
            .into_iter()
            .filter(|share| {
                let mine = share.operator_id == me;
                if !mine {
                    log::warn!(
                        "ignoring a share of operator {}, this node is operator {}",
                        share.operator_id,
                        me
                    );
                }
                mine
            })
            .map(|share| (*share.committee.validator_public_key(), share))
            .collect();
        let validators = shares.keys().copied().collect();

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_start_instance,
            self.on_decide,
            self.on_stop_instance,
            self.on_propose,
            self.on_prepare,
            self.on_commit,
            self.on_round_change,
            self.on_receive_proposal,
            self.on_receive_prepare,
            self.on_receive_commit,
            self.on_receive_round_change,
            self.on_update_prepared,
            self.on_round_timeout,
            self.on_save_decided,
            self.on_start_sync,
            self.on_end_sync,
            self.on_reconstruct_signature,
            self.on_signature_timeout,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let runners = RunnerPool::new(
            configuration.into(),
            shares,
            self.kv_store.clone(),
            self.network.clone(),
            Arc::new(self.submitter),
            self.value_check,
            event_publisher,
        );

        let (commands, command_receiver) = mpsc::channel();
        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.network,
            runners,
            command_receiver,
            poller_shutdown_receiver,
        );

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(shutdown),
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                )
            }
            None => (None, None),
        };

        let store = DecidedStore::new(self.kv_store, configuration.history_enabled);
        Node {
            sync_server: SyncServer::new(store.clone(), configuration.sync_request_limit),
            store,
            validators,
            commands,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a node. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Node<K: KVStore> {
    store: DecidedStore<K>,
    sync_server: SyncServer<K>,
    validators: BTreeSet<PublicKeyBytes>,
    commands: Sender<(Identifier, Command)>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Node<K> {
    /// Start the instance for `height` of `identifier`, with `value` as this operator's input value.
    ///
    /// Blocks until the runner of `identifier` has started the instance.
    pub fn start_instance(
        &self,
        identifier: Identifier,
        height: Height,
        value: Value,
    ) -> Result<(), NodeError> {
        let (reply, response) = mpsc::channel();
        self.send(
            identifier,
            Command::StartInstance {
                height,
                value,
                reply,
            },
        )?;
        response.recv().map_err(|_| NodeError::Disconnected)??;
        Ok(())
    }

    /// Get the stage of the current instance of `identifier`, or `None` if none was ever started.
    pub fn current_stage(&self, identifier: Identifier) -> Result<Option<Stage>, NodeError> {
        let (reply, response) = mpsc::channel();
        self.send(identifier, Command::CurrentStage { reply })?;
        response.recv().map_err(|_| NodeError::Disconnected)
    }

    /// Get the stored decided messages of `identifier` with heights in `[from, to]`.
    pub fn decided_in_range(
        &self,
        identifier: &Identifier,
        from: Height,
        to: Height,
    ) -> Result<Vec<SignedMessage>, NodeError> {
        Ok(self.store.decided_in_range(identifier, from, to)?)
    }

    pub fn highest_decided(&self, identifier: &Identifier) -> Result<Option<SignedMessage>, NodeError> {
        Ok(self.store.highest_decided(identifier)?)
    }

    /// Returns the [`SyncServer`] that the network provider should answer peers' sync requests with.
    pub fn sync_server(&self) -> &SyncServer<K> {
        &self.sync_server
    }

    fn send(&self, identifier: Identifier, command: Command) -> Result<(), NodeError> {
        if !self.validators.contains(&identifier.validator_public_key) {
            return Err(NodeError::NoShareForValidator(identifier));
        }
        self.commands
            .send((identifier, command))
            .map_err(|_| NodeError::Disconnected)
    }
}

impl<K: KVStore> Drop for Node<K> {
    fn drop(&mut self) {
        // The poller owns the runners and joins them before it exits.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

#[derive(Debug)]
pub enum NodeError {
    /// This node holds no share of the identifier's validator.
    NoShareForValidator(Identifier),

    /// The node's background threads have exited.
    Disconnected,

    ControllerError(ControllerError),

    StorageError(StorageError),
}

impl From<ControllerError> for NodeError {
    fn from(value: ControllerError) -> Self {
        NodeError::ControllerError(value)
    }
}

impl From<StorageError> for NodeError {
    fn from(value: StorageError) -> Self {
        NodeError::StorageError(value)
    }
}
