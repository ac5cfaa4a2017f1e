//! A single-threaded cluster of [`Controller`]s, for tests that need to control delivery order, drop
//! messages, take operators offline, and move time forward by hand.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use qbft_rs::{
    controller::{Controller, ControllerConfiguration, ControllerError},
    instance::{InstanceConfiguration, Stage},
    networking::messages::Message,
    storage::decided_store::DecidedStore,
    sync::server::{SyncServer, DEFAULT_REQUEST_LIMIT},
    types::{
        committee::{Committee, Share},
        data_types::{DomainType, Height, OperatorID, Round, Value},
        identifier::Identifier,
        signed_messages::SignedMessage,
    },
    validation::ProtocolVersion,
};

use super::{
    keys,
    mem_db::MemDB,
    network::{Outbox, OutboxNetwork, SyncServers},
};

pub(crate) const DOMAIN: DomainType = DomainType::new([0, 0, 0, 1]);

pub(crate) const ROUND_TIMEOUT: Duration = Duration::from_secs(2);

/// Decides whether a message broadcast by the first operator is delivered to the second.
pub(crate) type Filter = Box<dyn FnMut(OperatorID, OperatorID, &SignedMessage) -> bool>;

pub(crate) fn configuration() -> ControllerConfiguration {
    ControllerConfiguration {
        instance: InstanceConfiguration {
            domain: DOMAIN,
            protocol_version: ProtocolVersion::V1,
            proposal_delay: Duration::ZERO,
            round_timeout: ROUND_TIMEOUT,
            max_round: Round::new(6),
        },
        sync_round_changes: false,
    }
}

pub(crate) struct Cluster {
    pub(crate) committee: Arc<Committee>,
    pub(crate) identifier: Identifier,
    pub(crate) shares: BTreeMap<OperatorID, Share>,
    pub(crate) controllers: BTreeMap<OperatorID, Controller<MemDB, OutboxNetwork>>,
    pub(crate) stores: BTreeMap<OperatorID, MemDB>,

    /// Every decided message returned by each operator's controller, in order.
    pub(crate) decided: BTreeMap<OperatorID, Vec<SignedMessage>>,

    outbox: Outbox,
    offline: BTreeSet<OperatorID>,
    filter: Option<Filter>,
    rng: Option<StdRng>,
}

impl Cluster {
    pub(crate) fn new(n: u64) -> Cluster {
        Cluster::with_configuration(n, configuration(), true)
    }

    pub(crate) fn with_configuration(
        n: u64,
        config: ControllerConfiguration,
        history_enabled: bool,
    ) -> Cluster {
        Cluster::with_request_limit(n, config, history_enabled, DEFAULT_REQUEST_LIMIT)
    }

    /// Like [`Cluster::with_configuration`], with every operator answering history requests with at
    /// most `request_limit` heights.
    pub(crate) fn with_request_limit(
        n: u64,
        config: ControllerConfiguration,
        history_enabled: bool,
        request_limit: u64,
    ) -> Cluster {
        let (committee, shares) = keys::committee(n, 7);
        let identifier = keys::attester(committee.validator_public_key());
        let outbox: Outbox = Arc::new(Mutex::new(VecDeque::new()));
        let sync_servers: SyncServers = Arc::new(Mutex::new(BTreeMap::new()));

        let mut controllers = BTreeMap::new();
        let mut stores = BTreeMap::new();
        let mut decided = BTreeMap::new();
        for share in &shares {
            let me = share.operator_id;
            let db = MemDB::new();
            sync_servers.lock().unwrap().insert(
                me,
                SyncServer::new(
                    DecidedStore::new(db.clone(), history_enabled),
                    request_limit,
                ),
            );
            let controller = Controller::new(
                config,
                share.clone(),
                identifier,
                DecidedStore::new(db.clone(), history_enabled),
                OutboxNetwork::new(me, outbox.clone(), sync_servers.clone()),
                None,
                None,
            );
            controllers.insert(me, controller);
            stores.insert(me, db);
            decided.insert(me, Vec::new());
        }

        Cluster {
            committee,
            identifier,
            shares: shares.into_iter().map(|share| (share.operator_id, share)).collect(),
            controllers,
            stores,
            decided,
            outbox,
            offline: BTreeSet::new(),
            filter: None,
            rng: None,
        }
    }

    pub(crate) fn operator_ids(&self) -> Vec<OperatorID> {
        self.controllers.keys().copied().collect()
    }

    pub(crate) fn leader(&self, height: u64, round: u64) -> OperatorID {
        self.committee.leader(Height::new(height), Round::new(round))
    }

    /// Operators that are offline neither send nor receive messages, and are not ticked.
    pub(crate) fn set_offline(&mut self, operator: OperatorID) {
        self.offline.insert(operator);
    }

    pub(crate) fn set_online(&mut self, operator: OperatorID) {
        self.offline.remove(&operator);
    }

    pub(crate) fn set_filter(&mut self, filter: Filter) {
        self.filter = Some(filter);
    }

    pub(crate) fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Deliver pending messages in an order drawn from `seed` from now on.
    pub(crate) fn shuffle_deliveries(&mut self, seed: u64) {
        self.rng = Some(StdRng::seed_from_u64(seed));
    }

    /// Start an instance at `height` on every online operator, with the input value `value(operator)`.
    pub(crate) fn start_all(
        &mut self,
        height: u64,
        value: impl Fn(OperatorID) -> Value,
        now: Instant,
    ) {
        for (id, controller) in self.controllers.iter_mut() {
            if self.offline.contains(id) {
                continue;
            }
            controller
                .start_instance(Height::new(height), value(*id), now)
                .unwrap();
        }
    }

    pub(crate) fn start(
        &mut self,
        operator: OperatorID,
        height: u64,
        value: Value,
        now: Instant,
    ) -> Result<(), ControllerError> {
        self.controllers
            .get_mut(&operator)
            .unwrap()
            .start_instance(Height::new(height), value, now)
    }

    /// Deliver pending messages, and the messages that they cause, until none are left.
    pub(crate) fn deliver_all(&mut self, now: Instant) {
        loop {
            let mut batch: Vec<(OperatorID, Message)> =
                self.outbox.lock().unwrap().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            if let Some(rng) = self.rng.as_mut() {
                batch.shuffle(rng);
            }
            for (from, msg) in batch {
                self.deliver(from, msg, now);
            }
        }
    }

    /// Drop every pending message.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let mut outbox = self.outbox.lock().unwrap();
        let discarded = outbox.len();
        outbox.clear();
        discarded
    }

    /// Pending consensus messages, without removing them.
    pub(crate) fn pending(&self) -> Vec<(OperatorID, SignedMessage)> {
        self.outbox
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(from, msg)| match msg {
                Message::Consensus(msg) => Some((*from, msg.clone())),
                Message::PartialSignature(_) => None,
            })
            .collect()
    }

    /// Tick the controller of every online operator.
    pub(crate) fn tick_all(&mut self, now: Instant) {
        for (id, controller) in self.controllers.iter_mut() {
            if self.offline.contains(id) {
                continue;
            }
            controller.tick(now).unwrap();
        }
    }

    pub(crate) fn tick(&mut self, operator: OperatorID, now: Instant) {
        self.controllers.get_mut(&operator).unwrap().tick(now).unwrap();
    }

    /// Hand `msg` to `to`'s controller directly, bypassing the outbox and the filter.
    pub(crate) fn process(
        &mut self,
        to: OperatorID,
        msg: SignedMessage,
        now: Instant,
    ) -> Result<Option<SignedMessage>, ControllerError> {
        let result = self
            .controllers
            .get_mut(&to)
            .unwrap()
            .process_message(msg, now);
        if let Ok(Some(decided)) = &result {
            self.decided.get_mut(&to).unwrap().push(decided.clone());
        }
        result
    }

    pub(crate) fn stage(&self, operator: OperatorID) -> Option<Stage> {
        self.controllers[&operator].current_stage()
    }

    pub(crate) fn highest_decided(&self, operator: OperatorID) -> Option<SignedMessage> {
        self.controllers[&operator].highest_decided().unwrap()
    }

    pub(crate) fn decided_value(&self, operator: OperatorID, height: u64) -> Option<Value> {
        self.controllers[&operator]
            .decided_in_range(Height::new(height), Height::new(height))
            .unwrap()
            .first()
            .map(|decided| decided.value().unwrap())
    }

    fn deliver(&mut self, from: OperatorID, msg: Message, now: Instant) {
        let Message::Consensus(msg) = msg else {
            return;
        };
        if self.offline.contains(&from) {
            return;
        }
        for to in self.operator_ids() {
            if self.offline.contains(&to) {
                continue;
            }
            if let Some(filter) = self.filter.as_mut() {
                if !filter(from, to, &msg) {
                    continue;
                }
            }
            if let Err(err) = self.process(to, msg.clone(), now) {
                log::debug!("operator {} rejected a message from {}: {:?}", to, from, err);
            }
        }
    }
}
