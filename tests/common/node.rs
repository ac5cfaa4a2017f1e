//! Nodes that run on [`NetworkStub`]s and [`MemDB`]s, and record what they decide and submit.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use qbft_rs::{
    events::DecideEvent,
    node::{Configuration, Node, NodeSpec, Submitter},
    threshold::ReconstructedSignature,
    types::{
        committee::Share,
        data_types::{Height, OperatorID, Round, Value},
    },
};

use super::{
    harness::DOMAIN,
    mem_db::MemDB,
    network::{mock_network, SyncServers},
};

/// A [`Submitter`] that keeps every signature it is handed.
#[derive(Clone, Default)]
pub(crate) struct RecordingSubmitter(Arc<Mutex<Vec<ReconstructedSignature>>>);

impl RecordingSubmitter {
    pub(crate) fn submitted(&self) -> Vec<ReconstructedSignature> {
        self.0.lock().unwrap().clone()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit(&self, signature: ReconstructedSignature) {
        self.0.lock().unwrap().push(signature);
    }
}

pub(crate) struct TestNode {
    pub(crate) me: OperatorID,
    pub(crate) node: Node<MemDB>,
    pub(crate) submitter: RecordingSubmitter,
    pub(crate) decided: Arc<Mutex<Vec<(Height, Value)>>>,
}

impl TestNode {
    pub(crate) fn decided_values(&self) -> Vec<(Height, Value)> {
        self.decided.lock().unwrap().clone()
    }
}

pub(crate) fn configuration(me: OperatorID) -> Configuration {
    Configuration::builder()
        .me(me)
        .domain(DOMAIN)
        .proposal_delay(Duration::from_millis(100))
        .round_timeout(Duration::from_millis(1500))
        .max_round(Round::new(12))
        .signature_collection_timeout(Duration::from_secs(5))
        .history_enabled(true)
        .log_events(false)
        .build()
}

/// Start one node for each share, all connected to each other.
pub(crate) fn start_nodes(shares: Vec<Share>) -> Vec<TestNode> {
    let sync_servers: SyncServers = Arc::new(Mutex::new(BTreeMap::new()));
    let networks = mock_network(shares.iter().map(|share| share.operator_id), sync_servers.clone());

    shares
        .into_iter()
        .zip(networks)
        .map(|(share, network)| {
            let me = share.operator_id;
            let submitter = RecordingSubmitter::default();
            let decided = Arc::new(Mutex::new(Vec::new()));
            let decided_handle = decided.clone();
            let node = NodeSpec::builder()
                .network(network)
                .kv_store(MemDB::new())
                .submitter(submitter.clone())
                .shares(vec![share])
                .configuration(configuration(me))
                .on_decide(move |event: &DecideEvent| {
                    decided_handle
                        .lock()
                        .unwrap()
                        .push((event.height, event.value.clone()))
                })
                .build()
                .start();
            sync_servers
                .lock()
                .unwrap()
                .insert(me, node.sync_server().clone());
            TestNode {
                me,
                node,
                submitter,
                decided,
            }
        })
        .collect()
}
