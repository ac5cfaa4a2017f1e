//! In-process [`Network`] implementations.
//!
//! Every operator's network serves sync requests by calling its peers' [`SyncServer`]s directly, so
//! sync is synchronous and never times out.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use qbft_rs::{
    networking::{
        messages::Message,
        network::{Network, NetworkError},
    },
    sync::{
        messages::{SyncRequest, SyncResponse},
        server::SyncServer,
    },
    types::data_types::OperatorID,
};

use super::mem_db::MemDB;

/// The sync servers of every operator, shared by all of their networks.
pub(crate) type SyncServers = Arc<Mutex<BTreeMap<OperatorID, SyncServer<MemDB>>>>;

fn serve(
    me: OperatorID,
    servers: &SyncServers,
    request: SyncRequest,
) -> Result<Vec<(OperatorID, SyncResponse)>, NetworkError> {
    let servers = servers.lock().unwrap();
    Ok(servers
        .iter()
        .filter(|(peer, _)| **peer != me)
        .map(|(peer, server)| (*peer, server.handle(&request)))
        .collect())
}

/// A network stub that passes messages through mpsc channels, for tests that run full nodes.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: OperatorID,
    all_peers: BTreeMap<OperatorID, Sender<(OperatorID, Message)>>,
    inbox: Arc<Mutex<Receiver<(OperatorID, Message)>>>,
    sync_servers: SyncServers,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError> {
        for peer in self.all_peers.values() {
            let _ = peer.send((self.me, message.clone()));
        }
        Ok(())
    }

    fn recv(&mut self) -> Option<(OperatorID, Message)> {
        self.inbox.lock().unwrap().try_recv().ok()
    }

    fn sync_request(
        &mut self,
        request: SyncRequest,
    ) -> Result<Vec<(OperatorID, SyncResponse)>, NetworkError> {
        serve(self.me, &self.sync_servers, request)
    }
}

/// Create one connected [`NetworkStub`] for each of `operators`.
pub(crate) fn mock_network(
    operators: impl Iterator<Item = OperatorID>,
    sync_servers: SyncServers,
) -> Vec<NetworkStub> {
    let operators_and_channels: Vec<_> = operators
        .map(|operator| (operator, mpsc::channel()))
        .collect();
    let all_peers: BTreeMap<OperatorID, Sender<(OperatorID, Message)>> = operators_and_channels
        .iter()
        .map(|(operator, (sender, _))| (*operator, sender.clone()))
        .collect();

    operators_and_channels
        .into_iter()
        .map(|(me, (_, receiver))| NetworkStub {
            me,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(receiver)),
            sync_servers: sync_servers.clone(),
        })
        .collect()
}

/// Broadcast messages waiting to be delivered by a test, tagged with their sender.
pub(crate) type Outbox = Arc<Mutex<VecDeque<(OperatorID, Message)>>>;

/// A network whose broadcasts land in a shared [`Outbox`] instead of being delivered, for tests that
/// decide themselves when, in which order, and to whom messages are delivered.
#[derive(Clone)]
pub(crate) struct OutboxNetwork {
    me: OperatorID,
    outbox: Outbox,
    sync_servers: SyncServers,
}

impl OutboxNetwork {
    pub(crate) fn new(me: OperatorID, outbox: Outbox, sync_servers: SyncServers) -> Self {
        Self {
            me,
            outbox,
            sync_servers,
        }
    }
}

impl Network for OutboxNetwork {
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError> {
        self.outbox.lock().unwrap().push_back((self.me, message));
        Ok(())
    }

    fn recv(&mut self) -> Option<(OperatorID, Message)> {
        None
    }

    fn sync_request(
        &mut self,
        request: SyncRequest,
    ) -> Result<Vec<(OperatorID, SyncResponse)>, NetworkError> {
        serve(self.me, &self.sync_servers, request)
    }
}
