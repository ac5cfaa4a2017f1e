/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use crate::sync::messages::{SyncRequest, SyncResponse};
use crate::types::data_types::OperatorID;

use super::{
    messages::Message,
    network::{Network, NetworkError},
};

/// Handle for broadcasting messages to the [`Network`].
///
/// It can be used to broadcast instances of any type that implement the [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) -> Result<(), NetworkError> {
        self.network.broadcast(msg.into())
    }

    pub(crate) fn sync_request(
        &mut self,
        request: SyncRequest,
    ) -> Result<Vec<(OperatorID, SyncResponse)>, NetworkError> {
        self.network.sync_request(request)
    }
}
