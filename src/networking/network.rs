/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable peer-to-peer networking interface.

use crate::{
    sync::messages::{SyncRequest, SyncResponse},
    types::data_types::OperatorID,
};

use super::messages::Message;

pub trait Network: Clone + Send {
    /// Send a message to every operator in the committee of the message's identifier, **including this
    /// operator itself**, without blocking.
    fn broadcast(&mut self, message: Message) -> Result<(), NetworkError>;

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(OperatorID, Message)>;

    /// Send `request` to the peers in the committee of its identifier and collect their responses.
    ///
    /// Peers are expected to answer using a [`SyncServer`](crate::sync::server::SyncServer). Peers that
    /// fail to respond in time are left out of the returned list.
    fn sync_request(
        &mut self,
        request: SyncRequest,
    ) -> Result<Vec<(OperatorID, SyncResponse)>, NetworkError>;
}

#[derive(Debug)]
pub enum NetworkError {
    /// No peer of the relevant committee is reachable.
    NotConnected,

    /// The peers did not answer within the network provider's deadline.
    Timeout,

    /// Any other transport failure, described by the network provider.
    Transport(String),
}
