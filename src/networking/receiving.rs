/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network and routing them to runners.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::{
    node::Submitter,
    runner::{Command, RunnerInput, RunnerPool},
    storage::pluggables::KVStore,
    types::identifier::Identifier,
};

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for messages and routes each one to the runner
/// of the message's identifier.
///
/// The poller also relays [`Command`]s from the [`Node`](crate::node::Node) handle. It owns the
/// [`RunnerPool`], so runners are only ever spawned from this thread, and are shut down and joined when
/// the poller exits.
pub(crate) fn start_polling<K: KVStore, N: Network + 'static, S: Submitter>(
    mut network: N,
    mut runners: RunnerPool<K, N, S>,
    commands: Receiver<(Identifier, Command)>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let mut idle = true;

        while let Ok((identifier, command)) = commands.try_recv() {
            idle = false;
            if !runners.dispatch(identifier, RunnerInput::Command(command)) {
                log::warn!("{}: no share for the validator of this identifier", identifier);
            }
        }

        if let Some((origin, msg)) = network.recv() {
            idle = false;
            let identifier = *msg.identifier();
            if !runners.dispatch(identifier, RunnerInput::Message(origin, msg)) {
                log::debug!(
                    "{}: dropping message from {}: no share for this validator",
                    identifier,
                    origin
                );
            }
        }

        if idle {
            thread::yield_now()
        }
    })
}
