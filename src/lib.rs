/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the QBFT consensus protocol for committees of operators that jointly hold a
//! threshold-shared BLS validator key.
//!
//! For every duty of a validator, the committee runs a sequence of QBFT instances, one per height,
//! to agree on the exact value each operator will sign. Once an instance decides, every operator signs
//! the decided value with its secret-key share, and any quorum of these partial signatures is
//! interpolated into the validator's full signature.
//!
//! ## Getting started
//!
//! Library users provide three pluggable components, and start a [`Node`](node::Node) with them:
//! 1. A [`Network`](networking::network::Network) that broadcasts messages to the committee and
//!    carries sync requests.
//! 2. A [`KVStore`](storage::pluggables::KVStore) that persists decided messages.
//! 3. A [`Submitter`](node::Submitter) that receives reconstructed signatures.
//!
//! ## Crate layout
//!
//! - [`types`]: the committee/share model, messages, and cryptographic primitives.
//! - [`validation`]: the message validation pipelines and the quorum and justification logic.
//! - [`instance`]: the QBFT state machine for one height.
//! - [`controller`]: sequencing of instances, decided persistence, and sync triggers.
//! - [`sync`]: catching up on decided messages and round changes from peers.
//! - [`threshold`]: key splitting and reconstruction of the validator's signature.
//! - [`storage`], [`networking`]: the pluggable persistence and networking interfaces.
//! - [`node`], [`events`]: running a node, and observing what it does.

pub mod controller;

pub mod events;

pub mod instance;

pub mod networking;

pub mod node;

pub mod storage;

pub mod sync;

pub mod threshold;

pub mod types;

pub mod validation;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub(crate) mod runner;
