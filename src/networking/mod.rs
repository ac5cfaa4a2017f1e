/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! Library users provide an implementation of [`Network`](network::Network). Inbound messages are
//! polled by a single poller thread ([`receiving`]) and routed by identifier to per-identifier
//! runners. Outbound messages are sent through [`SenderHandle`](sending::SenderHandle)s owned by
//! instances, controllers, and runners.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
