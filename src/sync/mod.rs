/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol that catches up the local decided records in case the operator misses out on messages.
//!
//! Sync is triggered by the [`Controller`](crate::controller::Controller) in three situations:
//! 1. When it is created, it asks its peers for their highest decided message.
//! 2. When it receives a decided message for a height above the next one it expects, it fetches the
//!    decided messages for the heights in between.
//! 3. When it receives any other message for a future height, it asks its peers for their highest
//!    decided message, at most once per height.
//!
//! In addition, right after starting an instance, the controller asks its peers for their last round
//! change and feeds those for the new height into the instance, so that an operator that restarts
//! mid-height joins the round its peers are in.
//!
//! The serving side ([`server::SyncServer`]) answers requests from the local store.

pub mod messages;

pub(crate) mod client;

pub mod server;

pub use client::SyncError;
