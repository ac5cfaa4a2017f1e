/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Sequencing of [`Instance`](crate::instance::Instance)s for one identifier.
//!
//! A [`Controller`] is the only component that creates instances, and the only one that writes decided
//! records. It enforces two monotonicity rules:
//! 1. **Heights never go back.** [`Controller::start_instance`] fails unless the requested height is
//!    strictly above every height the controller has started or seen decided.
//! 2. **Decided records are never overwritten.** A decided record is written once per height, and the
//!    highest decided record is only replaced by one for a strictly greater height.
//!
//! ## Message routing
//!
//! Every inbound consensus message for the controller's identifier is routed as follows:
//! - A Commit signed by a quorum is a **decided message**. It is validated on its own, independent of
//!   any instance state, and stored. If it is for the current instance's height, the instance becomes
//!   decided. If it is for a later height, the controller syncs the heights in between and moves to
//!   its height.
//! - A message below the highest decided height is stale and dropped.
//! - A message for the current instance's height is passed to the instance. Accepted round changes are
//!   also persisted, so that peers can sync them.
//! - A message for a later height triggers a sync of the peers' highest decided message.

pub mod implementation;

pub use implementation::{Controller, ControllerConfiguration, ControllerError};
