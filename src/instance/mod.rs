/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-height QBFT state machine.
//!
//! An [`Instance`] runs one agreement for one (identifier, height) pair. It goes through a sequence of
//! rounds, each led by the operator that [`Committee::leader`](crate::types::committee::Committee::leader)
//! selects for it, until it decides or is stopped.
//!
//! ## Round flow
//!
//! 1. The leader broadcasts a **Proposal** for the round. In the first round, it proposes its own input
//!    value after a short delay. In later rounds, it proposes the value justified by a quorum of
//!    round changes.
//! 2. On accepting the proposal, every operator broadcasts a **Prepare** for its value.
//! 3. On seeing Prepares for the value from a quorum, an operator records the round and value as
//!    *prepared* and broadcasts a **Commit**.
//! 4. On seeing Commits for the value from a quorum, an operator aggregates them into a *decided
//!    message* and moves to [`Decided`](state::Stage::Decided).
//!
//! ## Round changes
//!
//! When the round timer expires, an operator moves to the next round and broadcasts a **RoundChange**
//! that carries its prepared state, if it has one, together with the Prepares that prove it. The timer
//! of round `r` is `round_timeout * r`.
//!
//! Two rules move an operator forward without waiting for its own timer:
//! - If round changes for rounds above its current round come from a partial quorum, it jumps to the
//!   lowest of those rounds and broadcasts its own round change.
//! - If it accepts a justified Proposal for a round above its current round, it jumps to that round.
//!
//! Each of the Prepare-quorum, Commit-quorum and RoundChange-quorum rules fires at most once per round.

pub mod container;

pub mod implementation;

pub mod round_timer;

pub mod state;

pub use implementation::{Instance, InstanceConfiguration, InstanceError};
pub use state::Stage;
