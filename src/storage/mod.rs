/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent storage of decided messages and round-change state.
//!
//! qbft-rs does not ship a storage engine. Instead, library users provide an implementation of the
//! [`KVStore`](pluggables::KVStore) trait, and qbft-rs lays out its state on top of it as described in
//! [`variables`]. The [`DecidedStore`](decided_store::DecidedStore) wraps the user's store and enforces
//! the write rules for decided records:
//! 1. A decided record, once stored for a given identifier and height, is never overwritten.
//! 2. The "highest decided" pointer of an identifier only ever moves to a strictly greater height.
//! 3. Both of the above are applied in a single atomic write batch, so a reader never observes a record
//!    that is stored but not yet reflected in the highest pointer (or vice versa).

pub mod decided_store;

pub mod pluggables;

pub mod variables;
