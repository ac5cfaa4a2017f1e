/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of qbft-rs.
//!
//! Other types, specific to single components, live next to those components, e.g.,
//! [`crate::instance::state`].

pub mod data_types;

pub mod identifier;

pub mod crypto_primitives;

pub mod committee;

pub mod signed_messages;
