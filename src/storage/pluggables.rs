/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence.
//!
//! Library users implement [`KVStore`] (and with it, [`KVGet`] and [`WriteBatch`]) over the storage
//! engine of their choice. qbft-rs only needs point reads and atomic batched writes.

use std::fmt::{self, Display, Formatter};

use borsh::BorshDeserialize;

use crate::types::{data_types::Height, identifier::Identifier, signed_messages::SignedMessage};

use super::variables;

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Decided ↓↓↓ */

    fn decided(
        &self,
        identifier: &Identifier,
        height: Height,
    ) -> Result<Option<SignedMessage>, KVGetError> {
        deserialize_value(
            self.get(&variables::decided_key(identifier, height)),
            || Key::Decided {
                identifier: *identifier,
                height,
            },
        )
    }

    /* ↓↓↓ Highest Decided ↓↓↓ */

    fn highest_decided(&self, identifier: &Identifier) -> Result<Option<SignedMessage>, KVGetError> {
        deserialize_value(
            self.get(&variables::highest_decided_key(identifier)),
            || Key::HighestDecided {
                identifier: *identifier,
            },
        )
    }

    /* ↓↓↓ Last Round Change ↓↓↓ */

    fn last_round_change(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<SignedMessage>, KVGetError> {
        deserialize_value(
            self.get(&variables::last_round_change_key(identifier)),
            || Key::LastRoundChange {
                identifier: *identifier,
            },
        )
    }
}

fn deserialize_value<T: BorshDeserialize>(
    bytes: Option<Vec<u8>>,
    key: impl FnOnce() -> Key,
) -> Result<Option<T>, KVGetError> {
    match bytes {
        Some(bytes) => T::deserialize(&mut bytes.as_slice())
            .map(Some)
            .map_err(|err| KVGetError::DeserializeValueError {
                key: key(),
                source: err,
            }),
        None => Ok(None),
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found, even though an invariant of the store
///    says that it must exist.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

/// Error when trying to serialize a value before setting it into a [`WriteBatch`].
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug)]
pub enum Key {
    Decided { identifier: Identifier, height: Height },
    HighestDecided { identifier: Identifier },
    LastRoundChange { identifier: Identifier },
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Decided { identifier, height } => {
                write!(f, "Decided for {} at height {}", identifier, height)
            }
            Key::HighestDecided { identifier } => write!(f, "Highest Decided for {}", identifier),
            Key::LastRoundChange { identifier } => {
                write!(f, "Last Round Change for {}", identifier)
            }
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
