/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read and write handle into the decided records and round-change state of every identifier.
//!
//! A **decided record** is a Commit message signed by a quorum of the committee. The record for a
//! given identifier and height is written at most once, and the highest decided record of each
//! identifier only ever moves forward. See the [module-level docs](super) for the write rules.
//!
//! If history is disabled, only the highest decided record of each identifier is kept, and range
//! queries fail with [`StorageError::HistoryDisabled`] instead of returning partial data.

use borsh::BorshSerialize;

use crate::types::{
    data_types::Height,
    identifier::Identifier,
    signed_messages::{MessageError, SignedMessage},
};

use super::{
    pluggables::{KVGet, KVGetError, KVSetError, KVStore, Key, WriteBatch},
    variables,
};

/// Result of [`DecidedStore::save_decided`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveDecidedOutcome {
    /// The record was written. `updated_highest` is true if it also became the highest decided record.
    Stored { updated_highest: bool },

    /// A record for the same value, with at least as many signers, is already stored at this height.
    /// Nothing was written.
    AlreadyStored,

    /// A record for the same value, with fewer signers, was stored at this height. It was replaced.
    AddedSigners,

    /// A record for a different value is already stored at this height. Nothing was written.
    Conflicting { stored: SignedMessage },

    /// History is disabled and the record is below the highest decided height. Nothing was written.
    Stale,
}

/// Wraps a user-provided [`KVStore`] and enforces monotonic, atomic writes of decided records.
#[derive(Clone)]
pub struct DecidedStore<K: KVStore> {
    kv_store: K,
    history_enabled: bool,
}

impl<K: KVStore> DecidedStore<K> {
    pub fn new(kv_store: K, history_enabled: bool) -> Self {
        Self {
            kv_store,
            history_enabled,
        }
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    /// Get the decided record of `identifier` at `height`, if one is stored.
    ///
    /// If history is disabled, only the highest decided record can be found.
    pub fn decided(
        &self,
        identifier: &Identifier,
        height: Height,
    ) -> Result<Option<SignedMessage>, StorageError> {
        if self.history_enabled {
            return Ok(self.kv_store.decided(identifier, height)?);
        }
        Ok(self
            .kv_store
            .highest_decided(identifier)?
            .filter(|highest| highest.height() == height))
    }

    /// Get the decided record with the highest height for `identifier`, if any.
    pub fn highest_decided(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<SignedMessage>, StorageError> {
        Ok(self.kv_store.highest_decided(identifier)?)
    }

    /// Get the height of the highest decided record for `identifier`, if any.
    pub fn highest_decided_height(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<Height>, StorageError> {
        Ok(self
            .highest_decided(identifier)?
            .map(|highest| highest.height()))
    }

    /// Get every stored decided record of `identifier` with height in `[from, to]`, in ascending height
    /// order. Heights with no stored record are skipped.
    ///
    /// Fails with [`StorageError::HistoryDisabled`] if history is disabled.
    pub fn decided_in_range(
        &self,
        identifier: &Identifier,
        from: Height,
        to: Height,
    ) -> Result<Vec<SignedMessage>, StorageError> {
        if !self.history_enabled {
            return Err(StorageError::HistoryDisabled);
        }

        let snapshot = self.kv_store.snapshot();
        let mut records = Vec::new();
        let mut height = from;
        while height <= to {
            if let Some(record) = snapshot.decided(identifier, height)? {
                records.push(record);
            }
            if height.int() == u64::MAX {
                break;
            }
            height = height + 1;
        }
        Ok(records)
    }

    /// Save `decided` as the decided record for its identifier and height.
    ///
    /// A record already stored at the same height is only overwritten by a record for the same value
    /// with more signers, and the highest decided record only moves to a strictly greater height.
    /// Both writes happen in one atomic write batch.
    pub fn save_decided(
        &mut self,
        decided: &SignedMessage,
    ) -> Result<SaveDecidedOutcome, StorageError> {
        let identifier = *decided.identifier();
        let height = decided.height();
        let highest = self.kv_store.highest_decided(&identifier)?;
        let updates_highest = highest
            .as_ref()
            .map_or(true, |highest| height > highest.height());

        let existing = if self.history_enabled {
            self.kv_store.decided(&identifier, height)?
        } else {
            highest.filter(|highest| highest.height() == height)
        };
        if let Some(stored) = existing {
            if stored.value()? != decided.value()? {
                return Ok(SaveDecidedOutcome::Conflicting { stored });
            }
            if decided.signers.len() <= stored.signers.len() {
                return Ok(SaveDecidedOutcome::AlreadyStored);
            }

            // Same value with more signers: replace the record, and the highest decided record if it
            // is the one being replaced.
            let replaces_highest = !self.history_enabled
                || self
                    .kv_store
                    .highest_decided(&identifier)?
                    .map_or(false, |highest| highest.height() == height);
            let mut wb = DecidedStoreWriteBatch::new();
            if self.history_enabled {
                wb.set_decided(decided)?;
            }
            if replaces_highest {
                wb.set_highest_decided(decided)?;
            }
            self.write(wb);
            return Ok(SaveDecidedOutcome::AddedSigners);
        }

        if !self.history_enabled && !updates_highest {
            return Ok(SaveDecidedOutcome::Stale);
        }

        let mut wb = DecidedStoreWriteBatch::new();
        if self.history_enabled {
            wb.set_decided(decided)?;
        }
        if updates_highest {
            wb.set_highest_decided(decided)?;
        }
        self.write(wb);

        Ok(SaveDecidedOutcome::Stored {
            updated_highest: updates_highest,
        })
    }

    /// Get the round change with the highest (height, round) stored for `identifier`, if any.
    pub fn last_round_change(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<SignedMessage>, StorageError> {
        Ok(self.kv_store.last_round_change(identifier)?)
    }

    /// Save `round_change` as the last round change of its identifier if it has a higher
    /// (height, round) than the one currently stored. Returns whether anything was written.
    pub fn save_last_round_change(
        &mut self,
        round_change: &SignedMessage,
    ) -> Result<bool, StorageError> {
        let is_newer = self
            .kv_store
            .last_round_change(round_change.identifier())?
            .map_or(true, |stored| {
                (round_change.height(), round_change.round()) > (stored.height(), stored.round())
            });
        if !is_newer {
            return Ok(false);
        }

        let mut wb = DecidedStoreWriteBatch::new();
        wb.set_last_round_change(round_change)?;
        self.write(wb);
        Ok(true)
    }

    fn write(&mut self, write_batch: DecidedStoreWriteBatch<K::WriteBatch>) {
        self.kv_store.write(write_batch.0)
    }
}

/// Write batch that forms the storage keys of every variable from [`variables`] and serializes
/// values with Borsh.
pub struct DecidedStoreWriteBatch<W: WriteBatch>(W);

impl<W: WriteBatch> DecidedStoreWriteBatch<W> {
    pub fn new() -> DecidedStoreWriteBatch<W> {
        DecidedStoreWriteBatch(W::new())
    }

    pub fn set_decided(&mut self, decided: &SignedMessage) -> Result<(), StorageError> {
        let identifier = *decided.identifier();
        let height = decided.height();
        self.0.set(
            &variables::decided_key(&identifier, height),
            &decided
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::Decided { identifier, height },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_highest_decided(&mut self, decided: &SignedMessage) -> Result<(), StorageError> {
        let identifier = *decided.identifier();
        self.0.set(
            &variables::highest_decided_key(&identifier),
            &decided
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::HighestDecided { identifier },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_last_round_change(&mut self, round_change: &SignedMessage) -> Result<(), StorageError> {
        let identifier = *round_change.identifier();
        self.0.set(
            &variables::last_round_change_key(&identifier),
            &round_change
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastRoundChange { identifier },
                    source: err,
                })?,
        );
        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    /// Error when trying to get a value from the underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying to set a value into the underlying key value store.
    KVSetError(KVSetError),

    /// A range query was made against a store that only keeps the highest decided record.
    HistoryDisabled,

    /// A decided record, stored or to be stored, does not carry a decodable value.
    UndecodableRecord(MessageError),
}

impl From<MessageError> for StorageError {
    fn from(value: MessageError) -> Self {
        StorageError::UndecodableRecord(value)
    }
}

impl From<KVGetError> for StorageError {
    fn from(value: KVGetError) -> Self {
        StorageError::KVGetError(value)
    }
}

impl From<KVSetError> for StorageError {
    fn from(value: KVSetError) -> Self {
        StorageError::KVSetError(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex, MutexGuard},
    };

    use super::*;
    use crate::{
        storage::pluggables::KVGet,
        types::{
            crypto_primitives::Keypair,
            data_types::{DomainType, OperatorID, PublicKeyBytes, Round, Value},
            identifier::Role,
            signed_messages::{CommitData, Message, MessageType, RoundChangeData},
        },
    };

    #[derive(Clone)]
    struct TestStore(Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>);

    struct TestWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

    struct TestSnapshot<'a>(MutexGuard<'a, BTreeMap<Vec<u8>, Vec<u8>>>);

    impl WriteBatch for TestWriteBatch {
        fn new() -> Self {
            TestWriteBatch(Vec::new())
        }

        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.0.push((key.to_vec(), Some(value.to_vec())));
        }

        fn delete(&mut self, key: &[u8]) {
            self.0.push((key.to_vec(), None));
        }
    }

    impl KVGet for TestStore {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(key).cloned()
        }
    }

    impl KVGet for TestSnapshot<'_> {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.get(key).cloned()
        }
    }

    impl KVStore for TestStore {
        type WriteBatch = TestWriteBatch;
        type Snapshot<'a> = TestSnapshot<'a>;

        fn write(&mut self, wb: Self::WriteBatch) {
            let mut map = self.0.lock().unwrap();
            for (key, value) in wb.0 {
                match value {
                    Some(value) => map.insert(key, value),
                    None => map.remove(&key),
                };
            }
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().clear();
        }

        fn snapshot<'b>(&'b self) -> TestSnapshot<'b> {
            TestSnapshot(self.0.lock().unwrap())
        }
    }

    fn store(history_enabled: bool) -> DecidedStore<TestStore> {
        DecidedStore::new(
            TestStore(Arc::new(Mutex::new(BTreeMap::new()))),
            history_enabled,
        )
    }

    fn identifier() -> Identifier {
        Identifier::new(PublicKeyBytes::new([3u8; 48]), Role::Attester)
    }

    fn signed_by(
        signer: u64,
        msg_type: MessageType,
        height: u64,
        round: u64,
        data: Vec<u8>,
    ) -> SignedMessage {
        let keypair = Keypair::from_seed(&[signer as u8 + 8; 32]).unwrap();
        let message = Message {
            msg_type,
            height: Height::new(height),
            round: Round::new(round),
            identifier: identifier(),
            data,
        };
        SignedMessage::sign(message, OperatorID::new(signer), &keypair, DomainType::new([0; 4]))
            .unwrap()
    }

    fn signed(msg_type: MessageType, height: u64, round: u64, data: Vec<u8>) -> SignedMessage {
        signed_by(1, msg_type, height, round, data)
    }

    fn commit_data(value: &str) -> Vec<u8> {
        CommitData {
            value: Value::from(value),
        }
        .try_to_vec()
        .unwrap()
    }

    fn decided(height: u64, value: &str) -> SignedMessage {
        signed(MessageType::Commit, height, 1, commit_data(value))
    }

    fn decided_by(signers: &[u64], height: u64, round: u64, value: &str) -> SignedMessage {
        let commits: Vec<SignedMessage> = signers
            .iter()
            .map(|signer| signed_by(*signer, MessageType::Commit, height, round, commit_data(value)))
            .collect();
        SignedMessage::aggregate_all(&commits).unwrap()
    }

    fn round_change(height: u64, round: u64) -> SignedMessage {
        let data = RoundChangeData { prepared: None }.try_to_vec().unwrap();
        signed(MessageType::RoundChange, height, round, data)
    }

    #[test]
    fn decided_records_are_written_once_and_highest_only_moves_forward() {
        let mut store = store(true);
        let id = identifier();

        assert_eq!(
            store.save_decided(&decided(2, "b")).unwrap(),
            SaveDecidedOutcome::Stored {
                updated_highest: true
            }
        );
        assert_eq!(
            store.save_decided(&decided(1, "a")).unwrap(),
            SaveDecidedOutcome::Stored {
                updated_highest: false
            }
        );
        assert_eq!(
            store.save_decided(&decided(2, "b")).unwrap(),
            SaveDecidedOutcome::AlreadyStored
        );
        assert!(matches!(
            store.save_decided(&decided(2, "c")).unwrap(),
            SaveDecidedOutcome::Conflicting { .. }
        ));

        assert_eq!(store.highest_decided_height(&id).unwrap(), Some(Height::new(2)));
        assert_eq!(
            store.decided(&id, Height::new(2)).unwrap().unwrap().value().unwrap(),
            Value::from("b")
        );

        store.save_decided(&decided(5, "e")).unwrap();
        let heights: Vec<Height> = store
            .decided_in_range(&id, Height::new(1), Height::new(9))
            .unwrap()
            .iter()
            .map(|record| record.height())
            .collect();
        assert_eq!(heights, vec![Height::new(1), Height::new(2), Height::new(5)]);
        assert!(store
            .decided_in_range(&id, Height::new(3), Height::new(4))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn same_value_in_another_round_is_not_a_conflict() {
        for history_enabled in [true, false] {
            let mut store = store(history_enabled);
            let id = identifier();

            assert_eq!(
                store.save_decided(&decided_by(&[1, 2], 3, 1, "v")).unwrap(),
                SaveDecidedOutcome::Stored {
                    updated_highest: true
                }
            );
            assert_eq!(
                store.save_decided(&decided_by(&[2, 3], 3, 2, "v")).unwrap(),
                SaveDecidedOutcome::AlreadyStored
            );

            let more_signers = decided_by(&[2, 3, 4], 3, 2, "v");
            assert_eq!(
                store.save_decided(&more_signers).unwrap(),
                SaveDecidedOutcome::AddedSigners
            );
            assert_eq!(
                store.decided(&id, Height::new(3)).unwrap().unwrap().signers,
                more_signers.signers
            );
            assert_eq!(
                store.highest_decided(&id).unwrap().unwrap().signers,
                more_signers.signers
            );

            assert!(matches!(
                store.save_decided(&decided_by(&[1, 2, 3, 4], 3, 2, "w")).unwrap(),
                SaveDecidedOutcome::Conflicting { .. }
            ));
        }
    }

    #[test]
    fn without_history_only_the_highest_record_is_kept() {
        let mut store = store(false);
        let id = identifier();

        store.save_decided(&decided(2, "b")).unwrap();
        assert_eq!(
            store.save_decided(&decided(1, "a")).unwrap(),
            SaveDecidedOutcome::Stale
        );
        store.save_decided(&decided(3, "c")).unwrap();

        assert!(store.decided(&id, Height::new(2)).unwrap().is_none());
        assert!(store.decided(&id, Height::new(3)).unwrap().is_some());
        assert!(matches!(
            store.decided_in_range(&id, Height::new(1), Height::new(3)),
            Err(StorageError::HistoryDisabled)
        ));
        assert!(matches!(
            store.save_decided(&decided(3, "other")).unwrap(),
            SaveDecidedOutcome::Conflicting { .. }
        ));
    }

    #[test]
    fn last_round_change_only_moves_forward() {
        let mut store = store(true);
        let id = identifier();

        assert!(store.last_round_change(&id).unwrap().is_none());
        assert!(store.save_last_round_change(&round_change(1, 2)).unwrap());
        assert!(!store.save_last_round_change(&round_change(1, 1)).unwrap());
        assert!(!store.save_last_round_change(&round_change(1, 2)).unwrap());
        assert!(store.save_last_round_change(&round_change(2, 1)).unwrap());

        let stored = store.last_round_change(&id).unwrap().unwrap();
        assert_eq!((stored.height(), stored.round()), (Height::new(2), Round::new(1)));
    }
}
