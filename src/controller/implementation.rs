/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Controller`] of one identifier.

use std::{
    sync::mpsc::Sender,
    time::{Instant, SystemTime},
};

use crate::{
    events::{Event, SaveDecidedEvent},
    instance::{Instance, InstanceConfiguration, InstanceError, Stage},
    networking::{
        network::{Network, NetworkError},
        sending::SenderHandle,
    },
    storage::{
        decided_store::{DecidedStore, SaveDecidedOutcome, StorageError},
        pluggables::KVStore,
    },
    sync::client::{self, SyncError, SyncTarget},
    types::{
        committee::{Share, ShareError},
        data_types::{Height, Value},
        identifier::Identifier,
        signed_messages::{MessageType, SignedMessage},
    },
    validation::{pipelines::decided_pipeline, ValidationError, ValueCheck},
};

/// Parameters of a [`Controller`].
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfiguration {
    /// Passed to every instance the controller creates.
    pub instance: InstanceConfiguration,

    /// Whether to ask peers for their last round change right after starting an instance.
    pub sync_round_changes: bool,
}

/// Sequences the instances of one identifier and bridges them to storage and to sync.
///
/// The controller owns at most one live [`Instance`] at a time: the one for the height most recently
/// passed to [`start_instance`](Self::start_instance). Starting a new height stops and discards the
/// previous instance. Its decided record, if any, stays in storage.
pub struct Controller<K: KVStore, N: Network> {
    config: ControllerConfiguration,
    share: Share,
    identifier: Identifier,
    store: DecidedStore<K>,
    network: N,
    sender_handle: SenderHandle<N>,
    instance: Option<Instance<N>>,
    height: Option<Height>,
    future_sync_height: Option<Height>,
    value_check: Option<ValueCheck>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, N: Network> Controller<K, N> {
    pub fn new(
        config: ControllerConfiguration,
        share: Share,
        identifier: Identifier,
        store: DecidedStore<K>,
        network: N,
        value_check: Option<ValueCheck>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            share,
            identifier,
            store,
            sender_handle: SenderHandle::new(network.clone()),
            network,
            instance: None,
            height: None,
            future_sync_height: None,
            value_check,
            event_publisher,
        }
    }

    /// Catch up with the peers' highest decided message, so that heights the committee has already
    /// decided are never started again.
    pub fn init(&mut self) -> Result<(), ControllerError> {
        if let Some(local_highest) = self.store.highest_decided_height(&self.identifier)? {
            self.bump_height(local_highest);
        }
        let fetched = client::fetch_highest_decided(
            &mut self.sender_handle,
            SyncTarget {
                committee: &self.share.committee,
                domain: self.config.instance.domain,
                identifier: &self.identifier,
            },
        )?;
        if let Some(decided) = fetched {
            self.process_decided(decided)?;
        }
        Ok(())
    }

    /// Create and start an instance for `height` with `value` as this operator's input value.
    ///
    /// Fails with [`ControllerError::HeightNotIncreasing`] unless `height` is strictly above every
    /// height this controller has started or seen decided.
    pub fn start_instance(
        &mut self,
        height: Height,
        value: Value,
        now: Instant,
    ) -> Result<(), ControllerError> {
        self.share.check().map_err(ControllerError::InvalidShare)?;
        if let Some(current) = self.height {
            if height <= current {
                return Err(ControllerError::HeightNotIncreasing {
                    current,
                    requested: height,
                });
            }
        }

        if let Some(mut previous) = self.instance.take() {
            previous.stop();
        }
        self.height = Some(height);

        let instance = self.instance.insert(Instance::new(
            self.config.instance,
            self.share.clone(),
            self.identifier,
            height,
            self.network.clone(),
            self.value_check.clone(),
            self.event_publisher.clone(),
        ));
        instance.start(value, now)?;

        if self.config.sync_round_changes {
            self.sync_round_changes(height, now);
        }
        Ok(())
    }

    /// Route `msg` to the decided-message path, to the current instance, or to sync.
    ///
    /// Returns the decided message if the current instance became decided as a result.
    pub fn process_message(
        &mut self,
        msg: SignedMessage,
        now: Instant,
    ) -> Result<Option<SignedMessage>, ControllerError> {
        if msg.identifier() != &self.identifier {
            return Err(ControllerError::WrongIdentifier);
        }

        if self.is_decided_message(&msg) {
            return self.process_decided(msg);
        }

        if let Some(highest_decided) = self.store.highest_decided_height(&self.identifier)? {
            if msg.height() < highest_decided {
                return Err(ControllerError::StaleMessage {
                    height: msg.height(),
                    highest_decided,
                });
            }
        }

        let instance_height = self.instance.as_ref().map(|instance| instance.height());
        match instance_height {
            Some(instance_height) if msg.height() == instance_height => (),
            Some(instance_height) if msg.height() < instance_height => {
                return Err(ControllerError::NoInstanceForHeight {
                    height: msg.height(),
                })
            }
            None if self.height.map_or(false, |current| msg.height() <= current) => {
                return Err(ControllerError::NoInstanceForHeight {
                    height: msg.height(),
                })
            }
            Some(_) | None => {
                self.on_future_message(msg.height());
                return Ok(None);
            }
        }

        let Some(instance) = self.instance.as_mut() else {
            return Err(ControllerError::NoInstanceForHeight {
                height: msg.height(),
            });
        };
        // Terminal instances ignore messages without validating them.
        let round_change = (msg.msg_type() == MessageType::RoundChange
            && !instance.stage().is_terminal())
        .then(|| msg.clone());
        let decided = if instance.process_message(msg, now)? {
            instance.decided_message().cloned()
        } else {
            None
        };

        if let Some(round_change) = round_change {
            self.store.save_last_round_change(&round_change)?;
        }

        if let Some(decided) = &decided {
            self.persist_decided(decided)?;
            if let Err(err) = self.sender_handle.broadcast(decided.clone()) {
                log::warn!(
                    "{}: failed to broadcast decided message at height {}: {:?}",
                    self.identifier,
                    decided.height(),
                    err
                );
            }
        }
        Ok(decided)
    }

    /// Drive the current instance's proposal delay and round timer.
    pub fn tick(&mut self, now: Instant) -> Result<(), ControllerError> {
        if let Some(instance) = self.instance.as_mut() {
            instance.tick(now)?;
        }
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.instance
            .as_ref()
            .and_then(|instance| instance.next_deadline())
    }

    /// Stop the current instance, if any.
    pub fn stop(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.stop();
        }
    }

    /// Stage of the current instance, or `None` if no instance was ever started.
    pub fn current_stage(&self) -> Option<Stage> {
        self.instance.as_ref().map(|instance| instance.stage())
    }

    /// The highest height this controller has started or seen decided.
    pub fn current_height(&self) -> Option<Height> {
        self.height
    }

    pub fn instance(&self) -> Option<&Instance<N>> {
        self.instance.as_ref()
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn highest_decided(&self) -> Result<Option<SignedMessage>, ControllerError> {
        Ok(self.store.highest_decided(&self.identifier)?)
    }

    pub fn decided_in_range(
        &self,
        from: Height,
        to: Height,
    ) -> Result<Vec<SignedMessage>, ControllerError> {
        Ok(self.store.decided_in_range(&self.identifier, from, to)?)
    }

    /* ↓↓↓ Decided messages ↓↓↓ */

    fn is_decided_message(&self, msg: &SignedMessage) -> bool {
        msg.msg_type() == MessageType::Commit
            && msg.signers.len() > 1
            && self.share.committee.has_quorum(msg.signers.len())
    }

    /// Validate and store a decided message. If it is for the current instance's height, the instance
    /// becomes decided. If it is for a future height, the heights in between are synced first and the
    /// controller moves to its height.
    fn process_decided(
        &mut self,
        decided: SignedMessage,
    ) -> Result<Option<SignedMessage>, ControllerError> {
        decided_pipeline(&self.share.committee, self.config.instance.domain, &self.identifier)
            .run(&decided)
            .map_err(ControllerError::InvalidDecided)?;
        let height = decided.height();

        if let Some(local_highest) = self.store.highest_decided_height(&self.identifier)? {
            if height > local_highest + 1 {
                let synced = client::sync_decided(
                    &mut self.sender_handle,
                    &mut self.store,
                    SyncTarget {
                        committee: &self.share.committee,
                        domain: self.config.instance.domain,
                        identifier: &self.identifier,
                    },
                    local_highest + 1,
                    Height::new(height.int() - 1),
                    &self.event_publisher,
                );
                if let Err(err) = synced {
                    log::warn!(
                        "{}: failed to sync decided messages below height {}: {:?}",
                        self.identifier,
                        height,
                        err
                    );
                }
            }
        }

        self.persist_decided(&decided)?;

        let newly_decided = match self.instance.as_mut() {
            Some(instance) if instance.height() == height => instance.process_decided(&decided)?,
            _ => false,
        };

        if self.height.map_or(true, |current| height > current) {
            if let Some(instance) = self.instance.as_mut() {
                instance.stop();
            }
            self.bump_height(height);
        }

        Ok(newly_decided.then_some(decided))
    }

    fn persist_decided(&mut self, decided: &SignedMessage) -> Result<(), ControllerError> {
        match self.store.save_decided(decided)? {
            SaveDecidedOutcome::Stored { updated_highest } => {
                Event::SaveDecided(SaveDecidedEvent {
                    timestamp: SystemTime::now(),
                    identifier: self.identifier,
                    height: decided.height(),
                    updated_highest,
                })
                .publish(&self.event_publisher);
                Ok(())
            }
            SaveDecidedOutcome::AddedSigners
            | SaveDecidedOutcome::AlreadyStored
            | SaveDecidedOutcome::Stale => Ok(()),
            SaveDecidedOutcome::Conflicting { stored } => {
                log::error!(
                    "{}: conflicting decided messages at height {}: stored {:?}, received {:?}",
                    self.identifier,
                    decided.height(),
                    stored.message.commit_data().map(|data| data.value),
                    decided.message.commit_data().map(|data| data.value),
                );
                Err(ControllerError::ConflictingDecided {
                    height: decided.height(),
                })
            }
        }
    }

    /* ↓↓↓ Sync triggers ↓↓↓ */

    /// Ask peers for their highest decided message, at most once per future height.
    fn on_future_message(&mut self, height: Height) {
        if self
            .future_sync_height
            .map_or(false, |synced| height <= synced)
        {
            return;
        }
        self.future_sync_height = Some(height);

        let fetched = client::fetch_highest_decided(
            &mut self.sender_handle,
            SyncTarget {
                committee: &self.share.committee,
                domain: self.config.instance.domain,
                identifier: &self.identifier,
            },
        );
        let result = match fetched {
            Ok(Some(decided)) => self.process_decided(decided).map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => Err(ControllerError::SyncError(err)),
        };
        if let Err(err) = result {
            log::warn!(
                "{}: failed to catch up after a message for height {}: {:?}",
                self.identifier,
                height,
                err
            );
        }
    }

    fn sync_round_changes(&mut self, height: Height, now: Instant) {
        let round_changes =
            match client::fetch_last_round_changes(&mut self.sender_handle, &self.identifier, height) {
                Ok(round_changes) => round_changes,
                Err(err) => {
                    log::warn!(
                        "{}: failed to fetch peers' last round changes: {:?}",
                        self.identifier,
                        err
                    );
                    return;
                }
            };
        for round_change in round_changes {
            if let Err(err) = self.process_message(round_change, now) {
                log::debug!(
                    "{}: dropping synced round change at height {}: {:?}",
                    self.identifier,
                    height,
                    err
                );
            }
        }
    }

    fn bump_height(&mut self, height: Height) {
        if self.height.map_or(true, |current| height > current) {
            self.height = Some(height);
        }
    }
}

/// The different ways a call to a method of [`Controller`] can fail.
#[derive(Debug)]
pub enum ControllerError {
    /// An instance was requested for a height at or below one already started or decided.
    HeightNotIncreasing { current: Height, requested: Height },

    /// The message belongs to another identifier.
    WrongIdentifier,

    /// The message is for a height below the highest decided height.
    StaleMessage { height: Height, highest_decided: Height },

    /// The message is for a past height whose instance has been discarded.
    NoInstanceForHeight { height: Height },

    /// A decided message failed validation.
    InvalidDecided(ValidationError),

    /// The share's committee is empty or does not include this operator.
    InvalidShare(ShareError),

    /// A valid decided message carries a different value than the one stored for its height.
    ConflictingDecided { height: Height },

    InstanceError(InstanceError),

    StorageError(StorageError),

    SyncError(SyncError),

    NetworkError(NetworkError),
}

impl From<InstanceError> for ControllerError {
    fn from(value: InstanceError) -> Self {
        ControllerError::InstanceError(value)
    }
}

impl From<StorageError> for ControllerError {
    fn from(value: StorageError) -> Self {
        ControllerError::StorageError(value)
    }
}

impl From<SyncError> for ControllerError {
    fn from(value: SyncError) -> Self {
        ControllerError::SyncError(value)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(value: NetworkError) -> Self {
        ControllerError::NetworkError(value)
    }
}
