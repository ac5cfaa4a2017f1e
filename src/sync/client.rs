/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The requesting side of sync.
//!
//! Every decided message fetched from a peer goes through the
//! [decided pipeline](crate::validation::pipelines::decided_pipeline) before it is stored, so a
//! Byzantine peer can at worst withhold records, never plant one.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::mpsc::Sender,
    time::SystemTime,
};

use crate::{
    events::{EndSyncEvent, Event, SaveDecidedEvent, StartSyncEvent},
    networking::{
        network::{Network, NetworkError},
        sending::SenderHandle,
    },
    storage::{
        decided_store::{DecidedStore, SaveDecidedOutcome, StorageError},
        pluggables::KVStore,
    },
    types::{
        committee::Committee,
        data_types::{DomainType, Height},
        identifier::Identifier,
        signed_messages::{MessageType, SignedMessage},
    },
    validation::pipelines::decided_pipeline,
};

use super::messages::{SyncRequest, SyncResponse};

/// The committee, domain and identifier that fetched messages are validated against.
#[derive(Clone, Copy)]
pub(crate) struct SyncTarget<'a> {
    pub(crate) committee: &'a Committee,
    pub(crate) domain: DomainType,
    pub(crate) identifier: &'a Identifier,
}

impl<'a> SyncTarget<'a> {
    fn is_valid_decided(&self, msg: &SignedMessage) -> bool {
        match decided_pipeline(self.committee, self.domain, self.identifier).run(msg) {
            Ok(()) => true,
            Err(err) => {
                log::debug!(
                    "{}: dropping synced decided message at height {}: {:?}",
                    self.identifier,
                    msg.height(),
                    err
                );
                false
            }
        }
    }
}

/// Ask every peer for its highest decided message and return the valid one with the greatest height.
/// Ties are broken in favor of the first one seen.
pub(crate) fn fetch_highest_decided<N: Network>(
    sender: &mut SenderHandle<N>,
    target: SyncTarget,
) -> Result<Option<SignedMessage>, SyncError> {
    let responses = sender.sync_request(SyncRequest::HighestDecided {
        identifier: *target.identifier,
    })?;

    let mut highest: Option<SignedMessage> = None;
    for (_, response) in responses {
        let SyncResponse::Decided(msgs) = response else {
            continue;
        };
        for msg in msgs {
            let is_higher = highest
                .as_ref()
                .map_or(true, |highest| msg.height() > highest.height());
            if is_higher && target.is_valid_decided(&msg) {
                highest = Some(msg);
            }
        }
    }
    Ok(highest)
}

/// Ask every peer for its last round change and return those for `height`, in the order received.
///
/// The returned messages are not validated. They are meant to be fed into the instance for `height`,
/// which validates them like any other message.
pub(crate) fn fetch_last_round_changes<N: Network>(
    sender: &mut SenderHandle<N>,
    identifier: &Identifier,
    height: Height,
) -> Result<Vec<SignedMessage>, SyncError> {
    let responses = sender.sync_request(SyncRequest::LastRoundChange {
        identifier: *identifier,
    })?;
    Ok(responses
        .into_iter()
        .filter_map(|(_, response)| match response {
            SyncResponse::RoundChange(Some(msg))
                if msg.height() == height && msg.msg_type() == MessageType::RoundChange =>
            {
                Some(msg)
            }
            _ => None,
        })
        .collect())
}

/// Fill the gaps in the local decided records of the target identifier for heights in `[from, to]`.
///
/// Heights are scanned in ascending order. For each height with no local record, the first valid decided
/// message received for it is stored. Returns the number of records stored.
pub(crate) fn sync_decided<K: KVStore, N: Network>(
    sender: &mut SenderHandle<N>,
    store: &mut DecidedStore<K>,
    target: SyncTarget,
    from: Height,
    to: Height,
    event_publisher: &Option<Sender<Event>>,
) -> Result<usize, SyncError> {
    if to < from {
        return Ok(0);
    }

    Event::StartSync(StartSyncEvent {
        timestamp: SystemTime::now(),
        identifier: *target.identifier,
        from,
        to,
    })
    .publish(event_publisher);

    let mut missing = BTreeSet::new();
    let mut height = from;
    loop {
        if store.decided(target.identifier, height)?.is_none() {
            missing.insert(height);
        }
        if height >= to {
            break;
        }
        height = height + 1;
    }

    let mut synced = 0;
    if missing.len() == 1 && from == to {
        // A single missing height is just the peers' highest decided, if they have moved no further.
        if let Some(decided) = fetch_highest_decided(sender, target)? {
            if decided.height() == from && save(store, &decided, event_publisher)? {
                synced += 1;
            }
        }
    } else {
        let mut next = missing.iter().next().copied();
        while let Some(cursor) = next {
            let responses = sender.sync_request(SyncRequest::DecidedHistory {
                identifier: *target.identifier,
                from: cursor,
                to,
            })?;

            let mut candidates: BTreeMap<Height, SignedMessage> = BTreeMap::new();
            let mut highest_returned = cursor;
            for (_, response) in responses {
                let SyncResponse::Decided(msgs) = response else {
                    continue;
                };
                for msg in msgs {
                    let height = msg.height();
                    if height < cursor || height > to {
                        continue;
                    }
                    highest_returned = highest_returned.max(height);
                    if !missing.contains(&height) || candidates.contains_key(&height) {
                        continue;
                    }
                    if target.is_valid_decided(&msg) {
                        candidates.insert(height, msg);
                    }
                }
            }

            for decided in candidates.values() {
                if save(store, decided, event_publisher)? {
                    synced += 1;
                }
            }
            // Resume at the first missing height above every height any peer returned.
            next = missing
                .range((Bound::Excluded(highest_returned), Bound::Unbounded))
                .next()
                .copied();
        }
    }

    Event::EndSync(EndSyncEvent {
        timestamp: SystemTime::now(),
        identifier: *target.identifier,
        synced,
        highest_decided: store.highest_decided_height(target.identifier)?,
    })
    .publish(event_publisher);

    Ok(synced)
}

fn save<K: KVStore>(
    store: &mut DecidedStore<K>,
    decided: &SignedMessage,
    event_publisher: &Option<Sender<Event>>,
) -> Result<bool, SyncError> {
    match store.save_decided(decided)? {
        SaveDecidedOutcome::Stored { updated_highest } => {
            Event::SaveDecided(SaveDecidedEvent {
                timestamp: SystemTime::now(),
                identifier: *decided.identifier(),
                height: decided.height(),
                updated_highest,
            })
            .publish(event_publisher);
            Ok(true)
        }
        SaveDecidedOutcome::Conflicting { .. } => {
            log::error!(
                "{}: synced decided message at height {} conflicts with the stored one",
                decided.identifier(),
                decided.height()
            );
            Ok(false)
        }
        SaveDecidedOutcome::AddedSigners
        | SaveDecidedOutcome::AlreadyStored
        | SaveDecidedOutcome::Stale => Ok(false),
    }
}

#[derive(Debug)]
pub enum SyncError {
    NetworkError(NetworkError),
    StorageError(StorageError),
}

impl From<NetworkError> for SyncError {
    fn from(value: NetworkError) -> Self {
        SyncError::NetworkError(value)
    }
}

impl From<StorageError> for SyncError {
    fn from(value: StorageError) -> Self {
        SyncError::StorageError(value)
    }
}
