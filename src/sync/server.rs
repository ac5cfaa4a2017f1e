/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The serving side of sync: answers [`SyncRequest`]s from the local [`DecidedStore`].
//!
//! The server never touches consensus state. Every answer is a pure read against storage.
//!
//! History requests are answered with at most [`SyncServer::request_limit`] records, starting from the
//! lowest requested height. Clients that need more send further requests.

use crate::{
    storage::{
        decided_store::{DecidedStore, StorageError},
        pluggables::KVStore,
    },
    types::data_types::Height,
};

use super::messages::{SyncRequest, SyncResponse};

/// Default maximum number of decided records returned for one history request.
pub const DEFAULT_REQUEST_LIMIT: u64 = 64;

#[derive(Clone)]
pub struct SyncServer<K: KVStore> {
    store: DecidedStore<K>,
    request_limit: u64,
}

impl<K: KVStore> SyncServer<K> {
    pub fn new(store: DecidedStore<K>, request_limit: u64) -> Self {
        Self {
            store,
            request_limit: request_limit.max(1),
        }
    }

    pub fn request_limit(&self) -> u64 {
        self.request_limit
    }

    /// Answer `request` from the local store.
    pub fn handle(&self, request: &SyncRequest) -> SyncResponse {
        let response = match request {
            SyncRequest::HighestDecided { identifier } => self
                .store
                .highest_decided(identifier)
                .map(|highest| SyncResponse::Decided(highest.into_iter().collect())),

            SyncRequest::DecidedHistory {
                identifier,
                from,
                to,
            } => {
                if to < from {
                    Ok(SyncResponse::Decided(Vec::new()))
                } else {
                    let limit_to = from.int().saturating_add(self.request_limit - 1);
                    let to = (*to).min(Height::new(limit_to));
                    self.store
                        .decided_in_range(identifier, *from, to)
                        .map(SyncResponse::Decided)
                }
            }

            SyncRequest::LastRoundChange { identifier } => self
                .store
                .last_round_change(identifier)
                .map(SyncResponse::RoundChange),
        };

        match response {
            Ok(response) => response,
            Err(StorageError::HistoryDisabled) => SyncResponse::HistoryDisabled,
            Err(err) => {
                log::warn!(
                    "{}: failed to read storage while serving a sync request: {:?}",
                    request.identifier(),
                    err
                );
                SyncResponse::Error
            }
        }
    }
}
