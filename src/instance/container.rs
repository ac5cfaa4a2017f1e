/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-round storage of accepted messages of one type, with a running tally of distinct signers per
//! payload digest.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{
    data_types::{CryptoHash, OperatorID, Round},
    signed_messages::SignedMessage,
};

#[derive(Default)]
struct RoundEntry {
    messages: Vec<SignedMessage>,
    signers: BTreeSet<OperatorID>,
    tally: HashMap<CryptoHash, BTreeSet<OperatorID>>,
}

/// Accepted messages of one type, grouped by round.
///
/// Within a round, the first message from each signer wins: a message is only added if none of its
/// signers already contributed a message to that round. Adding the same message twice therefore leaves
/// the container unchanged.
#[derive(Default)]
pub struct MessageContainer {
    rounds: BTreeMap<Round, RoundEntry>,
}

impl MessageContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `msg`, whose payload has `digest`, if none of its signers has a message in its round yet.
    /// Returns whether `msg` was added.
    pub fn add_first_for_signers(&mut self, msg: SignedMessage, digest: CryptoHash) -> bool {
        let entry = self.rounds.entry(msg.round()).or_default();
        if msg
            .signers
            .iter()
            .any(|signer| entry.signers.contains(signer))
        {
            return false;
        }

        entry.signers.extend(msg.signers.iter().copied());
        entry
            .tally
            .entry(digest)
            .or_default()
            .extend(msg.signers.iter().copied());
        entry.messages.push(msg);
        true
    }

    /// Get every accepted message of `round`, in order of acceptance.
    pub fn messages_for_round(&self, round: Round) -> &[SignedMessage] {
        self.rounds
            .get(&round)
            .map_or(&[], |entry| entry.messages.as_slice())
    }

    /// Get the accepted messages of `round` whose payload has `digest`.
    pub fn messages_for_digest(&self, round: Round, digest: &CryptoHash) -> Vec<SignedMessage> {
        let Some(entry) = self.rounds.get(&round) else {
            return Vec::new();
        };
        let Some(signers) = entry.tally.get(digest) else {
            return Vec::new();
        };
        entry
            .messages
            .iter()
            .filter(|msg| msg.signers.iter().all(|signer| signers.contains(signer)))
            .cloned()
            .collect()
    }

    /// Number of distinct signers of messages in `round` whose payload has `digest`.
    pub fn signer_count(&self, round: Round, digest: &CryptoHash) -> usize {
        self.rounds
            .get(&round)
            .and_then(|entry| entry.tally.get(digest))
            .map_or(0, |signers| signers.len())
    }

    /// Number of distinct signers of messages in `round`, irrespective of payload.
    pub fn round_signer_count(&self, round: Round) -> usize {
        self.rounds
            .get(&round)
            .map_or(0, |entry| entry.signers.len())
    }

    /// Count the distinct signers of messages in rounds strictly above `round`, and find the lowest
    /// such round.
    pub fn signers_above(&self, round: Round) -> (usize, Option<Round>) {
        let mut signers = BTreeSet::new();
        let mut lowest = None;
        for (msg_round, entry) in self.rounds.range(round + 1..) {
            if entry.messages.is_empty() {
                continue;
            }
            lowest.get_or_insert(*msg_round);
            signers.extend(entry.signers.iter().copied());
        }
        (signers.len(), lowest)
    }

    /// Total number of accepted messages across all rounds.
    pub fn len(&self) -> usize {
        self.rounds.values().map(|entry| entry.messages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
