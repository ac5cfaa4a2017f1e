/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::node::Configuration).
//!
//! qbft-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least three values. The first three values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//! 3. The identifier the event is about: the first seven characters of the Base64 encoding of the
//!    validator public key, followed by the role.
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceivePrepare](crate::events::ReceivePrepareEvent) is printed:
//!
//! ```text
//! ReceivePrepare, 1701329264, qNVjd2o/Attester, 3, 12, 1, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The fourth value is the operator ID of the origin of the prepare.
//! - The fifth and sixth values are the height and round of the prepare.
//! - The seventh value is the first seven characters of the Base64 encoding of the digest of the
//!   prepared value.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, types::data_types::{Round, Value}};

// Names of each event in PascalCase for printing:
pub const START_INSTANCE: &str = "StartInstance";
pub const DECIDE: &str = "Decide";
pub const STOP_INSTANCE: &str = "StopInstance";

pub const PROPOSE: &str = "Propose";
pub const PREPARE: &str = "Prepare";
pub const COMMIT: &str = "Commit";
pub const ROUND_CHANGE: &str = "RoundChange";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_PREPARE: &str = "ReceivePrepare";
pub const RECEIVE_COMMIT: &str = "ReceiveCommit";
pub const RECEIVE_ROUND_CHANGE: &str = "ReceiveRoundChange";

pub const UPDATE_PREPARED: &str = "UpdatePrepared";
pub const ROUND_TIMEOUT: &str = "RoundTimeout";

pub const SAVE_DECIDED: &str = "SaveDecided";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";

pub const RECONSTRUCT_SIGNATURE: &str = "ReconstructSignature";
pub const SIGNATURE_TIMEOUT: &str = "SignatureTimeout";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartInstanceEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_instance_event: &StartInstanceEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_INSTANCE,
                secs_since_unix_epoch(start_instance_event.timestamp),
                start_instance_event.identifier,
                start_instance_event.height,
                value_digest(&start_instance_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.identifier,
                decide_event.height,
                decide_event.round,
                value_digest(&decide_event.value),
                decide_event.signers.len(),
            )
        };
        Box::new(logger)
    }
}

impl Logger for StopInstanceEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |stop_instance_event: &StopInstanceEvent| {
            log::info!(
                "{}, {}, {}, {}",
                STOP_INSTANCE,
                secs_since_unix_epoch(stop_instance_event.timestamp),
                stop_instance_event.identifier,
                stop_instance_event.height,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.identifier,
                propose_event.height,
                propose_event.round,
                value_digest(&propose_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.identifier,
                prepare_event.height,
                prepare_event.round,
                value_digest(&prepare_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                COMMIT,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.identifier,
                commit_event.height,
                commit_event.round,
                value_digest(&commit_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_change_event: &RoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ROUND_CHANGE,
                secs_since_unix_epoch(round_change_event.timestamp),
                round_change_event.identifier,
                round_change_event.height,
                round_change_event.round,
                prepared_round(round_change_event.prepared_round),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                receive_proposal_event.identifier,
                receive_proposal_event.origin,
                receive_proposal_event.height,
                receive_proposal_event.round,
                value_digest(&receive_proposal_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prepare_event: &ReceivePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_PREPARE,
                secs_since_unix_epoch(receive_prepare_event.timestamp),
                receive_prepare_event.identifier,
                receive_prepare_event.origin,
                receive_prepare_event.height,
                receive_prepare_event.round,
                value_digest(&receive_prepare_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveCommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_commit_event: &ReceiveCommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_COMMIT,
                secs_since_unix_epoch(receive_commit_event.timestamp),
                receive_commit_event.identifier,
                receive_commit_event.origin,
                receive_commit_event.height,
                receive_commit_event.round,
                value_digest(&receive_commit_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveRoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_round_change_event: &ReceiveRoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_ROUND_CHANGE,
                secs_since_unix_epoch(receive_round_change_event.timestamp),
                receive_round_change_event.identifier,
                receive_round_change_event.origin,
                receive_round_change_event.height,
                receive_round_change_event.round,
                prepared_round(receive_round_change_event.prepared_round),
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdatePreparedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_prepared_event: &UpdatePreparedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                UPDATE_PREPARED,
                secs_since_unix_epoch(update_prepared_event.timestamp),
                update_prepared_event.identifier,
                update_prepared_event.height,
                update_prepared_event.round,
                value_digest(&update_prepared_event.value),
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_timeout_event: &RoundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ROUND_TIMEOUT,
                secs_since_unix_epoch(round_timeout_event.timestamp),
                round_timeout_event.identifier,
                round_timeout_event.height,
                round_timeout_event.round,
            )
        };
        Box::new(logger)
    }
}

impl Logger for SaveDecidedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |save_decided_event: &SaveDecidedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SAVE_DECIDED,
                secs_since_unix_epoch(save_decided_event.timestamp),
                save_decided_event.identifier,
                save_decided_event.height,
                save_decided_event.updated_highest,
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                start_sync_event.identifier,
                start_sync_event.from,
                start_sync_event.to,
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.identifier,
                end_sync_event.synced,
                end_sync_event
                    .highest_decided
                    .map_or(String::from("None"), |height| height.to_string()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReconstructSignatureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reconstruct_signature_event: &ReconstructSignatureEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECONSTRUCT_SIGNATURE,
                secs_since_unix_epoch(reconstruct_signature_event.timestamp),
                reconstruct_signature_event.identifier,
                reconstruct_signature_event.height,
                first_seven_base64_chars(&reconstruct_signature_event.signature.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for SignatureTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |signature_timeout_event: &SignatureTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SIGNATURE_TIMEOUT,
                secs_since_unix_epoch(signature_timeout_event.timestamp),
                signature_timeout_event.identifier,
                signature_timeout_event.height,
                signature_timeout_event.collected,
                signature_timeout_event.required,
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn value_digest(value: &Value) -> String {
    first_seven_base64_chars(&value.digest().bytes())
}

fn prepared_round(round: Option<Round>) -> String {
    round.map_or(String::from("None"), |round| round.to_string())
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
