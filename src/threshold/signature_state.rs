/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Collection of partial signatures for one decided value at a time.

use std::{
    collections::BTreeMap,
    sync::{mpsc::Sender, Arc},
    time::{Instant, SystemTime},
};

use crate::{
    events::{Event, ReconstructSignatureEvent, SignatureTimeoutEvent},
    networking::messages::PartialSignatureMessage,
    types::{
        committee::Committee,
        crypto_primitives::verify,
        data_types::{CryptoHash, Height, OperatorID, SignatureBytes, Value},
        identifier::Identifier,
    },
};

use super::{reconstruction::reconstruct_signature, ThresholdError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
    Idle,
    Collecting,
    Reconstructed,
    TimedOut,
    /// The reconstructed signature did not verify against the validator's public key.
    Failed,
}

/// The decided value whose partial signatures are being collected.
#[derive(Clone, Debug)]
pub struct Duty {
    pub identifier: Identifier,
    pub height: Height,
    pub value: Value,
    pub signing_root: CryptoHash,
}

/// A full signature produced from a quorum of partial signatures, ready for submission.
#[derive(Clone, Debug)]
pub struct ReconstructedSignature {
    pub identifier: Identifier,
    pub height: Height,
    pub value: Value,
    pub signature: SignatureBytes,
}

/// Moves through `Idle → Collecting → {Reconstructed | TimedOut | Failed}` for every decided value.
/// Starting a new collection discards whatever the previous one held.
pub struct PartialSignatureState {
    committee: Arc<Committee>,
    status: CollectionStatus,
    duty: Option<Duty>,
    partials: BTreeMap<OperatorID, SignatureBytes>,
    required: usize,
    deadline: Option<Instant>,
    event_publisher: Option<Sender<Event>>,
}

impl PartialSignatureState {
    pub fn new(committee: Arc<Committee>, event_publisher: Option<Sender<Event>>) -> Self {
        Self {
            required: committee.quorum(),
            committee,
            status: CollectionStatus::Idle,
            duty: None,
            partials: BTreeMap::new(),
            deadline: None,
            event_publisher,
        }
    }

    /// Start collecting partial signatures over `duty.signing_root` until `deadline`.
    pub fn start(&mut self, duty: Duty, deadline: Instant) {
        self.status = CollectionStatus::Collecting;
        self.duty = Some(duty);
        self.partials.clear();
        self.required = self.committee.quorum();
        self.deadline = Some(deadline);
    }

    /// Add a partial signature to the collection.
    ///
    /// Partials that arrive while not collecting, for another height, or from an operator that already
    /// contributed are ignored. Returns the full signature once the partial that completes the quorum is
    /// added.
    pub fn add_partial(
        &mut self,
        partial: &PartialSignatureMessage,
    ) -> Result<Option<ReconstructedSignature>, ThresholdError> {
        if self.status != CollectionStatus::Collecting {
            return Ok(None);
        }
        let Some(duty) = &self.duty else {
            return Ok(None);
        };
        if partial.identifier != duty.identifier || partial.height != duty.height {
            return Ok(None);
        }
        if self.partials.contains_key(&partial.signer) {
            return Ok(None);
        }
        if partial.signing_root != duty.signing_root {
            return Err(ThresholdError::UnexpectedSigningRoot {
                signer: partial.signer,
            });
        }
        let share_public_key = self
            .committee
            .share_public_key(&partial.signer)
            .ok_or(ThresholdError::UnknownSigner(partial.signer))?;
        if !verify(
            &partial.partial_signature,
            &duty.signing_root.bytes(),
            share_public_key,
        ) {
            return Err(ThresholdError::InvalidPartialSignature(partial.signer));
        }

        self.partials.insert(partial.signer, partial.partial_signature);
        if self.partials.len() < self.required {
            return Ok(None);
        }

        self.deadline = None;
        let signature = reconstruct_signature(&self.partials);
        self.partials.clear();
        let signature = match signature {
            Ok(signature) => signature,
            Err(err) => {
                self.status = CollectionStatus::Failed;
                return Err(err);
            }
        };
        if !verify(
            &signature,
            &duty.signing_root.bytes(),
            self.committee.validator_public_key(),
        ) {
            self.status = CollectionStatus::Failed;
            log::error!(
                "{}: reconstructed signature at height {} does not verify",
                duty.identifier,
                duty.height
            );
            return Err(ThresholdError::InvalidReconstructedSignature {
                height: duty.height,
            });
        }

        self.status = CollectionStatus::Reconstructed;
        Event::ReconstructSignature(ReconstructSignatureEvent {
            timestamp: SystemTime::now(),
            identifier: duty.identifier,
            height: duty.height,
            signature,
        })
        .publish(&self.event_publisher);

        Ok(Some(ReconstructedSignature {
            identifier: duty.identifier,
            height: duty.height,
            value: duty.value.clone(),
            signature,
        }))
    }

    /// Time the collection out if its deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Result<(), ThresholdError> {
        match self.deadline {
            Some(deadline) if self.status == CollectionStatus::Collecting && now >= deadline => {}
            _ => return Ok(()),
        }

        let collected = self.partials.len();
        self.status = CollectionStatus::TimedOut;
        self.deadline = None;
        self.partials.clear();

        if let Some(duty) = &self.duty {
            Event::SignatureTimeout(SignatureTimeoutEvent {
                timestamp: SystemTime::now(),
                identifier: duty.identifier,
                height: duty.height,
                collected,
                required: self.required,
            })
            .publish(&self.event_publisher);
        }

        Err(ThresholdError::CollectionTimedOut {
            collected,
            required: self.required,
        })
    }

    pub fn status(&self) -> CollectionStatus {
        self.status
    }

    pub fn duty(&self) -> Option<&Duty> {
        self.duty.as_ref()
    }

    pub fn collected(&self) -> usize {
        self.partials.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// The deadline of the ongoing collection, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
