/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Dispatch of published [events](crate::events) to user-registered and default logging handlers.
//!
//! The event bus runs on its own thread so that slow handlers never hold up the runner threads that
//! publish events.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct EventHandlers {
    pub(crate) start_instance_handlers: Vec<HandlerPtr<StartInstanceEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
    pub(crate) stop_instance_handlers: Vec<HandlerPtr<StopInstanceEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) round_change_handlers: Vec<HandlerPtr<RoundChangeEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_prepare_handlers: Vec<HandlerPtr<ReceivePrepareEvent>>,
    pub(crate) receive_commit_handlers: Vec<HandlerPtr<ReceiveCommitEvent>>,
    pub(crate) receive_round_change_handlers: Vec<HandlerPtr<ReceiveRoundChangeEvent>>,
    pub(crate) update_prepared_handlers: Vec<HandlerPtr<UpdatePreparedEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) save_decided_handlers: Vec<HandlerPtr<SaveDecidedEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) reconstruct_signature_handlers: Vec<HandlerPtr<ReconstructSignatureEvent>>,
    pub(crate) signature_timeout_handlers: Vec<HandlerPtr<SignatureTimeoutEvent>>,
}

// Push the default logger (if enabled) and then the user's handler (if any) into a handler list.
fn handlers_for<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_instance_handler: Option<HandlerPtr<StartInstanceEvent>>,
        decide_handler: Option<HandlerPtr<DecideEvent>>,
        stop_instance_handler: Option<HandlerPtr<StopInstanceEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        round_change_handler: Option<HandlerPtr<RoundChangeEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        receive_prepare_handler: Option<HandlerPtr<ReceivePrepareEvent>>,
        receive_commit_handler: Option<HandlerPtr<ReceiveCommitEvent>>,
        receive_round_change_handler: Option<HandlerPtr<ReceiveRoundChangeEvent>>,
        update_prepared_handler: Option<HandlerPtr<UpdatePreparedEvent>>,
        round_timeout_handler: Option<HandlerPtr<RoundTimeoutEvent>>,
        save_decided_handler: Option<HandlerPtr<SaveDecidedEvent>>,
        start_sync_handler: Option<HandlerPtr<StartSyncEvent>>,
        end_sync_handler: Option<HandlerPtr<EndSyncEvent>>,
        reconstruct_signature_handler: Option<HandlerPtr<ReconstructSignatureEvent>>,
        signature_timeout_handler: Option<HandlerPtr<SignatureTimeoutEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_instance_handlers: handlers_for(log_events, start_instance_handler),
            decide_handlers: handlers_for(log_events, decide_handler),
            stop_instance_handlers: handlers_for(log_events, stop_instance_handler),
            propose_handlers: handlers_for(log_events, propose_handler),
            prepare_handlers: handlers_for(log_events, prepare_handler),
            commit_handlers: handlers_for(log_events, commit_handler),
            round_change_handlers: handlers_for(log_events, round_change_handler),
            receive_proposal_handlers: handlers_for(log_events, receive_proposal_handler),
            receive_prepare_handlers: handlers_for(log_events, receive_prepare_handler),
            receive_commit_handlers: handlers_for(log_events, receive_commit_handler),
            receive_round_change_handlers: handlers_for(log_events, receive_round_change_handler),
            update_prepared_handlers: handlers_for(log_events, update_prepared_handler),
            round_timeout_handlers: handlers_for(log_events, round_timeout_handler),
            save_decided_handlers: handlers_for(log_events, save_decided_handler),
            start_sync_handlers: handlers_for(log_events, start_sync_handler),
            end_sync_handlers: handlers_for(log_events, end_sync_handler),
            reconstruct_signature_handlers: handlers_for(log_events, reconstruct_signature_handler),
            signature_timeout_handlers: handlers_for(log_events, signature_timeout_handler),
        }
    }

    /// Whether no handler at all is registered. If so, no event bus thread needs to be started.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_instance_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.stop_instance_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.round_change_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_prepare_handlers.is_empty()
            && self.receive_commit_handlers.is_empty()
            && self.receive_round_change_handlers.is_empty()
            && self.update_prepared_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.save_decided_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.reconstruct_signature_handlers.is_empty()
            && self.signature_timeout_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartInstance(start_instance_event) =>
                self.start_instance_handlers.iter().for_each(|handler| handler(&start_instance_event)),

            Event::Decide(decide_event) =>
                self.decide_handlers.iter().for_each(|handler| handler(&decide_event)),

            Event::StopInstance(stop_instance_event) =>
                self.stop_instance_handlers.iter().for_each(|handler| handler(&stop_instance_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::Prepare(prepare_event) =>
                self.prepare_handlers.iter().for_each(|handler| handler(&prepare_event)),

            Event::Commit(commit_event) =>
                self.commit_handlers.iter().for_each(|handler| handler(&commit_event)),

            Event::RoundChange(round_change_event) =>
                self.round_change_handlers.iter().for_each(|handler| handler(&round_change_event)),

            Event::ReceiveProposal(receive_proposal_event) =>
                self.receive_proposal_handlers.iter().for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceivePrepare(receive_prepare_event) =>
                self.receive_prepare_handlers.iter().for_each(|handler| handler(&receive_prepare_event)),

            Event::ReceiveCommit(receive_commit_event) =>
                self.receive_commit_handlers.iter().for_each(|handler| handler(&receive_commit_event)),

            Event::ReceiveRoundChange(receive_round_change_event) =>
                self.receive_round_change_handlers.iter().for_each(|handler| handler(&receive_round_change_event)),

            Event::UpdatePrepared(update_prepared_event) =>
                self.update_prepared_handlers.iter().for_each(|handler| handler(&update_prepared_event)),

            Event::RoundTimeout(round_timeout_event) =>
                self.round_timeout_handlers.iter().for_each(|handler| handler(&round_timeout_event)),

            Event::SaveDecided(save_decided_event) =>
                self.save_decided_handlers.iter().for_each(|handler| handler(&save_decided_event)),

            Event::StartSync(start_sync_event) =>
                self.start_sync_handlers.iter().for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) =>
                self.end_sync_handlers.iter().for_each(|handler| handler(&end_sync_event)),

            Event::ReconstructSignature(reconstruct_signature_event) =>
                self.reconstruct_signature_handlers.iter().for_each(|handler| handler(&reconstruct_signature_event)),

            Event::SignatureTimeout(signature_timeout_event) =>
                self.signature_timeout_handlers.iter().for_each(|handler| handler(&signature_timeout_event)),
        }
    }
}

/// Spawn the event bus thread, which receives events from `event_subscriber` and fires the matching
/// handlers until a shutdown signal is received.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone. Wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(EVENT_POLL_INTERVAL),
        }
    })
}
