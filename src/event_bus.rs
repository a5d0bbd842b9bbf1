//! The thread that fires the registered handlers for every published [`Event`].

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers registered for each kind of event. If logging is enabled, each vector starts with the
/// default logger of its event type.
pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) replace_chain_handlers: Vec<HandlerPtr<ReplaceChainEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
    pub(crate) reject_chain_handlers: Vec<HandlerPtr<RejectChainEvent>>,
    pub(crate) admit_transaction_handlers: Vec<HandlerPtr<AdmitTransactionEvent>>,
    pub(crate) reject_transaction_handlers: Vec<HandlerPtr<RejectTransactionEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) preempt_proposal_handlers: Vec<HandlerPtr<PreemptProposalEvent>>,
    pub(crate) receive_block_handlers: Vec<HandlerPtr<ReceiveBlockEvent>>,
    pub(crate) receive_chain_request_handlers: Vec<HandlerPtr<ReceiveChainRequestEvent>>,
    pub(crate) send_chain_response_handlers: Vec<HandlerPtr<SendChainResponseEvent>>,
    pub(crate) update_peers_handlers: Vec<HandlerPtr<UpdatePeersEvent>>,
}

/// Put the default logger (if `log_events`) and the user handler (if any) into a handler vector.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        insert_block_handler: Option<HandlerPtr<InsertBlockEvent>>,
        replace_chain_handler: Option<HandlerPtr<ReplaceChainEvent>>,
        reject_block_handler: Option<HandlerPtr<RejectBlockEvent>>,
        reject_chain_handler: Option<HandlerPtr<RejectChainEvent>>,
        admit_transaction_handler: Option<HandlerPtr<AdmitTransactionEvent>>,
        reject_transaction_handler: Option<HandlerPtr<RejectTransactionEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        preempt_proposal_handler: Option<HandlerPtr<PreemptProposalEvent>>,
        receive_block_handler: Option<HandlerPtr<ReceiveBlockEvent>>,
        receive_chain_request_handler: Option<HandlerPtr<ReceiveChainRequestEvent>>,
        send_chain_response_handler: Option<HandlerPtr<SendChainResponseEvent>>,
        update_peers_handler: Option<HandlerPtr<UpdatePeersEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            insert_block_handlers: handlers(log_events, insert_block_handler),
            replace_chain_handlers: handlers(log_events, replace_chain_handler),
            reject_block_handlers: handlers(log_events, reject_block_handler),
            reject_chain_handlers: handlers(log_events, reject_chain_handler),
            admit_transaction_handlers: handlers(log_events, admit_transaction_handler),
            reject_transaction_handlers: handlers(log_events, reject_transaction_handler),
            propose_handlers: handlers(log_events, propose_handler),
            preempt_proposal_handlers: handlers(log_events, preempt_proposal_handler),
            receive_block_handlers: handlers(log_events, receive_block_handler),
            receive_chain_request_handlers: handlers(log_events, receive_chain_request_handler),
            send_chain_response_handlers: handlers(log_events, send_chain_response_handler),
            update_peers_handlers: handlers(log_events, update_peers_handler),
        }
    }

    /// Check whether no handler is registered for any event, in which case the event bus need not run.
    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.replace_chain_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
            && self.reject_chain_handlers.is_empty()
            && self.admit_transaction_handlers.is_empty()
            && self.reject_transaction_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.preempt_proposal_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.receive_chain_request_handlers.is_empty()
            && self.send_chain_response_handlers.is_empty()
            && self.update_peers_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => self
                .insert_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_block_event)),

            Event::ReplaceChain(replace_chain_event) => self
                .replace_chain_handlers
                .iter()
                .for_each(|handler| handler(&replace_chain_event)),

            Event::RejectBlock(reject_block_event) => self
                .reject_block_handlers
                .iter()
                .for_each(|handler| handler(&reject_block_event)),

            Event::RejectChain(reject_chain_event) => self
                .reject_chain_handlers
                .iter()
                .for_each(|handler| handler(&reject_chain_event)),

            Event::AdmitTransaction(admit_transaction_event) => self
                .admit_transaction_handlers
                .iter()
                .for_each(|handler| handler(&admit_transaction_event)),

            Event::RejectTransaction(reject_transaction_event) => self
                .reject_transaction_handlers
                .iter()
                .for_each(|handler| handler(&reject_transaction_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::PreemptProposal(preempt_proposal_event) => self
                .preempt_proposal_handlers
                .iter()
                .for_each(|handler| handler(&preempt_proposal_event)),

            Event::ReceiveBlock(receive_block_event) => self
                .receive_block_handlers
                .iter()
                .for_each(|handler| handler(&receive_block_event)),

            Event::ReceiveChainRequest(receive_chain_request_event) => self
                .receive_chain_request_handlers
                .iter()
                .for_each(|handler| handler(&receive_chain_request_event)),

            Event::SendChainResponse(send_chain_response_event) => self
                .send_chain_response_handlers
                .iter()
                .for_each(|handler| handler(&send_chain_response_event)),

            Event::UpdatePeers(update_peers_event) => self
                .update_peers_handlers
                .iter()
                .for_each(|handler| handler(&update_peers_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // Every publisher has been dropped. Keep waiting for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
