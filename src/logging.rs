/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::node::Configuration).
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveBlock](crate::events::ReceiveBlockEvent) is printed:
//!
//! ```text
//! ReceiveBlock, 1701329264, 127.0.0.1:8082, fNGCJyk, 4
//! ```
//!
//! In the snippet:
//! - The third value is the address of the peer the block came from.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the block.
//! - The fifth value is the height of the block.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const REPLACE_CHAIN: &str = "ReplaceChain";
pub const REJECT_BLOCK: &str = "RejectBlock";
pub const REJECT_CHAIN: &str = "RejectChain";

pub const ADMIT_TRANSACTION: &str = "AdmitTransaction";
pub const REJECT_TRANSACTION: &str = "RejectTransaction";

pub const PROPOSE: &str = "Propose";
pub const PREEMPT_PROPOSAL: &str = "PreemptProposal";

pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const RECEIVE_CHAIN_REQUEST: &str = "ReceiveChainRequest";
pub const SEND_CHAIN_RESPONSE: &str = "SendChainResponse";
pub const UPDATE_PEERS: &str = "UpdatePeers";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars(&insert_block_event.block.hash.bytes()),
                insert_block_event.block.height,
                insert_block_event.block.data.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReplaceChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |replace_chain_event: &ReplaceChainEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                REPLACE_CHAIN,
                secs_since_unix_epoch(replace_chain_event.timestamp),
                replace_chain_event.old_height,
                replace_chain_event.new_height,
                first_seven_base64_chars(&replace_chain_event.new_tip.bytes()),
                replace_chain_event.new_weight
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                first_seven_base64_chars(&reject_block_event.block.bytes()),
                reject_block_event.height,
                reject_block_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_chain_event: &RejectChainEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REJECT_CHAIN,
                secs_since_unix_epoch(reject_chain_event.timestamp),
                reject_chain_event.length,
                reject_chain_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for AdmitTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |admit_transaction_event: &AdmitTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADMIT_TRANSACTION,
                secs_since_unix_epoch(admit_transaction_event.timestamp),
                first_seven_base64_chars(&admit_transaction_event.transaction.bytes()),
                admit_transaction_event.operation
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_transaction_event: &RejectTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REJECT_TRANSACTION,
                secs_since_unix_epoch(reject_transaction_event.timestamp),
                first_seven_base64_chars(&reject_transaction_event.transaction.bytes()),
                reject_transaction_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.block.hash.bytes()),
                propose_event.block.height,
                propose_event.block.data.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PreemptProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |preempt_proposal_event: &PreemptProposalEvent| {
            log::info!(
                "{}, {}, {}",
                PREEMPT_PROPOSAL,
                secs_since_unix_epoch(preempt_proposal_event.timestamp),
                preempt_proposal_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_event: &ReceiveBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_BLOCK,
                secs_since_unix_epoch(receive_block_event.timestamp),
                receive_block_event.origin,
                first_seven_base64_chars(&receive_block_event.block.bytes()),
                receive_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveChainRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_chain_request_event: &ReceiveChainRequestEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_CHAIN_REQUEST,
                secs_since_unix_epoch(receive_chain_request_event.timestamp),
                receive_chain_request_event.peer
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendChainResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_chain_response_event: &SendChainResponseEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_CHAIN_RESPONSE,
                secs_since_unix_epoch(send_chain_response_event.timestamp),
                send_chain_response_event.peer,
                send_chain_response_event.length
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdatePeersEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_peers_event: &UpdatePeersEvent| {
            log::info!(
                "{}, {}, {}",
                UPDATE_PEERS,
                secs_since_unix_epoch(update_peers_event.timestamp),
                update_peers_event.peers.len()
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

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
