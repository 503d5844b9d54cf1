/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Hashes and keys are printed as
//! the first seven characters of their Base64 encoding.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const LINK_BLOCK: &str = "LinkBlock";
pub const CONFIRM_BLOCK: &str = "ConfirmBlock";
pub const PRUNE_BLOCK: &str = "PruneBlock";
pub const UPDATE_WITNESS_SET: &str = "UpdateWitnessSet";

pub const PRODUCE_BLOCK: &str = "ProduceBlock";
pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const RECEIVE_BLOCK_REQUEST: &str = "ReceiveBlockRequest";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars(&insert_block_event.block.hash.bytes()),
                insert_block_event.block.header.number
            )
        };
        Box::new(logger)
    }
}

impl Logger for LinkBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |link_block_event: &LinkBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                LINK_BLOCK,
                secs_since_unix_epoch(link_block_event.timestamp),
                first_seven_base64_chars(&link_block_event.block.bytes()),
                link_block_event.number
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConfirmBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |confirm_block_event: &ConfirmBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CONFIRM_BLOCK,
                secs_since_unix_epoch(confirm_block_event.timestamp),
                first_seven_base64_chars(&confirm_block_event.block.bytes()),
                confirm_block_event.number
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_block_event: &PruneBlockEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_BLOCK,
                secs_since_unix_epoch(prune_block_event.timestamp),
                first_seven_base64_chars(&prune_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateWitnessSetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_witness_set_event: &UpdateWitnessSetEvent| {
            log::info!(
                "{}, {}, {}",
                UPDATE_WITNESS_SET,
                secs_since_unix_epoch(update_witness_set_event.timestamp),
                update_witness_set_event.witness_list.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProduceBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |produce_block_event: &ProduceBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PRODUCE_BLOCK,
                secs_since_unix_epoch(produce_block_event.timestamp),
                first_seven_base64_chars(&produce_block_event.block.bytes()),
                produce_block_event.number,
                produce_block_event.transaction_count
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
                first_seven_base64_chars(&receive_block_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_block_event.block.bytes()),
                receive_block_event.number
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_request_event: &ReceiveBlockRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_BLOCK_REQUEST,
                secs_since_unix_epoch(receive_block_request_event.timestamp),
                first_seven_base64_chars(&receive_block_request_event.peer.to_bytes()),
                first_seven_base64_chars(&receive_block_request_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                start_sync_event.tip_number
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.tip_number
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
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
