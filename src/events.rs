/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local replica.
//!
//! ## Event enum
//!
//! Significant occurrences in the replica include inserting a block into the cache, linking it,
//! advancing the last irreversible block, or producing a block in an owned slot. Each corresponds
//! to a variant of the [event enum](Event), whose variants each contain an inner struct storing
//! information that summarizes the occurrence, always including a timestamp corresponding to the
//! exact time the event occurred.
//!
//! ## Registering event handlers
//!
//! Library users can register event handler closures through
//! [`ReplicaSpec`](crate::replica::ReplicaSpec); these are called by the
//! [event bus](crate::event_bus::start_event_bus) thread when the handler's event variant happens.
//! Default handlers that log events out can be enabled in the replica's
//! [configuration](crate::replica::Configuration).
//!
//! Events are always emitted **after** the corresponding occurrence is completed. For example,
//! [`ConfirmBlockEvent`] is only emitted after the block has been pushed to the chain store and the
//! state tag flushed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::types::basic::{BlockNumber, CryptoHash};
use crate::types::block::Block;
use crate::types::witnesses::WitnessList;

/// Enumerates all events defined for the replica.
pub enum Event {
    // Events that change the block cache.
    InsertBlock(InsertBlockEvent),
    LinkBlock(LinkBlockEvent),
    ConfirmBlock(ConfirmBlockEvent),
    PruneBlock(PruneBlockEvent),
    UpdateWitnessSet(UpdateWitnessSetEvent),

    // Events on the produce/receive paths.
    ProduceBlock(ProduceBlockEvent),
    ReceiveBlock(ReceiveBlockEvent),
    ReceiveBlockRequest(ReceiveBlockRequestEvent),

    // Mode transitions.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
}

impl Event {
    /// Publishes a given instance of the [Event] enum on the event publisher channel (if the
    /// channel is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A new block was inserted into the block cache, as a child of either a known parent or the
/// orphan root.
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

/// A cached block passed verification and was linked; its post-state is now addressable by its
/// hash.
pub struct LinkBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub number: BlockNumber,
}

/// A block, identifiable by its hash, became irreversible: it was pushed to the chain store and
/// its state tag flushed.
pub struct ConfirmBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub number: BlockNumber,
}

/// A block, identifiable by its hash, was pruned: it sat on a losing fork (or a stale orphan
/// subtree) and was permanently deleted from the cache.
pub struct PruneBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// The witness rotation in force changed as a consequence of the last irreversible block
/// advancing past a block that staged an update.
pub struct UpdateWitnessSetEvent {
    pub timestamp: SystemTime,
    pub witness_list: WitnessList,
}

/// The local witness produced and broadcast a block in one of its sub-slots.
pub struct ProduceBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub number: BlockNumber,
    pub transaction_count: usize,
}

/// A block arrived from a peer (by broadcast or as a sync response) and entered the verify queue.
pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub block: CryptoHash,
    pub number: BlockNumber,
}

/// A peer asked for a block by hash.
pub struct ReceiveBlockRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub block: CryptoHash,
}

/// The replica found its tip too far behind wall clock and entered Sync mode.
pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub tip_number: BlockNumber,
}

/// The replica caught up to within a slot of wall clock and returned to Normal mode.
pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub tip_number: BlockNumber,
}
