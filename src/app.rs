/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for the execution engine that runs block transactions, and the request and
//! response types of its two methods.
//!
//! The protocol is chiefly concerned with ordering blocks; what the transactions inside a block
//! *mean* is decided by the provided [`App`]. The protocol calls the app at two points:
//! 1. When the local witness owns the current slot and must fill a block
//!    ([`produce_block`](App::produce_block)).
//! 2. When a block with a known, linked parent must be validated before it is linked itself
//!    ([`validate_block`](App::validate_block)).
//!
//! In both cases the app receives a mutable handle onto an MVCC view checked out at the parent
//! block's tag, executes transactions against it, and reports the resulting state root. The
//! protocol never inspects the state itself; it only compares roots.

use std::time::Duration;

use crate::pluggables::StateDb;
use crate::types::{
    basic::{CryptoHash, Transaction},
    block::Block,
};

pub trait App<D: StateDb>: Send + 'static {
    /// Called when the replica is producing a block. The app picks transactions from `candidates`
    /// (in order, as many as fit the `time_budget`), executes them on `state`, and returns the
    /// included transactions together with the resulting state root.
    fn produce_block(&mut self, request: ProduceBlockRequest<D>) -> ProduceBlockResponse;

    /// Called when the replica is validating a block whose parent is linked. The app replays
    /// `block`'s transactions on `state` and reports the resulting state root, or rejects.
    fn validate_block(&mut self, request: ValidateBlockRequest<D>) -> ValidateBlockResponse;
}

pub struct ProduceBlockRequest<'a, D: StateDb> {
    /// Hash of the block being built on. `state` is checked out at this block's tag.
    pub parent_hash: CryptoHash,
    pub candidates: Vec<Transaction>,
    pub time_budget: Duration,
    /// The producer's private MVCC view.
    pub state: &'a mut D,
}

pub struct ProduceBlockResponse {
    pub included: Vec<Transaction>,
    pub state_root: CryptoHash,
}

pub struct ValidateBlockRequest<'a, D: StateDb> {
    pub block: &'a Block,
    /// The verification MVCC view, checked out at the parent block's tag.
    pub state: &'a mut D,
}

pub enum ValidateBlockResponse {
    Valid { state_root: CryptoHash },
    Invalid,
}
