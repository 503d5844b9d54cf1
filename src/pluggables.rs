/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the external collaborators the protocol drives but does not implement: the MVCC state
//! database, the on-disk chain store, and the transaction pool.
//!
//! Implementations of these traits are cheaply `Clone`-able *handles* onto shared underlying
//! storage: cloning a handle does not fork the data, it opens another window onto it. The one
//! exception is [`StateDb::fork`], which *does* create an independent in-memory view, used by the
//! block producer so speculative execution never touches the canonical state.

use std::fmt;

use crate::types::{
    basic::{CryptoHash, Transaction},
    block::Block,
};

/// A multi-version state database addressed by named snapshots ("tags").
///
/// The protocol tags the post-state of every verified block with the block's hash, checks out
/// parent tags before replaying children, and flushes tags as blocks become irreversible.
pub trait StateDb: Clone + Send + 'static {
    /// Restore the current working state to the snapshot named `tag`. Returns false if no such
    /// snapshot exists.
    fn checkout(&mut self, tag: &CryptoHash) -> bool;

    /// Name the current working state `tag`.
    fn tag(&mut self, tag: &CryptoHash);

    /// Persist the snapshot named `tag` and drop snapshots older than it.
    fn flush(&mut self, tag: &CryptoHash) -> Result<(), StateDbError>;

    /// Create an independent in-memory view over this database's snapshot history: the fork sees
    /// every tag (past and future), but writes to its working state are invisible to the
    /// canonical database.
    fn fork(&self) -> Self;
}

/// Error returned by fallible [`StateDb`] operations. The protocol treats these as transient: the
/// cache is left consistent and the operation is not retried.
#[derive(Debug)]
pub struct StateDbError(pub String);

impl fmt::Display for StateDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state db error: {}", self.0)
    }
}

/// The append-only block store holding the irreversible chain.
pub trait ChainStore: Clone + Send + 'static {
    /// Append `block` to the chain. Blocks arrive in number order, each the child of the current
    /// [`top`](Self::top).
    fn push(&mut self, block: &Block) -> Result<(), ChainStoreError>;

    fn block_by_hash(&self, hash: &CryptoHash) -> Option<Block>;

    /// The most recently pushed block, if any.
    fn top(&self) -> Option<Block>;
}

/// Error returned by [`ChainStore::push`]. Treated as fatal by the protocol: the node keeps
/// running, but the LIB cannot advance until the store recovers.
#[derive(Debug)]
pub struct ChainStoreError(pub String);

impl fmt::Display for ChainStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain store error: {}", self.0)
    }
}

/// The pool of pending transactions.
///
/// [`lock`](TxPool::lock) returns a guard that holds the pool still while the producer drains a
/// batch or the verifier replays a block; the guard is dropped promptly and never held across
/// channel sends.
pub trait TxPool: Clone + Send + 'static {
    type Guard<'a>: TxPoolGuard
    where
        Self: 'a;

    /// Lock the pool and return a stable view of it.
    fn lock(&self) -> Self::Guard<'_>;

    /// Notify the pool that `block` was linked into the canonical fork, so it can drop the block's
    /// transactions and revalidate what remains.
    fn add_linked_block(&self, block: &Block);
}

/// A locked view of a [`TxPool`]. Dropping the guard releases the pool.
pub trait TxPoolGuard {
    /// The pending transactions, in the order the pool proposes them.
    fn pending_txs(&self) -> Vec<Transaction>;
}
