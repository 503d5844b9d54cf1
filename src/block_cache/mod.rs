/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory state of a replica: a tree of every candidate chain the replica knows about.
//!
//! # The Block Cache
//!
//! The block cache is a directed acyclic graph of blocks rooted at the **last irreversible block**
//! (LIB). Because only verified blocks extend it and the LIB steadily advances, the cache stays
//! shallow: everything below the LIB lives in the chain store, everything above it is still
//! contestable and lives here.
//!
//! Nodes in the cache are split into **two partitions**:
//! 1. **Linked** nodes: nodes with an unbroken parent chain down to the LIB. Only linked nodes can
//!    become the head or be confirmed.
//! 2. **Single** nodes: orphan subtrees whose ancestry is still unknown. They wait under the
//!    conceptual single root until the missing parent arrives from a peer, at which point the
//!    subtree is adopted and re-verified node by node.
//!
//! The cache tracks its **head**: the linked leaf with the greatest block number, which is where
//! the local witness produces. When a block accumulates enough distinct recent witnesses above it
//! (see [`confirmation`](crate::pob::confirmation)), the cache is
//! [`flush`](cache::BlockCache::flush)ed to it: the path from the old LIB is persisted to the
//! chain store and the state database, losing forks are pruned, and the LIB pointer advances.
//!
//! # Durability
//!
//! Every block accepted into the cache is appended to a [write-ahead log](wal) together with the
//! witness list in force at that block, so that a restarting replica can rebuild the cache
//! deterministically before rejoining the network.

pub mod cache;

pub mod wal;
