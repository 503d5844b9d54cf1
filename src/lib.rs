/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Proof-of-Believability consensus core.
//!
//! PoB replicates a blockchain across a rotating set of **witnesses**: wall-clock time is divided
//! into slots, each slot belongs to one witness, and the scheduled witness produces a short burst
//! of consecutive blocks per slot. Every replica keeps a [block cache](block_cache) — a fork-aware
//! tree of all candidate chains — verifies incoming blocks against an MVCC state database, and
//! advances the **last irreversible block** once enough distinct witnesses have built on top of a
//! block. Accepted blocks are journaled in a write-ahead log so a crashed replica recovers its
//! cache deterministically.
//!
//! The crate is a library: the operator provides the [execution engine](app::App), the
//! [network](networking::network::Network), the [chain store](pluggables::ChainStore), the
//! [state database](pluggables::StateDb) and the [transaction pool](pluggables::TxPool), then
//! builds and starts a [`Replica`](replica::Replica). See [`replica`] for the lifecycle.

pub mod app;

pub mod block_cache;

pub mod event_bus;

pub mod events;

pub mod logging;

pub mod modes;

pub mod networking;

pub mod pluggables;

pub mod pob;

pub mod replica;

pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
