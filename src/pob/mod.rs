/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Proof-of-Believability subprotocol: who produces when, what makes a block valid, and when a
//! block becomes irreversible.
//!
//! Wall-clock time is divided into fixed **slots**; the [schedule] maps each slot to exactly one
//! witness from the active rotation. A slot contains `continuous_num` **sub-slots** during which
//! the scheduled witness may produce consecutive blocks, with a shortened generation budget in the
//! final two sub-slots to leave time for propagation.
//!
//! The [verifier] decides whether a block may enter the linked partition of the cache: structural
//! and signature checks first, then execution replay against the parent's tagged state. The
//! [confirmation] module watches the linked chain and advances the last irreversible block when
//! enough distinct recent witnesses have built on top of a block.
//!
//! [protocol] glues these together into the serialized core that the replica's worker loops call
//! into, and [gate] provides the mutual exclusion between a production burst and the verify loop.

pub(crate) mod confirmation;

pub(crate) mod gate;

pub(crate) mod protocol;

pub mod schedule;

pub(crate) mod verifier;
