/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for pluggable peer-to-peer networking.
//!
//! The library user provides an implementation of [`Network`] when building a
//! [`Replica`](crate::replica::Replica). The implementation is responsible for reliably encoding
//! and delivering [`Message`]s between peers; the protocol treats peers as opaque
//! [`VerifyingKey`]s and never inspects transport details.
//!
//! Implementations must be cheap to `Clone`: the replica clones its `Network` handle into several
//! worker threads.

use ed25519_dalek::VerifyingKey;

use crate::types::witnesses::WitnessList;

use super::messages::Message;

/// Delivery urgency hint forwarded to the transport. Blocks and block requests are urgent; a
/// transport is free to ignore the hint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MessagePriority {
    Normal,
    Urgent,
}

pub trait Network: Clone + Send + 'static {
    /// Informs the network provider of the witness set on wake-up, so it can keep connections open
    /// to the current block producers.
    fn init_witness_set(&mut self, witness_list: WitnessList);

    /// Informs the network provider that the witness set in force changed after a last
    /// irreversible block advance.
    fn update_witness_set(&mut self, witness_list: WitnessList);

    /// Send a message to everybody on the network, including listeners that are not in the witness
    /// set. `reliable` asks the transport to retry delivery.
    fn broadcast(&mut self, message: Message, priority: MessagePriority, reliable: bool);

    /// Send a message to the specified peer.
    fn send(
        &mut self,
        peer: VerifyingKey,
        message: Message,
        priority: MessagePriority,
        reliable: bool,
    );

    /// Non-blockingly poll the network for a message. Returns the message together with the
    /// identity of its sender.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
