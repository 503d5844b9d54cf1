/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use ed25519_dalek::VerifyingKey;

use crate::types::witnesses::WitnessList;

use super::{
    messages::Message,
    network::{MessagePriority, Network},
};

/// Handle for sending and broadcasting messages to the [`Network`].
///
/// It can be used to send or broadcast instances of any type that implements the
/// [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(
        &mut self,
        peer: VerifyingKey,
        msg: S,
        priority: MessagePriority,
        reliable: bool,
    ) {
        self.network.send(peer, msg.into(), priority, reliable)
    }

    pub(crate) fn broadcast<S: Into<Message>>(
        &mut self,
        msg: S,
        priority: MessagePriority,
        reliable: bool,
    ) {
        self.network.broadcast(msg.into(), priority, reliable)
    }

    pub(crate) fn update_witness_set(&mut self, witness_list: WitnessList) {
        self.network.update_witness_set(witness_list)
    }
}
