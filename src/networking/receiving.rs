/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use ed25519_dalek::VerifyingKey;

use crate::types::block::Block;

use super::{
    messages::{Message, NewBlockHash, NewBlockRequest},
    network::Network,
};

/// Where a block payload came from. Blocks received as [`Broadcast`](BlockOrigin::Broadcast) have
/// their hash re-announced after linking; sync responses do not.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BlockOrigin {
    Broadcast,
    SyncResponse,
}

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into
/// receiver handles.
///
/// The kinds of messages that the poller distributes are:
/// 1. Block payloads (`NewBlock` and `SyncBlockResponse`, processed by the block-receive loop),
/// 2. Block hash announcements (`NewBlockHash`, processed by the message loop), and
/// 3. Block queries (`NewBlockRequest`, processed by the message loop).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, Block, BlockOrigin)>,
    Receiver<(VerifyingKey, NewBlockHash)>,
    Receiver<(VerifyingKey, NewBlockRequest)>,
) {
    let (to_block_receiver, block_receiver) = mpsc::channel();
    let (to_block_hash_receiver, block_hash_receiver) = mpsc::channel();
    let (to_block_query_receiver, block_query_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::NewBlock(new_block) => {
                    let _ =
                        to_block_receiver.send((origin, new_block.block, BlockOrigin::Broadcast));
                }
                Message::SyncBlockResponse(response) => {
                    let _ =
                        to_block_receiver.send((origin, response.block, BlockOrigin::SyncResponse));
                }
                Message::NewBlockHash(new_block_hash) => {
                    let _ = to_block_hash_receiver.send((origin, new_block_hash));
                }
                Message::NewBlockRequest(request) => {
                    let _ = to_block_query_receiver.send((origin, request));
                }
            }
        } else {
            thread::yield_now()
        }
    });

    (
        poller_thread,
        block_receiver,
        block_hash_receiver,
        block_query_receiver,
    )
}
