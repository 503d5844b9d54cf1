/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the structured messages that are sent between replicas to keep the block cache
//! live.
//!
//! ## Messages
//!
//! Four kinds of messages travel between replicas:
//! 1. [`NewBlock`]: a freshly produced block, broadcast by its witness and relayed by everyone who
//!    links it.
//! 2. [`NewBlockHash`]: a head announcement. Cheap to broadcast; receivers who do not know the
//!    hash ask for the full block.
//! 3. [`NewBlockRequest`]: a by-hash block request, answered from the cache or the chain store.
//! 4. [`SyncBlockResponse`]: a block sent to a specific lagging peer. Handled like [`NewBlock`],
//!    except that receiving it does not trigger a hash re-broadcast.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{BlockNumber, CryptoHash};
use crate::types::block::Block;

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    NewBlock(NewBlock),
    NewBlockHash(NewBlockHash),
    NewBlockRequest(NewBlockRequest),
    SyncBlockResponse(SyncBlockResponse),
}

/// Identifies a block by number and hash; the payload of announcements and requests.
#[derive(Clone, Copy, BorshSerialize, BorshDeserialize)]
pub struct BlockInfo {
    pub number: BlockNumber,
    pub hash: CryptoHash,
}

impl BlockInfo {
    pub fn of(block: &Block) -> BlockInfo {
        BlockInfo {
            number: block.header.number,
            hash: block.hash,
        }
    }
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct NewBlock {
    pub block: Block,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct NewBlockHash {
    pub info: BlockInfo,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct NewBlockRequest {
    pub info: BlockInfo,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct SyncBlockResponse {
    pub block: Block,
}

impl From<NewBlock> for Message {
    fn from(msg: NewBlock) -> Self {
        Message::NewBlock(msg)
    }
}

impl From<NewBlockHash> for Message {
    fn from(msg: NewBlockHash) -> Self {
        Message::NewBlockHash(msg)
    }
}

impl From<NewBlockRequest> for Message {
    fn from(msg: NewBlockRequest) -> Self {
        Message::NewBlockRequest(msg)
    }
}

impl From<SyncBlockResponse> for Message {
    fn from(msg: SyncBlockResponse) -> Self {
        Message::SyncBlockResponse(msg)
    }
}
