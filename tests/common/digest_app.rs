//! A minimal execution engine for tests, plus block-crafting helpers for playing the role of a
//! remote witness.
//!
//! The app's "execution" is pure arithmetic: the post-state root of a block is a digest of its
//! parent hash and its transaction list. This keeps state out of the picture entirely while still
//! exercising the real state-root comparison in the verifier: a block crafted with
//! [`make_block`] validates, a tampered one does not.

use borsh::BorshSerialize;
use ed25519_dalek::SigningKey;
use sha2::Digest;

use pob_rs::app::{
    App, ProduceBlockRequest, ProduceBlockResponse, ValidateBlockRequest, ValidateBlockResponse,
};
use pob_rs::types::basic::{CryptoHash, Timestamp, Transaction};
use pob_rs::types::block::{Block, BlockHeader, CryptoHasher};

use super::mem_db::MemStateDb;

pub(crate) fn digest_state_root(
    parent_hash: &CryptoHash,
    transactions: &[Transaction],
) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(parent_hash.bytes());
    hasher.update(transactions.to_vec().try_to_vec().unwrap());
    CryptoHash::new(hasher.finalize().into())
}

pub(crate) struct DigestApp;

impl App<MemStateDb> for DigestApp {
    fn produce_block(&mut self, request: ProduceBlockRequest<MemStateDb>) -> ProduceBlockResponse {
        let state_root = digest_state_root(&request.parent_hash, &request.candidates);
        ProduceBlockResponse {
            included: request.candidates,
            state_root,
        }
    }

    fn validate_block(
        &mut self,
        request: ValidateBlockRequest<MemStateDb>,
    ) -> ValidateBlockResponse {
        ValidateBlockResponse::Valid {
            state_root: digest_state_root(
                &request.block.header.parent_hash,
                &request.block.transactions,
            ),
        }
    }
}

/// A block on top of `parent` signed by `signer`, with the state root [`DigestApp`] will agree
/// with. Used by tests to play a remote witness.
pub(crate) fn make_block(
    parent: &Block,
    signer: &SigningKey,
    timestamp: Timestamp,
    transactions: Vec<Transaction>,
) -> Block {
    let header = BlockHeader {
        number: parent.header.number + 1,
        timestamp,
        parent_hash: parent.hash,
        state_root: digest_state_root(&parent.hash, &transactions),
        witness: signer.verifying_key().to_bytes(),
        witness_list_update: None,
    };
    Block::new(header, transactions, signer)
}

/// Deterministic signing keys, so tests are reproducible run to run.
pub(crate) fn signing_keys(n: u8) -> Vec<SigningKey> {
    (0..n)
        .map(|index| SigningKey::from_bytes(&[index + 1; 32]))
        .collect()
}

/// A slot comfortably in the past, so crafted blocks are accepted as historical rather than
/// rejected as future-dated.
pub(crate) fn past_base_slot(slot_duration: std::time::Duration, slots_ago: u64) -> u64 {
    Timestamp::now().int() as u64 / slot_duration.as_nanos() as u64 - slots_ago
}

/// The timestamp of sub-slot `sub_slot` of slot `slot`.
pub(crate) fn slot_timestamp(
    slot: u64,
    sub_slot: u32,
    sub_slot_time: std::time::Duration,
    continuous_num: u32,
) -> Timestamp {
    let slot_nanos = sub_slot_time.as_nanos() as u64 * continuous_num as u64;
    Timestamp::new(
        (slot * slot_nanos + sub_slot as u64 * sub_slot_time.as_nanos() as u64) as i64,
    )
}
