/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block verification and block production.
//!
//! Verification runs in two stages with all failures aborting the block:
//! 1. [`verify_basics`]: stateless checks plus the schedule check — the header hash recomputes,
//!    the signature verifies against the header's witness, the number is above the last
//!    irreversible block, the timestamp is not in the future beyond one slot, and the witness is
//!    the one scheduled for the timestamp's slot under the rotation in force.
//! 2. [`verify_block`]: execution replay. The caller checks the verification database out at the
//!    parent's tag and holds the transaction pool locked; the [`App`] replays the transactions and
//!    the resulting state root must equal the declared one, after which the post-state is tagged
//!    with the block's hash.
//!
//! [`produce_block`] is the mirror image: drain a budgeted batch from the pool, execute it on the
//! producer's private fork, declare the resulting root, sign.

use std::time::Duration;

use crate::app::{App, ProduceBlockRequest, ValidateBlockRequest, ValidateBlockResponse};
use crate::pluggables::{StateDb, TxPool, TxPoolGuard};
use crate::types::basic::{BlockNumber, Timestamp};
use crate::types::block::{Block, BlockHeader};
use crate::types::crypto_primitives::Keypair;
use crate::types::witnesses::WitnessList;

use super::schedule::WitnessSchedule;

#[derive(Debug)]
pub(crate) enum VerifyError {
    /// The header hash does not recompute or the signature does not verify.
    MalformedBlock,
    /// The block's number is at or below the last irreversible block.
    TooOld,
    /// The block's timestamp is more than one slot ahead of wall clock.
    FutureBlock,
    /// The signer is not the witness scheduled for the block's slot.
    WrongWitness,
    /// Execution replay failed or the declared state root does not match the computed one.
    Execution,
    /// The parent's state tag could not be checked out.
    StateUnavailable,
}

/// Structural, signature, age and schedule checks. `witnesses` is the rotation in force at the
/// block (the recorded one during WAL replay).
pub(crate) fn verify_basics(
    block: &Block,
    schedule: &WitnessSchedule,
    witnesses: &WitnessList,
    lib_number: BlockNumber,
    now: Timestamp,
) -> Result<(), VerifyError> {
    if block.header.number <= lib_number {
        return Err(VerifyError::TooOld);
    }
    if !block.is_correct() {
        return Err(VerifyError::MalformedBlock);
    }

    let slot_nanos = schedule.slot_duration().as_nanos() as i64;
    if block.header.timestamp.int() > now.int() + slot_nanos {
        return Err(VerifyError::FutureBlock);
    }

    if witnesses.is_empty() {
        return Err(VerifyError::WrongWitness);
    }
    let slot = schedule.slot_of_time(block.header.timestamp);
    let scheduled = witnesses
        .get((slot.int() % witnesses.len() as u64) as usize)
        .ok_or(VerifyError::WrongWitness)?;
    if scheduled.to_bytes() != block.header.witness {
        return Err(VerifyError::WrongWitness);
    }

    Ok(())
}

/// Replay `block`'s transactions on `verify_db` (already checked out at the parent's tag) and tag
/// the post-state with the block's hash if the declared state root checks out.
pub(crate) fn verify_block<D: StateDb, A: App<D>>(
    block: &Block,
    app: &mut A,
    verify_db: &mut D,
) -> Result<(), VerifyError> {
    match app.validate_block(ValidateBlockRequest {
        block,
        state: verify_db,
    }) {
        ValidateBlockResponse::Valid { state_root } if state_root == block.header.state_root => {
            verify_db.tag(&block.hash);
            Ok(())
        }
        _ => Err(VerifyError::Execution),
    }
}

/// Build, execute and sign a block on top of `parent`, bounded by `time_budget`. The transaction
/// pool stays locked for the duration of the batch selection and execution.
pub(crate) fn produce_block<D: StateDb, P: TxPool, A: App<D>>(
    keypair: &Keypair,
    parent: &Block,
    tx_pool: &P,
    produce_db: &mut D,
    app: &mut A,
    time_budget: Duration,
) -> Result<Block, VerifyError> {
    if !produce_db.checkout(&parent.hash) {
        return Err(VerifyError::StateUnavailable);
    }

    let guard = tx_pool.lock();
    let candidates = guard.pending_txs();
    let response = app.produce_block(ProduceBlockRequest {
        parent_hash: parent.hash,
        candidates,
        time_budget,
        state: produce_db,
    });
    drop(guard);

    let header = BlockHeader {
        number: parent.header.number + 1,
        timestamp: Timestamp::now(),
        parent_hash: parent.hash,
        state_root: response.state_root,
        witness: keypair.public().to_bytes(),
        witness_list_update: None,
    };
    Ok(Block::new(header, response.included, &keypair.0))
}
