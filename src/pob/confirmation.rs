/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The irreversibility rule: when does a linked block become the last irreversible block.
//!
//! Every witness carries a **watermark**: one past the highest block number it has produced at.
//! When a block links, its `confirm_until` is set to its witness's current watermark, and the
//! watermark rises to the block's number plus one. A block at number `n` with `confirm_until = c`
//! is its witness's vouch for every chain position in `c..=n`; a witness that later produces on a
//! lower fork gets a `confirm_until` above its number and vouches for nothing.
//!
//! [`calculate_confirm`] walks down the chain of a newly linked block and finds the deepest node
//! vouched for by at least `2/3 · |witnesses| + 1` distinct recent witnesses. If one exists, the
//! cache is flushed to it and the schedule installs the new root's active rotation. Because the
//! walk only ever descends the chain of the block just linked, the last irreversible block
//! advances monotonically and stays on the ancestry of the head.

use std::collections::HashMap;

use crate::block_cache::cache::BlockCache;
use crate::pluggables::{ChainStore, StateDb};
use crate::types::basic::{BlockNumber, CryptoHash};

use super::schedule::WitnessSchedule;

/// Stamp `confirm_until` on a freshly linked node and raise its witness's watermark.
pub(crate) fn update_watermark<C: ChainStore, D: StateDb>(
    cache: &mut BlockCache<C, D>,
    schedule: &mut WitnessSchedule,
    hash: &CryptoHash,
) {
    let (witness, number) = match cache.find(hash) {
        Some(node) => (node.witness(), node.number()),
        None => return,
    };
    let watermark = schedule.watermark(&witness);
    if let Some(node) = cache.find_mut(hash) {
        node.set_confirm_until(watermark);
    }
    if number >= watermark {
        schedule.set_watermark(witness, number + 1);
    }
}

/// Search down the chain of a newly linked block (itself included) for the deepest node vouched
/// for by enough distinct recent witnesses to be irreversible.
///
/// The walk keeps a running count of vouching blocks and a map from `confirm_until` values to how
/// many vouches start there; descending past number `n` expires the vouches whose ranges begin at
/// `n`.
pub(crate) fn calculate_confirm<C: ChainStore, D: StateDb>(
    cache: &BlockCache<C, D>,
    linked: &CryptoHash,
) -> Option<CryptoHash> {
    let threshold = cache.find(linked)?.active_witnesses().confirmation_threshold() as u64;
    let root = cache.linked_root_hash();

    let mut confirm_num: u64 = 0;
    let mut starts_at: HashMap<BlockNumber, u64> = HashMap::new();

    let mut cursor = *linked;
    while cursor != root {
        let node = cache.find(&cursor)?;
        if node.confirm_until() <= node.number() {
            confirm_num += 1;
            *starts_at.entry(node.confirm_until()).or_insert(0) += 1;
        }
        if confirm_num >= threshold {
            return Some(cursor);
        }
        confirm_num -= starts_at.get(&node.number()).copied().unwrap_or(0);
        cursor = node.parent()?;
    }
    None
}

/// Run the irreversibility search from a newly linked block and flush the cache if it succeeds.
/// Returns the new root hash if the LIB advanced.
pub(crate) fn update_lib<C: ChainStore, D: StateDb>(
    cache: &mut BlockCache<C, D>,
    schedule: &mut WitnessSchedule,
    linked: &CryptoHash,
) -> Option<CryptoHash> {
    let confirmed = calculate_confirm(cache, linked)?;
    if confirmed == cache.linked_root_hash() {
        return None;
    }
    if let Err(err) = cache.flush(&confirmed) {
        log::error!("failed to flush the cache to {:?}: {:?}", confirmed, err);
        return None;
    }
    schedule.update_witness(cache.linked_root().active_witnesses().clone());
    Some(confirmed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_utils::*;
    use crate::types::basic::BlockNumber;

    use super::*;

    const SUB_SLOT: Duration = Duration::from_millis(300);

    #[test]
    fn watermarks_stamp_confirm_until_and_rise_past_each_block() {
        let keys = signing_keys(3);
        let base_slot = past_base_slot(SUB_SLOT * 2, 1000);
        let rotation = rotation_for(base_slot, &keys);
        let TestCore {
            mut core, genesis, ..
        } = test_core(&keys[0], rotation, SUB_SLOT, 2);

        let b1 = make_block(
            &genesis,
            &keys[0],
            slot_timestamp(base_slot, 0, SUB_SLOT, 2),
            transactions(1),
        );
        let b2 = make_block(
            &b1,
            &keys[0],
            slot_timestamp(base_slot, 1, SUB_SLOT, 2),
            transactions(2),
        );
        core.cache.add(b1.clone()).unwrap();
        core.cache.link(&b1.hash);
        update_watermark(&mut core.cache, &mut core.schedule, &b1.hash);
        core.cache.add(b2.clone()).unwrap();
        core.cache.link(&b2.hash);
        update_watermark(&mut core.cache, &mut core.schedule, &b2.hash);

        // First block of a fresh witness vouches from the start of history; its second block only
        // vouches from where its watermark had risen to.
        assert_eq!(core.cache.find(&b1.hash).unwrap().confirm_until(), BlockNumber::new(0));
        assert_eq!(core.cache.find(&b2.hash).unwrap().confirm_until(), BlockNumber::new(2));
        assert_eq!(
            core.schedule.watermark(&keys[0].verifying_key().to_bytes()),
            BlockNumber::new(3)
        );
    }

    #[test]
    fn a_fork_block_below_the_watermark_does_not_vouch() {
        let keys = signing_keys(3);
        let base_slot = past_base_slot(SUB_SLOT * 2, 1000);
        let rotation = rotation_for(base_slot, &keys);
        let TestCore {
            mut core, genesis, ..
        } = test_core(&keys[0], rotation, SUB_SLOT, 2);

        // keys[0] produces at number 2 on one branch, then at number 1 on another: the second
        // block lands below the risen watermark and must not count as a confirmation.
        let b1 = make_block(
            &genesis,
            &keys[0],
            slot_timestamp(base_slot, 0, SUB_SLOT, 2),
            transactions(1),
        );
        let b2 = make_block(
            &b1,
            &keys[0],
            slot_timestamp(base_slot, 1, SUB_SLOT, 2),
            transactions(2),
        );
        let b1_fork = make_block(
            &genesis,
            &keys[0],
            slot_timestamp(base_slot + 3, 0, SUB_SLOT, 2),
            transactions(3),
        );

        for block in [&b1, &b2, &b1_fork] {
            core.cache.add((*block).clone()).unwrap();
            core.cache.link(&block.hash);
            update_watermark(&mut core.cache, &mut core.schedule, &block.hash);
        }

        let fork_node = core.cache.find(&b1_fork.hash).unwrap();
        assert!(fork_node.confirm_until() > fork_node.number());
    }

    #[test]
    fn no_confirmation_without_two_thirds_of_the_witnesses() {
        let keys = signing_keys(3);
        let base_slot = past_base_slot(SUB_SLOT * 2, 1000);
        let rotation = rotation_for(base_slot, &keys);
        let TestCore {
            mut core, genesis, ..
        } = test_core(&keys[0], rotation, SUB_SLOT, 2);

        // Four blocks from only two distinct witnesses: nothing confirms.
        let specs = [(0u64, 0u32, 0usize), (0, 1, 0), (1, 0, 1), (1, 1, 1)];
        let mut parent = genesis.clone();
        let mut last = genesis.hash;
        for (index, (slot, sub_slot, key)) in specs.iter().enumerate() {
            let block = make_block(
                &parent,
                &keys[*key],
                slot_timestamp(base_slot + slot, *sub_slot, SUB_SLOT, 2),
                transactions(index as u8 + 1),
            );
            parent = block.clone();
            last = block.hash;
            core.cache.add(block).unwrap();
            core.cache.link(&last);
            update_watermark(&mut core.cache, &mut core.schedule, &last);
        }

        assert!(calculate_confirm(&core.cache, &last).is_none());
    }
}
