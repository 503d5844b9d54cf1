/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block cache tree: add, find, link, flush and delete operations over the two partitions.
//!
//! Nodes are stored in a hash-keyed map; the map is the arena and block hashes are the stable
//! handles. A node's `parent` field is a lookup-only back reference, while the `children` lists
//! express ownership: deleting a subtree walks children first, then detaches from the parent, then
//! drops entries from the map. This keeps every mutation single-writer under the protocol's write
//! lock and avoids reference cycles entirely.
//!
//! All mutating methods preserve the cache's core invariants:
//! - a block appears at most once across both partitions,
//! - nodes reachable from the linked root are Linked, orphan subtrees are Single,
//! - `head` is the linked leaf with the greatest number (ties broken towards the smaller hash),
//! - the linked root only ever advances along the ancestry of a linked descendant.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::events::{ConfirmBlockEvent, Event, InsertBlockEvent, LinkBlockEvent, PruneBlockEvent};
use crate::pluggables::{ChainStore, ChainStoreError, StateDb, StateDbError};
use crate::types::basic::{BlockNumber, CryptoHash, VerifyingKeyBytes};
use crate::types::block::Block;
use crate::types::witnesses::WitnessList;

use super::wal::{WalRecord, WriteAheadLog};

/// How a call to [`BlockCache::add`] placed the block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheStatus {
    /// The block extends a known parent that previously had no children.
    Extend,
    /// The block attaches to a known parent that already had a child: a fork.
    Fork,
    /// The block's parent is unknown; the block was parked in the Single partition. The caller
    /// should request the parent from peers.
    NotFound,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeType {
    Linked,
    Single,
}

#[derive(Debug)]
pub enum BlockCacheError {
    /// The block's hash is already indexed.
    Duplicate,
    /// The chain store has no top block to root the cache at.
    UninitializedChainStore,
    /// The root block stages a witness list whose keys do not decode.
    InvalidWitnessList,
}

#[derive(Debug)]
pub enum FlushError {
    /// The flush target is not in the cache.
    TargetNotFound,
    /// The chain store rejected a push. Fatal: the LIB cannot advance until the store recovers.
    ChainStore(ChainStoreError),
    /// The state database failed to flush a tag. Transient: the cache is left consistent.
    StateDb(StateDbError),
}

impl From<ChainStoreError> for FlushError {
    fn from(value: ChainStoreError) -> Self {
        FlushError::ChainStore(value)
    }
}

impl From<StateDbError> for FlushError {
    fn from(value: StateDbError) -> Self {
        FlushError::StateDb(value)
    }
}

/// A single cached block together with its position in the tree and the witness schedule context
/// needed to verify and confirm it.
pub struct BlockCacheNode {
    pub block: Block,
    parent: Option<CryptoHash>,
    children: Vec<CryptoHash>,
    node_type: NodeType,
    /// Set on link: the earliest block number this node's witness still vouches for. Input to the
    /// irreversibility search.
    confirm_until: BlockNumber,
    /// The rotation in force at this node.
    active_witnesses: WitnessList,
    /// A rotation change staged by this block, in force for its descendants.
    pending_witnesses: Option<WitnessList>,
}

impl BlockCacheNode {
    pub fn number(&self) -> BlockNumber {
        self.block.header.number
    }

    pub fn witness(&self) -> VerifyingKeyBytes {
        self.block.header.witness
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn parent(&self) -> Option<CryptoHash> {
        self.parent
    }

    pub fn children(&self) -> &[CryptoHash] {
        &self.children
    }

    pub fn confirm_until(&self) -> BlockNumber {
        self.confirm_until
    }

    pub(crate) fn set_confirm_until(&mut self, confirm_until: BlockNumber) {
        self.confirm_until = confirm_until;
    }

    pub fn active_witnesses(&self) -> &WitnessList {
        &self.active_witnesses
    }

    pub fn pending_witnesses(&self) -> Option<&WitnessList> {
        self.pending_witnesses.as_ref()
    }

    /// The rotation a child of this node is subject to.
    pub(crate) fn witnesses_for_children(&self) -> &WitnessList {
        self.pending_witnesses
            .as_ref()
            .unwrap_or(&self.active_witnesses)
    }
}

pub struct BlockCache<C: ChainStore, D: StateDb> {
    nodes: HashMap<CryptoHash, BlockCacheNode>,
    /// The last irreversible block. Always present in `nodes`, always also in the chain store.
    linked_root: CryptoHash,
    /// Roots of the orphan subtrees: the children of the conceptual single sentinel.
    single_roots: HashSet<CryptoHash>,
    head: CryptoHash,
    /// The Linked leaves, by number. `head` is the maximum of this map.
    leaves: HashMap<CryptoHash, BlockNumber>,
    chain_store: C,
    state_db: D,
    wal: Option<WriteAheadLog>,
    del_single_interval: u64,
    event_publisher: Option<Sender<Event>>,
}

impl<C: ChainStore, D: StateDb> BlockCache<C, D> {
    /// Create a cache rooted at the chain store's top block. If the top block stages a witness
    /// list update, that list is in force at the root; otherwise `witness_list` is.
    pub(crate) fn new(
        chain_store: C,
        state_db: D,
        witness_list: WitnessList,
        wal: Option<WriteAheadLog>,
        del_single_interval: u64,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<BlockCache<C, D>, BlockCacheError> {
        let lib = chain_store
            .top()
            .ok_or(BlockCacheError::UninitializedChainStore)?;

        let active_witnesses = match &lib.header.witness_list_update {
            Some(update) => {
                WitnessList::try_from(update).map_err(|_| BlockCacheError::InvalidWitnessList)?
            }
            None => witness_list,
        };

        let root_hash = lib.hash;
        let root_number = lib.header.number;
        let root = BlockCacheNode {
            block: lib,
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Linked,
            confirm_until: BlockNumber::new(0),
            active_witnesses,
            pending_witnesses: None,
        };

        let mut nodes = HashMap::new();
        nodes.insert(root_hash, root);
        let mut leaves = HashMap::new();
        leaves.insert(root_hash, root_number);

        Ok(BlockCache {
            nodes,
            linked_root: root_hash,
            single_roots: HashSet::new(),
            head: root_hash,
            leaves,
            chain_store,
            state_db,
            wal,
            del_single_interval,
            event_publisher,
        })
    }

    /* ↓↓↓ Growing the cache ↓↓↓ */

    /// Insert a block. If the parent is known the node attaches under it and inherits its type; if
    /// not, the node is parked in the Single partition and `NotFound` is returned, in which case
    /// the caller should request the parent from peers.
    ///
    /// In either case, orphan subtrees waiting for this block are adopted under the new node.
    pub fn add(&mut self, block: Block) -> Result<CacheStatus, BlockCacheError> {
        self.insert(block, None, true)
    }

    /// [`add`](Self::add), but with the recorded witness list installed instead of the derived one,
    /// and without writing the WAL. Used when replaying the WAL itself on recovery.
    pub(crate) fn add_with_witnesses(
        &mut self,
        block: Block,
        witnesses: WitnessList,
    ) -> Result<CacheStatus, BlockCacheError> {
        self.insert(block, Some(witnesses), false)
    }

    fn insert(
        &mut self,
        block: Block,
        forced_witnesses: Option<WitnessList>,
        write_wal: bool,
    ) -> Result<CacheStatus, BlockCacheError> {
        let hash = block.hash;
        if self.nodes.contains_key(&hash) {
            return Err(BlockCacheError::Duplicate);
        }

        let parent_hash = block.header.parent_hash;
        let pending_witnesses = block
            .header
            .witness_list_update
            .as_ref()
            .and_then(|update| WitnessList::try_from(update).ok());

        let (status, parent, node_type, active_witnesses) = match self.nodes.get(&parent_hash) {
            Some(parent_node) => {
                let status = if parent_node.children.is_empty() {
                    CacheStatus::Extend
                } else {
                    CacheStatus::Fork
                };
                let active = forced_witnesses
                    .unwrap_or_else(|| parent_node.witnesses_for_children().clone());
                (status, Some(parent_hash), parent_node.node_type, active)
            }
            None => {
                // Parent unknown: park under the single sentinel. The witness list is provisional
                // (re-derived if the subtree is ever adopted).
                let active = forced_witnesses
                    .unwrap_or_else(|| self.node(&self.linked_root).active_witnesses.clone());
                (CacheStatus::NotFound, None, NodeType::Single, active)
            }
        };

        if write_wal {
            if let Some(wal) = &mut self.wal {
                if let Err(err) = wal.append(&WalRecord::new(&block, &active_witnesses)) {
                    log::error!("failed to append block {} to the WAL: {:?}", block.header.number, err);
                }
            }
        }

        let node = BlockCacheNode {
            block,
            parent,
            children: Vec::new(),
            node_type,
            confirm_until: BlockNumber::new(0),
            active_witnesses,
            pending_witnesses,
        };

        Event::InsertBlock(InsertBlockEvent {
            timestamp: SystemTime::now(),
            block: node.block.clone(),
        })
        .publish(&self.event_publisher);

        self.nodes.insert(hash, node);
        match parent {
            Some(parent_hash) => self.nodes.get_mut(&parent_hash).unwrap().children.push(hash),
            None => {
                self.single_roots.insert(hash);
            }
        }

        self.merge_single(&hash);

        Ok(status)
    }

    /// Adopt any orphan subtree whose root is a child of the newly inserted block.
    fn merge_single(&mut self, new_hash: &CryptoHash) {
        let adopted: Vec<CryptoHash> = self
            .single_roots
            .iter()
            .filter(|root| self.node(root).block.header.parent_hash == *new_hash)
            .copied()
            .collect();

        for root in adopted {
            self.single_roots.remove(&root);
            self.nodes.get_mut(&root).unwrap().parent = Some(*new_hash);
            self.nodes.get_mut(new_hash).unwrap().children.push(root);
            // The subtree attached under a guessed witness list; recompute from its real lineage.
            self.rederive_witnesses(&root);
        }
    }

    /// Recompute `active_witnesses`/inheritance for a subtree whose ancestry just changed.
    fn rederive_witnesses(&mut self, subtree_root: &CryptoHash) {
        let mut stack = vec![*subtree_root];
        while let Some(hash) = stack.pop() {
            let parent_hash = self.node(&hash).parent.expect("subtree root was just attached");
            let active = self.node(&parent_hash).witnesses_for_children().clone();
            let node = self.nodes.get_mut(&hash).unwrap();
            node.active_witnesses = active;
            stack.extend(node.children.iter().copied());
        }
    }

    /* ↓↓↓ Lookups ↓↓↓ */

    pub fn find(&self, hash: &CryptoHash) -> Option<&BlockCacheNode> {
        self.nodes.get(hash)
    }

    pub(crate) fn find_mut(&mut self, hash: &CryptoHash) -> Option<&mut BlockCacheNode> {
        self.nodes.get_mut(hash)
    }

    pub fn block_by_hash(&self, hash: &CryptoHash) -> Option<&Block> {
        self.nodes.get(hash).map(|node| &node.block)
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn linked_root(&self) -> &BlockCacheNode {
        self.node(&self.linked_root)
    }

    pub fn linked_root_hash(&self) -> CryptoHash {
        self.linked_root
    }

    pub fn head(&self) -> &BlockCacheNode {
        self.node(&self.head)
    }

    pub fn head_hash(&self) -> CryptoHash {
        self.head
    }

    /// The number of blocks currently indexed (both partitions).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, hash: &CryptoHash) -> &BlockCacheNode {
        self.nodes.get(hash).expect("hash taken from the live index")
    }

    /* ↓↓↓ Linking and head selection ↓↓↓ */

    /// Mark a verified node Linked and recompute the head. Call this only after the node's block
    /// passed verification and its post-state is tagged in the state database.
    pub fn link(&mut self, hash: &CryptoHash) {
        let (parent, number) = {
            let node = match self.nodes.get_mut(hash) {
                Some(node) => node,
                None => return,
            };
            node.node_type = NodeType::Linked;
            (node.parent, node.number())
        };

        if let Some(parent) = parent {
            self.leaves.remove(&parent);
        }
        self.leaves.insert(*hash, number);
        self.update_longest();

        Event::LinkBlock(LinkBlockEvent {
            timestamp: SystemTime::now(),
            block: *hash,
            number,
        })
        .publish(&self.event_publisher);
    }

    /// Recompute `head` as the max-number linked leaf, ties broken by lexicographically smaller
    /// hash for determinism across replicas.
    fn update_longest(&mut self) {
        self.head = self
            .leaves
            .iter()
            .max_by(|(a_hash, a_num), (b_hash, b_num)| {
                a_num.cmp(b_num).then(b_hash.cmp(a_hash))
            })
            .map(|(hash, _)| *hash)
            .unwrap_or(self.linked_root);
    }

    /* ↓↓↓ Deletion ↓↓↓ */

    /// Recursively delete a node and its subtree: from the index, the leaves, and the single
    /// roots. If the parent becomes a childless Linked node it re-enters the leaves.
    pub fn del(&mut self, hash: &CryptoHash) {
        let parent = match self.nodes.get(hash) {
            Some(node) => node.parent,
            None => return,
        };

        // Children first, then the node itself; post-order over an explicit stack.
        let mut order = vec![*hash];
        let mut index = 0;
        while index < order.len() {
            order.extend(self.node(&order[index]).children.iter().copied());
            index += 1;
        }
        for dead in order.iter().rev() {
            self.nodes.remove(dead);
            self.leaves.remove(dead);
            self.single_roots.remove(dead);
            Event::PruneBlock(PruneBlockEvent {
                timestamp: SystemTime::now(),
                block: *dead,
            })
            .publish(&self.event_publisher);
        }

        if let Some(parent_hash) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_hash) {
                parent_node.children.retain(|child| child != hash);
                if parent_node.children.is_empty()
                    && parent_node.node_type == NodeType::Linked
                {
                    let number = parent_node.number();
                    self.leaves.insert(parent_hash, number);
                }
            }
        }

        self.update_longest();
    }

    /* ↓↓↓ Advancing the LIB ↓↓↓ */

    /// Advance the last irreversible block to `target` (assumed Linked, on the ancestry of the
    /// head). Every block on the path is pushed to the chain store and its state tag flushed;
    /// off-path siblings are pruned; path ancestors leave the index; `target` becomes the new
    /// root. Periodically, stale orphan subtrees are purged and the WAL compacted.
    pub fn flush(&mut self, target: &CryptoHash) -> Result<(), FlushError> {
        let mut path = Vec::new();
        let mut cursor = *target;
        while cursor != self.linked_root {
            let node = self.nodes.get(&cursor).ok_or(FlushError::TargetNotFound)?;
            path.push(cursor);
            cursor = node.parent.ok_or(FlushError::TargetNotFound)?;
        }
        path.reverse();

        for step in path {
            let siblings: Vec<CryptoHash> = self
                .node(&self.linked_root)
                .children
                .iter()
                .filter(|child| **child != step)
                .copied()
                .collect();
            for sibling in siblings {
                self.del(&sibling);
            }

            let (block, number) = {
                let node = self.node(&step);
                (node.block.clone(), node.number())
            };
            self.chain_store.push(&block)?;
            self.state_db.flush(&step)?;

            let old_root = self.linked_root;
            self.nodes.remove(&old_root);
            self.leaves.remove(&old_root);
            self.nodes.get_mut(&step).unwrap().parent = None;
            self.linked_root = step;

            Event::ConfirmBlock(ConfirmBlockEvent {
                timestamp: SystemTime::now(),
                block: step,
                number,
            })
            .publish(&self.event_publisher);
        }

        self.purge_stale_singles();
        self.update_longest();
        Ok(())
    }

    /// Every `del_single_interval` root advances (measured on the root number), drop orphan
    /// subtrees that can no longer link because they start at or below the root, and shrink the
    /// WAL to the surviving node set.
    fn purge_stale_singles(&mut self) {
        let root_number = self.linked_root().number();
        if root_number.int() % self.del_single_interval != 0 {
            return;
        }

        let stale: Vec<CryptoHash> = self
            .single_roots
            .iter()
            .filter(|root| self.node(root).number() <= root_number)
            .copied()
            .collect();
        for root in stale {
            self.del(&root);
        }

        if let Some(wal) = &mut self.wal {
            let mut live: Vec<&BlockCacheNode> = self
                .nodes
                .values()
                .filter(|node| node.block.hash != self.linked_root)
                .collect();
            live.sort_by_key(|node| node.number());
            let records: Vec<WalRecord> = live
                .iter()
                .map(|node| WalRecord::new(&node.block, &node.active_witnesses))
                .collect();
            if let Err(err) = wal.compact(&records) {
                log::error!("failed to compact the WAL: {:?}", err);
            }
        }
    }
}
