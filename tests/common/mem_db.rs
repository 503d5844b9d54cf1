//! Simple, volatile, in-memory implementations of the replica's pluggable storage traits.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use pob_rs::pluggables::{
    ChainStore, ChainStoreError, StateDb, StateDbError, TxPool, TxPoolGuard,
};
use pob_rs::types::basic::{CryptoHash, Transaction};
use pob_rs::types::block::Block;

/// An in-memory [`StateDb`] tracking tags only: the digest app derives state roots from block
/// contents, so no state body is needed.
#[derive(Clone)]
pub(crate) struct MemStateDb {
    tags: Arc<Mutex<HashSet<CryptoHash>>>,
}

impl MemStateDb {
    pub(crate) fn new() -> MemStateDb {
        MemStateDb {
            tags: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl StateDb for MemStateDb {
    fn checkout(&mut self, tag: &CryptoHash) -> bool {
        self.tags.lock().unwrap().contains(tag)
    }

    fn tag(&mut self, tag: &CryptoHash) {
        self.tags.lock().unwrap().insert(*tag);
    }

    fn flush(&mut self, _tag: &CryptoHash) -> Result<(), StateDbError> {
        Ok(())
    }

    fn fork(&self) -> Self {
        // Only tags are modeled, and tags are shared across forks; the fork's private working
        // state has no representation here.
        MemStateDb {
            tags: Arc::clone(&self.tags),
        }
    }
}

/// An in-memory [`ChainStore`].
#[derive(Clone)]
pub(crate) struct MemChainStore {
    blocks: Arc<Mutex<Vec<Block>>>,
}

impl MemChainStore {
    pub(crate) fn new() -> MemChainStore {
        MemChainStore {
            blocks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn numbers(&self) -> Vec<u64> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .map(|block| block.header.number.int())
            .collect()
    }
}

impl ChainStore for MemChainStore {
    fn push(&mut self, block: &Block) -> Result<(), ChainStoreError> {
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }

    fn block_by_hash(&self, hash: &CryptoHash) -> Option<Block> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.hash == *hash)
            .cloned()
    }

    fn top(&self) -> Option<Block> {
        self.blocks.lock().unwrap().last().cloned()
    }
}

/// An in-memory [`TxPool`] fed by [`submit`](MemTxPool::submit).
#[derive(Clone)]
pub(crate) struct MemTxPool {
    txs: Arc<Mutex<Vec<Transaction>>>,
}

impl MemTxPool {
    pub(crate) fn new() -> MemTxPool {
        MemTxPool {
            txs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn submit(&self, tx: Transaction) {
        self.txs.lock().unwrap().push(tx);
    }
}

pub(crate) struct MemTxPoolGuard<'a>(MutexGuard<'a, Vec<Transaction>>);

impl TxPoolGuard for MemTxPoolGuard<'_> {
    fn pending_txs(&self) -> Vec<Transaction> {
        self.0.clone()
    }
}

impl TxPool for MemTxPool {
    type Guard<'a> = MemTxPoolGuard<'a>;

    fn lock(&self) -> Self::Guard<'_> {
        MemTxPoolGuard(self.txs.lock().unwrap())
    }

    fn add_linked_block(&self, block: &Block) {
        let mut txs = self.txs.lock().unwrap();
        txs.retain(|tx| !block.transactions.contains(tx));
    }
}
