//! In-memory implementations of the pluggable traits plus block-building helpers, shared by the
//! unit tests across the crate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use borsh::BorshSerialize;
use ed25519_dalek::SigningKey;
use sha2::Digest;

use crate::app::{
    App, ProduceBlockRequest, ProduceBlockResponse, ValidateBlockRequest, ValidateBlockResponse,
};
use crate::modes::{ModeHandle, ReplicaMode};
use crate::pluggables::{
    ChainStore, ChainStoreError, StateDb, StateDbError, TxPool, TxPoolGuard,
};
use crate::pob::protocol::PobCore;
use crate::pob::schedule::WitnessSchedule;
use crate::block_cache::cache::BlockCache;
use crate::types::basic::{CryptoHash, Timestamp, Transaction};
use crate::types::block::{Block, BlockHeader, CryptoHasher};
use crate::types::crypto_primitives::Keypair;
use crate::types::witnesses::WitnessList;

/* ↓↓↓ In-memory pluggables ↓↓↓ */

/// A [`StateDb`] that tracks tags only; the tests' state root arithmetic makes the actual state
/// content irrelevant.
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

/* ↓↓↓ A deterministic app ↓↓↓ */

/// The state root the tests' app computes: a digest of the parent hash and the transactions.
pub(crate) fn test_state_root(parent_hash: &CryptoHash, transactions: &[Transaction]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(parent_hash.bytes());
    hasher.update(transactions.to_vec().try_to_vec().unwrap());
    CryptoHash::new(hasher.finalize().into())
}

/// An [`App`] whose execution is pure bookkeeping: it includes every candidate transaction and
/// derives the state root deterministically from the parent hash and the transaction list.
pub(crate) struct DigestApp;

impl App<MemStateDb> for DigestApp {
    fn produce_block(&mut self, request: ProduceBlockRequest<MemStateDb>) -> ProduceBlockResponse {
        let state_root = test_state_root(&request.parent_hash, &request.candidates);
        ProduceBlockResponse {
            included: request.candidates,
            state_root,
        }
    }

    fn validate_block(&mut self, request: ValidateBlockRequest<MemStateDb>) -> ValidateBlockResponse {
        ValidateBlockResponse::Valid {
            state_root: test_state_root(
                &request.block.header.parent_hash,
                &request.block.transactions,
            ),
        }
    }
}

/// An [`App`] that rejects everything; for exercising the verification failure path.
pub(crate) struct RejectingApp;

impl App<MemStateDb> for RejectingApp {
    fn produce_block(&mut self, request: ProduceBlockRequest<MemStateDb>) -> ProduceBlockResponse {
        let state_root = test_state_root(&request.parent_hash, &request.candidates);
        ProduceBlockResponse {
            included: request.candidates,
            state_root,
        }
    }

    fn validate_block(&mut self, _: ValidateBlockRequest<MemStateDb>) -> ValidateBlockResponse {
        ValidateBlockResponse::Invalid
    }
}

/* ↓↓↓ Keys, rotations and blocks ↓↓↓ */

/// Deterministic signing keys, so rotation orders are reproducible across test runs.
pub(crate) fn signing_keys(n: u8) -> Vec<SigningKey> {
    (0..n)
        .map(|index| SigningKey::from_bytes(&[index + 1; 32]))
        .collect()
}

/// A rotation where `signers[i]` owns slot `base_slot + i` (modulo the list length).
pub(crate) fn rotation_for(base_slot: u64, signers: &[SigningKey]) -> WitnessList {
    let n = signers.len() as u64;
    let mut keys = vec![signers[0].verifying_key(); signers.len()];
    for (index, signer) in signers.iter().enumerate() {
        keys[((base_slot + index as u64) % n) as usize] = signer.verifying_key();
    }
    WitnessList::new(keys)
}

/// A block on top of `parent`, signed by `signer`, carrying `transactions`, with the state root
/// [`DigestApp`] will agree with.
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
        state_root: test_state_root(&parent.hash, &transactions),
        witness: signer.verifying_key().to_bytes(),
        witness_list_update: None,
    };
    Block::new(header, transactions, signer)
}

/* ↓↓↓ A wired-up core ↓↓↓ */

pub(crate) struct TestCore {
    pub(crate) core: PobCore<MemStateDb, MemChainStore, MemTxPool, DigestApp>,
    pub(crate) genesis: Block,
    pub(crate) chain_store: MemChainStore,
}

/// Build a [`PobCore`] over the in-memory pluggables, rooted at a fresh genesis carrying
/// `witness_list`, with the local identity `me`.
pub(crate) fn test_core(
    me: &SigningKey,
    witness_list: WitnessList,
    sub_slot_time: Duration,
    continuous_num: u32,
) -> TestCore {
    let mut chain_store = MemChainStore::new();
    let mut state_db = MemStateDb::new();

    let genesis = Block::genesis(CryptoHash::default(), &witness_list);
    chain_store.push(&genesis).unwrap();
    state_db.tag(&genesis.hash);

    let cache = BlockCache::new(
        chain_store.clone(),
        state_db.clone(),
        witness_list.clone(),
        None,
        10,
        None,
    )
    .unwrap();

    let schedule = WitnessSchedule::new(
        me.verifying_key(),
        witness_list,
        sub_slot_time,
        continuous_num,
    );

    let core = PobCore {
        keypair: Keypair::new(me.clone()),
        cache,
        chain_store: chain_store.clone(),
        verify_db: state_db.clone(),
        produce_db: state_db.fork(),
        tx_pool: MemTxPool::new(),
        app: DigestApp,
        schedule,
        mode: ModeHandle::new(ReplicaMode::Normal),
        event_publisher: None,
    };

    TestCore {
        core,
        genesis,
        chain_store,
    }
}

/// The slot a while in the past that scenario tests base their timestamps on, aligned so that
/// every crafted block is older than wall clock (accepted) but above the genesis number.
pub(crate) fn past_base_slot(schedule_slot: Duration, slots_ago: u64) -> u64 {
    let now = Timestamp::now().int() as u64;
    now / schedule_slot.as_nanos() as u64 - slots_ago
}

/// The timestamp of sub-slot `sub_slot` of slot `slot`.
pub(crate) fn slot_timestamp(
    slot: u64,
    sub_slot: u32,
    sub_slot_time: Duration,
    continuous_num: u32,
) -> Timestamp {
    let slot_nanos = sub_slot_time.as_nanos() as u64 * continuous_num as u64;
    Timestamp::new((slot * slot_nanos + sub_slot as u64 * sub_slot_time.as_nanos() as u64) as i64)
}

/// Convenience: `number`ed transactions for padding blocks.
pub(crate) fn transactions(n: u8) -> Vec<Transaction> {
    (0..n).map(|index| Transaction::new(vec![index])).collect()
}
