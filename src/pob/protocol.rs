/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The serialized protocol core and the long-lived worker loops that drive it.
//!
//! Everything that mutates the block cache — applying a received block, replaying a WAL record,
//! linking a promoted orphan, advancing the last irreversible block — goes through [`PobCore`]
//! behind one `RwLock`. The verify loop and the schedule loop take the write lock; the message
//! loop only ever reads. This linearizes all cache mutations into a single total order, which is
//! what makes the fork-choice and irreversibility logic straightforward to reason about.
//!
//! Four loops run for the lifetime of the replica:
//!
//! | Loop | Triggered by | May block on |
//! |---|---|---|
//! | [message loop](start_message_loop) | hash announcements, block queries | network send |
//! | [block loop](start_block_loop) | decoded block payloads | verify channel send |
//! | [verify loop](start_verify_loop) | verify channel, the generate gate | the core write lock |
//! | [schedule loop](start_schedule_loop) | wall clock | block production |
//!
//! The verify channel is bounded: when verification falls behind, the block loop blocks on send,
//! which in turn stops it from draining the poller, throttling the network reader by natural
//! fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::app::App;
use crate::block_cache::cache::{BlockCache, BlockCacheError, CacheStatus, NodeType};
use crate::events::{
    EndSyncEvent, Event, ProduceBlockEvent, ReceiveBlockEvent, ReceiveBlockRequestEvent,
    UpdateWitnessSetEvent,
};
use crate::modes::{ModeHandle, ReplicaMode};
use crate::networking::messages::{BlockInfo, NewBlock, NewBlockHash, NewBlockRequest};
use crate::networking::network::{MessagePriority, Network};
use crate::networking::receiving::BlockOrigin;
use crate::networking::sending::SenderHandle;
use crate::pluggables::{ChainStore, StateDb, TxPool};
use crate::types::basic::{BlockNumber, CryptoHash, Timestamp};
use crate::types::block::Block;
use crate::types::crypto_primitives::Keypair;
use crate::types::witnesses::WitnessList;

use super::confirmation;
use super::gate::GenerateGate;
use super::schedule::WitnessSchedule;
use super::verifier::{self, VerifyError};

/// A block waiting in the verify channel, together with where it came from.
pub(crate) struct VerifyBlockMessage {
    pub(crate) origin: VerifyingKey,
    pub(crate) block: Block,
    pub(crate) source: BlockOrigin,
}

#[derive(Debug)]
pub(crate) enum PobError {
    /// The block is already in the cache. Discarded silently.
    Duplicate,
    /// The block failed the stateless/schedule checks. The cache is untouched.
    Basics(VerifyError),
    Cache(BlockCacheError),
}

impl From<BlockCacheError> for PobError {
    fn from(value: BlockCacheError) -> Self {
        PobError::Cache(value)
    }
}

/// What applying a block did, and what the caller should do about it.
pub(crate) struct ApplyOutcome {
    pub(crate) status: CacheStatus,
    /// The applied block itself was linked (so its hash may be announced).
    pub(crate) linked: bool,
    /// The block was parked as an orphan; its parent should be requested from the sending peer.
    pub(crate) parent_to_request: Option<BlockInfo>,
    /// The LIB advance changed the rotation in force; the network should be told.
    pub(crate) witness_list_changed: Option<WitnessList>,
}

/// Pending by-hash block requests with their expiry deadlines.
///
/// Entries suppress duplicate requests for the same hash. Expiry is lazy: expired entries are
/// dropped whenever the map is consulted, which the hash-announcement path does on every message.
#[derive(Clone)]
pub(crate) struct BlockRequestMap {
    inner: Arc<Mutex<HashMap<CryptoHash, Instant>>>,
}

impl BlockRequestMap {
    pub(crate) fn new() -> BlockRequestMap {
        BlockRequestMap {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register `hash` unless a live entry exists. Returns whether the caller should fire the
    /// request.
    pub(crate) fn try_register(&self, hash: &CryptoHash, timeout: Duration) -> bool {
        let mut map = self.inner.lock().unwrap();
        let now = Instant::now();
        map.retain(|_, deadline| *deadline > now);
        if map.contains_key(hash) {
            return false;
        }
        map.insert(*hash, now + timeout);
        true
    }

    pub(crate) fn contains(&self, hash: &CryptoHash) -> bool {
        let mut map = self.inner.lock().unwrap();
        let now = Instant::now();
        map.retain(|_, deadline| *deadline > now);
        map.contains_key(hash)
    }

    pub(crate) fn remove(&self, hash: &CryptoHash) {
        self.inner.lock().unwrap().remove(hash);
    }
}

/// The protocol state shared (behind one `RwLock`) between the worker loops.
pub(crate) struct PobCore<D: StateDb, C: ChainStore, P: TxPool, A: App<D>> {
    pub(crate) keypair: Keypair,
    pub(crate) cache: BlockCache<C, D>,
    pub(crate) chain_store: C,
    pub(crate) verify_db: D,
    pub(crate) produce_db: D,
    pub(crate) tx_pool: P,
    pub(crate) app: A,
    pub(crate) schedule: WitnessSchedule,
    pub(crate) mode: ModeHandle,
    pub(crate) event_publisher: Option<Sender<Event>>,
}

impl<D: StateDb, C: ChainStore, P: TxPool, A: App<D>> PobCore<D, C, P, A> {
    /// Apply a block through the full receive path: duplicate check, basics, cache insertion, and
    /// — if the parent is linked — execution verification, linking, and LIB bookkeeping. Both
    /// peer blocks and self-produced blocks come through here, so there is a single source of
    /// truth for the link and LIB logic.
    pub(crate) fn handle_recv_block(&mut self, block: Block) -> Result<ApplyOutcome, PobError> {
        let hash = block.hash;
        if self.cache.contains(&hash) {
            return Err(PobError::Duplicate);
        }

        let (witnesses, parent_linked) = match self.cache.find(&block.header.parent_hash) {
            Some(parent) => (
                parent.witnesses_for_children().clone(),
                parent.node_type() == NodeType::Linked,
            ),
            None => (self.schedule.witness_list().clone(), false),
        };

        verifier::verify_basics(
            &block,
            &self.schedule,
            &witnesses,
            self.cache.linked_root().number(),
            Timestamp::now(),
        )
        .map_err(PobError::Basics)?;

        let parent_info = BlockInfo {
            number: BlockNumber::new(block.header.number.int().saturating_sub(1)),
            hash: block.header.parent_hash,
        };

        let status = self.cache.add(block)?;
        let mut outcome = ApplyOutcome {
            status,
            linked: false,
            parent_to_request: None,
            witness_list_changed: None,
        };

        if parent_linked {
            self.add_existing_block(&hash, &mut outcome);
        } else if status == CacheStatus::NotFound {
            outcome.parent_to_request = Some(parent_info);
        }

        Ok(outcome)
    }

    /// The recovery mirror of [`handle_recv_block`]: checks the block against the *recorded*
    /// witness list instead of the live one, and does not write the WAL again.
    pub(crate) fn recover_block(
        &mut self,
        block: Block,
        witnesses: WitnessList,
    ) -> Result<(), PobError> {
        let hash = block.hash;
        if self.cache.contains(&hash) {
            return Err(PobError::Duplicate);
        }

        verifier::verify_basics(
            &block,
            &self.schedule,
            &witnesses,
            self.cache.linked_root().number(),
            Timestamp::now(),
        )
        .map_err(PobError::Basics)?;

        let parent_linked = self
            .cache
            .find(&block.header.parent_hash)
            .map(|parent| parent.node_type() == NodeType::Linked)
            .unwrap_or(false);

        self.cache.add_with_witnesses(block, witnesses)?;

        if parent_linked {
            let mut outcome = ApplyOutcome {
                status: CacheStatus::Extend,
                linked: false,
                parent_to_request: None,
                witness_list_changed: None,
            };
            self.add_existing_block(&hash, &mut outcome);
        }
        Ok(())
    }

    /// Verify, link and confirm a node whose parent is linked, then do the same for its
    /// descendants (orphan subtrees adopted under it). The recursion over promoted children is an
    /// explicit work queue processed under the already-held write lock.
    fn add_existing_block(&mut self, start: &CryptoHash, outcome: &mut ApplyOutcome) {
        let mut queue: VecDeque<CryptoHash> = VecDeque::from([*start]);
        while let Some(hash) = queue.pop_front() {
            // Flush pruning inside an earlier iteration may have removed a queued node.
            let (block, parent_hash) = match self.cache.find(&hash) {
                Some(node) => (node.block.clone(), node.parent()),
                None => continue,
            };

            // A successful checkout at the block's own tag means this block was verified before
            // (e.g. during a previous run); otherwise replay it on the parent's state.
            if !self.verify_db.checkout(&hash) {
                let parent_hash = match parent_hash {
                    Some(parent_hash) => parent_hash,
                    None => continue,
                };
                if !self.verify_db.checkout(&parent_hash) {
                    log::error!(
                        "state tag of parent {:?} unavailable; dropping block {}",
                        parent_hash,
                        block.header.number
                    );
                    self.cache.del(&hash);
                    continue;
                }
                let guard = self.tx_pool.lock();
                let verified = verifier::verify_block(&block, &mut self.app, &mut self.verify_db);
                drop(guard);
                if let Err(err) = verified {
                    log::error!("block {} failed verification: {:?}", block.header.number, err);
                    self.cache.del(&hash);
                    continue;
                }
            }

            self.tx_pool.add_linked_block(&block);
            self.cache.link(&hash);
            if hash == *start {
                outcome.linked = true;
            }
            self.update_info(&hash, outcome);

            if let Some(node) = self.cache.find(&hash) {
                queue.extend(node.children().iter().copied());
            }
        }
    }

    /// Post-link bookkeeping: watermark, irreversibility search, schedule install, and the
    /// Sync-to-Normal transition once the tip reaches wall clock.
    fn update_info(&mut self, hash: &CryptoHash, outcome: &mut ApplyOutcome) {
        confirmation::update_watermark(&mut self.cache, &mut self.schedule, hash);

        let before = self.schedule.witness_list().clone();
        if confirmation::update_lib(&mut self.cache, &mut self.schedule, hash).is_some() {
            let after = self.schedule.witness_list().clone();
            if after != before {
                outcome.witness_list_changed = Some(after.clone());
                Event::UpdateWitnessSet(UpdateWitnessSetEvent {
                    timestamp: SystemTime::now(),
                    witness_list: after,
                })
                .publish(&self.event_publisher);
            }
        }

        if self.mode.mode() == ReplicaMode::Sync {
            let head_time = self.cache.head().block.header.timestamp;
            let slot_nanos = self.schedule.slot_duration().as_nanos() as i64;
            if Timestamp::now().int() - head_time.int() <= slot_nanos {
                self.mode.set_mode(ReplicaMode::Normal);
                Event::EndSync(EndSyncEvent {
                    timestamp: SystemTime::now(),
                    tip_number: self.cache.head().number(),
                })
                .publish(&self.event_publisher);
            }
        }
    }

    /// Produce one block of a burst on top of the current head, on the producer's private fork.
    pub(crate) fn produce_one(
        &mut self,
        sub_slot: u32,
        continuous_num: u32,
        gen_block_time: Duration,
        last2_gen_block_time: Duration,
    ) -> Result<Block, VerifyError> {
        let time_budget = if sub_slot + 2 >= continuous_num {
            last2_gen_block_time
        } else {
            gen_block_time
        };

        let parent = self.cache.head().block.clone();
        let block = verifier::produce_block(
            &self.keypair,
            &parent,
            &self.tx_pool,
            &mut self.produce_db,
            &mut self.app,
            time_budget,
        )?;

        log::info!(
            "Gen block - @{} num:{}, t:{}, txs:{}, confirmed:{}",
            sub_slot,
            block.header.number,
            block.header.timestamp,
            block.transactions.len(),
            self.cache.linked_root().number(),
        );
        Event::ProduceBlock(ProduceBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash,
            number: block.header.number,
            transaction_count: block.transactions.len(),
        })
        .publish(&self.event_publisher);

        Ok(block)
    }
}

/* ↓↓↓ Worker loops ↓↓↓ */

/// Spawn the message loop: serves block hash announcements and block queries. Read-only on the
/// core.
pub(crate) fn start_message_loop<
    N: Network + 'static,
    D: StateDb + Sync,
    C: ChainStore + Sync,
    P: TxPool + Sync,
    A: App<D> + Sync,
>(
    core: Arc<RwLock<PobCore<D, C, P, A>>>,
    mut sender: SenderHandle<N>,
    block_req_map: BlockRequestMap,
    mode: ModeHandle,
    block_hash_receiver: Receiver<(VerifyingKey, NewBlockHash)>,
    block_query_receiver: Receiver<(VerifyingKey, NewBlockRequest)>,
    block_req_timeout: Duration,
    event_publisher: Option<Sender<Event>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("message loop disconnected from main thread")
            }
        }

        let mut worked = false;

        match block_hash_receiver.try_recv() {
            Ok((origin, announcement)) => {
                worked = true;
                if mode.mode() == ReplicaMode::Normal {
                    handle_recv_block_hash(
                        &core,
                        &mut sender,
                        &block_req_map,
                        block_req_timeout,
                        announcement.info,
                        origin,
                    );
                }
            }
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => return,
        }

        match block_query_receiver.try_recv() {
            Ok((peer, request)) => {
                worked = true;
                if mode.mode() == ReplicaMode::Normal {
                    Event::ReceiveBlockRequest(ReceiveBlockRequestEvent {
                        timestamp: SystemTime::now(),
                        peer,
                        block: request.info.hash,
                    })
                    .publish(&event_publisher);
                    handle_block_query(&core, &mut sender, request.info, peer);
                }
            }
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => return,
        }

        if !worked {
            thread::yield_now()
        }
    })
}

/// A peer announced a head we may not have: remember the hash with an expiry and ask that peer
/// for the full block, unless a request is already pending or the block is already cached.
fn handle_recv_block_hash<
    N: Network + 'static,
    D: StateDb,
    C: ChainStore,
    P: TxPool,
    A: App<D>,
>(
    core: &Arc<RwLock<PobCore<D, C, P, A>>>,
    sender: &mut SenderHandle<N>,
    block_req_map: &BlockRequestMap,
    block_req_timeout: Duration,
    info: BlockInfo,
    peer: VerifyingKey,
) {
    if block_req_map.contains(&info.hash) {
        return;
    }
    if core.read().unwrap().cache.contains(&info.hash) {
        log::debug!("duplicate block announcement, block number: {}", info.number);
        return;
    }
    if block_req_map.try_register(&info.hash, block_req_timeout) {
        sender.send(
            peer,
            NewBlockRequest { info },
            MessagePriority::Urgent,
            true,
        );
    }
}

/// A peer asked for a block by hash: serve it from the cache, falling back to the chain store.
fn handle_block_query<N: Network + 'static, D: StateDb, C: ChainStore, P: TxPool, A: App<D>>(
    core: &Arc<RwLock<PobCore<D, C, P, A>>>,
    sender: &mut SenderHandle<N>,
    info: BlockInfo,
    peer: VerifyingKey,
) {
    let block = {
        let core = core.read().unwrap();
        match core.cache.block_by_hash(&info.hash) {
            Some(block) => Some(block.clone()),
            None => core.chain_store.block_by_hash(&info.hash),
        }
    };
    match block {
        Some(block) => sender.send(peer, NewBlock { block }, MessagePriority::Urgent, true),
        None => log::error!("failed to answer a query for block {}", info.number),
    }
}

/// Spawn the block-receive loop: forwards block payloads from the poller into the bounded verify
/// channel. A full channel blocks this loop, which is the protocol's backpressure.
pub(crate) fn start_block_loop(
    block_receiver: Receiver<(VerifyingKey, Block, BlockOrigin)>,
    verify_sender: SyncSender<VerifyBlockMessage>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("block loop disconnected from main thread")
            }
        }

        match block_receiver.recv_timeout(Duration::from_millis(50)) {
            Ok((origin, block, source)) => {
                let mut msg = VerifyBlockMessage {
                    origin,
                    block,
                    source,
                };
                // Blocking send with shutdown checks: the verify channel is the backpressure
                // point, but the loop must still wind down while it is full.
                loop {
                    match verify_sender.try_send(msg) {
                        Ok(()) => break,
                        Err(TrySendError::Full(returned)) => {
                            msg = returned;
                            if let Ok(()) = shutdown_signal.try_recv() {
                                return;
                            }
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

/// Spawn the verify loop: drains the verify channel and applies blocks to the core, waiting out
/// any in-flight production burst first. All block applications are linearized here.
pub(crate) fn start_verify_loop<
    N: Network + 'static,
    D: StateDb + Sync,
    C: ChainStore + Sync,
    P: TxPool + Sync,
    A: App<D> + Sync,
>(
    core: Arc<RwLock<PobCore<D, C, P, A>>>,
    mut sender: SenderHandle<N>,
    gate: GenerateGate,
    block_req_map: BlockRequestMap,
    mode: ModeHandle,
    verify_receiver: Receiver<VerifyBlockMessage>,
    block_req_timeout: Duration,
    event_publisher: Option<Sender<Event>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("verify loop disconnected from main thread")
            }
        }

        match verify_receiver.recv_timeout(Duration::from_millis(50)) {
            Ok(msg) => {
                gate.wait_closed();
                do_verify_block(
                    &core,
                    &mut sender,
                    &block_req_map,
                    &mode,
                    block_req_timeout,
                    &event_publisher,
                    msg,
                );
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

fn do_verify_block<N: Network + 'static, D: StateDb, C: ChainStore, P: TxPool, A: App<D>>(
    core: &Arc<RwLock<PobCore<D, C, P, A>>>,
    sender: &mut SenderHandle<N>,
    block_req_map: &BlockRequestMap,
    mode: &ModeHandle,
    block_req_timeout: Duration,
    event_publisher: &Option<Sender<Event>>,
    msg: VerifyBlockMessage,
) {
    if mode.mode() == ReplicaMode::Init {
        return;
    }

    let info = BlockInfo::of(&msg.block);
    Event::ReceiveBlock(ReceiveBlockEvent {
        timestamp: SystemTime::now(),
        origin: msg.origin,
        block: info.hash,
        number: info.number,
    })
    .publish(event_publisher);

    if msg.source == BlockOrigin::Broadcast {
        // The block arrived; any pending request for it is settled.
        block_req_map.remove(&info.hash);
    }

    let result = core.write().unwrap().handle_recv_block(msg.block);
    match result {
        Ok(outcome) => {
            if outcome.linked
                && msg.source == BlockOrigin::Broadcast
                && mode.mode() == ReplicaMode::Normal
            {
                sender.broadcast(NewBlockHash { info }, MessagePriority::Urgent, true);
            }
            if let Some(witness_list) = outcome.witness_list_changed {
                sender.update_witness_set(witness_list);
            }
            if let Some(parent) = outcome.parent_to_request {
                if block_req_map.try_register(&parent.hash, block_req_timeout) {
                    sender.send(
                        msg.origin,
                        NewBlockRequest { info: parent },
                        MessagePriority::Urgent,
                        true,
                    );
                }
            }
        }
        Err(PobError::Duplicate) => {
            log::debug!("duplicate block, block number: {}", info.number)
        }
        Err(err) => log::error!("received block error, err: {:?}", err),
    }
}

/// Spawn the schedule loop: wakes at slot boundaries and, when the local identity owns the slot
/// in Normal mode, produces a burst of `continuous_num` blocks at sub-slot intervals with the
/// generate gate held open.
pub(crate) fn start_schedule_loop<
    N: Network + 'static,
    D: StateDb + Sync,
    C: ChainStore + Sync,
    P: TxPool + Sync,
    A: App<D> + Sync,
>(
    core: Arc<RwLock<PobCore<D, C, P, A>>>,
    mut sender: SenderHandle<N>,
    gate: GenerateGate,
    mode: ModeHandle,
    sub_slot_time: Duration,
    continuous_num: u32,
    gen_block_time: Duration,
    last2_gen_block_time: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let next_schedule = core
            .read()
            .unwrap()
            .schedule
            .time_until_next_slot(Timestamp::now());
        log::debug!("next schedule: {:.2}s", next_schedule.as_secs_f64());

        match shutdown_signal.recv_timeout(next_schedule) {
            Ok(()) => return,
            Err(RecvTimeoutError::Disconnected) => {
                panic!("schedule loop disconnected from main thread")
            }
            Err(RecvTimeoutError::Timeout) => (),
        }
        // Settle just past the boundary so slot arithmetic lands in the new slot.
        thread::sleep(Duration::from_millis(1));

        let now = Timestamp::now();
        let scheduled = {
            let mut core = core.write().unwrap();
            mode.mode() == ReplicaMode::Normal
                && !core.schedule.slot_used(now)
                && core.schedule.witness_of_time(now).copied() == Some(core.keypair.public())
                && core.schedule.try_use_slot(now)
        };
        if !scheduled {
            continue;
        }

        gate.open();
        for sub_slot in 0..continuous_num {
            let started = Instant::now();

            let produced = core.write().unwrap().produce_one(
                sub_slot,
                continuous_num,
                gen_block_time,
                last2_gen_block_time,
            );
            match produced {
                Ok(block) => {
                    let info = BlockInfo::of(&block);
                    sender.broadcast(
                        NewBlock {
                            block: block.clone(),
                        },
                        MessagePriority::Urgent,
                        true,
                    );
                    let applied = core.write().unwrap().handle_recv_block(block);
                    match applied {
                        Ok(outcome) => {
                            if outcome.linked && mode.mode() == ReplicaMode::Normal {
                                sender.broadcast(
                                    NewBlockHash { info },
                                    MessagePriority::Urgent,
                                    true,
                                );
                            }
                            if let Some(witness_list) = outcome.witness_list_changed {
                                sender.update_witness_set(witness_list);
                            }
                        }
                        Err(err) => log::error!("handle block from myself, err: {:?}", err),
                    }
                }
                Err(err) => log::error!("failed to produce block: {:?}", err),
            }

            if sub_slot + 1 == continuous_num {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed < sub_slot_time {
                match shutdown_signal.recv_timeout(sub_slot_time - elapsed) {
                    Ok(()) => {
                        gate.close();
                        return;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        gate.close();
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => (),
                }
            }

            // Bail out early if the wall clock moved on to another witness's slot.
            let still_mine = {
                let core = core.read().unwrap();
                core.schedule.witness_of_time(Timestamp::now()).copied()
                    == Some(core.keypair.public())
            };
            if !still_mine {
                break;
            }
        }
        gate.close();
    })
}
