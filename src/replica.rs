/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types that [initialize](Replica::initialize) and [start](ReplicaSpec::start) a
//! replica, as well as [the type](Replica) which keeps the replica alive.
//!
//! A replica is a single process participating in the PoB protocol. Each replica is uniquely
//! identified by an Ed25519 verifying key; replicas whose key is in the active witness rotation
//! produce blocks in their slots, while everyone else verifies, relays, and tracks
//! irreversibility.
//!
//! ## Starting a replica
//!
//! The library user provides the pluggable pieces — an [`App`], a [`Network`], a [`ChainStore`],
//! a [`StateDb`] and a [`TxPool`] — plus a [`Configuration`], wrapped up in a [`ReplicaSpec`].
//! Before the very first start on a fresh chain store, [`Replica::initialize`] must be called once
//! to install the genesis block.
//!
//! [`ReplicaSpec::start`] mounts the block cache WAL and replays it (checking each recorded block
//! against its recorded witness list, since schedule changes are deterministic from history), then
//! decides the starting mode: Normal if the recovered tip is within one slot of wall clock, Sync
//! otherwise. Finally it spawns the worker threads. Dropping the returned [`Replica`] shuts all of
//! them down and blocks until they have exited.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use ed25519_dalek::SigningKey;

use crate::app::App;
use crate::block_cache::cache::BlockCache;
use crate::block_cache::wal::{WalRecord, WriteAheadLog};
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::modes::{ModeHandle, ReplicaMode};
use crate::networking::network::Network;
use crate::networking::receiving::start_polling;
use crate::networking::sending::SenderHandle;
use crate::pluggables::{ChainStore, ChainStoreError, StateDb, TxPool};
use crate::pob::gate::GenerateGate;
use crate::pob::protocol::{
    start_block_loop, start_message_loop, start_schedule_loop, start_verify_loop, BlockRequestMap,
    PobCore,
};
use crate::pob::schedule::WitnessSchedule;
use crate::types::basic::Timestamp;
use crate::types::block::Block;
use crate::types::crypto_primitives::Keypair;
use crate::types::witnesses::WitnessList;

/// Immutable parameters that define the behaviour of a replica, specified by the operator.
#[derive(Clone)]
pub struct Configuration {
    /// The replica's signing key. Its verifying key is the replica's identity.
    pub me: SigningKey,
    /// Length of one sub-slot; a witness may produce one block per sub-slot of its slot.
    pub sub_slot_time: Duration,
    /// Generation budget handed to the app for ordinary sub-slots.
    pub gen_block_time: Duration,
    /// Shortened generation budget for the final two sub-slots, reserving propagation time.
    pub last2_gen_block_time: Duration,
    /// How long a by-hash block request stays pending before it may be fired again.
    pub block_req_timeout: Duration,
    /// Number of sub-slots in a slot: how many consecutive blocks a witness produces per slot.
    pub continuous_num: u32,
    /// Purge stale orphan subtrees (and compact the WAL) every this many root advances.
    pub del_single_interval: u64,
    /// Capacity of the bounded verify channel; the protocol's backpressure point.
    pub verify_channel_capacity: usize,
    /// Directory holding the block cache WAL. `None` disables crash recovery.
    pub wal_directory: Option<PathBuf>,
    /// Whether to enable the default logging event handlers defined in
    /// [logging](crate::logging).
    pub log_events: bool,
}

impl Configuration {
    pub fn builder(me: SigningKey) -> ConfigurationBuilder {
        ConfigurationBuilder {
            configuration: Configuration {
                me,
                sub_slot_time: Duration::from_millis(300),
                gen_block_time: Duration::from_millis(250),
                last2_gen_block_time: Duration::from_millis(30),
                block_req_timeout: Duration::from_secs(3),
                continuous_num: 10,
                del_single_interval: 10,
                verify_channel_capacity: 1024,
                wal_directory: None,
                log_events: false,
            },
        }
    }
}

pub struct ConfigurationBuilder {
    configuration: Configuration,
}

impl ConfigurationBuilder {
    pub fn sub_slot_time(mut self, sub_slot_time: Duration) -> Self {
        self.configuration.sub_slot_time = sub_slot_time;
        self
    }

    pub fn gen_block_time(mut self, gen_block_time: Duration) -> Self {
        self.configuration.gen_block_time = gen_block_time;
        self
    }

    pub fn last2_gen_block_time(mut self, last2_gen_block_time: Duration) -> Self {
        self.configuration.last2_gen_block_time = last2_gen_block_time;
        self
    }

    pub fn block_req_timeout(mut self, block_req_timeout: Duration) -> Self {
        self.configuration.block_req_timeout = block_req_timeout;
        self
    }

    pub fn continuous_num(mut self, continuous_num: u32) -> Self {
        self.configuration.continuous_num = continuous_num;
        self
    }

    pub fn del_single_interval(mut self, del_single_interval: u64) -> Self {
        self.configuration.del_single_interval = del_single_interval;
        self
    }

    pub fn verify_channel_capacity(mut self, verify_channel_capacity: usize) -> Self {
        self.configuration.verify_channel_capacity = verify_channel_capacity;
        self
    }

    pub fn wal_directory(mut self, wal_directory: PathBuf) -> Self {
        self.configuration.wal_directory = Some(wal_directory);
        self
    }

    pub fn log_events(mut self, log_events: bool) -> Self {
        self.configuration.log_events = log_events;
        self
    }

    pub fn build(self) -> Configuration {
        self.configuration
    }
}

/// Everything needed to start a replica: the five pluggable pieces, the initial witness rotation,
/// the configuration, and optional event handlers.
pub struct ReplicaSpec<D: StateDb, C: ChainStore, P: TxPool, A: App<D>, N: Network> {
    app: A,
    network: N,
    chain_store: C,
    state_db: D,
    tx_pool: P,
    /// The rotation in force at the chain store's top block. Ignored if that block stages its own
    /// list (as the genesis block does).
    initial_witness_list: WitnessList,
    configuration: Configuration,

    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    on_link_block: Option<HandlerPtr<LinkBlockEvent>>,
    on_confirm_block: Option<HandlerPtr<ConfirmBlockEvent>>,
    on_prune_block: Option<HandlerPtr<PruneBlockEvent>>,
    on_update_witness_set: Option<HandlerPtr<UpdateWitnessSetEvent>>,
    on_produce_block: Option<HandlerPtr<ProduceBlockEvent>>,
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    on_receive_block_request: Option<HandlerPtr<ReceiveBlockRequestEvent>>,
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
}

impl<D: StateDb + Sync, C: ChainStore + Sync, P: TxPool + Sync, A: App<D> + Sync, N: Network>
    ReplicaSpec<D, C, P, A, N>
{
    pub fn new(
        app: A,
        network: N,
        chain_store: C,
        state_db: D,
        tx_pool: P,
        initial_witness_list: WitnessList,
        configuration: Configuration,
    ) -> ReplicaSpec<D, C, P, A, N> {
        ReplicaSpec {
            app,
            network,
            chain_store,
            state_db,
            tx_pool,
            initial_witness_list,
            configuration,
            on_insert_block: None,
            on_link_block: None,
            on_confirm_block: None,
            on_prune_block: None,
            on_update_witness_set: None,
            on_produce_block: None,
            on_receive_block: None,
            on_receive_block_request: None,
            on_start_sync: None,
            on_end_sync: None,
        }
    }

    pub fn on_insert_block(mut self, handler: impl Fn(&InsertBlockEvent) + Send + 'static) -> Self {
        self.on_insert_block = Some(Box::new(handler));
        self
    }

    pub fn on_link_block(mut self, handler: impl Fn(&LinkBlockEvent) + Send + 'static) -> Self {
        self.on_link_block = Some(Box::new(handler));
        self
    }

    pub fn on_confirm_block(
        mut self,
        handler: impl Fn(&ConfirmBlockEvent) + Send + 'static,
    ) -> Self {
        self.on_confirm_block = Some(Box::new(handler));
        self
    }

    pub fn on_prune_block(mut self, handler: impl Fn(&PruneBlockEvent) + Send + 'static) -> Self {
        self.on_prune_block = Some(Box::new(handler));
        self
    }

    pub fn on_update_witness_set(
        mut self,
        handler: impl Fn(&UpdateWitnessSetEvent) + Send + 'static,
    ) -> Self {
        self.on_update_witness_set = Some(Box::new(handler));
        self
    }

    pub fn on_produce_block(
        mut self,
        handler: impl Fn(&ProduceBlockEvent) + Send + 'static,
    ) -> Self {
        self.on_produce_block = Some(Box::new(handler));
        self
    }

    pub fn on_receive_block(
        mut self,
        handler: impl Fn(&ReceiveBlockEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_block = Some(Box::new(handler));
        self
    }

    pub fn on_receive_block_request(
        mut self,
        handler: impl Fn(&ReceiveBlockRequestEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_block_request = Some(Box::new(handler));
        self
    }

    pub fn on_start_sync(mut self, handler: impl Fn(&StartSyncEvent) + Send + 'static) -> Self {
        self.on_start_sync = Some(Box::new(handler));
        self
    }

    pub fn on_end_sync(mut self, handler: impl Fn(&EndSyncEvent) + Send + 'static) -> Self {
        self.on_end_sync = Some(Box::new(handler));
        self
    }

    /// Recover the block cache and start the worker threads. Blocks until recovery is complete;
    /// returns as soon as the replica is live.
    pub fn start(mut self) -> Replica {
        let config = self.configuration.clone();

        let event_handlers = EventHandlers::new(
            config.log_events,
            self.on_insert_block,
            self.on_link_block,
            self.on_confirm_block,
            self.on_prune_block,
            self.on_update_witness_set,
            self.on_produce_block,
            self.on_receive_block,
            self.on_receive_block_request,
            self.on_start_sync,
            self.on_end_sync,
        );
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            let (publisher, subscriber) = mpsc::channel();
            (Some(publisher), Some(subscriber))
        } else {
            (None, None)
        };

        let (wal, wal_records) = match &config.wal_directory {
            Some(directory) => {
                let (wal, records) = WriteAheadLog::open(directory)
                    .expect("the block cache WAL directory must be creatable and readable");
                (Some(wal), records)
            }
            None => (None, Vec::new()),
        };

        let mode = ModeHandle::new(ReplicaMode::Init);

        let cache = BlockCache::new(
            self.chain_store.clone(),
            self.state_db.clone(),
            self.initial_witness_list,
            wal,
            config.del_single_interval,
            event_publisher.clone(),
        )
        .expect("the chain store must hold at least the genesis block; call Replica::initialize first");

        let schedule = WitnessSchedule::new(
            config.me.verifying_key(),
            cache.linked_root().active_witnesses().clone(),
            config.sub_slot_time,
            config.continuous_num,
        );

        let mut core = PobCore {
            keypair: Keypair::new(config.me.clone()),
            cache,
            chain_store: self.chain_store,
            verify_db: self.state_db.clone(),
            produce_db: self.state_db.fork(),
            tx_pool: self.tx_pool,
            app: self.app,
            schedule,
            mode: mode.clone(),
            event_publisher: event_publisher.clone(),
        };

        replay_wal(&mut core, wal_records);

        // Decide the starting mode: a tip within one slot of wall clock (or a fresh chain) can
        // participate right away; anything else must catch up first.
        let head_time = core.cache.head().block.header.timestamp;
        let head_number = core.cache.head().number();
        let slot_nanos = core.schedule.slot_duration().as_nanos() as i64;
        let caught_up =
            head_number.int() == 0 || Timestamp::now().int() - head_time.int() <= slot_nanos;
        if caught_up {
            mode.set_mode(ReplicaMode::Normal);
        } else {
            mode.set_mode(ReplicaMode::Sync);
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                tip_number: head_number,
            })
            .publish(&event_publisher);
        }

        self.network
            .init_witness_set(core.schedule.witness_list().clone());

        let core = Arc::new(RwLock::new(core));
        let gate = GenerateGate::new();
        let block_req_map = BlockRequestMap::new();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, block_receiver, block_hash_receiver, block_query_receiver) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (verify_sender, verify_receiver) = mpsc::sync_channel(config.verify_channel_capacity);

        let (message_loop_shutdown, message_loop_shutdown_receiver) = mpsc::channel();
        let message_loop = start_message_loop(
            Arc::clone(&core),
            SenderHandle::new(self.network.clone()),
            block_req_map.clone(),
            mode.clone(),
            block_hash_receiver,
            block_query_receiver,
            config.block_req_timeout,
            event_publisher.clone(),
            message_loop_shutdown_receiver,
        );

        let (block_loop_shutdown, block_loop_shutdown_receiver) = mpsc::channel();
        let block_loop = start_block_loop(block_receiver, verify_sender, block_loop_shutdown_receiver);

        let (verify_loop_shutdown, verify_loop_shutdown_receiver) = mpsc::channel();
        let verify_loop = start_verify_loop(
            Arc::clone(&core),
            SenderHandle::new(self.network.clone()),
            gate.clone(),
            block_req_map,
            mode.clone(),
            verify_receiver,
            config.block_req_timeout,
            event_publisher.clone(),
            verify_loop_shutdown_receiver,
        );

        let (schedule_loop_shutdown, schedule_loop_shutdown_receiver) = mpsc::channel();
        let schedule_loop = start_schedule_loop(
            Arc::clone(&core),
            SenderHandle::new(self.network),
            gate,
            mode.clone(),
            config.sub_slot_time,
            config.continuous_num,
            config.gen_block_time,
            config.last2_gen_block_time,
            schedule_loop_shutdown_receiver,
        );

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus_shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        Replica {
            mode,
            schedule_loop: Some(schedule_loop),
            schedule_loop_shutdown,
            message_loop: Some(message_loop),
            message_loop_shutdown,
            block_loop: Some(block_loop),
            block_loop_shutdown,
            verify_loop: Some(verify_loop),
            verify_loop_shutdown,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// Replay recovered WAL records through the recovery entrypoint. Individual failures are expected
/// (e.g. records at or below a tip that was flushed before the crash) and skipped.
fn replay_wal<D: StateDb, C: ChainStore, P: TxPool, A: App<D>>(
    core: &mut PobCore<D, C, P, A>,
    records: Vec<WalRecord>,
) {
    let total = records.len();
    let mut replayed = 0usize;
    for record in records {
        let witnesses = match WitnessList::try_from(&record.witnesses) {
            Ok(witnesses) => witnesses,
            Err(_) => {
                log::warn!("skipping a WAL record with an undecodable witness list");
                continue;
            }
        };
        match core.recover_block(record.block, witnesses) {
            Ok(()) => replayed += 1,
            Err(err) => log::debug!("skipped a WAL record during replay: {:?}", err),
        }
    }
    if total > 0 {
        log::info!("replayed {} of {} WAL records", replayed, total);
    }
}

/// A handle onto a running replica. Dropping it stops and joins all worker threads.
pub struct Replica {
    mode: ModeHandle,
    schedule_loop: Option<JoinHandle<()>>,
    schedule_loop_shutdown: Sender<()>,
    message_loop: Option<JoinHandle<()>>,
    message_loop_shutdown: Sender<()>,
    block_loop: Option<JoinHandle<()>>,
    block_loop_shutdown: Sender<()>,
    verify_loop: Option<JoinHandle<()>>,
    verify_loop_shutdown: Sender<()>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Install `genesis` into a fresh chain store and tag the state database with its hash. Must
    /// be called exactly once before the first [`ReplicaSpec::start`] on a given store.
    pub fn initialize<C: ChainStore, D: StateDb>(
        chain_store: &mut C,
        state_db: &mut D,
        genesis: Block,
    ) -> Result<(), ChainStoreError> {
        let genesis_hash = genesis.hash;
        chain_store.push(&genesis)?;
        state_db.tag(&genesis_hash);
        Ok(())
    }

    /// The replica's current participation mode.
    pub fn mode(&self) -> ReplicaMode {
        self.mode.mode()
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make
        // assumptions about the validity of their channels based on this. The block loop feeds the
        // verify loop and assumes a live consumer; both are fed by the poller. A loop may also
        // exit on its own when its upstream channel disconnects, so the shutdown sends are
        // best-effort.

        let _ = self.schedule_loop_shutdown.send(());
        self.schedule_loop.take().unwrap().join().unwrap();

        let _ = self.message_loop_shutdown.send(());
        self.message_loop.take().unwrap().join().unwrap();

        let _ = self.block_loop_shutdown.send(());
        self.block_loop.take().unwrap().join().unwrap();

        let _ = self.verify_loop_shutdown.send(());
        self.verify_loop.take().unwrap().join().unwrap();

        let _ = self.poller_shutdown.send(());
        self.poller.take().unwrap().join().unwrap();

        if let (Some(shutdown), Some(event_bus)) =
            (self.event_bus_shutdown.take(), self.event_bus.take())
        {
            let _ = shutdown.send(());
            event_bus.join().unwrap();
        }
    }
}
