//! Delivers a block whose parent is missing and checks, over the wire, that the replica parks it,
//! asks the sending peer for the parent, and adopts the orphan once the parent arrives.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;

use pob_rs::networking::messages::{Message, NewBlock};
use pob_rs::networking::network::{MessagePriority, Network};
use pob_rs::replica::{Configuration, Replica, ReplicaSpec};
use pob_rs::types::basic::CryptoHash;
use pob_rs::types::block::Block;
use pob_rs::types::witnesses::WitnessList;

use common::digest_app::{make_block, past_base_slot, signing_keys, slot_timestamp, DigestApp};
use common::logging::setup_logger;
use common::mem_db::{MemChainStore, MemStateDb, MemTxPool};
use common::network::mock_network;

const SUB_SLOT: Duration = Duration::from_millis(300);
const CONTINUOUS_NUM: u32 = 10;

#[test]
fn an_orphan_triggers_a_parent_request_and_is_adopted_on_arrival() {
    setup_logger(LevelFilter::Warn);

    let keys = signing_keys(2);
    let me = keys[0].clone();
    let remote_witness = keys[1].clone();
    // The remote peer is the only witness: the local replica never produces, only follows.
    let witness_list = WitnessList::new(vec![remote_witness.verifying_key()]);

    let stubs = mock_network(
        [me.verifying_key(), remote_witness.verifying_key()].into_iter(),
    );
    let my_network = stubs[0].clone();
    let mut remote = stubs[1].clone();

    let mut chain_store = MemChainStore::new();
    let mut state_db = MemStateDb::new();
    let genesis = Block::genesis(CryptoHash::default(), &witness_list);
    Replica::initialize(&mut chain_store, &mut state_db, genesis.clone()).unwrap();

    let linked: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let configuration = Configuration::builder(me)
        .sub_slot_time(SUB_SLOT)
        .continuous_num(CONTINUOUS_NUM)
        .build();
    let replica = ReplicaSpec::new(
        DigestApp,
        my_network,
        chain_store.clone(),
        state_db,
        MemTxPool::new(),
        witness_list,
        configuration,
    )
    .on_link_block({
        let linked = Arc::clone(&linked);
        move |event| linked.lock().unwrap().push(event.number.int())
    })
    .start();

    let base_slot = past_base_slot(SUB_SLOT * CONTINUOUS_NUM, 100);
    let b1 = make_block(
        &genesis,
        &remote_witness,
        slot_timestamp(base_slot, 0, SUB_SLOT, CONTINUOUS_NUM),
        Vec::new(),
    );
    let b2 = make_block(
        &b1,
        &remote_witness,
        slot_timestamp(base_slot, 1, SUB_SLOT, CONTINUOUS_NUM),
        Vec::new(),
    );

    // The child arrives first.
    remote.send(
        keys[0].verifying_key(),
        Message::NewBlock(NewBlock { block: b2.clone() }),
        MessagePriority::Urgent,
        true,
    );

    // The replica asks us (the sending peer) for the missing parent, by hash and number.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut request = None;
    while Instant::now() < deadline && request.is_none() {
        match remote.try_recv() {
            Some((_, Message::NewBlockRequest(req))) => request = Some(req.info),
            Some(_) => (),
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
    let request = request.expect("the replica should have requested the missing parent");
    assert_eq!(request.hash, b1.hash);
    assert_eq!(request.number.int(), 1);

    // Serve the parent: both blocks link, in order.
    remote.send(
        keys[0].verifying_key(),
        Message::NewBlock(NewBlock { block: b1.clone() }),
        MessagePriority::Urgent,
        true,
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && linked.lock().unwrap().len() < 2 {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(&linked.lock().unwrap()[0..2], &[1, 2]);

    drop(replica);
}
