/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The witness schedule: the mapping from wall-clock time to the witness expected to produce.
//!
//! A [`WitnessSchedule`] is constructed by the replica after WAL replay and owned by the protocol
//! core for the lifetime of the replica; it is never global. It tracks:
//! - the **active rotation**: installed atomically on every last-irreversible-block advance,
//! - the **slot arithmetic**: a slot lasts `continuous_num * sub_slot_time` and belongs to the
//!   witness at position `slot % len` of the rotation,
//! - the per-second **slot-used set**, which suppresses re-entry of the producer after clock
//!   jitter within the same second, and
//! - the per-witness **watermarks** consumed by the irreversibility search (see
//!   [`confirmation`](super::confirmation)).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use crate::types::basic::{BlockNumber, SlotNumber, Timestamp, VerifyingKeyBytes};
use crate::types::witnesses::WitnessList;

/// How many Unix seconds of used-slot markers to retain.
const SLOT_USED_RETENTION_SECS: i64 = 120;

pub struct WitnessSchedule {
    me: VerifyingKey,
    witness_list: WitnessList,
    slot_duration: Duration,
    slots_used: HashSet<i64>,
    watermarks: HashMap<VerifyingKeyBytes, BlockNumber>,
}

impl WitnessSchedule {
    pub(crate) fn new(
        me: VerifyingKey,
        witness_list: WitnessList,
        sub_slot_time: Duration,
        continuous_num: u32,
    ) -> WitnessSchedule {
        WitnessSchedule {
            me,
            witness_list,
            slot_duration: sub_slot_time * continuous_num,
            slots_used: HashSet::new(),
            watermarks: HashMap::new(),
        }
    }

    pub fn me(&self) -> &VerifyingKey {
        &self.me
    }

    pub fn witness_list(&self) -> &WitnessList {
        &self.witness_list
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    /// The slot the given instant falls in.
    pub fn slot_of_time(&self, time: Timestamp) -> SlotNumber {
        SlotNumber::new(time.int() as u64 / self.slot_duration.as_nanos() as u64)
    }

    /// The witness that owns the given slot under the active rotation.
    pub fn witness_of_slot(&self, slot: SlotNumber) -> Option<&VerifyingKey> {
        if self.witness_list.is_empty() {
            return None;
        }
        self.witness_list
            .get((slot.int() % self.witness_list.len() as u64) as usize)
    }

    /// The witness that owns the slot containing the given instant.
    pub fn witness_of_time(&self, time: Timestamp) -> Option<&VerifyingKey> {
        self.witness_of_slot(self.slot_of_time(time))
    }

    /// How long from `now` until the next slot boundary.
    pub fn time_until_next_slot(&self, now: Timestamp) -> Duration {
        let slot_nanos = self.slot_duration.as_nanos() as u64;
        let into_slot = now.int() as u64 % slot_nanos;
        Duration::from_nanos(slot_nanos - into_slot)
    }

    pub fn is_witness(&self, id: &VerifyingKey) -> bool {
        self.witness_list.contains(id)
    }

    /// Install a new active rotation. Called on every LIB advance; watermarks survive the change
    /// so witnesses that stay in the rotation keep their confirmation history.
    pub(crate) fn update_witness(&mut self, witness_list: WitnessList) {
        self.witness_list = witness_list;
    }

    /// Mark the second containing `now` as used for production. Returns false if it already was,
    /// in which case the producer must not re-enter. Old markers are pruned as a side effect.
    pub(crate) fn try_use_slot(&mut self, now: Timestamp) -> bool {
        let second = now.unix_secs();
        self.slots_used
            .retain(|used| second - used < SLOT_USED_RETENTION_SECS);
        self.slots_used.insert(second)
    }

    pub(crate) fn slot_used(&self, now: Timestamp) -> bool {
        self.slots_used.contains(&now.unix_secs())
    }

    /// The watermark of a witness: one past the highest block number the witness has produced at.
    /// Blocks below a witness's watermark no longer receive its confirmation.
    pub(crate) fn watermark(&self, witness: &VerifyingKeyBytes) -> BlockNumber {
        self.watermarks
            .get(witness)
            .copied()
            .unwrap_or(BlockNumber::new(0))
    }

    pub(crate) fn set_watermark(&mut self, witness: VerifyingKeyBytes, watermark: BlockNumber) {
        self.watermarks.insert(witness, watermark);
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;

    fn schedule_of(n: usize) -> WitnessSchedule {
        let witnesses: Vec<VerifyingKey> = (0..n)
            .map(|_| SigningKey::generate(&mut OsRng).verifying_key())
            .collect();
        let me = witnesses[0];
        WitnessSchedule::new(
            me,
            WitnessList::new(witnesses),
            Duration::from_millis(300),
            10,
        )
    }

    #[test]
    fn slots_rotate_through_the_witness_list() {
        let schedule = schedule_of(3);
        // Slot duration is 3s; nanosecond instants inside the same slot resolve to the same
        // witness, and consecutive slots rotate.
        let slot0 = schedule.slot_of_time(Timestamp::new(1_000_000_000));
        let slot0_late = schedule.slot_of_time(Timestamp::new(2_999_999_999));
        let slot1 = schedule.slot_of_time(Timestamp::new(3_000_000_000));
        assert_eq!(slot0, slot0_late);
        assert_eq!(slot1, slot0.next());

        let w0 = schedule.witness_of_slot(SlotNumber::new(0)).unwrap();
        let w3 = schedule.witness_of_slot(SlotNumber::new(3)).unwrap();
        let w1 = schedule.witness_of_slot(SlotNumber::new(1)).unwrap();
        assert_eq!(w0, w3);
        assert_ne!(w0, w1);
    }

    #[test]
    fn time_until_next_slot_counts_down() {
        let schedule = schedule_of(3);
        let remaining = schedule.time_until_next_slot(Timestamp::new(1_000_000_000));
        assert_eq!(remaining, Duration::from_secs(2));
    }

    #[test]
    fn slot_used_suppresses_reentry_within_a_second() {
        let mut schedule = schedule_of(1);
        let now = Timestamp::new(5_500_000_000);
        assert!(schedule.try_use_slot(now));
        assert!(!schedule.try_use_slot(Timestamp::new(5_900_000_000)));
        assert!(schedule.try_use_slot(Timestamp::new(6_000_000_000)));
    }
}
