/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the witness rotation.
//!
//! ## Ordering of witnesses
//!
//! Unlike a vote-counting validator set, the witness list is **positional**: the witness of slot `s`
//! is the entry at index `s % len`. `WitnessList` therefore preserves the order it was built with,
//! and two lists with the same members in a different order are different rotations.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{self, VerifyingKey};
use std::slice;

use super::basic::VerifyingKeyBytes;

/// The ordered list of witnesses authorized to produce blocks, one slot each, round-robin.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WitnessList(Vec<VerifyingKey>);

impl WitnessList {
    /// Create a witness list with the given rotation order. Duplicate entries are kept; callers are
    /// expected to deduplicate when building a rotation.
    pub fn new(witnesses: Vec<VerifyingKey>) -> WitnessList {
        Self(witnesses)
    }

    /// The witness at the given rotation position.
    pub fn get(&self, position: usize) -> Option<&VerifyingKey> {
        self.0.get(position)
    }

    pub fn contains(&self, witness: &VerifyingKey) -> bool {
        self.0.contains(witness)
    }

    /// Get an iterator through the witnesses in rotation order.
    pub fn iter(&self) -> slice::Iter<VerifyingKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of distinct recent witnesses whose blocks must sit on top of a block before it
    /// becomes irreversible.
    pub fn confirmation_threshold(&self) -> usize {
        self.0.len() * 2 / 3 + 1
    }
}

/// The borsh-serializable form of [`WitnessList`], carried in block headers and WAL records.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct WitnessListBytes(Vec<VerifyingKeyBytes>);

impl WitnessListBytes {
    pub const fn vec(&self) -> &Vec<VerifyingKeyBytes> {
        &self.0
    }
}

impl From<&WitnessList> for WitnessListBytes {
    fn from(witness_list: &WitnessList) -> Self {
        Self(witness_list.iter().map(|w| w.to_bytes()).collect())
    }
}

impl TryFrom<&WitnessListBytes> for WitnessList {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(bytes: &WitnessListBytes) -> Result<Self, Self::Error> {
        let witnesses = bytes
            .0
            .iter()
            .map(VerifyingKey::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WitnessList(witnesses))
    }
}
