/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" newtypes used throughout the crate. These follow the newtype pattern: the wrapped value
//! is private and the API for reading it is defined here.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
    time::SystemTime,
};

/// Number (height) of a block in the chain. The genesis block has number 0.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockNumber(u64);

impl BlockNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockNumber {
    type Output = BlockNumber;
    fn add(self, rhs: u64) -> Self::Output {
        BlockNumber::new(self.0 + rhs)
    }
}

impl AddAssign<u64> for BlockNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs
    }
}

impl Sub<BlockNumber> for BlockNumber {
    type Output = u64;
    fn sub(self, rhs: BlockNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Index of a production slot. Every slot belongs to exactly one witness under the active rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct SlotNumber(u64);

impl SlotNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> SlotNumber {
        SlotNumber(self.0 + 1)
    }
}

impl Display for SlotNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A point in time, as nanoseconds since the Unix Epoch. Block timestamps use this representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn new(nanosecs: i64) -> Self {
        Self(nanosecs)
    }

    pub const fn int(&self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Timestamp {
        let nanosecs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock is set before the Unix Epoch")
            .as_nanos() as i64;
        Timestamp(nanosecs)
    }

    /// The Unix second this timestamp falls in.
    pub const fn unix_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The sha256 hash of a block header, or an MVCC state tag derived from one.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single transaction carried in a block. Opaque to consensus: only the [`App`](crate::app::App)
/// interprets its bytes.
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// An Ed25519 signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// An Ed25519 verifying key represented in bytes. Unlike
/// [`VerifyingKey`](ed25519_dalek::VerifyingKey), this form is borsh-serializable and usable as a
/// map key without point validation.
pub type VerifyingKeyBytes = [u8; 32];
