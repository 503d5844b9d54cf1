/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its methods.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
pub use sha2::Sha256 as CryptoHasher;
use sha2::Digest;

use crate::types::basic::*;
use crate::types::witnesses::{WitnessList, WitnessListBytes};

/// The signed portion of a [`Block`]: everything the block's hash commits to.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub number: BlockNumber,
    /// Production time in nanoseconds since the Unix Epoch. Determines the slot, and thereby the
    /// witness expected to have signed this block.
    pub timestamp: Timestamp,
    pub parent_hash: CryptoHash,
    /// The state root the producer claims the block's transactions lead to, starting from the
    /// parent's tagged state.
    pub state_root: CryptoHash,
    /// The verifying key of the witness that produced this block.
    pub witness: VerifyingKeyBytes,
    /// A staged change to the witness rotation, taking effect once this block's descendants start
    /// being produced and becoming binding when this block passes the last irreversible block.
    pub witness_list_update: Option<WitnessListBytes>,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: CryptoHash,
    pub signature: SignatureBytes,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block from its parts, computing its hash and signing it with `signing_key`. The
    /// caller is responsible for `header.witness` matching `signing_key`'s verifying key.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>, signing_key: &SigningKey) -> Block {
        let hash = Block::hash(&header);
        let signature = SignatureBytes::new(signing_key.sign(&hash.bytes()).to_bytes());
        Block {
            header,
            hash,
            signature,
            transactions,
        }
    }

    /// The genesis block: number 0, all-zero parent, unsigned. Its `witness_list_update` carries
    /// the initial rotation.
    pub fn genesis(state_root: CryptoHash, witness_list: &WitnessList) -> Block {
        let header = BlockHeader {
            number: BlockNumber::new(0),
            timestamp: Timestamp::new(0),
            parent_hash: CryptoHash::default(),
            state_root,
            witness: [0u8; 32],
            witness_list_update: Some(WitnessListBytes::from(witness_list)),
        };
        let hash = Block::hash(&header);
        Block {
            header,
            hash,
            signature: SignatureBytes::new([0u8; 64]),
            transactions: Vec::new(),
        }
    }

    pub fn hash(header: &BlockHeader) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(header.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks whether the hash recomputes from the header and the signature verifies against the
    /// header's witness key.
    pub fn is_correct(&self) -> bool {
        if self.hash != Block::hash(&self.header) {
            return false;
        }
        let witness = match VerifyingKey::from_bytes(&self.header.witness) {
            Ok(witness) => witness,
            Err(_) => return false,
        };
        let signature = Signature::from_bytes(&self.signature.bytes());
        witness.verify(&self.hash.bytes(), &signature).is_ok()
    }
}
