/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are common across the components of the PoB protocol.
//!
//! The types defined in [`basic`] are "inert" newtypes: they are sent around and inspected, but have
//! no active behavior. Types with protocol-relevant behavior get their own submodules: [`block`] for
//! the block and its header, [`witnesses`] for the ordered witness rotation, and
//! [`crypto_primitives`] for the keypair wrapper used to sign blocks.

pub mod basic;

pub mod block;

pub mod crypto_primitives;

pub mod witnesses;
