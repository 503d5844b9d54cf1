/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's interface into pluggable peer-to-peer networking.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
