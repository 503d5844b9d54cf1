/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's participation mode and the shared handle the worker threads read it through.

use std::fmt;
use std::sync::{Arc, RwLock};

/// How much of the protocol the replica currently participates in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReplicaMode {
    /// Starting up: only recovery input is accepted, all loops idle.
    Init,
    /// Catching up: sync responses are applied, but nothing is produced and no hashes are
    /// broadcast.
    Sync,
    /// Full participation.
    Normal,
}

impl fmt::Display for ReplicaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaMode::Init => write!(f, "Init"),
            ReplicaMode::Sync => write!(f, "Sync"),
            ReplicaMode::Normal => write!(f, "Normal"),
        }
    }
}

/// Cheaply cloneable handle onto the replica's mode, shared by all worker threads.
#[derive(Clone)]
pub struct ModeHandle(Arc<RwLock<ReplicaMode>>);

impl ModeHandle {
    pub(crate) fn new(mode: ReplicaMode) -> ModeHandle {
        ModeHandle(Arc::new(RwLock::new(mode)))
    }

    pub fn mode(&self) -> ReplicaMode {
        *self.0.read().unwrap()
    }

    pub(crate) fn set_mode(&self, mode: ReplicaMode) {
        *self.0.write().unwrap() = mode;
    }
}
