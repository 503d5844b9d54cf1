/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The gate that keeps the verify loop out of the cache while the local witness is mid-burst.
//!
//! While the producer is generating its `continuous_num` sub-slot batch, applying received blocks
//! would flap the fork head under it. The producer therefore [`open`](GenerateGate::open)s the
//! gate for the duration of the burst and [`close`](GenerateGate::close)s it at the end; the
//! verify loop calls [`wait_closed`](GenerateGate::wait_closed) before every application and
//! blocks while a burst is in flight. Received blocks queue up in the verify channel in the
//! meantime.
//!
//! The gate starts closed.

use std::sync::{Arc, Condvar, Mutex};

#[derive(Clone)]
pub(crate) struct GenerateGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl GenerateGate {
    pub(crate) fn new() -> GenerateGate {
        GenerateGate {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Enter generate mode: subsequent `wait_closed` calls block.
    pub(crate) fn open(&self) {
        let (generating, _) = &*self.inner;
        *generating.lock().unwrap() = true;
    }

    /// Leave generate mode, releasing every thread blocked in `wait_closed`.
    pub(crate) fn close(&self) {
        let (generating, condvar) = &*self.inner;
        *generating.lock().unwrap() = false;
        condvar.notify_all();
    }

    /// Block until the gate is closed (i.e. no production burst is in flight).
    pub(crate) fn wait_closed(&self) {
        let (generating, condvar) = &*self.inner;
        let mut guard = generating.lock().unwrap();
        while *guard {
            guard = condvar.wait(guard).unwrap();
        }
    }
}
