/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the protocol threads and passes them to event handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it triggers the
//! execution of all handlers defined for the contained event type, where the handlers for each
//! event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers` this thread is not
//! started.
//!
//! ## Event Handlers
//!
//! A replica's instance of `EventHandlers` contains:
//! 1. The handlers provided upon building the replica via
//!    [`ReplicaSpec`](crate::replica::ReplicaSpec), and
//! 2. If logging is enabled via the replica's [config](crate::replica::Configuration), also the
//!    default logging handlers defined in [logging](crate::logging).

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type that implements the [`Logger`]
/// trait, namely one logging handler, defined in [`logging`](crate::logging), and one user-defined
/// handler, passed to [`ReplicaSpec`](crate::replica::ReplicaSpec).
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    pub(crate) fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the default logging handler
    /// if logging is enabled.
    pub(crate) fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn fire(&self, event: &T) {
        if let Some(handler) = &self.user_defined_handler {
            handler(event)
        }
        if let Some(handler) = &self.logging_handler {
            handler(event)
        }
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers for each pre-defined
/// event type from [events](crate::events).
pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: HandlerPair<InsertBlockEvent>,
    pub(crate) link_block_handlers: HandlerPair<LinkBlockEvent>,
    pub(crate) confirm_block_handlers: HandlerPair<ConfirmBlockEvent>,
    pub(crate) prune_block_handlers: HandlerPair<PruneBlockEvent>,
    pub(crate) update_witness_set_handlers: HandlerPair<UpdateWitnessSetEvent>,

    pub(crate) produce_block_handlers: HandlerPair<ProduceBlockEvent>,
    pub(crate) receive_block_handlers: HandlerPair<ReceiveBlockEvent>,
    pub(crate) receive_block_request_handlers: HandlerPair<ReceiveBlockRequestEvent>,

    pub(crate) start_sync_handlers: HandlerPair<StartSyncEvent>,
    pub(crate) end_sync_handlers: HandlerPair<EndSyncEvent>,
}

impl EventHandlers {
    /// Creates the [handler pairs](HandlerPair) for all pre-defined event types from
    /// [events](crate::events) given the user-defined handlers, and information on whether logging
    /// is enabled.
    pub(crate) fn new(
        log: bool,
        insert_block_handler: Option<HandlerPtr<InsertBlockEvent>>,
        link_block_handler: Option<HandlerPtr<LinkBlockEvent>>,
        confirm_block_handler: Option<HandlerPtr<ConfirmBlockEvent>>,
        prune_block_handler: Option<HandlerPtr<PruneBlockEvent>>,
        update_witness_set_handler: Option<HandlerPtr<UpdateWitnessSetEvent>>,
        produce_block_handler: Option<HandlerPtr<ProduceBlockEvent>>,
        receive_block_handler: Option<HandlerPtr<ReceiveBlockEvent>>,
        receive_block_request_handler: Option<HandlerPtr<ReceiveBlockRequestEvent>>,
        start_sync_handler: Option<HandlerPtr<StartSyncEvent>>,
        end_sync_handler: Option<HandlerPtr<EndSyncEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            insert_block_handlers: HandlerPair::new(log, insert_block_handler),
            link_block_handlers: HandlerPair::new(log, link_block_handler),
            confirm_block_handlers: HandlerPair::new(log, confirm_block_handler),
            prune_block_handlers: HandlerPair::new(log, prune_block_handler),
            update_witness_set_handlers: HandlerPair::new(log, update_witness_set_handler),
            produce_block_handlers: HandlerPair::new(log, produce_block_handler),
            receive_block_handlers: HandlerPair::new(log, receive_block_handler),
            receive_block_request_handlers: HandlerPair::new(log, receive_block_request_handler),
            start_sync_handlers: HandlerPair::new(log, start_sync_handler),
            end_sync_handlers: HandlerPair::new(log, end_sync_handler),
        }
    }

    /// Checks if no handlers are defined, i.e., neither user-defined handlers were defined nor
    /// logging is enabled.
    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.link_block_handlers.is_empty()
            && self.confirm_block_handlers.is_empty()
            && self.prune_block_handlers.is_empty()
            && self.update_witness_set_handlers.is_empty()
            && self.produce_block_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.receive_block_request_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
    }

    /// Triggers the execution of each of the two handlers - the user-defined and the logging
    /// handler, if defined - for a given event type from [events](crate::events).
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => {
                self.insert_block_handlers.fire(&insert_block_event)
            }
            Event::LinkBlock(link_block_event) => self.link_block_handlers.fire(&link_block_event),
            Event::ConfirmBlock(confirm_block_event) => {
                self.confirm_block_handlers.fire(&confirm_block_event)
            }
            Event::PruneBlock(prune_block_event) => {
                self.prune_block_handlers.fire(&prune_block_event)
            }
            Event::UpdateWitnessSet(update_witness_set_event) => {
                self.update_witness_set_handlers
                    .fire(&update_witness_set_event)
            }
            Event::ProduceBlock(produce_block_event) => {
                self.produce_block_handlers.fire(&produce_block_event)
            }
            Event::ReceiveBlock(receive_block_event) => {
                self.receive_block_handlers.fire(&receive_block_event)
            }
            Event::ReceiveBlockRequest(receive_block_request_event) => {
                self.receive_block_request_handlers
                    .fire(&receive_block_request_event)
            }
            Event::StartSync(start_sync_event) => self.start_sync_handlers.fire(&start_sync_event),
            Event::EndSync(end_sync_event) => self.end_sync_handlers.fire(&end_sync_event),
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown signal is received
/// from the parent thread. In each iteration of the loop, the thread checks if it received any
/// event notifications, and if so, then triggers the execution of the handlers defined for the
/// event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                // All event publishers have exited; nothing more will arrive.
                return;
            }
        }
    })
}
