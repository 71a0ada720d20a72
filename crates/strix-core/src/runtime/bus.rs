// crates/strix-core/src/runtime/bus.rs
// ============================================================================
// Module: Strix Event Bus
// Description: Bounded per-scan publish channel with backpressure.
// Purpose: Move produced events from module workers to the scan dispatcher.
// Dependencies: std::sync
// ============================================================================

//! ## Overview
//! The bus is the single mandatory suspension point on the hot path: when the
//! queue is at its high-water mark, `publish` blocks the producing module
//! until the dispatcher drains. The dispatcher is the only consumer and never
//! publishes, so producers cannot wait on themselves and the bus stays
//! deadlock free. A shared depth counter covers both queued items and items
//! the dispatcher has popped but not finished routing; quiescence checks read
//! it alongside the dispatcher's own in-flight accounting.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use thiserror::Error;

use crate::core::event::Event;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Bus publication errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum BusError {
    /// Bus has been closed by the dispatcher; the scan is draining.
    #[error("event bus closed")]
    Closed,
}

// ============================================================================
// SECTION: Publisher
// ============================================================================

/// Producer half of the bus, cloned into each module context.
#[derive(Clone)]
pub(crate) struct BusPublisher {
    /// Bounded channel into the dispatcher.
    sender: SyncSender<Event>,
    /// Queued-but-unrouted item count shared with the dispatcher.
    depth: Arc<AtomicUsize>,
    /// False once the dispatcher starts draining.
    open: Arc<AtomicBool>,
}

impl BusPublisher {
    /// Publishes an event, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] when the dispatcher has stopped taking
    /// new events.
    pub(crate) fn publish(&self, event: Event) -> Result<(), BusError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(event).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Consumer
// ============================================================================

/// Dispatcher half of the bus; exactly one exists per scan.
pub(crate) struct BusConsumer {
    /// Receiving end of the bounded channel.
    receiver: Receiver<Event>,
    /// Queued-but-unrouted item count shared with publishers.
    depth: Arc<AtomicUsize>,
    /// False once the dispatcher starts draining.
    open: Arc<AtomicBool>,
}

impl BusConsumer {
    /// Pops the next published event, waiting up to `timeout`.
    ///
    /// The depth counter is decremented by [`BusConsumer::routed`] once the
    /// dispatcher finishes routing the event, not on pop, so quiescence
    /// cannot be declared while an event sits between the two.
    pub(crate) fn pop(&self, timeout: Duration) -> Option<Event> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Marks one popped event as fully routed.
    pub(crate) fn routed(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns the number of events published but not yet routed.
    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Stops accepting publications; later `publish` calls fail closed.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Creates a connected publisher/consumer pair with the given capacity.
pub(crate) fn bounded(capacity: usize) -> (BusPublisher, BusConsumer) {
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicBool::new(true));
    let publisher = BusPublisher {
        sender,
        depth: Arc::clone(&depth),
        open: Arc::clone(&open),
    };
    let consumer = BusConsumer {
        receiver,
        depth,
        open,
    };
    (publisher, consumer)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;
    use crate::core::event::Event;
    use crate::core::event::event_types;

    #[test]
    fn publish_then_pop_round_trips() {
        let (publisher, consumer) = bounded(4);
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        publisher.publish(seed.clone()).unwrap();
        assert_eq!(consumer.depth(), 1);
        let popped = consumer.pop(Duration::from_millis(50)).unwrap();
        assert_eq!(popped.hash, seed.hash);
        consumer.routed();
        assert_eq!(consumer.depth(), 0);
    }

    #[test]
    fn closed_bus_rejects_publish() {
        let (publisher, consumer) = bounded(4);
        consumer.close();
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        assert_eq!(publisher.publish(seed), Err(BusError::Closed));
        assert_eq!(consumer.depth(), 0);
    }

    #[test]
    fn pop_times_out_on_empty_bus() {
        let (_publisher, consumer) = bounded(4);
        assert!(consumer.pop(Duration::from_millis(10)).is_none());
    }
}
