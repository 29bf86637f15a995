//! Transfer completion events
//!
//! Queues emit an event from their finish hook once a request is complete,
//! so observers (device wrappers, session layers) can react without polling
//! individual IRPs. Events carry the IRP handle itself; because the finish
//! hook runs strictly after the completion flag is set, an event's IRP is
//! always in its final state.

use crate::irp::{ControlIrp, Irp};
use async_channel::{Receiver, Sender, bounded};
use tracing::debug;

/// A completed (or failed) transfer, reported by a queue's finish hook.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A control request completed successfully.
    ControlComplete(ControlIrp),
    /// A control request completed with an error attached.
    ControlFailed(ControlIrp),
    /// A pipe request completed successfully.
    PipeComplete(Irp),
    /// A pipe request completed with an error attached.
    PipeFailed(Irp),
}

/// Sending side of the event channel, handed to queue handlers.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<TransferEvent>,
}

impl EventSink {
    /// Emits an event without blocking. Finish hooks must never fail, so a
    /// full or closed channel drops the event.
    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("dropping transfer event: {}", e);
        }
    }
}

/// Creates the event channel for a device's queues.
///
/// Returns the sink to pass into handlers and the receiver for observers.
/// The channel is bounded; observers that fall more than `capacity` events
/// behind lose the oldest unread ones.
pub fn event_channel(capacity: usize) -> (EventSink, Receiver<TransferEvent>) {
    let (tx, rx) = bounded(capacity);
    (EventSink { tx }, rx)
}
