//! Endpoint-pipe queue specialization
//!
//! Carries generic [`Irp`]s over one bulk or interrupt endpoint. The queue
//! only marshals buffers; how the exchange is shaped on the wire is the
//! port's concern.

use crate::error::UsbError;
use crate::events::{EventSink, TransferEvent};
use crate::irp::Irp;
use crate::port::{DevicePort, TransferKind};
use crate::queue::IrpHandler;
use tracing::{debug, warn};

/// Handler executing pipe requests against one endpoint of one device.
///
/// One handler (and thus one queue) per pipe: the endpoint address and
/// transfer kind are fixed at construction, matching the one-queue-per-pipe
/// ownership model.
pub struct PipeHandler<P: DevicePort> {
    port: P,
    endpoint: u8,
    kind: TransferKind,
    timeout_ms: u32,
    events: Option<EventSink>,
}

impl<P: DevicePort> PipeHandler<P> {
    /// Creates a handler for the given endpoint. Bit 7 of `endpoint`
    /// encodes the direction.
    pub fn new(port: P, endpoint: u8, kind: TransferKind, timeout_ms: u32) -> Self {
        Self {
            port,
            endpoint,
            kind,
            timeout_ms,
            events: None,
        }
    }

    /// Attaches an event sink notified from the finish hook.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// The endpoint address this pipe is bound to.
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }
}

impl<P: DevicePort + 'static> IrpHandler<Irp> for PipeHandler<P> {
    fn process(&mut self, irp: &Irp) -> Result<(), UsbError> {
        debug!(
            "pipe transfer: endpoint={:#04x}, kind={:?}, length={}",
            self.endpoint,
            self.kind,
            irp.length()
        );

        let mut buffer = irp.copy_payload();

        self.port.open()?;

        let result = self
            .port
            .endpoint_transfer(self.endpoint, self.kind, &mut buffer, self.timeout_ms);
        if result < 0 {
            warn!(
                "pipe transfer on endpoint {:#04x} failed with code {}",
                self.endpoint, result
            );
            return Err(UsbError::platform("Unable to submit transfer", result));
        }

        let actual = (result as usize).min(buffer.len());
        irp.write_back(&buffer[..actual]);

        if actual != irp.length() && !irp.accepts_short_packet() {
            return Err(UsbError::ShortPacket {
                expected: irp.length(),
                actual,
            });
        }

        debug!(
            "pipe transfer on endpoint {:#04x} succeeded: {} bytes",
            self.endpoint, actual
        );
        Ok(())
    }

    fn finish(&mut self, irp: &Irp) {
        if let Some(events) = &self.events {
            if irp.error().is_some() {
                events.emit(TransferEvent::PipeFailed(irp.clone()));
            } else {
                events.emit(TransferEvent::PipeComplete(irp.clone()));
            }
        }
    }
}
