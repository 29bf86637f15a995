//! Control-transfer queue specialization
//!
//! Translates one [`ControlIrp`] into a call to the device port's control
//! primitive and writes the outcome back into the request.

use crate::error::UsbError;
use crate::events::{EventSink, TransferEvent};
use crate::irp::ControlIrp;
use crate::port::DevicePort;
use crate::queue::IrpHandler;
use tracing::{debug, warn};

/// Handler executing control requests against one device.
///
/// Pair it with an [`IrpQueue`](crate::queue::IrpQueue) to get a per-device
/// control queue:
///
/// ```no_run
/// # use usbq::{ControlHandler, IrpQueue, test_utils::MockPort};
/// let queue = IrpQueue::new(ControlHandler::new(MockPort::new(), 5000));
/// ```
pub struct ControlHandler<P: DevicePort> {
    port: P,
    timeout_ms: u32,
    events: Option<EventSink>,
}

impl<P: DevicePort> ControlHandler<P> {
    /// Creates a handler with the configured per-transfer timeout
    /// (see [`UsbConfig::timeout_ms`](crate::config::UsbConfig)).
    pub fn new(port: P, timeout_ms: u32) -> Self {
        Self {
            port,
            timeout_ms,
            events: None,
        }
    }

    /// Attaches an event sink notified from the finish hook.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }
}

impl<P: DevicePort + 'static> IrpHandler<ControlIrp> for ControlHandler<P> {
    fn process(&mut self, irp: &ControlIrp) -> Result<(), UsbError> {
        process_control(&mut self.port, irp, self.timeout_ms)
    }

    fn finish(&mut self, irp: &ControlIrp) {
        if let Some(events) = &self.events {
            if irp.error().is_some() {
                events.emit(TransferEvent::ControlFailed(irp.clone()));
            } else {
                events.emit(TransferEvent::ControlComplete(irp.clone()));
            }
        }
    }
}

/// Executes one control request: copy the payload into a transfer buffer,
/// run the exchange, copy the result back, then apply the short-packet
/// policy.
fn process_control<P: DevicePort>(
    port: &mut P,
    irp: &ControlIrp,
    timeout_ms: u32,
) -> Result<(), UsbError> {
    let setup = irp.setup();
    debug!(
        "control transfer: request_type={:#04x}, request={:#04x}, value={:#06x}, index={:#06x}, length={}",
        setup.request_type,
        setup.request,
        setup.value,
        setup.index,
        irp.length()
    );

    // A zero-length exchange is legal and still goes to the device.
    let mut buffer = irp.irp().copy_payload();

    port.open()?;

    let result = port.control_transfer(&setup, &mut buffer, timeout_ms);
    if result < 0 {
        warn!("control transfer failed with code {}", result);
        return Err(UsbError::platform("Unable to submit control message", result));
    }

    let actual = (result as usize).min(buffer.len());
    irp.irp().write_back(&buffer[..actual]);

    if actual != irp.length() && !irp.accepts_short_packet() {
        // The bytes copied back stay valid; only the outcome is an error.
        return Err(UsbError::ShortPacket {
            expected: irp.length(),
            actual,
        });
    }

    debug!("control transfer succeeded: {} bytes", actual);
    Ok(())
}
