//! Device-port collaborator contract
//!
//! The queue does not talk to USB hardware directly; it marshals buffers and
//! delegates the actual exchange to a [`DevicePort`] implementation. The
//! `usbq-rusb` crate provides one over libusb; tests use
//! [`MockPort`](crate::test_utils::MockPort).

use crate::error::Result;
use crate::irp::ControlSetup;

/// Non-control transfer categories a pipe queue can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Bulk endpoint (storage, network adapters).
    Bulk,
    /// Interrupt endpoint (HID and other low-latency devices).
    Interrupt,
}

/// One physical device as seen by its request queues.
///
/// Implementations own the native handle. [`open`](DevicePort::open) is
/// idempotent and resolves the handle lazily. The queue never closes it;
/// closing is the device wrapper's responsibility.
///
/// The transfer methods perform exactly one synchronous exchange and return
/// the number of bytes transferred, or a negative platform error code. The
/// per-transfer timeout is enforced by the platform, not by the queue.
pub trait DevicePort: Send {
    /// Opens the native device handle if it is not open yet.
    fn open(&mut self) -> Result<()>;

    /// Whether the native handle is currently open.
    fn is_open(&self) -> bool;

    /// Performs one control exchange on the default endpoint.
    fn control_transfer(&mut self, setup: &ControlSetup, data: &mut [u8], timeout_ms: u32) -> i32;

    /// Performs one bulk or interrupt exchange on the given endpoint.
    /// Bit 7 of `endpoint` encodes the direction.
    fn endpoint_transfer(
        &mut self,
        endpoint: u8,
        kind: TransferKind,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> i32;
}
