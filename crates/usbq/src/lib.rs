//! Per-device USB request queues
//!
//! This crate gives client code a blocking-looking request object (an IRP)
//! while the actual transfer runs asynchronously on a dedicated per-device
//! worker, providing:
//! - at most one in-flight transfer per device at a time
//! - strict FIFO completion order
//! - cooperative abort with a bounded grace period
//! - an accurate busy query for lifecycle decisions such as safe removal
//!
//! The queue engine is generic; control and endpoint-pipe specializations
//! plug in through [`IrpHandler`]. The actual transfer primitives live
//! behind the [`DevicePort`] trait (see the `usbq-rusb` crate for the
//! libusb-backed implementation).
//!
//! A request discarded by [`IrpQueue::abort`] never signals completion;
//! callers waiting on an IRP must always race the wait against their own
//! deadline ([`Irp::wait`] takes one for exactly that reason).

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod irp;
pub mod logging;
pub mod pipe;
pub mod port;
pub mod queue;
pub mod test_utils;

pub use config::UsbConfig;
pub use control::ControlHandler;
pub use error::{Result, UsbError};
pub use events::{EventSink, TransferEvent, event_channel};
pub use irp::{ControlIrp, ControlSetup, Irp};
pub use logging::setup_logging;
pub use pipe::PipeHandler;
pub use port::{DevicePort, TransferKind};
pub use queue::{ABORT_GRACE, IrpHandler, IrpQueue, QueuedIrp};
