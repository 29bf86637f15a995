//! libusb-backed device port for usbq
//!
//! Implements [`usbq::DevicePort`] over rusb, playing the "native transfer
//! primitive" role: one synchronous exchange per call, bytes transferred or
//! a negative `LIBUSB_ERROR_*` code as the result.

pub mod port;

pub use port::{RusbPort, error_code};
