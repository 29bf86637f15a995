//! rusb device port
//!
//! Wraps one `rusb::Device` behind [`usbq::DevicePort`]. Opening detaches
//! kernel drivers and claims the active configuration's interfaces; the
//! queue never closes the handle, so [`RusbPort::close`] is exposed for the
//! device wrapper that owns this port.

use rusb::constants::{
    LIBUSB_ERROR_ACCESS, LIBUSB_ERROR_BUSY, LIBUSB_ERROR_INTERRUPTED, LIBUSB_ERROR_INVALID_PARAM,
    LIBUSB_ERROR_IO, LIBUSB_ERROR_NOT_FOUND, LIBUSB_ERROR_NOT_SUPPORTED, LIBUSB_ERROR_NO_DEVICE,
    LIBUSB_ERROR_NO_MEM, LIBUSB_ERROR_OTHER, LIBUSB_ERROR_OVERFLOW, LIBUSB_ERROR_PIPE,
    LIBUSB_ERROR_TIMEOUT,
};
use rusb::{Context, Device, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};
use usbq::{ControlSetup, DevicePort, TransferKind, UsbError};

/// Maps a rusb error back to its numeric `LIBUSB_ERROR_*` code.
pub fn error_code(err: rusb::Error) -> i32 {
    match err {
        rusb::Error::Io => LIBUSB_ERROR_IO,
        rusb::Error::InvalidParam => LIBUSB_ERROR_INVALID_PARAM,
        rusb::Error::Access => LIBUSB_ERROR_ACCESS,
        rusb::Error::NoDevice => LIBUSB_ERROR_NO_DEVICE,
        rusb::Error::NotFound => LIBUSB_ERROR_NOT_FOUND,
        rusb::Error::Busy => LIBUSB_ERROR_BUSY,
        rusb::Error::Timeout => LIBUSB_ERROR_TIMEOUT,
        rusb::Error::Overflow => LIBUSB_ERROR_OVERFLOW,
        rusb::Error::Pipe => LIBUSB_ERROR_PIPE,
        rusb::Error::Interrupted => LIBUSB_ERROR_INTERRUPTED,
        rusb::Error::NoMem => LIBUSB_ERROR_NO_MEM,
        rusb::Error::NotSupported => LIBUSB_ERROR_NOT_SUPPORTED,
        _ => LIBUSB_ERROR_OTHER,
    }
}

/// One physical device opened through libusb.
pub struct RusbPort {
    device: Device<Context>,
    handle: Option<DeviceHandle<Context>>,
    claimed_interfaces: Vec<u8>,
}

impl RusbPort {
    pub fn new(device: Device<Context>) -> Self {
        Self {
            device,
            handle: None,
            claimed_interfaces: Vec::new(),
        }
    }

    /// Close the device: release claimed interfaces, reattach kernel
    /// drivers, drop the handle. Called by the owning device wrapper once
    /// its queues are drained, never by a queue.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            for interface in &self.claimed_interfaces {
                if let Err(e) = handle.release_interface(*interface) {
                    warn!("failed to release interface {}: {}", interface, e);
                }
                if let Err(e) = handle.attach_kernel_driver(*interface) {
                    debug!(
                        "could not reattach kernel driver to interface {}: {}",
                        *interface, e
                    );
                }
            }
            self.claimed_interfaces.clear();
            debug!("closed device");
        }
    }

    fn transfer_timeout(timeout_ms: u32) -> Duration {
        Duration::from_millis(u64::from(timeout_ms))
    }
}

impl DevicePort for RusbPort {
    fn open(&mut self) -> usbq::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self
            .device
            .open()
            .map_err(|e| UsbError::platform("Unable to open device", error_code(e)))?;

        let config = self
            .device
            .active_config_descriptor()
            .map_err(|e| UsbError::platform("Unable to read active configuration", error_code(e)))?;

        // Claims are tracked locally: if any claim fails, dropping the
        // handle releases the earlier ones, so no stale bookkeeping remains.
        let mut claimed = Vec::new();
        for interface in config.interfaces() {
            let interface_number = interface.number();

            match handle.kernel_driver_active(interface_number) {
                Ok(true) => {
                    debug!("detaching kernel driver from interface {}", interface_number);
                    if let Err(e) = handle.detach_kernel_driver(interface_number) {
                        warn!(
                            "failed to detach kernel driver from interface {}: {}",
                            interface_number, e
                        );
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "could not check kernel driver status for interface {}: {}",
                        interface_number, e
                    );
                }
            }

            handle
                .claim_interface(interface_number)
                .map_err(|e| UsbError::platform("Unable to claim interface", error_code(e)))?;
            claimed.push(interface_number);
        }

        debug!("opened device with {} claimed interfaces", claimed.len());
        self.claimed_interfaces = claimed;
        self.handle = Some(handle);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn control_transfer(&mut self, setup: &ControlSetup, data: &mut [u8], timeout_ms: u32) -> i32 {
        let Some(handle) = self.handle.as_mut() else {
            return LIBUSB_ERROR_NO_DEVICE;
        };
        let timeout = Self::transfer_timeout(timeout_ms);

        // Bit 7 of bmRequestType is the direction: 1 = IN, 0 = OUT.
        let result = if setup.request_type & 0x80 != 0 {
            handle.read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
        } else {
            handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
        };

        match result {
            Ok(len) => len as i32,
            Err(e) => error_code(e),
        }
    }

    fn endpoint_transfer(
        &mut self,
        endpoint: u8,
        kind: TransferKind,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> i32 {
        let Some(handle) = self.handle.as_mut() else {
            return LIBUSB_ERROR_NO_DEVICE;
        };
        let timeout = Self::transfer_timeout(timeout_ms);
        let is_in = endpoint & 0x80 != 0;

        let result = match (kind, is_in) {
            (TransferKind::Bulk, true) => handle.read_bulk(endpoint, data, timeout),
            (TransferKind::Bulk, false) => handle.write_bulk(endpoint, data, timeout),
            (TransferKind::Interrupt, true) => handle.read_interrupt(endpoint, data, timeout),
            (TransferKind::Interrupt, false) => handle.write_interrupt(endpoint, data, timeout),
        };

        match result {
            Ok(len) => len as i32,
            Err(e) => error_code(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(error_code(rusb::Error::Io), -1);
        assert_eq!(error_code(rusb::Error::Timeout), -7);
        assert_eq!(error_code(rusb::Error::Pipe), -9);
        assert_eq!(error_code(rusb::Error::NoDevice), -4);
        assert_eq!(error_code(rusb::Error::Other), -99);
    }

    #[test]
    fn test_all_codes_are_negative() {
        let errors = [
            rusb::Error::Io,
            rusb::Error::InvalidParam,
            rusb::Error::Access,
            rusb::Error::NoDevice,
            rusb::Error::NotFound,
            rusb::Error::Busy,
            rusb::Error::Timeout,
            rusb::Error::Overflow,
            rusb::Error::Pipe,
            rusb::Error::Interrupted,
            rusb::Error::NoMem,
            rusb::Error::NotSupported,
            rusb::Error::Other,
        ];
        for e in errors {
            assert!(error_code(e) < 0, "{:?} must map to a negative code", e);
        }
    }

    #[test]
    fn test_control_direction_bit() {
        // Bit 7 = 1 means IN (device to host).
        assert!(0x80u8 & 0x80 != 0);
        assert!(0x21u8 & 0x80 == 0);
    }
}
