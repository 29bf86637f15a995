//! Test utilities
//!
//! Mock implementations and helpers for testing queue behavior without USB
//! hardware.

use crate::error::{Result, UsbError};
use crate::irp::ControlSetup;
use crate::port::{DevicePort, TransferKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockPortState {
    /// Scripted return codes, consumed one per transfer. When empty, a
    /// transfer reports the full buffer length.
    results: Mutex<VecDeque<i32>>,
    /// Bytes written into the transfer buffer on each exchange.
    reply: Mutex<Vec<u8>>,
    /// Artificial per-transfer processing time.
    delay: Mutex<Duration>,
    /// wValue (control) or endpoint (pipe) of each processed transfer, in
    /// execution order.
    processed: Mutex<Vec<u16>>,
    /// Error the next `open` calls fail with, if any.
    open_error: Mutex<Option<UsbError>>,
    /// Timeout passed to the most recent transfer.
    last_timeout: Mutex<Option<u32>>,
    open_calls: AtomicUsize,
    transfer_calls: AtomicUsize,
    open: AtomicBool,
    in_flight: AtomicBool,
    overlap_detected: AtomicBool,
}

/// Scripted [`DevicePort`] for tests.
///
/// Cloning returns a handle to the same state, so a test can keep a view
/// on the port after moving it into a handler.
#[derive(Clone, Default)]
pub struct MockPort {
    state: Arc<MockPortState>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the return code of the next transfers, first in first out.
    pub fn push_result(&self, result: i32) {
        self.state.results.lock().unwrap().push_back(result);
    }

    /// Sets the bytes every transfer writes into its buffer.
    pub fn set_reply(&self, reply: Vec<u8>) {
        *self.state.reply.lock().unwrap() = reply;
    }

    /// Makes every transfer take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Makes `open` fail with the given error until cleared with `None`.
    pub fn fail_open(&self, error: Option<UsbError>) {
        *self.state.open_error.lock().unwrap() = error;
    }

    /// Timeout passed to the most recent transfer, if any ran.
    pub fn last_timeout(&self) -> Option<u32> {
        *self.state.last_timeout.lock().unwrap()
    }

    /// Tags of processed transfers (wValue for control, endpoint for pipe),
    /// in execution order.
    pub fn processed(&self) -> Vec<u16> {
        self.state.processed.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    pub fn transfer_calls(&self) -> usize {
        self.state.transfer_calls.load(Ordering::SeqCst)
    }

    /// Whether two transfers ever ran concurrently on this port.
    pub fn overlap_detected(&self) -> bool {
        self.state.overlap_detected.load(Ordering::SeqCst)
    }

    fn transfer(&self, tag: u16, data: &mut [u8], timeout_ms: u32) -> i32 {
        *self.state.last_timeout.lock().unwrap() = Some(timeout_ms);
        if self.state.in_flight.swap(true, Ordering::SeqCst) {
            self.state.overlap_detected.store(true, Ordering::SeqCst);
        }

        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.state.transfer_calls.fetch_add(1, Ordering::SeqCst);
        self.state.processed.lock().unwrap().push(tag);

        let reply = self.state.reply.lock().unwrap();
        let n = reply.len().min(data.len());
        data[..n].copy_from_slice(&reply[..n]);
        drop(reply);

        let result = self
            .state
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(data.len() as i32);

        self.state.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

impl DevicePort for MockPort {
    fn open(&mut self) -> Result<()> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.open_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.state.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn control_transfer(&mut self, setup: &ControlSetup, data: &mut [u8], timeout_ms: u32) -> i32 {
        self.transfer(setup.value, data, timeout_ms)
    }

    fn endpoint_transfer(
        &mut self,
        endpoint: u8,
        _kind: TransferKind,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> i32 {
        self.transfer(endpoint as u16, data, timeout_ms)
    }
}
