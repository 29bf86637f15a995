//! I/O request packets
//!
//! An IRP describes one pending USB operation: a buffer window to transfer,
//! policy flags, and the eventual outcome (actual length or error) plus a
//! completion signal. IRPs are cheap cloneable handles over shared state:
//! the caller keeps one clone to wait on while the queue worker mutates the
//! other. After enqueue, only the worker writes to an IRP; once the
//! completion signal is set it is never mutated again.

use crate::error::UsbError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Setup-packet parameters of a control request.
///
/// Field names follow the USB specification (bmRequestType, bRequest,
/// wValue, wIndex).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// Request type byte (bmRequestType). Bit 7 encodes the direction.
    pub request_type: u8,
    /// Request byte (bRequest).
    pub request: u8,
    /// Value parameter (wValue).
    pub value: u16,
    /// Index parameter (wIndex).
    pub index: u16,
}

impl ControlSetup {
    /// Creates a setup packet.
    pub fn new(request_type: u8, request: u8, value: u16, index: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
        }
    }
}

/// Mutable request state, guarded by the IRP's mutex.
#[derive(Debug)]
struct IrpState {
    /// Caller-visible buffer.
    data: Vec<u8>,
    /// Transferred byte count. Set exactly once, after the primitive returns.
    actual_length: Option<usize>,
    /// Error captured by the worker, if any.
    error: Option<UsbError>,
    /// Completion flag. Set exactly once, strictly after processing ends.
    complete: bool,
    /// Whether a short packet completes this request successfully.
    accept_short_packet: bool,
}

#[derive(Debug)]
struct IrpShared {
    state: Mutex<IrpState>,
    completion: Condvar,
    // Window into `data`; fixed at construction.
    offset: usize,
    length: usize,
}

/// A generic I/O request packet.
///
/// Created by the caller, enqueued on an [`IrpQueue`](crate::queue::IrpQueue),
/// mutated only by the queue's worker, and waited on via [`Irp::wait`].
///
/// An IRP discarded by [`abort`](crate::queue::IrpQueue::abort) never
/// completes; always pair waits with a deadline.
#[derive(Debug, Clone)]
pub struct Irp {
    shared: Arc<IrpShared>,
}

impl Irp {
    /// Creates an IRP whose window covers the whole buffer.
    pub fn new(data: Vec<u8>) -> Self {
        let length = data.len();
        Self::build(data, 0, length)
    }

    /// Creates an IRP transferring `length` bytes starting at `offset`.
    ///
    /// Fails fast with [`UsbError::InvalidRange`] if the window does not fit
    /// inside the buffer.
    pub fn with_range(data: Vec<u8>, offset: usize, length: usize) -> Result<Self, UsbError> {
        if offset.checked_add(length).is_none_or(|end| end > data.len()) {
            return Err(UsbError::InvalidRange {
                offset,
                length,
                capacity: data.len(),
            });
        }
        Ok(Self::build(data, offset, length))
    }

    fn build(data: Vec<u8>, offset: usize, length: usize) -> Self {
        Self {
            shared: Arc::new(IrpShared {
                state: Mutex::new(IrpState {
                    data,
                    actual_length: None,
                    error: None,
                    complete: false,
                    accept_short_packet: false,
                }),
                completion: Condvar::new(),
                offset,
                length,
            }),
        }
    }

    /// Opts in to (or out of) short packets. Call before enqueueing.
    pub fn set_accept_short_packet(&self, accept: bool) {
        self.shared.state.lock().unwrap().accept_short_packet = accept;
    }

    /// Whether a short packet completes this request successfully.
    pub fn accepts_short_packet(&self) -> bool {
        self.shared.state.lock().unwrap().accept_short_packet
    }

    /// Start of the transfer window.
    pub fn offset(&self) -> usize {
        self.shared.offset
    }

    /// Requested transfer length.
    pub fn length(&self) -> usize {
        self.shared.length
    }

    /// Bytes actually transferred. `None` until the primitive has returned.
    pub fn actual_length(&self) -> Option<usize> {
        self.shared.state.lock().unwrap().actual_length
    }

    /// The error captured while processing this request, if any.
    pub fn error(&self) -> Option<UsbError> {
        self.shared.state.lock().unwrap().error.clone()
    }

    /// Whether processing has finished (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().unwrap().complete
    }

    /// Snapshot of the caller-visible buffer.
    pub fn data(&self) -> Vec<u8> {
        self.shared.state.lock().unwrap().data.clone()
    }

    /// Blocks until the request completes or the deadline elapses. Returns
    /// true if the request completed.
    ///
    /// A request discarded by an aborting queue never completes, so a wait
    /// without an external deadline could block forever; this method
    /// deliberately has no untimed variant.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while !state.complete {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, result) = self
                .shared
                .completion
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
            if result.timed_out() && !state.complete {
                return false;
            }
        }
        true
    }

    /// Copies the window out into a transfer buffer of exactly the requested
    /// length. Worker-side.
    pub(crate) fn copy_payload(&self) -> Vec<u8> {
        let state = self.shared.state.lock().unwrap();
        state.data[self.shared.offset..self.shared.offset + self.shared.length].to_vec()
    }

    /// Copies transferred bytes back into the window and records the actual
    /// length. Worker-side; called at most once per request.
    pub(crate) fn write_back(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock().unwrap();
        let n = bytes.len().min(self.shared.length);
        let offset = self.shared.offset;
        state.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        debug_assert!(state.actual_length.is_none());
        state.actual_length = Some(n);
    }

    /// Records a processing error. Worker-side.
    pub(crate) fn set_error(&self, error: UsbError) {
        self.shared.state.lock().unwrap().error = Some(error);
    }

    /// Sets the completion flag and wakes waiters. Worker-side; the finish
    /// hook runs only after this, so observers see final state.
    pub(crate) fn mark_complete(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.complete = true;
        self.shared.completion.notify_all();
    }
}

/// A control-transfer request packet: setup parameters plus a generic IRP.
#[derive(Debug, Clone)]
pub struct ControlIrp {
    setup: ControlSetup,
    inner: Irp,
}

impl ControlIrp {
    /// Creates a control IRP whose window covers the whole buffer.
    pub fn new(setup: ControlSetup, data: Vec<u8>) -> Self {
        Self {
            setup,
            inner: Irp::new(data),
        }
    }

    /// Creates a control IRP over a buffer window.
    pub fn with_range(
        setup: ControlSetup,
        data: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> Result<Self, UsbError> {
        Ok(Self {
            setup,
            inner: Irp::with_range(data, offset, length)?,
        })
    }

    /// Opts in to (or out of) short packets. Call before enqueueing.
    pub fn set_accept_short_packet(&self, accept: bool) {
        self.inner.set_accept_short_packet(accept);
    }

    /// The setup-packet parameters.
    pub fn setup(&self) -> ControlSetup {
        self.setup
    }

    /// The underlying generic IRP.
    pub fn irp(&self) -> &Irp {
        &self.inner
    }

    /// See [`Irp::accepts_short_packet`].
    pub fn accepts_short_packet(&self) -> bool {
        self.inner.accepts_short_packet()
    }

    /// See [`Irp::offset`].
    pub fn offset(&self) -> usize {
        self.inner.offset()
    }

    /// See [`Irp::length`].
    pub fn length(&self) -> usize {
        self.inner.length()
    }

    /// See [`Irp::actual_length`].
    pub fn actual_length(&self) -> Option<usize> {
        self.inner.actual_length()
    }

    /// See [`Irp::error`].
    pub fn error(&self) -> Option<UsbError> {
        self.inner.error()
    }

    /// See [`Irp::is_complete`].
    pub fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    /// See [`Irp::data`].
    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }

    /// See [`Irp::wait`].
    pub fn wait(&self, timeout: Duration) -> bool {
        self.inner.wait(timeout)
    }
}

impl crate::queue::QueuedIrp for Irp {
    fn set_error(&self, error: UsbError) {
        Irp::set_error(self, error);
    }

    fn mark_complete(&self) {
        Irp::mark_complete(self);
    }
}

impl crate::queue::QueuedIrp for ControlIrp {
    fn set_error(&self, error: UsbError) {
        self.inner.set_error(error);
    }

    fn mark_complete(&self) {
        self.inner.mark_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(Irp::with_range(vec![0; 8], 4, 4).is_ok());
        let err = Irp::with_range(vec![0; 8], 4, 5).unwrap_err();
        assert_eq!(err, UsbError::InvalidRange {
            offset: 4,
            length: 5,
            capacity: 8,
        });
    }

    #[test]
    fn test_range_overflow_is_rejected() {
        assert!(Irp::with_range(vec![0; 8], usize::MAX, 2).is_err());
    }

    #[test]
    fn test_write_back_respects_window() {
        let irp = Irp::with_range(vec![0xAA; 8], 2, 4).unwrap();
        irp.write_back(&[1, 2, 3, 4]);
        assert_eq!(irp.data(), vec![0xAA, 0xAA, 1, 2, 3, 4, 0xAA, 0xAA]);
        assert_eq!(irp.actual_length(), Some(4));
    }

    #[test]
    fn test_copy_payload_uses_window() {
        let irp = Irp::with_range(vec![9, 8, 7, 6, 5], 1, 3).unwrap();
        assert_eq!(irp.copy_payload(), vec![8, 7, 6]);
    }

    #[test]
    fn test_completion_wakes_waiter() {
        let irp = Irp::new(vec![0; 4]);
        let waiter = irp.clone();
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(5)));
        assert!(!irp.is_complete());
        irp.mark_complete();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_times_out_without_completion() {
        let irp = Irp::new(vec![0; 4]);
        assert!(!irp.wait(Duration::from_millis(20)));
    }

    #[test]
    fn test_accept_short_packet_flag() {
        let irp = Irp::new(vec![0; 4]);
        assert!(!irp.accepts_short_packet());
        irp.set_accept_short_packet(true);
        assert!(irp.accepts_short_packet());
    }
}
