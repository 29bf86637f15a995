//! Request and configuration error types

use thiserror::Error;

/// Errors surfaced on IRPs or returned by the library.
///
/// Only [`UsbError::Platform`] and [`UsbError::ShortPacket`] are recorded on
/// an IRP by the queue worker; the remaining variants are reported at call
/// sites before a request ever reaches a worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsbError {
    /// The native transfer primitive returned a negative status code.
    #[error("USB error {code}: {message}")]
    Platform {
        /// The original platform error code (always negative).
        code: i32,
        /// Human-readable reason.
        message: String,
    },

    /// The transfer moved fewer bytes than requested and the request did not
    /// opt in to short packets.
    #[error("Short packet: transferred {actual} of {expected} bytes")]
    ShortPacket {
        /// Requested transfer length.
        expected: usize,
        /// Bytes actually transferred.
        actual: usize,
    },

    /// A buffer window does not fit inside its backing buffer.
    #[error("Invalid buffer range: offset {offset} + length {length} exceeds capacity {capacity}")]
    InvalidRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UsbError {
    /// Builds a platform error from a message and the native error code.
    pub fn platform(message: impl Into<String>, code: i32) -> Self {
        Self::Platform {
            code,
            message: message.into(),
        }
    }
}

/// Type alias for results carrying [`UsbError`].
pub type Result<T> = std::result::Result<T, UsbError>;
