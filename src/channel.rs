//! Module for the raw CAN transport boundary.
//!
//! The polling engine only ever talks to the bus through the [CanChannel]
//! trait: a handle offering `send` and a blocking `receive` with timeout.
//! Concrete adapters live in [crate::hardware]. Sends and receives may be
//! issued concurrently from two threads; an implementation whose underlying
//! API is not independently safe for that must serialize them internally.

use std::time::Duration;

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    #[error("IO error")]
    IOError(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// Timeout when writing data to the channel
    #[error("timeout writing to channel")]
    WriteTimeout,
    /// Timeout when reading from the channel
    #[error("timeout reading from channel")]
    ReadTimeout,
    /// The channel cannot represent the request (invalid identifier or length)
    #[error("unsupported channel request")]
    UnsupportedRequest,
    /// The interface is not open
    #[error("channel's interface is not open")]
    InterfaceNotOpen,
    /// Underlying API error with hardware
    #[error("underlying {api_name} API error ({code}): {desc}")]
    APIError {
        /// Name of the API EG: 'socketCAN'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
}

/// Maximum data length of a classic CAN frame
pub const MAX_FRAME_DATA: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A classic CAN frame: an 11-bit identifier and up to 8 data bytes
pub struct CanFrame {
    id: u32,
    dlc: usize,
    data: [u8; MAX_FRAME_DATA],
}

impl CanFrame {
    /// Creates a new CAN frame. Data beyond 8 bytes is truncated.
    pub fn new(id: u32, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_FRAME_DATA);
        let mut d = [0u8; MAX_FRAME_DATA];
        d[..dlc].copy_from_slice(&data[..dlc]);
        Self { id, dlc, data: d }
    }

    /// Identifier of the frame
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Data bytes of the frame
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc]
    }
}

/// Handle to a shared CAN bus.
///
/// The polling engine's sender and receiver activities hold one handle via
/// [std::sync::Arc] and call [CanChannel::send] and [CanChannel::receive]
/// concurrently, so implementations take `&self` and must be [Send] + [Sync].
pub trait CanChannel: Send + Sync {
    /// Writes one frame to the bus.
    fn send(&self, frame: &CanFrame) -> ChannelResult<()>;

    /// Blocks until the next inbound frame arrives, or `timeout` elapses
    /// ([ChannelError::ReadTimeout]).
    fn receive(&self, timeout: Duration) -> ChannelResult<CanFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_truncates_to_dlc() {
        let f = CanFrame::new(0x7E8, &[0x04, 0x41, 0x0C, 0x2E, 0xE0]);
        assert_eq!(f.id(), 0x7E8);
        assert_eq!(f.data(), &[0x04, 0x41, 0x0C, 0x2E, 0xE0]);

        let long = CanFrame::new(0x100, &[0u8; 12]);
        assert_eq!(long.data().len(), MAX_FRAME_DATA);
    }
}
