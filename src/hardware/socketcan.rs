//! SocketCAN transport adapter (Linux only).
//!
//! Binds the polling engine to a real bus through a raw SocketCAN socket.
//! SocketCAN file descriptors are independently safe for concurrent reads
//! and writes, so one [SocketCanInterface] can serve the engine's sender
//! and receiver activities without extra locking.

use std::time::{Duration, Instant};

use socketcan::{CanDataFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};

use crate::channel::{CanChannel, CanFrame, ChannelError, ChannelResult};

/// A [CanChannel] over a raw SocketCAN interface such as `can0`
#[derive(Debug)]
pub struct SocketCanInterface {
    socket: CanSocket,
    iface: String,
}

impl SocketCanInterface {
    /// Opens the named network interface
    pub fn open(iface: &str) -> ChannelResult<Self> {
        let socket = CanSocket::open(iface)?;
        log::debug!("opened SocketCAN interface {iface}");
        Ok(Self {
            socket,
            iface: iface.to_string(),
        })
    }

    /// Name of the bound network interface
    pub fn interface_name(&self) -> &str {
        &self.iface
    }
}

impl CanChannel for SocketCanInterface {
    fn send(&self, frame: &CanFrame) -> ChannelResult<()> {
        let id = u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .ok_or(ChannelError::UnsupportedRequest)?;
        let out = CanDataFrame::new(id, frame.data()).ok_or(ChannelError::UnsupportedRequest)?;
        self.socket.write_frame(&out)?;
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> ChannelResult<CanFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::ReadTimeout);
            }
            self.socket.set_read_timeout(remaining)?;
            match self.socket.read_frame() {
                // Remote and error frames are not diagnostic traffic; keep
                // waiting for a data frame until the deadline
                Ok(socketcan::CanFrame::Data(df)) => {
                    return Ok(CanFrame::new(df.raw_id(), df.data()));
                }
                Ok(_) => continue,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(ChannelError::ReadTimeout);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
