//! Multi-frame reassembly in the ISO15765 style.
//!
//! Responses longer than one frame arrive as a first frame announcing the
//! total payload length, followed by consecutive frames carrying 7 bytes
//! each with a wrapping 4-bit sequence nibble. The receiving side authorizes
//! the continuation burst with a flow control frame.
//!
//! Only the accessory interface's GPS response is multi-frame in this
//! system, so a single reassembly context suffices. The state is an explicit
//! tagged enum - an exchange is either [Reassembly::Idle] or
//! [Reassembly::Active], and every reset path is spelled out, so stale
//! partial data can never leak across unrelated exchanges.

use std::time::{Duration, Instant};

use crate::catalog::{QUERY_PAD, SignalDefinition};
use crate::channel::{CanFrame, MAX_FRAME_DATA};

/// High-nibble mask selecting the frame type from the leading payload byte
pub const FRAME_TYPE_MASK: u8 = 0xF0;
/// First frame of a multi-frame response
pub const FIRST_FRAME: u8 = 0x10;
/// Continuation of a multi-frame response
pub const CONSECUTIVE_FRAME: u8 = 0x20;
/// Flow control authorizing a continuation burst
pub const FLOW_CONTROL: u8 = 0x30;

/// Data bytes a consecutive frame can carry after its sequence byte
const BYTES_PER_CONSECUTIVE: usize = 7;

#[derive(Debug)]
/// State of the one in-flight multi-frame exchange
pub enum Reassembly {
    /// No reassembly in progress
    Idle,
    /// A first frame has been seen and consecutive frames are expected
    Active {
        /// Catalog entry the first frame matched
        definition: &'static SignalDefinition,
        /// Total payload length announced by the first frame
        expected_len: usize,
        /// Bytes collected so far
        accumulated: Vec<u8>,
        /// Expected low nibble of the next consecutive frame (1..=15, then 0)
        next_sequence: u8,
        /// Time the last frame of this exchange was accepted
        last_frame: Instant,
    },
}

#[derive(Debug)]
/// Outcome of feeding a consecutive frame into an active reassembly
pub enum ReassemblyStep {
    /// Frame accepted, more bytes outstanding
    Incomplete,
    /// The announced length has been reached
    Complete {
        /// Catalog entry to decode the buffer with
        definition: &'static SignalDefinition,
        /// The reassembled payload, exactly the announced length
        payload: Vec<u8>,
    },
    /// Sequence nibble mismatch; the context has been reset
    Desync,
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::Idle
    }
}

impl Reassembly {
    /// True while an exchange is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Response identifier of the active exchange, if any
    pub fn active_id(&self) -> Option<u32> {
        match self {
            Self::Active { definition, .. } => Some(definition.response_id),
            Self::Idle => None,
        }
    }

    /// Discards any partial state
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }

    /// Starts an exchange from a first frame (`1L LL ..` where L is the
    /// 12-bit total length). Any previous partial state is discarded.
    pub fn begin(&mut self, definition: &'static SignalDefinition, payload: &[u8]) {
        let expected_len = (((payload[0] & 0x0F) as usize) << 8) | payload[1] as usize;
        let mut accumulated = Vec::with_capacity(expected_len);
        accumulated.extend_from_slice(&payload[2..payload.len().min(2 + expected_len)]);
        *self = Self::Active {
            definition,
            expected_len,
            accumulated,
            next_sequence: 1,
            last_frame: Instant::now(),
        };
    }

    /// Feeds one consecutive frame. The caller has already verified the frame
    /// type nibble and that the identifier matches [Reassembly::active_id].
    /// On any outcome but [ReassemblyStep::Incomplete] the context ends up
    /// [Reassembly::Idle].
    pub fn absorb(&mut self, payload: &[u8]) -> ReassemblyStep {
        match std::mem::take(self) {
            Self::Idle => ReassemblyStep::Desync,
            Self::Active {
                definition,
                expected_len,
                mut accumulated,
                next_sequence,
                ..
            } => {
                if payload[0] & 0x0F != next_sequence {
                    return ReassemblyStep::Desync;
                }
                let remaining = expected_len - accumulated.len();
                let count = remaining
                    .min(BYTES_PER_CONSECUTIVE)
                    .min(payload.len().saturating_sub(1));
                accumulated.extend_from_slice(&payload[1..1 + count]);

                if accumulated.len() == expected_len {
                    ReassemblyStep::Complete {
                        definition,
                        payload: accumulated,
                    }
                } else {
                    *self = Self::Active {
                        definition,
                        expected_len,
                        accumulated,
                        // Sequence nibble is 4 bits: 1..=15, then 0, then 1 again
                        next_sequence: (next_sequence + 1) & 0x0F,
                        last_frame: Instant::now(),
                    };
                    ReassemblyStep::Incomplete
                }
            }
        }
    }

    /// True if an active exchange has not progressed within `timeout`
    pub fn expired(&self, timeout: Duration) -> bool {
        match self {
            Self::Active { last_frame, .. } => last_frame.elapsed() >= timeout,
            Self::Idle => false,
        }
    }
}

/// Builds the flow control frame (`30 00 00`, block size 0 = send all,
/// st-min 0) authorizing a controller's continuation burst. Padded to 8
/// bytes with the bus's filler byte.
pub fn flow_control_frame(controller_id: u32) -> CanFrame {
    let mut data = [QUERY_PAD; MAX_FRAME_DATA];
    data[0] = FLOW_CONTROL;
    data[1] = 0x00;
    data[2] = 0x00;
    CanFrame::new(controller_id, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Signal, definition};

    fn gps() -> &'static SignalDefinition {
        definition(Signal::GpsPosition)
    }

    #[test]
    fn first_frame_parses_length_and_seeds_buffer() {
        let mut r = Reassembly::default();
        assert!(!r.is_active());
        r.begin(gps(), &[0x10, 0x12, 0x62, 0x80, 0x12, 0xA0, 0xA1, 0xA2]);
        match &r {
            Reassembly::Active {
                expected_len,
                accumulated,
                next_sequence,
                ..
            } => {
                assert_eq!(*expected_len, 18);
                assert_eq!(accumulated, &[0x62, 0x80, 0x12, 0xA0, 0xA1, 0xA2]);
                assert_eq!(*next_sequence, 1);
            }
            Reassembly::Idle => panic!("not active"),
        }
        assert_eq!(r.active_id(), Some(0x7D8));
    }

    #[test]
    fn completes_at_announced_length() {
        let mut r = Reassembly::default();
        r.begin(gps(), &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02]);
        assert!(matches!(
            r.absorb(&[0x21, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16]),
            ReassemblyStep::Incomplete
        ));
        // 13 of 18 bytes so far; this frame carries the last 5, trailing pad ignored
        match r.absorb(&[0x22, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x55, 0x55]) {
            ReassemblyStep::Complete {
                definition,
                payload,
            } => {
                assert_eq!(definition.signal, Signal::GpsPosition);
                assert_eq!(payload.len(), 18);
                assert_eq!(&payload[..3], &[0x62, 0x80, 0x12]);
                assert_eq!(&payload[13..], &[0x17, 0x18, 0x19, 0x1A, 0x1B]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(!r.is_active());
    }

    #[test]
    fn sequence_nibble_wraps_through_zero() {
        // 6 + 16 * 7 = 118 bytes: exactly 16 consecutive frames, so the
        // nibble must pass 15 -> 0 -> (done)
        let mut r = Reassembly::default();
        r.begin(gps(), &[0x10, 0x76, 0x62, 0x80, 0x12, 0x00, 0x00, 0x00]);
        for i in 0..16u8 {
            let seq = (i + 1) & 0x0F;
            let frame = [0x20 | seq, 0, 0, 0, 0, 0, 0, 0];
            match r.absorb(&frame) {
                ReassemblyStep::Incomplete => assert!(i < 15),
                ReassemblyStep::Complete { payload, .. } => {
                    assert_eq!(i, 15);
                    assert_eq!(payload.len(), 118);
                }
                ReassemblyStep::Desync => panic!("desync at frame {i}"),
            }
        }
    }

    #[test]
    fn skipped_sequence_resets() {
        let mut r = Reassembly::default();
        r.begin(gps(), &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02]);
        // Sequence 2 while 1 was expected
        assert!(matches!(
            r.absorb(&[0x22, 0, 0, 0, 0, 0, 0, 0]),
            ReassemblyStep::Desync
        ));
        assert!(!r.is_active());
    }

    #[test]
    fn stale_exchange_expires() {
        let mut r = Reassembly::default();
        r.begin(gps(), &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02]);
        assert!(!r.expired(Duration::from_millis(200)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(r.expired(Duration::from_millis(20)));
    }

    #[test]
    fn flow_control_frame_layout() {
        let f = flow_control_frame(0x7D0);
        assert_eq!(f.id(), 0x7D0);
        assert_eq!(f.data(), &[0x30, 0x00, 0x00, 0x55, 0x55, 0x55, 0x55, 0x55]);
    }
}
