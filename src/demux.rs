//! Response demultiplexer.
//!
//! Matches inbound frames to catalog entries purely by identifier and byte
//! prefix. Responses may arrive interleaved and out of request order;
//! cross-signal reordering is harmless because no matching state spans
//! frames except the one multi-frame reassembly context, which the
//! demultiplexer owns exclusively.

use std::time::{Duration, Instant};

use automotive_diag::uds::UdsErrorByte;

use crate::catalog::{self, SignalDefinition, SignalSample};
use crate::channel::CanFrame;
use crate::isotp::{CONSECUTIVE_FRAME, FRAME_TYPE_MASK, Reassembly, ReassemblyStep, flow_control_frame};

/// UDS negative response service id
const NEGATIVE_RESPONSE: u8 = 0x7F;

#[derive(Debug, Clone, Copy)]
/// What the demultiplexer made of one inbound frame
pub enum FrameDisposition {
    /// Frame matched nothing, or was absorbed into an ongoing reassembly.
    /// Nothing to do.
    Ignored,
    /// A complete response was decoded
    Decoded(SignalSample),
    /// A first frame was accepted; this flow control frame must be written
    /// to the bus to authorize the continuation burst
    FlowControl(CanFrame),
}

#[derive(Debug)]
/// Stateful frame-to-sample matcher. One instance, owned by the receiver
/// activity; no internal locking.
pub struct Demultiplexer {
    reassembly: Reassembly,
    reassembly_timeout: Duration,
}

impl Demultiplexer {
    /// Creates a demultiplexer. `reassembly_timeout` bounds how long an
    /// incomplete multi-frame exchange may sit before being discarded.
    pub fn new(reassembly_timeout: Duration) -> Self {
        Self {
            reassembly: Reassembly::default(),
            reassembly_timeout,
        }
    }

    /// True while a multi-frame exchange is in progress
    pub fn reassembly_active(&self) -> bool {
        self.reassembly.is_active()
    }

    /// Discards a multi-frame exchange that has been incomplete for longer
    /// than the configured timeout. The receiver calls this every loop turn
    /// so an abandoned exchange cannot linger past its bound.
    pub fn expire_stale(&mut self) {
        if self.reassembly.is_active() && self.reassembly.expired(self.reassembly_timeout) {
            log::warn!("multi-frame reassembly timed out, discarding partial data");
            self.reassembly.reset();
        }
    }

    /// Matches one inbound frame against the catalog.
    ///
    /// Frames on identifiers the catalog does not know are dropped without
    /// touching any state. On a known identifier, a single-frame prefix match
    /// decodes immediately; a first-frame match opens the reassembly context
    /// and asks the caller to send flow control; a consecutive frame feeds
    /// the context. Desynchronization (wrong sequence nibble, or a
    /// consecutive marker on a different known identifier mid-reassembly)
    /// resets the context and is logged as a recoverable decode miss.
    pub fn on_frame(&mut self, frame: &CanFrame) -> FrameDisposition {
        self.expire_stale();

        let payload = frame.data();
        if payload.is_empty() {
            return FrameDisposition::Ignored;
        }

        let mut known_id = false;
        for def in catalog::candidates(frame.id()) {
            known_id = true;
            if !payload.starts_with(def.response_prefix) {
                continue;
            }
            if def.multiframe {
                if self.reassembly.is_active() {
                    log::warn!(
                        "first frame for {} while reassembly in progress, restarting",
                        def.signal
                    );
                }
                self.reassembly.begin(def, payload);
                return FrameDisposition::FlowControl(flow_control_frame(def.controller_id));
            }
            if payload.len() < def.min_payload_len {
                log::debug!("short {} response ({} bytes), dropped", def.signal, payload.len());
                return FrameDisposition::Ignored;
            }
            return FrameDisposition::Decoded(Self::sample(def, payload));
        }
        if !known_id {
            // Unrelated traffic sharing the bus. Expected noise.
            return FrameDisposition::Ignored;
        }

        if payload[0] & FRAME_TYPE_MASK == CONSECUTIVE_FRAME {
            if let Some(active_id) = self.reassembly.active_id() {
                if frame.id() != active_id {
                    log::warn!(
                        "consecutive frame on 0x{:03X} while reassembling from 0x{:03X}, resetting",
                        frame.id(),
                        active_id
                    );
                    self.reassembly.reset();
                    return FrameDisposition::Ignored;
                }
                match self.reassembly.absorb(payload) {
                    ReassemblyStep::Incomplete => return FrameDisposition::Ignored,
                    ReassemblyStep::Complete {
                        definition,
                        payload,
                    } => {
                        if payload.len() < definition.min_payload_len {
                            log::warn!("reassembled {} response too short, dropped", definition.signal);
                            return FrameDisposition::Ignored;
                        }
                        return FrameDisposition::Decoded(Self::sample(definition, &payload));
                    }
                    ReassemblyStep::Desync => {
                        log::warn!("out-of-sequence consecutive frame on 0x{:03X}, resetting", frame.id());
                        return FrameDisposition::Ignored;
                    }
                }
            }
        }

        // A controller rejecting one of our queries is worth a log line,
        // but no sample is emitted for that cycle
        if payload.len() >= 4 && payload[1] == NEGATIVE_RESPONSE {
            log::debug!(
                "controller 0x{:03X} rejected service 0x{:02X}: {:?}",
                frame.id(),
                payload[2],
                UdsErrorByte::from(payload[3])
            );
        }
        FrameDisposition::Ignored
    }

    fn sample(def: &'static SignalDefinition, payload: &[u8]) -> SignalSample {
        SignalSample {
            signal: def.signal,
            value: (def.decode)(payload),
            timestamp: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GpsPosition, Signal, SignalValue};

    fn demux() -> Demultiplexer {
        Demultiplexer::new(Duration::from_millis(200))
    }

    fn decoded(d: FrameDisposition) -> SignalSample {
        match d {
            FrameDisposition::Decoded(s) => s,
            other => panic!("expected a sample, got {other:?}"),
        }
    }

    #[test]
    fn steering_angle_end_to_end() {
        let mut dm = demux();
        let frame = CanFrame::new(0x768, &[0x05, 0x62, 0x33, 0x02, 0x1F, 0x78, 0x55, 0x55]);
        let sample = decoded(dm.on_frame(&frame));
        assert_eq!(sample.signal, Signal::SteeringAngle);
        match sample.value {
            SignalValue::SteeringAngle(deg) => assert!((deg - 25.6).abs() < 1e-4),
            other => panic!("wrong value {other:?}"),
        }
    }

    #[test]
    fn brake_pressure_end_to_end() {
        let mut dm = demux();
        let frame = CanFrame::new(0x768, &[0x05, 0x62, 0x20, 0x34, 0xFF, 0xCE, 0x55, 0x55]);
        let sample = decoded(dm.on_frame(&frame));
        assert_eq!(sample.value, SignalValue::BrakePressure(-1500.0));
    }

    #[test]
    fn unknown_id_is_dropped_without_state_change() {
        let mut dm = demux();
        // Open a reassembly, then throw unrelated traffic at it
        dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        assert!(dm.reassembly_active());
        let noise = CanFrame::new(0x123, &[0x21, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00]);
        assert!(matches!(dm.on_frame(&noise), FrameDisposition::Ignored));
        assert!(dm.reassembly_active());
    }

    #[test]
    fn wrong_prefix_is_dropped() {
        let mut dm = demux();
        let frame = CanFrame::new(0x7E8, &[0x05, 0x62, 0x99, 0x99, 0x00, 0x00, 0x55, 0x55]);
        assert!(matches!(dm.on_frame(&frame), FrameDisposition::Ignored));
    }

    #[test]
    fn gps_reassembles_to_one_sample() {
        let mut dm = demux();
        let first = dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        match first {
            FrameDisposition::FlowControl(fc) => {
                assert_eq!(fc.id(), 0x7D0);
                assert_eq!(fc.data()[0], 0x30);
            }
            other => panic!("expected flow control, got {other:?}"),
        }

        let cf1 = CanFrame::new(0x7D8, &[0x21, 0x00, 0x00, 0x3C, 0x00, 0x00, 0xFF, 0xD8]);
        assert!(matches!(dm.on_frame(&cf1), FrameDisposition::Ignored));

        let cf2 = CanFrame::new(0x7D8, &[0x22, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x55, 0x55]);
        let sample = decoded(dm.on_frame(&cf2));
        assert_eq!(sample.signal, Signal::GpsPosition);
        match sample.value {
            SignalValue::Gps(GpsPosition {
                latitude,
                longitude,
            }) => {
                assert!((latitude - 1.0).abs() < 1e-9);
                assert!((longitude + 40.0 / 60.0).abs() < 1e-9);
            }
            other => panic!("wrong value {other:?}"),
        }
        assert!(!dm.reassembly_active());
    }

    #[test]
    fn skipped_sequence_yields_no_sample_and_resets() {
        let mut dm = demux();
        dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        // Sequence 2 arrives where 1 was expected
        let bad = CanFrame::new(0x7D8, &[0x22, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00]);
        assert!(matches!(dm.on_frame(&bad), FrameDisposition::Ignored));
        assert!(!dm.reassembly_active());
    }

    #[test]
    fn consecutive_frame_on_other_known_id_resets() {
        let mut dm = demux();
        dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        // A consecutive marker on the ABS response id mid-reassembly
        let foreign = CanFrame::new(0x768, &[0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(dm.on_frame(&foreign), FrameDisposition::Ignored));
        assert!(!dm.reassembly_active());
    }

    #[test]
    fn single_frames_decode_during_reassembly() {
        let mut dm = demux();
        dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        // Regular polling traffic interleaves with the GPS burst
        let rpm = CanFrame::new(0x7E8, &[0x04, 0x41, 0x0C, 0x2E, 0xE0, 0x55, 0x55, 0x55]);
        let sample = decoded(dm.on_frame(&rpm));
        assert_eq!(sample.value, SignalValue::Rpm(3000.0));
        assert!(dm.reassembly_active());
    }

    #[test]
    fn stale_reassembly_is_discarded() {
        let mut dm = Demultiplexer::new(Duration::from_millis(20));
        dm.on_frame(&CanFrame::new(
            0x7D8,
            &[0x10, 0x12, 0x62, 0x80, 0x12, 0x00, 0x01, 0x02],
        ));
        assert!(dm.reassembly_active());
        std::thread::sleep(Duration::from_millis(30));
        dm.expire_stale();
        assert!(!dm.reassembly_active());

        // A late consecutive frame now matches nothing and is dropped
        let late = CanFrame::new(0x7D8, &[0x21, 0x00, 0x00, 0x3C, 0x00, 0x00, 0xFF, 0xD8]);
        assert!(matches!(dm.on_frame(&late), FrameDisposition::Ignored));
    }

    #[test]
    fn negative_response_is_dropped() {
        let mut dm = demux();
        let nack = CanFrame::new(0x7E8, &[0x03, 0x7F, 0x22, 0x31, 0x55, 0x55, 0x55, 0x55]);
        assert!(matches!(dm.on_frame(&nack), FrameDisposition::Ignored));
    }
}
