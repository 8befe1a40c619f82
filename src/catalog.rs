//! Static signal catalog.
//!
//! One [SignalDefinition] per polled signal: the query frame bytes, the
//! controller it targets, the byte prefix identifying its response, and a
//! pure decode function mapping raw response bytes to a physical value.
//! The table is pure data - no mutation, no errors. Decode functions are
//! total over length-checked payloads; the demultiplexer verifies
//! [SignalDefinition::min_payload_len] before invoking them, so out-of-range
//! access inside a decode function is a defect, not a runtime fault.
//!
//! The identifier and byte values in this table are protocol constants of the
//! vehicle and must not be altered.

use crate::channel::{CanFrame, MAX_FRAME_DATA};
use strum_macros::{Display, EnumCount, EnumIter, EnumString};

/// Engine controller query identifier
pub const ENGINE_QUERY: u32 = 0x7E0;
/// Anti-lock brake controller query identifier
pub const ABS_QUERY: u32 = 0x760;
/// Body control module query identifier
pub const BODY_CONTROL_QUERY: u32 = 0x726;
/// Accessory interface controller query identifier
pub const ACCESSORY_QUERY: u32 = 0x7D0;

/// A controller replies on its query identifier plus this offset
pub const RESPONSE_OFFSET: u32 = 8;

/// Filler byte used to pad query frames to 8 bytes
pub const QUERY_PAD: u8 = 0x55;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumCount, EnumIter, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Logical name of a polled vehicle signal
pub enum Signal {
    /// Engine speed in revolutions per minute
    Rpm,
    /// Vehicle speed
    Speed,
    /// Total distance travelled (odometer)
    TotalDistance,
    /// Accelerator pedal position, 0.0 to 1.0
    AcceleratorFraction,
    /// Steering wheel angle in degrees, negative left of center
    SteeringAngle,
    /// Brake circuit pressure
    BrakePressure,
    /// Ignition switch position, raw enumerated state
    IgnitionSwitch,
    /// GPS position from the accessory interface
    GpsPosition,
}

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// A GPS fix decoded from the accessory interface
pub struct GpsPosition {
    /// Latitude in degrees, positive north
    pub latitude: f64,
    /// Longitude in degrees, positive east
    pub longitude: f64,
}

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// A decoded physical value, typed per signal
pub enum SignalValue {
    /// Engine speed in RPM
    Rpm(f32),
    /// Vehicle speed
    Speed(f32),
    /// Odometer reading
    TotalDistance(u32),
    /// Accelerator pedal position, 0.0 to 1.0
    AcceleratorFraction(f32),
    /// Steering wheel angle in degrees
    SteeringAngle(f32),
    /// Brake circuit pressure
    BrakePressure(f32),
    /// Raw ignition switch state byte
    IgnitionSwitch(u8),
    /// GPS fix
    Gps(GpsPosition),
}

#[derive(Debug, Copy, Clone, PartialEq)]
/// The most recent decoded value of one signal. Samples are overwritten in
/// place - there is no history buffer.
pub struct SignalSample {
    /// Which signal this sample belongs to
    pub signal: Signal,
    /// The decoded physical value
    pub value: SignalValue,
    /// Capture time
    pub timestamp: std::time::Instant,
}

#[derive(Clone, Copy)]
/// Immutable catalog entry for one polled signal
pub struct SignalDefinition {
    /// Logical signal this entry decodes to
    pub signal: Signal,
    /// Identifier of the request target
    pub controller_id: u32,
    /// Identifier of the expected reply (`controller_id` + 8)
    pub response_id: u32,
    /// Fixed byte sequence sent for this query
    pub request: [u8; MAX_FRAME_DATA],
    /// Byte sequence that must match at the start of a response payload.
    /// For the multi-frame signal this is the raw first-frame prefix.
    pub response_prefix: &'static [u8],
    /// Minimum payload length the decode function requires. For multi-frame
    /// signals this applies to the reassembled buffer.
    pub min_payload_len: usize,
    /// True only for responses exceeding one frame's payload capacity
    pub multiframe: bool,
    /// Pure decode function. Callers must length-check with
    /// [SignalDefinition::min_payload_len] first.
    pub decode: fn(&[u8]) -> SignalValue,
}

impl std::fmt::Debug for SignalDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDefinition")
            .field("signal", &self.signal)
            .field("controller_id", &self.controller_id)
            .field("response_id", &self.response_id)
            .field("multiframe", &self.multiframe)
            .finish()
    }
}

impl SignalDefinition {
    /// Builds the outbound query frame for this signal
    pub fn query_frame(&self) -> CanFrame {
        CanFrame::new(self.controller_id, &self.request)
    }
}

fn u16_be(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn i16_be(b: &[u8]) -> i16 {
    i16::from_be_bytes([b[0], b[1]])
}

fn decode_rpm(p: &[u8]) -> SignalValue {
    SignalValue::Rpm(u16_be(&p[3..5]) as f32 / 4.0)
}

fn decode_speed(p: &[u8]) -> SignalValue {
    SignalValue::Speed(u16_be(&p[4..6]) as f32 / 128.0)
}

fn decode_total_distance(p: &[u8]) -> SignalValue {
    let km = ((p[4] as u32) << 16) | ((p[5] as u32) << 8) | (p[6] as u32);
    SignalValue::TotalDistance(km)
}

fn decode_accelerator_fraction(p: &[u8]) -> SignalValue {
    SignalValue::AcceleratorFraction(p[4] as f32 / 255.0)
}

fn decode_steering_angle(p: &[u8]) -> SignalValue {
    // Raw value is offset-biased by 7800, tenths of a degree
    SignalValue::SteeringAngle((u16_be(&p[4..6]) as i32 - 7800) as f32 / 10.0)
}

fn decode_brake_pressure(p: &[u8]) -> SignalValue {
    SignalValue::BrakePressure(i16_be(&p[4..6]) as f32 * 30.0)
}

fn decode_ignition_switch(p: &[u8]) -> SignalValue {
    SignalValue::IgnitionSwitch(p[4])
}

// Operates on the reassembled buffer, which begins 62 80 12. Positions 7..9
// carry latitude and 11..13 longitude, both signed minutes.
fn decode_gps(p: &[u8]) -> SignalValue {
    SignalValue::Gps(GpsPosition {
        latitude: i16_be(&p[7..9]) as f64 / 60.0,
        longitude: i16_be(&p[11..13]) as f64 / 60.0,
    })
}

/// The signal catalog. Declaration order here is the order queries are sent
/// within one scheduler tick.
pub const CATALOG: &[SignalDefinition] = &[
    SignalDefinition {
        signal: Signal::Rpm,
        controller_id: ENGINE_QUERY,
        response_id: ENGINE_QUERY + RESPONSE_OFFSET,
        request: [0x02, 0x01, 0x0C, 0x55, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x04, 0x41, 0x0C],
        min_payload_len: 5,
        multiframe: false,
        decode: decode_rpm,
    },
    SignalDefinition {
        signal: Signal::Speed,
        controller_id: ENGINE_QUERY,
        response_id: ENGINE_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x15, 0x05, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x05, 0x62, 0x15, 0x05],
        min_payload_len: 6,
        multiframe: false,
        decode: decode_speed,
    },
    SignalDefinition {
        signal: Signal::TotalDistance,
        controller_id: ENGINE_QUERY,
        response_id: ENGINE_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0xDD, 0x01, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x06, 0x62, 0xDD, 0x01],
        min_payload_len: 7,
        multiframe: false,
        decode: decode_total_distance,
    },
    SignalDefinition {
        signal: Signal::AcceleratorFraction,
        controller_id: ENGINE_QUERY,
        response_id: ENGINE_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x03, 0x2B, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x04, 0x62, 0x03, 0x2B],
        min_payload_len: 5,
        multiframe: false,
        decode: decode_accelerator_fraction,
    },
    SignalDefinition {
        signal: Signal::SteeringAngle,
        controller_id: ABS_QUERY,
        response_id: ABS_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x33, 0x02, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x05, 0x62, 0x33, 0x02],
        min_payload_len: 6,
        multiframe: false,
        decode: decode_steering_angle,
    },
    SignalDefinition {
        signal: Signal::BrakePressure,
        controller_id: ABS_QUERY,
        response_id: ABS_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x20, 0x34, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x05, 0x62, 0x20, 0x34],
        min_payload_len: 6,
        multiframe: false,
        decode: decode_brake_pressure,
    },
    SignalDefinition {
        signal: Signal::IgnitionSwitch,
        controller_id: BODY_CONTROL_QUERY,
        response_id: BODY_CONTROL_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x41, 0x1F, 0x55, 0x55, 0x55, 0x55],
        response_prefix: &[0x04, 0x62, 0x41, 0x1F],
        min_payload_len: 5,
        multiframe: false,
        decode: decode_ignition_switch,
    },
    SignalDefinition {
        signal: Signal::GpsPosition,
        controller_id: ACCESSORY_QUERY,
        response_id: ACCESSORY_QUERY + RESPONSE_OFFSET,
        request: [0x03, 0x22, 0x80, 0x12, 0x55, 0x55, 0x55, 0x55],
        // First frame of the 18-byte multi-frame response
        response_prefix: &[0x10, 0x12, 0x62, 0x80, 0x12],
        min_payload_len: 13,
        multiframe: true,
        decode: decode_gps,
    },
];

/// Catalog entry for a logical signal name
pub fn definition(signal: Signal) -> &'static SignalDefinition {
    CATALOG
        .iter()
        .find(|d| d.signal == signal)
        .expect("catalog covers every signal")
}

/// Candidate definitions to test against an inbound payload's prefix, in
/// catalog declaration order
pub fn candidates(response_id: u32) -> impl Iterator<Item = &'static SignalDefinition> {
    CATALOG.iter().filter(move |d| d.response_id == response_id)
}
