#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which polls a vehicle's diagnostic controllers over one shared CAN bus
//! at a fixed cadence, decodes their proprietary responses into physical signals,
//! and delivers each decoded value to subscriber callbacks in near-real time.
//!
//! ## Polled controllers
//!
//! Four onboard controllers are queried, each addressable by a fixed 11-bit
//! identifier, with the reply arriving on identifier + 8:
//!
//! * Engine controller (0x7E0) - RPM, vehicle speed, total distance, accelerator fraction
//! * Anti-lock brake controller (0x760) - steering wheel angle, brake pressure
//! * Body control module (0x726) - ignition switch state
//! * Accessory interface (0x7D0) - GPS position (the only multi-frame response)
//!
//! ## Architecture
//!
//! The engine runs three cooperative activities sharing one transport handle:
//!
//! * A **sender** driven by a tick clock. Each tick it asks the [schedule]
//!   module which queries are due (a pure function of the tick counter) and
//!   writes them to the bus with a mandatory gap between sends, since all
//!   controllers share one physical bus.
//! * A **receiver** blocking on bus receipt. Every inbound frame goes through
//!   the [demux] module, which matches it against the [catalog] by identifier
//!   and byte prefix, reassembles multi-frame responses via [isotp], and
//!   produces decoded samples for the subscriber callbacks.
//! * A **monitor** comparing progress counters of the other two activities and
//!   escalating a stall to a full engine stop, so a half-dead system never
//!   silently serves stale data.
//!
//! Unmatched frames are expected noise from unrelated traffic sharing the bus
//! and are dropped silently. Subscribers only ever see successfully decoded
//! samples.

pub mod catalog;
pub mod channel;
pub mod demux;
pub mod engine;
pub mod hardware;
pub mod isotp;
pub mod schedule;

/// Polling engine result
pub type PollerResult<T> = Result<T, PollerError>;

#[derive(Debug, thiserror::Error)]
/// Polling engine error
pub enum PollerError {
    /// The engine was asked to start while its activities are still running
    #[error("polling engine is already running")]
    AlreadyRunning,
    /// A schedule entry violates the period/phase invariant
    #[error("schedule entry for {signal} is invalid: period {period}, phase {phase}")]
    InvalidSchedule {
        /// Signal the offending entry refers to
        signal: catalog::Signal,
        /// Tick count between sends
        period: u32,
        /// Tick offset at which sends occur
        phase: u32,
    },
    /// Error with the underlying communication channel
    #[error("communication channel error")]
    Channel(
        #[from]
        #[source]
        channel::ChannelError,
    ),
}
