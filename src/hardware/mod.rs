//! Concrete transport adapters implementing [crate::channel::CanChannel].
//!
//! The engine itself is transport-agnostic; these modules bind it to real
//! or simulated buses:
//! * [simulation] - an in-memory request/response bus for unit testing
//! * [socketcan] - Linux SocketCAN adapters (requires the `socketcan` feature)

pub mod simulation;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub mod socketcan;
