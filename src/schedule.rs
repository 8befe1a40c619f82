//! Deterministic poll scheduler.
//!
//! Different signals need different refresh rates - steering angle every
//! tick, the engine quartet round-robined, ignition and odometer rarely,
//! GPS rarer still - while the bus load stays bounded and predictable. A
//! signal with `period` and `phase` is queried at exactly the ticks where
//! `tick % period == phase`. All periods are small integers, so the whole
//! pattern repeats every lcm of the periods; no priority queue is needed.
//!
//! Selection is a pure function of the tick counter with no hidden state,
//! which keeps it independently testable. The scheduler performs no I/O;
//! the dispatch loop writes the returned queries to the transport with a
//! mandatory gap between sends on the same tick.

use crate::catalog::{self, Signal, SignalDefinition};
use crate::{PollerError, PollerResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Cadence of one signal: queried whenever `tick % period == phase`
pub struct ScheduleEntry {
    /// Signal to query
    pub signal: Signal,
    /// Tick count between sends
    pub period: u32,
    /// Tick offset at which sends occur, `0 <= phase < period`
    pub phase: u32,
}

/// The production cadence: steering every tick; RPM, speed, brake pressure
/// and accelerator round-robined across four ticks; ignition and odometer
/// on long periods; GPS rarest.
pub const DEFAULT_SCHEDULE: &[ScheduleEntry] = &[
    ScheduleEntry { signal: Signal::SteeringAngle, period: 1, phase: 0 },
    ScheduleEntry { signal: Signal::Rpm, period: 4, phase: 0 },
    ScheduleEntry { signal: Signal::Speed, period: 4, phase: 1 },
    ScheduleEntry { signal: Signal::BrakePressure, period: 4, phase: 2 },
    ScheduleEntry { signal: Signal::AcceleratorFraction, period: 4, phase: 3 },
    ScheduleEntry { signal: Signal::IgnitionSwitch, period: 21, phase: 0 },
    ScheduleEntry { signal: Signal::TotalDistance, period: 99, phase: 0 },
    ScheduleEntry { signal: Signal::GpsPosition, period: 199, phase: 0 },
];

#[derive(Debug, Clone)]
/// A validated set of [ScheduleEntry] values
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Validates and wraps a set of entries. Every entry must have a nonzero
    /// period and a phase below it.
    pub fn new(entries: Vec<ScheduleEntry>) -> PollerResult<Self> {
        for e in &entries {
            if e.period == 0 || e.phase >= e.period {
                return Err(PollerError::InvalidSchedule {
                    signal: e.signal,
                    period: e.period,
                    phase: e.phase,
                });
            }
        }
        Ok(Self { entries })
    }

    /// The signals due on tick `i`, in catalog declaration order. Pure:
    /// the output depends only on `i` and the schedule contents.
    pub fn due(&self, tick: u64) -> Vec<&'static SignalDefinition> {
        catalog::CATALOG
            .iter()
            .filter(|def| {
                self.entries.iter().any(|e| {
                    e.signal == def.signal && tick % u64::from(e.period) == u64::from(e.phase)
                })
            })
            .collect()
    }

    /// The configured entries
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SCHEDULE.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_valid() {
        Schedule::new(DEFAULT_SCHEDULE.to_vec()).unwrap();
    }

    #[test]
    fn phase_must_be_below_period() {
        let err = Schedule::new(vec![ScheduleEntry {
            signal: Signal::Rpm,
            period: 4,
            phase: 4,
        }])
        .unwrap_err();
        assert!(matches!(err, PollerError::InvalidSchedule { .. }));

        assert!(
            Schedule::new(vec![ScheduleEntry {
                signal: Signal::Rpm,
                period: 0,
                phase: 0,
            }])
            .is_err()
        );
    }

    #[test]
    fn output_is_deterministic() {
        let s = Schedule::default();
        for tick in 1..500 {
            let a: Vec<Signal> = s.due(tick).iter().map(|d| d.signal).collect();
            let b: Vec<Signal> = s.due(tick).iter().map(|d| d.signal).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn signals_fire_at_exactly_their_ticks() {
        let s = Schedule::default();
        for tick in 1..=1000u64 {
            let due: Vec<Signal> = s.due(tick).iter().map(|d| d.signal).collect();
            for e in DEFAULT_SCHEDULE {
                let expected = tick % u64::from(e.period) == u64::from(e.phase);
                assert_eq!(
                    due.contains(&e.signal),
                    expected,
                    "{} at tick {tick}",
                    e.signal
                );
            }
        }
    }

    #[test]
    fn steering_is_queried_every_tick() {
        let s = Schedule::default();
        for tick in 1..200 {
            assert!(s.due(tick).iter().any(|d| d.signal == Signal::SteeringAngle));
        }
    }

    #[test]
    fn due_follows_catalog_order() {
        let s = Schedule::default();
        // Tick 4: steering (every tick) and rpm (4/0) are both due; the
        // catalog declares rpm before steering
        let due: Vec<Signal> = s.due(4).iter().map(|d| d.signal).collect();
        assert_eq!(due, vec![Signal::Rpm, Signal::SteeringAngle]);
    }

    #[test]
    fn engine_quartet_round_robins() {
        let s = Schedule::default();
        // Within any four consecutive ticks each quartet member fires once
        for base in [1u64, 101, 397] {
            let mut seen = vec![];
            for tick in base..base + 4 {
                for d in s.due(tick) {
                    if matches!(
                        d.signal,
                        Signal::Rpm
                            | Signal::Speed
                            | Signal::BrakePressure
                            | Signal::AcceleratorFraction
                    ) {
                        seen.push(d.signal);
                    }
                }
            }
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), 4, "window at {base}");
        }
    }
}
