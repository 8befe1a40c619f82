//! Supervisory dispatch loop.
//!
//! [EcuPoller] owns the tick clock and three concurrent activities sharing
//! one transport handle:
//!
//! * the **sender**, which advances the tick counter, asks the schedule
//!   which queries are due, and writes them to the bus with a mandatory gap
//!   between sends;
//! * the **receiver**, which blocks on bus receipt, feeds every frame to the
//!   demultiplexer, and forwards decoded samples to the subscriber slots;
//! * the **monitor**, which watches both activities' progress counters and
//!   stops the whole engine if either stalls.
//!
//! Shutdown is advisory and cooperative: [EcuPoller::stop] clears the
//! running flag, which each activity observes at its next wake-up or
//! blocking-call return. A reassembly in progress at shutdown is discarded.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread;
use std::time::Duration;

use strum::EnumCount;

use crate::catalog::{GpsPosition, Signal, SignalSample, SignalValue};
use crate::channel::{CanChannel, ChannelError};
use crate::demux::{Demultiplexer, FrameDisposition};
use crate::schedule::Schedule;
use crate::{PollerError, PollerResult};

#[derive(Debug, Copy, Clone)]
/// Timing configuration of the dispatch loop
pub struct PollerOptions {
    /// Wall-clock length of one scheduler tick
    pub tick_interval: Duration,
    /// Minimum gap between two sends within the same tick. Mandatory:
    /// all controllers share one physical bus, and a request sent while the
    /// previous response is still on the wire corrupts arbitration.
    pub inter_send_gap: Duration,
    /// How long the receiver blocks on the bus before checking the running
    /// flag again. A timeout return counts as receiver progress.
    pub receive_timeout: Duration,
    /// Sampling interval of the liveness monitor. Must comfortably exceed
    /// both `tick_interval` and `receive_timeout`, otherwise a healthy
    /// activity is misread as stalled.
    pub monitor_interval: Duration,
    /// Bound on how long an incomplete multi-frame reassembly may linger
    pub reassembly_timeout: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            inter_send_gap: Duration::from_millis(2),
            receive_timeout: Duration::from_millis(250),
            monitor_interval: Duration::from_millis(500),
            reassembly_timeout: Duration::from_millis(200),
        }
    }
}

type Slot<T> = Option<Box<dyn FnMut(T) + Send>>;

/// One replaceable callback slot per signal. Replacing a slot takes effect
/// on the next decode; an unset slot is a no-op.
#[derive(Default)]
pub struct SubscriberRegistry {
    on_rpm: Slot<f32>,
    on_speed: Slot<f32>,
    on_total_distance: Slot<u32>,
    on_accelerator_fraction: Slot<f32>,
    on_steering_angle: Slot<f32>,
    on_brake_pressure: Slot<f32>,
    on_ignition_switch: Slot<u8>,
    on_gps_position: Slot<GpsPosition>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry").finish_non_exhaustive()
    }
}

impl SubscriberRegistry {
    fn dispatch(&mut self, value: &SignalValue) {
        match value {
            SignalValue::Rpm(v) => {
                if let Some(cb) = self.on_rpm.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::Speed(v) => {
                if let Some(cb) = self.on_speed.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::TotalDistance(v) => {
                if let Some(cb) = self.on_total_distance.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::AcceleratorFraction(v) => {
                if let Some(cb) = self.on_accelerator_fraction.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::SteeringAngle(v) => {
                if let Some(cb) = self.on_steering_angle.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::BrakePressure(v) => {
                if let Some(cb) = self.on_brake_pressure.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::IgnitionSwitch(v) => {
                if let Some(cb) = self.on_ignition_switch.as_mut() {
                    cb(*v)
                }
            }
            SignalValue::Gps(v) => {
                if let Some(cb) = self.on_gps_position.as_mut() {
                    cb(*v)
                }
            }
        }
    }
}

/// The polling engine.
///
/// ## Example
/// ```no_run
/// use std::sync::Arc;
/// use ecu_poller::engine::{EcuPoller, PollerOptions};
/// use ecu_poller::hardware::simulation::SimulationCanChannel;
/// use ecu_poller::schedule::Schedule;
///
/// let channel = Arc::new(SimulationCanChannel::new());
/// let poller = EcuPoller::new(channel, Schedule::default(), PollerOptions::default());
/// poller.set_on_rpm(|rpm| println!("engine at {rpm} RPM"));
/// poller.start().unwrap();
/// ```
pub struct EcuPoller {
    channel: Arc<dyn CanChannel>,
    schedule: Arc<Schedule>,
    opts: PollerOptions,
    running: Arc<AtomicBool>,
    subscribers: Arc<Mutex<SubscriberRegistry>>,
    latest: Arc<RwLock<[Option<SignalSample>; Signal::COUNT]>>,
}

impl std::fmt::Debug for EcuPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcuPoller")
            .field("opts", &self.opts)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl EcuPoller {
    /// Creates an engine over the given transport. Nothing is sent until
    /// [EcuPoller::start].
    pub fn new(channel: Arc<dyn CanChannel>, schedule: Schedule, opts: PollerOptions) -> Self {
        Self {
            channel,
            schedule: Arc::new(schedule),
            opts,
            running: Arc::new(AtomicBool::new(false)),
            subscribers: Arc::new(Mutex::new(SubscriberRegistry::default())),
            latest: Arc::new(RwLock::new([None; Signal::COUNT])),
        }
    }

    /// Begins all three activities.
    pub fn start(&self) -> PollerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PollerError::AlreadyRunning);
        }
        let sender_beat = Arc::new(AtomicU64::new(0));
        let receiver_beat = Arc::new(AtomicU64::new(0));

        self.spawn_sender(sender_beat.clone());
        self.spawn_receiver(receiver_beat.clone());
        self.spawn_monitor(sender_beat, receiver_beat);
        log::info!("polling engine started");
        Ok(())
    }

    /// Requests cooperative shutdown. Each activity observes the flag at its
    /// next wake-up or blocking-call return; in-flight work is discarded.
    pub fn stop(&self) {
        log::info!("polling engine stop requested");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the activities are (still) running. Becomes false after
    /// [EcuPoller::stop], and also when the monitor escalates a stall.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recent sample of `signal`, if one has been decoded yet
    pub fn latest(&self, signal: Signal) -> Option<SignalSample> {
        self.latest.read().unwrap()[signal as usize]
    }

    fn spawn_sender(&self, beat: Arc<AtomicU64>) {
        let running = self.running.clone();
        let channel = self.channel.clone();
        let schedule = self.schedule.clone();
        let opts = self.opts;
        thread::spawn(move || {
            let mut tick: u64 = 0;
            while running.load(Ordering::Relaxed) {
                thread::sleep(opts.tick_interval);
                tick += 1;
                for def in schedule.due(tick) {
                    if let Err(e) = channel.send(&def.query_frame()) {
                        log::warn!("query for {} not sent: {e}", def.signal);
                    }
                    // Let the controller's response vacate the shared bus
                    // before the next request
                    thread::sleep(opts.inter_send_gap);
                }
                beat.fetch_add(1, Ordering::Relaxed);
            }
            log::debug!("sender activity exited after {tick} ticks");
        });
    }

    fn spawn_receiver(&self, beat: Arc<AtomicU64>) {
        let running = self.running.clone();
        let channel = self.channel.clone();
        let subscribers = self.subscribers.clone();
        let latest = self.latest.clone();
        let opts = self.opts;
        thread::spawn(move || {
            let mut demux = Demultiplexer::new(opts.reassembly_timeout);
            while running.load(Ordering::Relaxed) {
                match channel.receive(opts.receive_timeout) {
                    Ok(frame) => match demux.on_frame(&frame) {
                        FrameDisposition::Decoded(sample) => {
                            latest.write().unwrap()[sample.signal as usize] = Some(sample);
                            subscribers.lock().unwrap().dispatch(&sample.value);
                        }
                        FrameDisposition::FlowControl(fc) => {
                            if let Err(e) = channel.send(&fc) {
                                // The exchange dies here; the reassembly
                                // context will hit its timeout
                                log::warn!("flow control not sent: {e}");
                            }
                        }
                        FrameDisposition::Ignored => {}
                    },
                    Err(ChannelError::ReadTimeout) => demux.expire_stale(),
                    Err(e) => log::warn!("bus receive error: {e}"),
                }
                beat.fetch_add(1, Ordering::Relaxed);
            }
            log::debug!("receiver activity exited");
        });
    }

    fn spawn_monitor(&self, sender_beat: Arc<AtomicU64>, receiver_beat: Arc<AtomicU64>) {
        let running = self.running.clone();
        let opts = self.opts;
        thread::spawn(move || {
            let mut last = (0u64, 0u64);
            loop {
                thread::sleep(opts.monitor_interval);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let now = (
                    sender_beat.load(Ordering::Relaxed),
                    receiver_beat.load(Ordering::Relaxed),
                );
                if now.0 == last.0 || now.1 == last.1 {
                    let which = if now.0 == last.0 { "sender" } else { "receiver" };
                    log::error!("{which} activity made no progress, stopping engine");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                last = now;
            }
            log::debug!("monitor activity exited");
        });
    }

    /// Sets the RPM handler
    pub fn set_on_rpm<F: FnMut(f32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_rpm = Some(Box::new(f));
    }

    /// Sets the vehicle speed handler
    pub fn set_on_speed<F: FnMut(f32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_speed = Some(Box::new(f));
    }

    /// Sets the odometer handler
    pub fn set_on_total_distance<F: FnMut(u32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_total_distance = Some(Box::new(f));
    }

    /// Sets the accelerator fraction handler
    pub fn set_on_accelerator_fraction<F: FnMut(f32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_accelerator_fraction = Some(Box::new(f));
    }

    /// Sets the steering wheel angle handler
    pub fn set_on_steering_angle<F: FnMut(f32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_steering_angle = Some(Box::new(f));
    }

    /// Sets the brake pressure handler
    pub fn set_on_brake_pressure<F: FnMut(f32) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_brake_pressure = Some(Box::new(f));
    }

    /// Sets the ignition switch handler
    pub fn set_on_ignition_switch<F: FnMut(u8) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_ignition_switch = Some(Box::new(f));
    }

    /// Sets the GPS position handler
    pub fn set_on_gps_position<F: FnMut(GpsPosition) + Send + 'static>(&self, f: F) {
        self.subscribers.lock().unwrap().on_gps_position = Some(Box::new(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn registry_dispatches_to_matching_slot() {
        let mut reg = SubscriberRegistry::default();
        let (tx, rx) = mpsc::channel();
        reg.on_rpm = Some(Box::new(move |v| tx.send(v).unwrap()));

        // Unset slots are a no-op
        reg.dispatch(&SignalValue::Speed(42.0));
        assert!(rx.try_recv().is_err());

        reg.dispatch(&SignalValue::Rpm(900.0));
        assert_eq!(rx.try_recv().unwrap(), 900.0);
    }

    #[test]
    fn replacing_a_slot_takes_effect() {
        let mut reg = SubscriberRegistry::default();
        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();
        reg.on_brake_pressure = Some(Box::new(move |v| tx1.send(v).unwrap()));
        reg.on_brake_pressure = Some(Box::new(move |v| tx2.send(v).unwrap()));

        reg.dispatch(&SignalValue::BrakePressure(-1500.0));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), -1500.0);
    }

    #[test]
    fn default_options_keep_monitor_slowest() {
        let opts = PollerOptions::default();
        assert!(opts.monitor_interval > opts.tick_interval);
        assert!(opts.monitor_interval > opts.receive_timeout);
        assert!(opts.inter_send_gap < opts.tick_interval);
    }
}
