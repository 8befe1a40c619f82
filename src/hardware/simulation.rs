//! Simulation bus for unit testing the polling engine.
//!
//! Canned responses are keyed on the full outbound frame (identifier plus
//! data), mimicking controllers that answer fixed queries with fixed
//! replies. A multi-frame exchange is scripted by mapping the query to the
//! first frame and the engine's flow control frame to the continuation
//! burst.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::Duration;

use crate::channel::{CanChannel, CanFrame, ChannelError, ChannelResult};

/// In-memory CAN bus scripted with request/response pairs
#[derive(Debug, Default)]
pub struct SimulationCanChannel {
    responses: RwLock<HashMap<(u32, Vec<u8>), Vec<CanFrame>>>,
    rx_queue: Mutex<VecDeque<CanFrame>>,
    rx_signal: Condvar,
}

impl SimulationCanChannel {
    /// Creates an empty simulation bus. Queries with no scripted response
    /// are swallowed, like a controller that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the frames a controller emits in reply to `request`
    pub fn add_response(&self, request: &CanFrame, responses: Vec<CanFrame>) {
        self.responses
            .write()
            .unwrap()
            .insert((request.id(), request.data().to_vec()), responses);
    }

    /// Injects a frame as if an unrelated node transmitted it
    pub fn inject(&self, frame: CanFrame) {
        self.rx_queue.lock().unwrap().push_back(frame);
        self.rx_signal.notify_one();
    }
}

impl CanChannel for SimulationCanChannel {
    fn send(&self, frame: &CanFrame) -> ChannelResult<()> {
        let key = (frame.id(), frame.data().to_vec());
        if let Some(responses) = self.responses.read().unwrap().get(&key) {
            let mut queue = self.rx_queue.lock().unwrap();
            queue.extend(responses.iter().copied());
            self.rx_signal.notify_one();
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> ChannelResult<CanFrame> {
        let queue = self.rx_queue.lock().unwrap();
        let (mut queue, result) = self
            .rx_signal
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        if result.timed_out() && queue.is_empty() {
            return Err(ChannelError::ReadTimeout);
        }
        Ok(queue.pop_front().expect("queue cannot be empty here"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_response_is_delivered() {
        let bus = SimulationCanChannel::new();
        let req = CanFrame::new(0x7E0, &[0x02, 0x01, 0x0C, 0x55, 0x55, 0x55, 0x55, 0x55]);
        let resp = CanFrame::new(0x7E8, &[0x04, 0x41, 0x0C, 0x2E, 0xE0, 0x55, 0x55, 0x55]);
        bus.add_response(&req, vec![resp]);

        bus.send(&req).unwrap();
        assert_eq!(bus.receive(Duration::from_millis(10)).unwrap(), resp);
    }

    #[test]
    fn unscripted_query_times_out() {
        let bus = SimulationCanChannel::new();
        let req = CanFrame::new(0x7E0, &[0x02, 0x01, 0x0C, 0x55, 0x55, 0x55, 0x55, 0x55]);
        bus.send(&req).unwrap();
        assert!(matches!(
            bus.receive(Duration::from_millis(5)),
            Err(ChannelError::ReadTimeout)
        ));
    }

    #[test]
    fn injected_frames_arrive_in_order() {
        let bus = SimulationCanChannel::new();
        bus.inject(CanFrame::new(0x100, &[1]));
        bus.inject(CanFrame::new(0x101, &[2]));
        assert_eq!(bus.receive(Duration::from_millis(5)).unwrap().id(), 0x100);
        assert_eq!(bus.receive(Duration::from_millis(5)).unwrap().id(), 0x101);
    }
}
