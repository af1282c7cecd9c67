use crate::queue::EventConsumer;
use crate::serial::SerialChannel;
use jack::Frames;
use nix::libc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Bounded wait on the wake signal, so the shutdown flag is observed even
/// with no traffic.
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pacing window. Waits below the floor are not worth scheduling a sleep
/// for; waits above the ceiling mean the timestamp cannot be trusted and
/// the event is written immediately rather than stalling the queue.
const MIN_WAIT_US: u64 = 60;
const MAX_WAIT_US: u64 = 10_000;

/// Assumed fixed cost of the blocking write itself.
const WRITE_LATENCY_US: u64 = 50;

/// Delay before writing an event queued for `frame`, pacing consecutive
/// events by their frame distance so the serial line sees them with the
/// spacing the server produced them at.
///
/// `running_delta` carries the pacing state across events of one wake and
/// resets whenever an event is already due.
fn pace_delay(
    frame: Frames,
    cycle_start: Frames,
    running_delta: &mut Frames,
    sample_rate: usize,
) -> Option<Duration> {
    if frame <= cycle_start {
        *running_delta = 0;
        return None;
    }
    let delta = (frame - cycle_start).wrapping_sub(*running_delta);
    *running_delta = delta;
    let usec = u64::from(delta) * 1_000_000 / sample_rate as u64;
    if usec > MIN_WAIT_US && usec < MAX_WAIT_US {
        Some(Duration::from_micros(usec - WRITE_LATENCY_US))
    } else {
        None
    }
}

/// Best effort; unprivileged processes usually cannot raise their
/// scheduling class, and the bridge works without it.
fn promote_to_realtime() {
    let param = libc::sched_param { sched_priority: 80 };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        debug!("SCHED_FIFO scheduling not available (error {rc})");
    }
}

/// Dedicated thread draining the server->serial queue into the device.
///
/// It sleeps on the wake signal posted once per cycle by the process
/// callback, paces writes by the frame distance between queued events, and
/// performs the actual blocking writes.
pub struct SerialWriter {
    serial: Arc<SerialChannel>,
    events: EventConsumer,
    wake: Receiver<()>,
    reference_frame: Arc<AtomicU32>,
    sample_rate: usize,
    running: Arc<AtomicBool>,
}

impl SerialWriter {
    pub fn new(
        serial: Arc<SerialChannel>,
        events: EventConsumer,
        wake: Receiver<()>,
        reference_frame: Arc<AtomicU32>,
        sample_rate: usize,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            serial,
            events,
            wake,
            reference_frame,
            sample_rate,
            running,
        }
    }

    pub fn work(mut self) {
        promote_to_realtime();
        while self.running.load(Ordering::Relaxed) {
            match self.wake.recv_timeout(WAKE_TIMEOUT) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let cycle_start = self.reference_frame.load(Ordering::Relaxed);
            let mut running_delta: Frames = 0;
            while let Some(event) = self.events.pop() {
                if let Some(wait) = pace_delay(
                    event.frame,
                    cycle_start,
                    &mut running_delta,
                    self.sample_rate,
                ) {
                    thread::sleep(wait);
                }
                if let Err(err) = self.serial.write_all(event.data()) {
                    error!("serial write failed: {err}");
                }
            }
        }
        debug!("serial writer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 48_000;

    #[test]
    fn due_events_write_immediately_and_reset_pacing() {
        let mut delta = 77;
        assert_eq!(pace_delay(1000, 1000, &mut delta, RATE), None);
        assert_eq!(delta, 0);
        assert_eq!(pace_delay(900, 1000, &mut delta, RATE), None);
        assert_eq!(delta, 0);
    }

    #[test]
    fn near_future_event_sleeps_minus_write_latency() {
        let mut delta = 0;
        // 96 frames at 48 kHz is 2000 us.
        let wait = pace_delay(1096, 1000, &mut delta, RATE).unwrap();
        assert_eq!(wait, Duration::from_micros(2000 - WRITE_LATENCY_US));
        assert_eq!(delta, 96);
    }

    #[test]
    fn consecutive_events_pace_relative_to_each_other() {
        let mut delta = 0;
        pace_delay(1096, 1000, &mut delta, RATE).unwrap();
        // Second event 96 frames later: another 2000 us, not 4000.
        let wait = pace_delay(1192, 1000, &mut delta, RATE).unwrap();
        assert_eq!(wait, Duration::from_micros(2000 - WRITE_LATENCY_US));
    }

    #[test]
    fn tiny_waits_skip_the_sleep() {
        let mut delta = 0;
        // 2 frames at 48 kHz is ~41 us, under the floor.
        assert_eq!(pace_delay(1002, 1000, &mut delta, RATE), None);
    }

    #[test]
    fn far_future_event_writes_immediately() {
        let mut delta = 0;
        // One full second ahead: outside the trustworthy window.
        assert_eq!(pace_delay(49_000, 1000, &mut delta, RATE), None);
    }
}
