use crate::parser::MidiParser;
use crate::queue::EventProducer;
use crate::serial::SerialChannel;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, trace};

/// Dedicated thread reading the serial device one byte at a time.
///
/// Reads stay blocking so a signal can interrupt them cleanly; every
/// complete message the parser emits is stamped with the server's
/// published frame time and queued toward the process callback.
pub struct SerialReader {
    serial: Arc<SerialChannel>,
    events: EventProducer,
    frame_clock: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
}

impl SerialReader {
    pub fn new(
        serial: Arc<SerialChannel>,
        events: EventProducer,
        frame_clock: Arc<AtomicU32>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            serial,
            events,
            frame_clock,
            running,
        }
    }

    pub fn work(mut self) {
        let mut parser = MidiParser::default();
        while self.running.load(Ordering::Relaxed) {
            let byte = match self.serial.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Transient device trouble: drop the partial message
                    // and start the parse over.
                    debug!("serial read failed: {err}");
                    parser = MidiParser::default();
                    continue;
                }
            };
            trace!("serial byte {byte:#04x}");
            if let Some(mut event) = parser.feed(byte) {
                event.frame = self.frame_clock.load(Ordering::Relaxed);
                if !self.events.push(event) {
                    debug!("serial input queue full, event dropped");
                }
            }
        }
        debug!("serial reader stopped");
    }
}
